//! stomp-ws - STOMP 1.1/1.2 client over a pluggable WebSocket transport.
//!
//! This crate provides a STOMP client for publishing to and subscribing on a
//! message broker, running transactions and acknowledging deliveries.
//!
//! # Architecture
//!
//! - **Codec** - encodes outbound frames, decodes inbound WebSocket messages
//! - **Session** - pure connection state machine (CONNECT/CONNECTED,
//!   heartbeats, error and disconnect handling)
//! - **Client** - command API; drives the session from transport events
//! - **Dispatcher** - delivers events to the application on one task
//! - **Transport** - `Connector`/`Transport` traits; [`ws`] implements them
//!   with `tokio-tungstenite`
//!
//! # Modules
//!
//! - [`client`] - [`StompClient`] and its command API
//! - [`codec`] - wire encoding and decoding
//! - [`session`] - connection state machine
//! - [`reconnect`] - reconnection supervisor
//! - [`config`] - configuration loading for the `stompws` binary

pub mod client;
pub mod codec;
pub mod config;
pub mod constants;
pub mod dispatcher;
pub mod error;
pub mod frame;
pub mod reconnect;
pub mod session;
pub mod transport;
pub mod ws;

// Re-export commonly used types
pub use client::StompClient;
pub use config::Config;
pub use dispatcher::{Event, EventSink, Message};
pub use error::StompError;
pub use frame::{AckMode, Command, Frame, Headers};
pub use reconnect::ReconnectOptions;
pub use session::ConnectionState;
pub use transport::{ConnectRequest, Connector, Transport, TransportEvent, TransportEvents};
