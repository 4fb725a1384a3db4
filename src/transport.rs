//! Transport abstraction.
//!
//! The STOMP core never touches a socket. It asks a [`Connector`] for a
//! [`Transport`] on every `open()`, and the transport reports what happens to
//! it by pushing [`TransportEvent`]s into the channel it was given. Production
//! uses [`crate::ws::WsConnector`]; tests use an in-memory connector.
//!
//! Event order on the channel is the order the client observes. The
//! transport owns any buffering between `send` and the wire.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::StompError;

/// Sender half handed to a transport for reporting its events.
pub type TransportEvents = mpsc::UnboundedSender<TransportEvent>;

/// Everything a connector needs to open a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    /// WebSocket URL (`ws://` or `wss://`).
    pub url: String,
    /// HTTP headers for the upgrade request.
    pub headers: BTreeMap<String, String>,
    /// Accept any server certificate. Connectors may not support this.
    pub trust_all_certificates: bool,
}

impl ConnectRequest {
    /// Request for `url` with no extra headers.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: BTreeMap::new(),
            trust_all_certificates: false,
        }
    }

    /// Add an HTTP header to the upgrade request.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Set whether untrusted certificates are accepted.
    #[must_use]
    pub fn trust_all_certificates(mut self, trust: bool) -> Self {
        self.trust_all_certificates = trust;
        self
    }
}

/// Something that happened on a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Handshake finished; `send` is now accepted.
    Open,
    /// A text message arrived.
    Text(String),
    /// A binary message arrived.
    Binary(Vec<u8>),
    /// The transport failed.
    Error(String),
    /// The transport closed.
    Closed {
        /// WebSocket close code (1000 = normal, 1006 = abnormal).
        code: u16,
        /// Human-readable close reason.
        reason: String,
        /// Whether the closing handshake completed.
        clean: bool,
    },
    /// A pong arrived.
    Pong(Vec<u8>),
}

/// An open (or opening) connection to the broker.
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Whether the transport currently accepts `send`.
    fn is_open(&self) -> bool;

    /// Send one text message.
    ///
    /// # Errors
    ///
    /// Returns `StompError::Transport` if the transport rejects the message.
    fn send(&self, text: &str) -> Result<(), StompError>;

    /// Start closing the transport. Idempotent.
    fn close(&self);
}

/// Factory for transports.
pub trait Connector: Send + Sync + std::fmt::Debug {
    /// Begin opening a transport for `request`.
    ///
    /// Returns immediately. The transport reports `Open`, messages, errors
    /// and closure through `events`.
    fn open(&self, request: &ConnectRequest, events: TransportEvents) -> Arc<dyn Transport>;
}
