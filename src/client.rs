//! STOMP client.
//!
//! [`StompClient`] owns the connection state and exposes the command API.
//! Each `open()` acquires a transport from the [`Connector`] and spawns a
//! driver task that feeds the transport's events through the [`Session`]
//! state machine, executes the resulting actions and forwards notifications
//! to the [`Dispatcher`].
//!
//! # Deadlock Prevention
//!
//! Shared state sits behind a `std::sync::Mutex` that is only held while the
//! state machine runs. Transport sends and closes happen after the guard is
//! released, and user callbacks run on the dispatcher task, so a callback may
//! freely call back into the client.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use stomp_ws::{ConnectRequest, EventSink, Message, StompClient};
//!
//! struct Printer;
//!
//! impl EventSink for Printer {
//!     fn on_connected(&self) {}
//!     fn on_disconnected(&self) {}
//!     fn on_message(&self, message: Message) {
//!         println!("{}: {}", message.destination, message.body);
//!     }
//!     fn on_error(&self, message: &str, _detail: Option<&str>) {
//!         eprintln!("error: {message}");
//!     }
//! }
//!
//! # async fn run() {
//! let sink = Arc::new(Printer);
//! let client = StompClient::websocket();
//! client.open(ConnectRequest::new("ws://localhost:61614/stomp"), &sink, None);
//! # }
//! ```

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::constants::{header, DEFAULT_CONTENT_TYPE, JSON_CONTENT_TYPE};
use crate::dispatcher::{Dispatcher, EventSink};
use crate::error::StompError;
use crate::frame::{AckMode, Command, Frame, Headers};
use crate::reconnect::{spawn_after, spawn_supervisor, ReconnectOptions, TaskHandle, Tick};
use crate::session::{ConnectionState, Session, SessionAction};
use crate::transport::{ConnectRequest, Connector, Transport, TransportEvent};
use crate::ws::WsConnector;

/// A STOMP client bound to one connector.
///
/// Dropping the client cancels its reconnect and auto-disconnect tasks and
/// closes the transport without notifying the sink.
pub struct StompClient {
    inner: Arc<Inner>,
}

struct Inner {
    connector: Arc<dyn Connector>,
    shared: Mutex<Shared>,
}

#[derive(Default)]
struct Shared {
    session: Session,
    transport: Option<Arc<dyn Transport>>,
    dispatcher: Option<Dispatcher>,
    request: Option<ConnectRequest>,
    reconnect: Option<TaskHandle>,
    auto_disconnect: Option<TaskHandle>,
}

impl StompClient {
    /// Create a client that opens transports through `connector`.
    #[must_use]
    pub fn new(connector: impl Connector + 'static) -> Self {
        Self::with_connector(Arc::new(connector))
    }

    /// Create a client sharing an existing connector.
    #[must_use]
    pub fn with_connector(connector: Arc<dyn Connector>) -> Self {
        Self {
            inner: Arc::new(Inner {
                connector,
                shared: Mutex::new(Shared::default()),
            }),
        }
    }

    /// Create a client using the bundled WebSocket transport.
    #[must_use]
    pub fn websocket() -> Self {
        Self::new(WsConnector)
    }

    /// Open a connection to `request.url` and report to `sink`.
    ///
    /// `headers` are merged into the CONNECT frame on top of the
    /// `accept-version` default. Does nothing while a connection is open or
    /// opening. The client keeps only a weak reference to `sink`; every open
    /// of the same client shares one notification task.
    ///
    /// Must be called inside a tokio runtime.
    pub fn open<S>(&self, request: ConnectRequest, sink: &Arc<S>, headers: Option<Headers>)
    where
        S: EventSink + 'static,
    {
        let sink: Weak<S> = Arc::downgrade(sink);
        let sink: Weak<dyn EventSink> = sink;

        let mut shared = self.inner.lock();
        if shared.session.state() != ConnectionState::Disconnected {
            log::debug!(
                "[Stomp] open() ignored, connection is {:?}",
                shared.session.state()
            );
            return;
        }
        shared.request = Some(request);
        let dispatcher = match &shared.dispatcher {
            Some(current) => current.with_sink(sink),
            None => Dispatcher::spawn(sink),
        };
        shared.dispatcher = Some(dispatcher);
        self.inner.start(shared, headers.unwrap_or_default());
    }

    /// Whether the transport is open and CONNECTED was received.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        let shared = self.inner.lock();
        shared.session.state() == ConnectionState::Connected
            && shared.transport.as_ref().is_some_and(|t| t.is_open())
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.lock().session.state()
    }

    /// Session id assigned by the broker, if connected.
    #[must_use]
    pub fn session_id(&self) -> Option<String> {
        self.inner.lock().session.session_id().map(str::to_string)
    }

    /// Send `message` to `destination`.
    ///
    /// Sets `destination` and `content-length`, defaults `content-type` to
    /// `text/plain`, and requests a receipt when `receipt` is given.
    ///
    /// # Errors
    ///
    /// `NotConnected` if the transport is not open (the sink also gets
    /// `on_disconnected`), or `Transport` if the transport rejects the frame.
    pub fn send(
        &self,
        message: &str,
        destination: &str,
        headers: Option<Headers>,
        receipt: Option<&str>,
    ) -> Result<(), StompError> {
        let mut frame = Frame::new(Command::Send).headers(headers.unwrap_or_default());
        if let Some(receipt) = receipt {
            frame.headers.insert(header::RECEIPT.into(), receipt.into());
        }
        frame
            .headers
            .entry(header::CONTENT_TYPE.into())
            .or_insert_with(|| DEFAULT_CONTENT_TYPE.into());
        let frame = frame
            .header(header::DESTINATION, destination)
            .header(header::CONTENT_LENGTH, message.len().to_string())
            .body(message);
        self.transmit(frame)
    }

    /// Serialize `value` as JSON and send it to `destination`.
    ///
    /// # Errors
    ///
    /// `Serialization` if `value` cannot be encoded, otherwise as [`send`](Self::send).
    pub fn send_json<T>(&self, value: &T, destination: &str) -> Result<(), StompError>
    where
        T: Serialize + ?Sized,
    {
        let body = serde_json::to_string(value)?;
        let mut headers = Headers::new();
        headers.insert(header::CONTENT_TYPE.into(), JSON_CONTENT_TYPE.into());
        self.send(&body, destination, Some(headers), None)
    }

    /// Subscribe to `destination`; the subscription id is the destination.
    ///
    /// # Errors
    ///
    /// As [`send`](Self::send).
    pub fn subscribe(&self, destination: &str, ack: AckMode) -> Result<(), StompError> {
        let frame = Frame::new(Command::Subscribe)
            .header(header::DESTINATION, destination)
            .header(header::ACK, ack.as_str())
            .header(header::ID, destination);
        self.transmit(frame)
    }

    /// Subscribe to `destination` in auto ack mode.
    ///
    /// # Errors
    ///
    /// As [`send`](Self::send).
    pub fn subscribe_auto(&self, destination: &str) -> Result<(), StompError> {
        self.subscribe(destination, AckMode::Auto)
    }

    /// Subscribe with caller-supplied headers. `destination` always wins over
    /// a `destination` entry in `headers`.
    ///
    /// # Errors
    ///
    /// As [`send`](Self::send).
    pub fn subscribe_with_headers(
        &self,
        destination: &str,
        headers: Headers,
    ) -> Result<(), StompError> {
        let frame = Frame::new(Command::Subscribe)
            .headers(headers)
            .header(header::DESTINATION, destination);
        self.transmit(frame)
    }

    /// Cancel the subscription with the given id.
    ///
    /// # Errors
    ///
    /// As [`send`](Self::send).
    pub fn unsubscribe(&self, id: &str) -> Result<(), StompError> {
        self.transmit(Frame::new(Command::Unsubscribe).header(header::ID, id))
    }

    /// Start a transaction.
    ///
    /// # Errors
    ///
    /// As [`send`](Self::send).
    pub fn begin(&self, transaction: &str) -> Result<(), StompError> {
        self.transmit(Frame::new(Command::Begin).header(header::TRANSACTION, transaction))
    }

    /// Commit a transaction.
    ///
    /// # Errors
    ///
    /// As [`send`](Self::send).
    pub fn commit(&self, transaction: &str) -> Result<(), StompError> {
        self.transmit(Frame::new(Command::Commit).header(header::TRANSACTION, transaction))
    }

    /// Roll back a transaction.
    ///
    /// # Errors
    ///
    /// As [`send`](Self::send).
    pub fn abort(&self, transaction: &str) -> Result<(), StompError> {
        self.transmit(Frame::new(Command::Abort).header(header::TRANSACTION, transaction))
    }

    /// Acknowledge a message, optionally naming its subscription.
    ///
    /// # Errors
    ///
    /// As [`send`](Self::send).
    pub fn ack(&self, message_id: &str, subscription: Option<&str>) -> Result<(), StompError> {
        let mut frame = Frame::new(Command::Ack).header(header::ID, message_id);
        if let Some(subscription) = subscription {
            frame = frame.header(header::SUBSCRIPTION, subscription);
        }
        self.transmit(frame)
    }

    /// Send DISCONNECT, close the transport and notify the sink once.
    ///
    /// Also cancels any reconnect supervisor and pending auto-disconnect.
    pub fn disconnect(&self) {
        self.inner.disconnect();
    }

    /// Start re-opening the connection whenever it is found down.
    ///
    /// Replaces any previously scheduled supervisor.
    ///
    /// # Errors
    ///
    /// `NoEndpoint` if `open()` has never been called.
    pub fn schedule_reconnect(&self, options: ReconnectOptions) -> Result<(), StompError> {
        let weak = Arc::downgrade(&self.inner);

        let mut shared = self.inner.lock();
        if shared.request.is_none() {
            return Err(StompError::NoEndpoint);
        }
        log::info!(
            "[Stomp] Reconnect supervisor every {:?} (backoff {})",
            options.interval,
            options.backoff
        );
        let supervisor = spawn_supervisor(options, move |headers| {
            let Some(inner) = weak.upgrade() else {
                return Tick::Gone;
            };
            let shared = inner.lock();
            match shared.session.state() {
                ConnectionState::Connected => Tick::Up,
                ConnectionState::Disconnected => {
                    inner.start(shared, headers.clone());
                    Tick::Down
                }
                _ => Tick::Down,
            }
        });
        let previous = shared.reconnect.replace(supervisor);
        drop(shared);
        drop(previous);
        Ok(())
    }

    /// Stop the reconnect supervisor, if any.
    pub fn cancel_reconnect(&self) {
        let previous = self.inner.lock().reconnect.take();
        if previous.is_some() {
            log::debug!("[Stomp] Reconnect supervisor cancelled");
        }
    }

    /// Disconnect after `after` has elapsed. Replaces any pending timer.
    pub fn auto_disconnect(&self, after: Duration) {
        let weak = Arc::downgrade(&self.inner);
        let timer = spawn_after(after, move || {
            if let Some(inner) = weak.upgrade() {
                log::info!("[Stomp] Auto-disconnect timer fired");
                inner.disconnect();
            }
        });
        let previous = self.inner.lock().auto_disconnect.replace(timer);
        drop(previous);
    }

    /// Encode and send `frame` if the transport is open.
    fn transmit(&self, frame: Frame) -> Result<(), StompError> {
        let mut shared = self.inner.lock();
        if let Some(transport) = shared.transport.clone().filter(|t| t.is_open()) {
            let text = shared.session.encode(&frame);
            drop(shared);
            log::debug!("[Stomp] >>> {frame}");
            return transport.send(&text);
        }

        let actions = shared.session.transport_lost();
        let transport = if shared.session.state() == ConnectionState::Disconnected {
            shared.transport.take()
        } else {
            None
        };
        let dispatcher = shared.dispatcher.clone();
        drop(shared);

        log::warn!("[Stomp] {} not sent, transport is not open", frame.command);
        execute(transport.as_deref(), dispatcher.as_ref(), actions);
        Err(StompError::NotConnected)
    }
}

impl Default for StompClient {
    fn default() -> Self {
        Self::websocket()
    }
}

impl fmt::Debug for StompClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shared = self.inner.lock();
        f.debug_struct("StompClient")
            .field("state", &shared.session.state())
            .field("session_id", &shared.session.session_id())
            .field("url", &shared.request.as_ref().map(|r| r.url.as_str()))
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a transport for the stored request. Takes the guard so the
    /// state check by the caller and the transition happen atomically.
    fn start(self: &Arc<Self>, mut shared: MutexGuard<'_, Shared>, headers: Headers) -> bool {
        let Some(request) = shared.request.clone() else {
            return false;
        };
        let Some(generation) = shared.session.begin_open(headers) else {
            return false;
        };

        log::info!("[Stomp] Opening {}", request.url);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        shared.transport = Some(self.connector.open(&request, events_tx));
        drop(shared);

        tokio::spawn(drive(Arc::downgrade(self), generation, events_rx));
        true
    }

    /// Run one transport event through the state machine. Returns false
    /// once the event's transport is no longer current.
    fn handle(&self, generation: u64, event: TransportEvent) -> bool {
        let mut shared = self.lock();
        let was_current = shared.session.is_current(generation);
        let actions = shared.session.handle_transport(generation, event);
        if !was_current {
            return false;
        }

        let transport = if shared.session.state() == ConnectionState::Disconnected {
            shared.transport.take()
        } else {
            shared.transport.clone()
        };
        let dispatcher = shared.dispatcher.clone();
        let still_current = shared.session.is_current(generation);
        drop(shared);

        execute(transport.as_deref(), dispatcher.as_ref(), actions);
        still_current
    }

    fn disconnect(&self) {
        let mut shared = self.lock();
        let reconnect = shared.reconnect.take();
        let auto_disconnect = shared.auto_disconnect.take();
        let actions = shared.session.disconnect(chrono::Utc::now().timestamp());
        let transport = shared.transport.take();
        let dispatcher = shared.dispatcher.clone();
        drop(shared);

        drop(reconnect);
        drop(auto_disconnect);
        if !actions.is_empty() {
            log::info!("[Stomp] Disconnecting");
        }
        execute(transport.as_deref(), dispatcher.as_ref(), actions);
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let shared = self.shared.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(transport) = shared.transport.take() {
            transport.close();
        }
    }
}

/// Consume one transport's events in order until it goes stale or the
/// client is dropped.
async fn drive(
    inner: Weak<Inner>,
    generation: u64,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        if !inner.handle(generation, event) {
            break;
        }
    }
    log::debug!("[Stomp] Event driver for generation {generation} finished");
}

/// Carry out state machine actions. Must be called without the lock held.
fn execute(
    transport: Option<&dyn Transport>,
    dispatcher: Option<&Dispatcher>,
    actions: Vec<SessionAction>,
) {
    for action in actions {
        match action {
            SessionAction::Send(text) => match transport {
                Some(transport) => {
                    if let Err(e) = transport.send(&text) {
                        log::warn!("[Stomp] Failed to send frame: {e}");
                    }
                }
                None => log::warn!("[Stomp] No transport for outbound frame"),
            },
            SessionAction::Emit(event) => match dispatcher {
                Some(dispatcher) => dispatcher.emit(event),
                None => log::debug!("[Stomp] No sink registered, dropping {event:?}"),
            },
            SessionAction::Close => {
                if let Some(transport) = transport {
                    transport.close();
                }
            }
        }
    }
}
