//! Event delivery to the application.
//!
//! Inbound frames are mapped to [`Event`]s and handed to a single
//! notification task that calls the application's [`EventSink`]. Because one
//! task delivers everything, callbacks never overlap and arrive in the order
//! the events were emitted.
//!
//! # Sink ownership
//!
//! The dispatcher only keeps a [`Weak`] reference to the sink. The caller owns
//! the `Arc` and must keep it alive while connected; events emitted after the
//! sink is dropped are discarded.
//!
//! Each queued event carries the sink it was emitted for. Re-pointing a
//! dispatcher at a new sink with [`Dispatcher::with_sink`] keeps the same
//! task, so events already queued for the old sink are still delivered
//! before anything emitted afterwards.

use std::sync::Weak;

use tokio::sync::mpsc;

use crate::constants::header;
use crate::frame::{Command, Frame, Headers};

/// A message delivered to a subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Body as received (empty when the frame had none).
    pub body: String,
    /// Body parsed as JSON, `None` when it is not valid JSON.
    pub json: Option<serde_json::Value>,
    /// Frame headers.
    pub headers: Headers,
    /// Value of the `destination` header, empty if absent.
    pub destination: String,
}

impl Message {
    /// Build a message from a MESSAGE frame.
    ///
    /// JSON parsing is opportunistic: a body that is not JSON still arrives
    /// as a string.
    #[must_use]
    pub fn from_frame(frame: Frame) -> Self {
        let body = frame.body.unwrap_or_default();
        let json = serde_json::from_str(&body).ok();
        let destination = frame
            .headers
            .get(header::DESTINATION)
            .cloned()
            .unwrap_or_default();
        Self {
            body,
            json,
            headers: frame.headers,
            destination,
        }
    }
}

/// Notification for the application.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// The broker accepted the STOMP session.
    Connected,
    /// The connection went down.
    Disconnected,
    /// A subscription delivered a message.
    Message(Message),
    /// The broker confirmed a frame that requested a receipt.
    Receipt(String),
    /// The broker or the transport reported an error.
    Error {
        /// Short description.
        message: String,
        /// Longer description, if any.
        detail: Option<String>,
    },
    /// The broker sent a heartbeat.
    Heartbeat,
}

impl Event {
    /// Map a stateless inbound frame to its event.
    ///
    /// CONNECTED is handled by the session (it changes state) and yields
    /// `None` here, as do RECEIPT frames without a `receipt-id` and client
    /// commands echoed back by a misbehaving peer.
    #[must_use]
    pub fn from_frame(frame: Frame) -> Option<Self> {
        match frame.command {
            Command::Message => Some(Self::Message(Message::from_frame(frame))),
            Command::Receipt => frame
                .get(header::RECEIPT_ID)
                .map(|id| Self::Receipt(id.to_string())),
            Command::Error => Some(Self::Error {
                message: frame.get(header::MESSAGE).unwrap_or_default().to_string(),
                detail: frame.body,
            }),
            _ => None,
        }
    }
}

/// Application callbacks.
///
/// `on_receipt` and `on_heartbeat` default to no-ops.
pub trait EventSink: Send + Sync {
    /// The broker accepted the STOMP session.
    fn on_connected(&self);

    /// The connection went down.
    fn on_disconnected(&self);

    /// A subscription delivered a message.
    fn on_message(&self, message: Message);

    /// The broker confirmed the frame carrying `receipt_id`.
    fn on_receipt(&self, receipt_id: &str) {
        let _ = receipt_id;
    }

    /// The broker or the transport reported an error.
    fn on_error(&self, message: &str, detail: Option<&str>);

    /// The broker sent a heartbeat.
    fn on_heartbeat(&self) {}
}

/// Call the sink method matching `event`.
fn deliver(sink: &dyn EventSink, event: Event) {
    match event {
        Event::Connected => sink.on_connected(),
        Event::Disconnected => sink.on_disconnected(),
        Event::Message(message) => sink.on_message(message),
        Event::Receipt(id) => sink.on_receipt(&id),
        Event::Error { message, detail } => sink.on_error(&message, detail.as_deref()),
        Event::Heartbeat => sink.on_heartbeat(),
    }
}

/// An event and the sink it is addressed to.
type Envelope = (Weak<dyn EventSink>, Event);

/// Handle to the notification task, bound to one sink.
///
/// Dropping every handle ends the task once queued events are delivered.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    tx: mpsc::UnboundedSender<Envelope>,
    sink: Weak<dyn EventSink>,
}

impl Dispatcher {
    /// Spawn the notification task for `sink`.
    ///
    /// Must be called from inside a tokio runtime.
    #[must_use]
    pub fn spawn(sink: Weak<dyn EventSink>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();

        tokio::spawn(async move {
            while let Some((sink, event)) = rx.recv().await {
                let Some(sink) = sink.upgrade() else {
                    log::debug!("[Stomp] Event sink dropped, discarding {event:?}");
                    continue;
                };
                deliver(sink.as_ref(), event);
            }
        });

        Self { tx, sink }
    }

    /// A handle on the same task that delivers to `sink`.
    #[must_use]
    pub fn with_sink(&self, sink: Weak<dyn EventSink>) -> Self {
        Self {
            tx: self.tx.clone(),
            sink,
        }
    }

    /// Queue an event for delivery.
    pub fn emit(&self, event: Event) {
        if self.tx.send((Weak::clone(&self.sink), event)).is_err() {
            log::warn!("[Stomp] Notification task has exited, event dropped");
        }
    }
}
