//! WebSocket transport.
//!
//! Thin wrapper around `tokio-tungstenite` providing type-isolated
//! reader/writer halves, plus [`WsConnector`], the [`Connector`]
//! implementation the STOMP client uses by default.
//!
//! # Architecture
//!
//! A single [`connect`] function handles URL→request building, header
//! insertion, and TLS negotiation. It returns a ([`WsWriter`], [`WsReader`])
//! pair ready for use in `tokio::select!` loops.
//!
//! Each [`WsConnector::open`] spawns one socket task that owns both halves.
//! The returned [`WsTransport`] handle queues outgoing text on an unbounded
//! channel; the socket task reports everything it sees as
//! [`TransportEvent`]s.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;

use crate::error::StompError;
use crate::transport::{ConnectRequest, Connector, Transport, TransportEvent, TransportEvents};

/// Concrete WebSocket stream type (avoids repeating the 6-line generic everywhere).
type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Received WebSocket message.
#[derive(Debug)]
pub enum WsMessage {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
    /// Ping frame with payload.
    Ping(Vec<u8>),
    /// Pong frame with payload.
    Pong(Vec<u8>),
    /// Close frame with status code and reason.
    Close {
        /// WebSocket close code (1000 = normal, 1005 = no code).
        code: u16,
        /// Human-readable close reason.
        reason: String,
    },
}

/// Write half of a WebSocket connection.
#[derive(Debug)]
pub struct WsWriter {
    sink: futures_util::stream::SplitSink<WsStream, tungstenite::Message>,
}

impl WsWriter {
    /// Send a UTF-8 text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the send fails (connection closed, I/O error).
    pub async fn send_text(&mut self, text: &str) -> Result<()> {
        self.sink
            .send(tungstenite::Message::Text(text.to_string()))
            .await
            .context("WebSocket send_text failed")
    }

    /// Send a close frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the send fails.
    pub async fn send_close(&mut self) -> Result<()> {
        self.sink
            .send(tungstenite::Message::Close(None))
            .await
            .context("WebSocket send_close failed")
    }
}

/// Read half of a WebSocket connection.
#[derive(Debug)]
pub struct WsReader {
    stream: futures_util::stream::SplitStream<WsStream>,
}

impl WsReader {
    /// Receive the next message, returning `None` when the stream ends.
    ///
    /// Raw `Frame` variants are skipped internally.
    pub async fn recv(&mut self) -> Option<Result<WsMessage>> {
        loop {
            match self.stream.next().await {
                Some(Ok(tungstenite::Message::Text(text))) => {
                    return Some(Ok(WsMessage::Text(text.to_string())));
                }
                Some(Ok(tungstenite::Message::Binary(data))) => {
                    return Some(Ok(WsMessage::Binary(data.to_vec())));
                }
                Some(Ok(tungstenite::Message::Ping(data))) => {
                    return Some(Ok(WsMessage::Ping(data.to_vec())));
                }
                Some(Ok(tungstenite::Message::Pong(data))) => {
                    return Some(Ok(WsMessage::Pong(data.to_vec())));
                }
                Some(Ok(tungstenite::Message::Close(close_frame))) => {
                    let (code, reason) = close_frame
                        .map(|cf| (cf.code.into(), cf.reason.to_string()))
                        .unwrap_or((1005, String::new()));
                    return Some(Ok(WsMessage::Close { code, reason }));
                }
                Some(Ok(tungstenite::Message::Frame(_))) => {
                    // Raw frames — skip
                    continue;
                }
                Some(Err(e)) => {
                    return Some(Err(anyhow::anyhow!("WebSocket read error: {e}")));
                }
                None => return None,
            }
        }
    }
}

/// Connect to a WebSocket URL with optional headers.
///
/// Builds an HTTP request from `url`, inserts each `(name, value)` header,
/// then performs the WebSocket handshake. Returns split (writer, reader)
/// halves for independent use in `tokio::select!` loops.
///
/// # Errors
///
/// Returns an error if the URL is invalid, header values are malformed,
/// or the WebSocket handshake fails.
pub async fn connect(url: &str, headers: &[(&str, &str)]) -> Result<(WsWriter, WsReader)> {
    use tungstenite::client::IntoClientRequest;

    let mut request = url
        .into_client_request()
        .with_context(|| format!("invalid WebSocket URL: {url}"))?;

    for &(name, value) in headers {
        let header_name = tungstenite::http::HeaderName::from_bytes(name.as_bytes())
            .with_context(|| format!("invalid header name: {name}"))?;
        let header_value = tungstenite::http::HeaderValue::from_str(value)
            .with_context(|| format!("invalid header value for {name}"))?;
        request.headers_mut().insert(header_name, header_value);
    }

    let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
        .await
        .context("WebSocket connect failed")?;

    let (sink, stream) = ws_stream.split();

    Ok((WsWriter { sink }, WsReader { stream }))
}

/// Convert an HTTP(S) URL to WS(S) scheme.
///
/// Passes `ws://` and `wss://` through unchanged.
#[must_use]
pub fn http_to_ws_scheme(url: &str) -> String {
    if url.starts_with("wss://") || url.starts_with("ws://") {
        url.to_string()
    } else {
        url.replace("https://", "wss://")
            .replace("http://", "ws://")
    }
}

// =============================================================================
// Connector
// =============================================================================

const STATE_CONNECTING: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_CLOSED: u8 = 2;

/// Outgoing command from a [`WsTransport`] handle to its socket task.
#[derive(Debug)]
enum WsOutgoing {
    /// Send a UTF-8 text frame.
    Text(String),
    /// Initiate a graceful close.
    Close,
}

/// [`Connector`] backed by `tokio-tungstenite`.
///
/// Must be used from inside a tokio runtime.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn open(&self, request: &ConnectRequest, events: TransportEvents) -> Arc<dyn Transport> {
        if request.trust_all_certificates {
            log::warn!(
                "[WebSocket] trust_all_certificates is not supported, using default verification"
            );
        }

        let (send_tx, send_rx) = mpsc::unbounded_channel();
        let state = Arc::new(AtomicU8::new(STATE_CONNECTING));

        tokio::spawn(run_socket(
            request.clone(),
            Arc::clone(&state),
            send_rx,
            events,
        ));

        Arc::new(WsTransport { send_tx, state })
    }
}

/// Handle to one socket task.
#[derive(Debug)]
pub struct WsTransport {
    send_tx: mpsc::UnboundedSender<WsOutgoing>,
    state: Arc<AtomicU8>,
}

impl Transport for WsTransport {
    fn is_open(&self) -> bool {
        self.state.load(Ordering::SeqCst) == STATE_OPEN
    }

    fn send(&self, text: &str) -> Result<(), StompError> {
        if !self.is_open() {
            return Err(StompError::Transport("WebSocket is not open".to_string()));
        }
        self.send_tx
            .send(WsOutgoing::Text(text.to_string()))
            .map_err(|e| StompError::Transport(format!("WebSocket task has exited: {e}")))
    }

    fn close(&self) {
        if self.state.swap(STATE_CLOSED, Ordering::SeqCst) != STATE_CLOSED {
            let _ = self.send_tx.send(WsOutgoing::Close);
        }
    }
}

/// Forward an event to the client, returning `false` once nobody listens.
fn emit(events: &TransportEvents, event: TransportEvent) -> bool {
    events.send(event).is_ok()
}

/// Run a single WebSocket connection until it closes.
///
/// Reports every inbound frame as a [`TransportEvent`] and writes queued
/// outgoing text. Exits on close, error, or when the event receiver is gone.
async fn run_socket(
    request: ConnectRequest,
    state: Arc<AtomicU8>,
    mut send_rx: mpsc::UnboundedReceiver<WsOutgoing>,
    events: TransportEvents,
) {
    let header_refs: Vec<(&str, &str)> = request
        .headers
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();

    log::debug!("[WebSocket] Connecting to {}", request.url);

    let (mut writer, mut reader) = match connect(&request.url, &header_refs).await {
        Ok(pair) => pair,
        Err(e) => {
            state.store(STATE_CLOSED, Ordering::SeqCst);
            log::warn!("[WebSocket] Connection to {} failed: {e:#}", request.url);
            emit(&events, TransportEvent::Error(format!("{e:#}")));
            return;
        }
    };

    // close() may have been called while the handshake was in flight
    if state
        .compare_exchange(STATE_CONNECTING, STATE_OPEN, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        let _ = writer.send_close().await;
        return;
    }

    log::info!("[WebSocket] Connected to {}", request.url);
    if !emit(&events, TransportEvent::Open) {
        let _ = writer.send_close().await;
        return;
    }

    loop {
        tokio::select! {
            frame = reader.recv() => {
                let event = match frame {
                    Some(Ok(WsMessage::Text(text))) => Some(TransportEvent::Text(text)),
                    Some(Ok(WsMessage::Binary(data))) => Some(TransportEvent::Binary(data)),
                    Some(Ok(WsMessage::Pong(data))) => Some(TransportEvent::Pong(data)),
                    // Pings are auto-replied by tungstenite
                    Some(Ok(WsMessage::Ping(_))) => None,
                    Some(Ok(WsMessage::Close { code, reason })) => {
                        state.store(STATE_CLOSED, Ordering::SeqCst);
                        log::info!("[WebSocket] Closed by server ({code}): {reason}");
                        emit(&events, TransportEvent::Closed { code, reason, clean: true });
                        return;
                    }
                    Some(Err(e)) => {
                        state.store(STATE_CLOSED, Ordering::SeqCst);
                        log::warn!("[WebSocket] {e}");
                        emit(&events, TransportEvent::Error(format!("{e}")));
                        return;
                    }
                    None => {
                        state.store(STATE_CLOSED, Ordering::SeqCst);
                        emit(&events, TransportEvent::Closed {
                            code: 1006,
                            reason: "stream ended".to_string(),
                            clean: false,
                        });
                        return;
                    }
                };
                if let Some(event) = event {
                    if !emit(&events, event) {
                        let _ = writer.send_close().await;
                        return;
                    }
                }
            }
            outgoing = send_rx.recv() => {
                match outgoing {
                    Some(WsOutgoing::Text(text)) => {
                        if let Err(e) = writer.send_text(&text).await {
                            state.store(STATE_CLOSED, Ordering::SeqCst);
                            emit(&events, TransportEvent::Error(format!("{e:#}")));
                            return;
                        }
                    }
                    Some(WsOutgoing::Close) => {
                        let _ = writer.send_close().await;
                        emit(&events, TransportEvent::Closed {
                            code: 1000,
                            reason: "client requested close".to_string(),
                            clean: true,
                        });
                        return;
                    }
                    None => {
                        // Transport handle dropped
                        state.store(STATE_CLOSED, Ordering::SeqCst);
                        let _ = writer.send_close().await;
                        return;
                    }
                }
            }
        }
    }
}
