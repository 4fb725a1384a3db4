//! STOMP connection state machine.
//!
//! [`Session`] is pure: it consumes transport events and client requests and
//! returns [`SessionAction`]s for the driver to execute. It never touches the
//! transport or the event sink itself, which keeps every transition testable
//! without a socket.
//!
//! # States
//!
//! ```text
//!                open()                 transport Open              CONNECTED
//! ┌──────────────┐    ┌───────────────┐    ┌───────────────────┐    ┌───────────┐
//! │ Disconnected │───>│ SocketOpening │───>│ AwaitingConnected │───>│ Connected │
//! └──────────────┘    └───────────────┘    └───────────────────┘    └───────────┘
//!        ^                                                                │
//!        └──────────── disconnect() / transport Closed / Error ───────────┘
//! ```
//!
//! # Generations
//!
//! Every open and every teardown bumps the generation. Transport events are
//! tagged with the generation of the open that created the transport, so a
//! late `Closed` from a transport the client already tore down is dropped
//! instead of firing a second disconnect notification.

use crate::codec::{self, Decoded};
use crate::constants::{header, ACCEPT_VERSIONS, HEARTBEAT};
use crate::dispatcher::Event;
use crate::frame::{Command, Frame, Headers, Version};
use crate::transport::TransportEvent;

/// Lifecycle state of a STOMP connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No transport.
    #[default]
    Disconnected,
    /// Transport handshake in flight.
    SocketOpening,
    /// CONNECT sent, waiting for CONNECTED.
    AwaitingConnected,
    /// Session established.
    Connected,
}

/// Work the driver must perform after a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionAction {
    /// Write this text to the transport.
    Send(String),
    /// Hand this event to the dispatcher.
    Emit(Event),
    /// Close the transport.
    Close,
}

/// Connection state machine.
#[derive(Debug, Default)]
pub struct Session {
    state: ConnectionState,
    session_id: Option<String>,
    version: Version,
    connect_headers: Headers,
    generation: u64,
}

impl Session {
    /// Create a disconnected session.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Broker-assigned session id, set by CONNECTED.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Protocol version negotiated by the last CONNECTED frame.
    #[must_use]
    pub fn version(&self) -> Version {
        self.version
    }

    /// Encode an outbound frame for the negotiated version.
    #[must_use]
    pub fn encode(&self, frame: &Frame) -> String {
        codec::encode_for(frame, self.version)
    }

    /// Headers the next (or current) CONNECT frame carries.
    #[must_use]
    pub fn connect_headers(&self) -> &Headers {
        &self.connect_headers
    }

    /// Generation of the live (or last) transport.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether events tagged with `generation` belong to the live transport.
    #[must_use]
    pub fn is_current(&self, generation: u64) -> bool {
        self.generation == generation
    }

    /// Start opening a connection.
    ///
    /// Returns the generation to tag the new transport's events with, or
    /// `None` when a connection is already open or opening.
    pub fn begin_open(&mut self, headers: Headers) -> Option<u64> {
        if self.state != ConnectionState::Disconnected {
            log::debug!("[Stomp] open() ignored in state {:?}", self.state);
            return None;
        }

        let mut connect_headers = Headers::new();
        connect_headers.insert(header::ACCEPT_VERSION.to_string(), ACCEPT_VERSIONS.to_string());
        connect_headers.extend(headers);

        self.connect_headers = connect_headers;
        self.session_id = None;
        self.version = Version::default();
        self.state = ConnectionState::SocketOpening;
        self.generation += 1;
        Some(self.generation)
    }

    /// Feed one transport event.
    pub fn handle_transport(&mut self, generation: u64, event: TransportEvent) -> Vec<SessionAction> {
        if !self.is_current(generation) {
            log::debug!(
                "[Stomp] Discarding event from stale transport (generation {generation}, current {})",
                self.generation
            );
            return Vec::new();
        }

        match event {
            TransportEvent::Open => self.on_open(),
            TransportEvent::Text(text) => self.handle_text(&text),
            TransportEvent::Binary(bytes) => match String::from_utf8(bytes) {
                Ok(text) => self.handle_text(&text),
                Err(e) => {
                    log::warn!("[Stomp] Dropping binary message that is not UTF-8: {e}");
                    Vec::new()
                }
            },
            TransportEvent::Error(description) => {
                log::warn!("[Stomp] Transport error: {description}");
                self.teardown();
                vec![
                    SessionAction::Close,
                    SessionAction::Emit(Event::Error {
                        message: description,
                        detail: None,
                    }),
                ]
            }
            TransportEvent::Closed {
                code,
                reason,
                clean,
            } => {
                log::info!("[Stomp] Transport closed (code {code}, clean {clean}): {reason}");
                if self.state == ConnectionState::Disconnected {
                    return Vec::new();
                }
                self.teardown();
                vec![SessionAction::Emit(Event::Disconnected)]
            }
            TransportEvent::Pong(payload) => {
                log::trace!("[Stomp] Pong ({} bytes)", payload.len());
                Vec::new()
            }
        }
    }

    /// Decode a text message and react to every frame it contains.
    pub fn handle_text(&mut self, text: &str) -> Vec<SessionAction> {
        let mut actions = Vec::new();
        for unit in codec::decode_all(text) {
            match unit {
                Decoded::Heartbeat => self.on_heartbeat(&mut actions),
                Decoded::Frame(frame) => self.on_frame(frame, &mut actions),
                Decoded::Unknown(command) => actions.push(SessionAction::Emit(Event::Error {
                    message: format!("unknown command: {command}"),
                    detail: None,
                })),
            }
        }
        actions
    }

    /// Close the connection on the caller's request.
    ///
    /// `timestamp` (unix seconds) goes into the DISCONNECT frame's
    /// `disconnected` header. Returns nothing when already disconnected.
    pub fn disconnect(&mut self, timestamp: i64) -> Vec<SessionAction> {
        let previous = self.state;
        if previous == ConnectionState::Disconnected {
            return Vec::new();
        }

        let mut actions = Vec::with_capacity(3);
        if matches!(
            previous,
            ConnectionState::AwaitingConnected | ConnectionState::Connected
        ) {
            let frame =
                Frame::new(Command::Disconnect).header(header::DISCONNECTED, timestamp.to_string());
            actions.push(SessionAction::Send(self.encode(&frame)));
        }
        self.teardown();
        actions.push(SessionAction::Close);
        actions.push(SessionAction::Emit(Event::Disconnected));
        actions
    }

    /// A command found the transport not open.
    ///
    /// Always reports a disconnect. The connection is torn down only when the
    /// transport had already opened (CONNECT sent or session established);
    /// a handshake still in flight is left alone.
    pub fn transport_lost(&mut self) -> Vec<SessionAction> {
        let mut actions = Vec::with_capacity(2);
        if matches!(
            self.state,
            ConnectionState::AwaitingConnected | ConnectionState::Connected
        ) {
            self.teardown();
            actions.push(SessionAction::Close);
        }
        actions.push(SessionAction::Emit(Event::Disconnected));
        actions
    }

    fn on_open(&mut self) -> Vec<SessionAction> {
        if self.state != ConnectionState::SocketOpening {
            log::debug!("[Stomp] Transport open ignored in state {:?}", self.state);
            return Vec::new();
        }
        self.state = ConnectionState::AwaitingConnected;
        log::debug!("[Stomp] Transport open, sending CONNECT");

        let frame = Frame::new(Command::Connect).headers(self.connect_headers.clone());
        vec![SessionAction::Send(self.encode(&frame))]
    }

    fn on_heartbeat(&mut self, actions: &mut Vec<SessionAction>) {
        if self.state != ConnectionState::Connected {
            log::trace!("[Stomp] Heartbeat ignored in state {:?}", self.state);
            return;
        }
        actions.push(SessionAction::Send(HEARTBEAT.to_string()));
        actions.push(SessionAction::Emit(Event::Heartbeat));
    }

    fn on_frame(&mut self, frame: Frame, actions: &mut Vec<SessionAction>) {
        log::debug!("[Stomp] <<< {}", frame.command);

        if frame.command != Command::Connected {
            if let Some(event) = Event::from_frame(frame) {
                actions.push(SessionAction::Emit(event));
            }
            return;
        }

        match self.state {
            ConnectionState::AwaitingConnected => {
                self.session_id = frame.get(header::SESSION).map(str::to_string);
                self.version = Version::from_header(frame.get(header::VERSION));
                self.state = ConnectionState::Connected;
                log::info!(
                    "[Stomp] Connected (session {}, version {:?})",
                    self.session_id.as_deref().unwrap_or("-"),
                    self.version
                );
                actions.push(SessionAction::Emit(Event::Connected));
            }
            ConnectionState::Connected => {
                log::warn!("[Stomp] Ignoring duplicate CONNECTED frame");
            }
            state => {
                log::warn!("[Stomp] Ignoring CONNECTED frame in state {state:?}");
            }
        }
    }

    fn teardown(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.session_id = None;
        self.generation += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected_session() -> (Session, u64) {
        let mut session = Session::new();
        let generation = session.begin_open(Headers::new()).unwrap();
        session.handle_transport(generation, TransportEvent::Open);
        session.handle_transport(
            generation,
            TransportEvent::Text("CONNECTED\nversion:1.2\nsession:abc123\n\n\0".into()),
        );
        (session, generation)
    }

    #[test]
    fn test_open_moves_to_socket_opening() {
        let mut session = Session::new();
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert_eq!(session.begin_open(Headers::new()), Some(1));
        assert_eq!(session.state(), ConnectionState::SocketOpening);
        assert_eq!(session.generation(), 1);
    }

    #[test]
    fn test_open_is_noop_while_opening_or_connected() {
        let mut session = Session::new();
        session.begin_open(Headers::new());
        assert_eq!(session.begin_open(Headers::new()), None);

        let (mut session, _) = connected_session();
        assert_eq!(session.begin_open(Headers::new()), None);
        assert_eq!(session.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_transport_open_sends_connect_with_merged_headers() {
        let mut session = Session::new();
        let mut headers = Headers::new();
        headers.insert("login".into(), "guest".into());
        let generation = session.begin_open(headers).unwrap();

        let actions = session.handle_transport(generation, TransportEvent::Open);
        assert_eq!(
            actions,
            vec![SessionAction::Send(
                "CONNECT\naccept-version:1.1,1.2\nlogin:guest\n\n\0".into()
            )]
        );
        assert_eq!(session.state(), ConnectionState::AwaitingConnected);
    }

    #[test]
    fn test_caller_may_override_accept_version() {
        let mut session = Session::new();
        let mut headers = Headers::new();
        headers.insert("accept-version".into(), "1.2".into());
        session.begin_open(headers);
        assert_eq!(
            session.connect_headers().get("accept-version").map(String::as_str),
            Some("1.2")
        );
    }

    #[test]
    fn test_connected_sets_session_and_fires_once() {
        let mut session = Session::new();
        let generation = session.begin_open(Headers::new()).unwrap();
        session.handle_transport(generation, TransportEvent::Open);

        let connected = TransportEvent::Text("CONNECTED\nsession:abc123\n\n\0".into());
        let first = session.handle_transport(generation, connected.clone());
        assert_eq!(first, vec![SessionAction::Emit(Event::Connected)]);
        assert_eq!(session.session_id(), Some("abc123"));
        assert_eq!(session.state(), ConnectionState::Connected);

        let second = session.handle_transport(generation, connected);
        assert!(second.is_empty());
    }

    #[test]
    fn test_heartbeat_replies_only_when_connected() {
        let mut session = Session::new();
        let generation = session.begin_open(Headers::new()).unwrap();
        session.handle_transport(generation, TransportEvent::Open);
        assert!(session
            .handle_transport(generation, TransportEvent::Text("\n".into()))
            .is_empty());

        let (mut session, generation) = connected_session();
        let actions = session.handle_transport(generation, TransportEvent::Text("\n".into()));
        assert_eq!(
            actions,
            vec![
                SessionAction::Send("\n".into()),
                SessionAction::Emit(Event::Heartbeat),
            ]
        );
    }

    #[test]
    fn test_disconnect_sends_frame_closes_and_notifies_once() {
        let (mut session, generation) = connected_session();

        let actions = session.disconnect(1_700_000_000);
        assert_eq!(
            actions,
            vec![
                SessionAction::Send("DISCONNECT\ndisconnected:1700000000\n\n\0".into()),
                SessionAction::Close,
                SessionAction::Emit(Event::Disconnected),
            ]
        );
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert_eq!(session.session_id(), None);

        // The closed transport reports its closure afterwards.
        let late = session.handle_transport(
            generation,
            TransportEvent::Closed {
                code: 1000,
                reason: String::new(),
                clean: true,
            },
        );
        assert!(late.is_empty());
        assert!(session.disconnect(1_700_000_001).is_empty());
    }

    #[test]
    fn test_disconnect_while_opening_skips_frame() {
        let mut session = Session::new();
        session.begin_open(Headers::new());
        assert_eq!(
            session.disconnect(0),
            vec![
                SessionAction::Close,
                SessionAction::Emit(Event::Disconnected)
            ]
        );
    }

    #[test]
    fn test_transport_closed_notifies() {
        let (mut session, generation) = connected_session();
        let actions = session.handle_transport(
            generation,
            TransportEvent::Closed {
                code: 1006,
                reason: "gone".into(),
                clean: false,
            },
        );
        assert_eq!(actions, vec![SessionAction::Emit(Event::Disconnected)]);
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_transport_error_reports_and_disconnects() {
        let (mut session, generation) = connected_session();
        let actions =
            session.handle_transport(generation, TransportEvent::Error("connection reset".into()));
        assert_eq!(
            actions,
            vec![
                SessionAction::Close,
                SessionAction::Emit(Event::Error {
                    message: "connection reset".into(),
                    detail: None,
                }),
            ]
        );
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_error_frame_does_not_change_state() {
        let (mut session, generation) = connected_session();
        let actions = session.handle_transport(
            generation,
            TransportEvent::Text("ERROR\nmessage:denied\n\nno access\0".into()),
        );
        assert_eq!(
            actions,
            vec![SessionAction::Emit(Event::Error {
                message: "denied".into(),
                detail: Some("no access".into()),
            })]
        );
        assert_eq!(session.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_unknown_command_reports_protocol_error() {
        let (mut session, generation) = connected_session();
        let actions =
            session.handle_transport(generation, TransportEvent::Text("BOGUS\n\n\0".into()));
        assert!(matches!(
            actions.as_slice(),
            [SessionAction::Emit(Event::Error { .. })]
        ));
        assert_eq!(session.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_stale_generation_is_discarded() {
        let (mut session, old) = connected_session();
        session.disconnect(0);
        let new = session.begin_open(Headers::new()).unwrap();
        assert_ne!(old, new);

        assert!(session
            .handle_transport(old, TransportEvent::Open)
            .is_empty());
        assert_eq!(session.state(), ConnectionState::SocketOpening);
    }

    #[test]
    fn test_binary_frames_are_decoded() {
        let (mut session, generation) = connected_session();
        let actions = session.handle_transport(
            generation,
            TransportEvent::Binary(b"RECEIPT\nreceipt-id:77\n\n\0".to_vec()),
        );
        assert_eq!(actions, vec![SessionAction::Emit(Event::Receipt("77".into()))]);

        let invalid = session.handle_transport(generation, TransportEvent::Binary(vec![0xff, 0xfe]));
        assert!(invalid.is_empty());
    }

    #[test]
    fn test_unknown_frame_in_batch_keeps_neighbours() {
        let (mut session, generation) = connected_session();
        let actions = session.handle_transport(
            generation,
            TransportEvent::Text("MESSAGE\ndestination:/a\n\none\0\nNACK\nid:1\n\n\0".into()),
        );
        assert_eq!(actions.len(), 2);
        assert!(matches!(
            &actions[0],
            SessionAction::Emit(Event::Message(message)) if message.body == "one"
        ));
        assert_eq!(
            actions[1],
            SessionAction::Emit(Event::Error {
                message: "unknown command: NACK".into(),
                detail: None,
            })
        );
    }

    #[test]
    fn test_connected_records_negotiated_version() {
        let (session, _) = connected_session();
        assert_eq!(session.version(), Version::V1_2);

        let mut session = Session::new();
        let generation = session.begin_open(Headers::new()).unwrap();
        session.handle_transport(generation, TransportEvent::Open);
        session.handle_transport(
            generation,
            TransportEvent::Text("CONNECTED\nversion:1.1\n\n\0".into()),
        );
        assert_eq!(session.version(), Version::V1_1);
        let frame = Frame::new(Command::Send).header("k", "a\rb");
        assert_eq!(session.encode(&frame), "SEND\nk:a\rb\n\n\0");
    }

    #[test]
    fn test_transport_lost_while_opening_keeps_handshake() {
        let mut session = Session::new();
        let generation = session.begin_open(Headers::new()).unwrap();
        assert_eq!(
            session.transport_lost(),
            vec![SessionAction::Emit(Event::Disconnected)]
        );
        assert_eq!(session.state(), ConnectionState::SocketOpening);
        assert!(session.is_current(generation));

        let actions = session.handle_transport(generation, TransportEvent::Open);
        assert!(matches!(
            actions.as_slice(),
            [SessionAction::Send(text)] if text.starts_with("CONNECT\n")
        ));
    }

    #[test]
    fn test_transport_lost_tears_down_once() {
        let (mut session, _) = connected_session();
        assert_eq!(
            session.transport_lost(),
            vec![
                SessionAction::Close,
                SessionAction::Emit(Event::Disconnected)
            ]
        );
        assert_eq!(
            session.transport_lost(),
            vec![SessionAction::Emit(Event::Disconnected)]
        );
    }
}
