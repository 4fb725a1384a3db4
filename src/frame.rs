//! STOMP frame types.
//!
//! A [`Frame`] is one protocol unit: a command verb, a header map and an
//! optional UTF-8 body. Headers are kept in a [`BTreeMap`] so that encoding
//! is deterministic; STOMP does not give header order any meaning.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::constants::header;
use crate::error::StompError;

/// Header map of a frame. Inserting an existing key replaces its value.
pub type Headers = BTreeMap<String, String>;

/// STOMP command verbs understood by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Open a STOMP session (client → broker).
    Connect,
    /// Publish a message (client → broker).
    Send,
    /// Register interest in a destination (client → broker).
    Subscribe,
    /// Cancel a subscription (client → broker).
    Unsubscribe,
    /// Start a transaction (client → broker).
    Begin,
    /// Commit a transaction (client → broker).
    Commit,
    /// Roll back a transaction (client → broker).
    Abort,
    /// Acknowledge a delivered message (client → broker).
    Ack,
    /// Close the STOMP session (client → broker).
    Disconnect,
    /// Session accepted (broker → client).
    Connected,
    /// Delivered message (broker → client).
    Message,
    /// Receipt for a frame that requested one (broker → client).
    Receipt,
    /// Broker-side failure (broker → client).
    Error,
}

impl Command {
    /// Wire spelling of the command.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Send => "SEND",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Begin => "BEGIN",
            Self::Commit => "COMMIT",
            Self::Abort => "ABORT",
            Self::Ack => "ACK",
            Self::Disconnect => "DISCONNECT",
            Self::Connected => "CONNECTED",
            Self::Message => "MESSAGE",
            Self::Receipt => "RECEIPT",
            Self::Error => "ERROR",
        }
    }

    /// Whether header values on this frame are sent without STOMP 1.2
    /// escaping. CONNECT and CONNECTED predate escaping and stay raw.
    #[must_use]
    pub fn raw_headers(self) -> bool {
        matches!(self, Self::Connect | Self::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = StompError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let command = match s {
            "CONNECT" => Self::Connect,
            "SEND" => Self::Send,
            "SUBSCRIBE" => Self::Subscribe,
            "UNSUBSCRIBE" => Self::Unsubscribe,
            "BEGIN" => Self::Begin,
            "COMMIT" => Self::Commit,
            "ABORT" => Self::Abort,
            "ACK" => Self::Ack,
            "DISCONNECT" => Self::Disconnect,
            "CONNECTED" => Self::Connected,
            "MESSAGE" => Self::Message,
            "RECEIPT" => Self::Receipt,
            "ERROR" => Self::Error,
            other => {
                return Err(StompError::Protocol {
                    message: format!("unknown command: {other}"),
                    detail: None,
                })
            }
        };
        Ok(command)
    }
}

/// Acknowledgment policy of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AckMode {
    /// Broker considers a message acknowledged once sent.
    #[default]
    Auto,
    /// Cumulative acknowledgment via ACK.
    Client,
    /// Per-message acknowledgment via ACK.
    ClientIndividual,
}

impl AckMode {
    /// Value of the `ack` header for this mode.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Client => "client",
            Self::ClientIndividual => "client-individual",
        }
    }
}

impl FromStr for AckMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Self::Auto),
            "client" => Ok(Self::Client),
            "client-individual" => Ok(Self::ClientIndividual),
            other => Err(format!("unknown ack mode: {other}")),
        }
    }
}

/// STOMP protocol version agreed with the broker.
///
/// Until CONNECTED arrives the client assumes 1.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Version {
    /// STOMP 1.1, which has no `\r` header escape.
    V1_1,
    /// STOMP 1.2.
    #[default]
    V1_2,
}

impl Version {
    /// Version named by a CONNECTED frame's `version` header.
    ///
    /// Anything other than `1.1` is treated as 1.2.
    #[must_use]
    pub fn from_header(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some("1.1") => Self::V1_1,
            _ => Self::V1_2,
        }
    }
}

/// One STOMP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Command verb.
    pub command: Command,
    /// Header map.
    pub headers: Headers,
    /// Optional UTF-8 body.
    pub body: Option<String>,
}

impl Frame {
    /// Create a frame with no headers and no body.
    #[must_use]
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Headers::new(),
            body: None,
        }
    }

    /// Add a header, replacing any previous value for the key.
    #[must_use]
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Merge a header map into this frame; the merged values win.
    #[must_use]
    pub fn headers(mut self, headers: Headers) -> Self {
        self.headers.extend(headers);
        self
    }

    /// Set the body.
    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Look up a header value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    /// Value of the `destination` header, empty if absent.
    #[must_use]
    pub fn destination(&self) -> &str {
        self.get(header::DESTINATION).unwrap_or_default()
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} headers", self.command, self.headers.len())?;
        match &self.body {
            Some(body) => write!(f, ", body {} bytes)", body.len()),
            None => write!(f, ", no body)"),
        }
    }
}
