//! Error type for STOMP client operations.

/// Errors that can occur during STOMP operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StompError {
    /// Socket-level failure, surfaced verbatim from the transport.
    Transport(String),
    /// Broker ERROR frame, or a frame that could not be decoded.
    Protocol {
        /// Short description (the ERROR frame's `message` header).
        message: String,
        /// Longer description (the ERROR frame's body), if any.
        detail: Option<String>,
    },
    /// Outbound payload could not be serialized to JSON.
    Serialization(String),
    /// Command attempted while the transport is not open.
    NotConnected,
    /// Reconnection requested before any `open()` supplied an endpoint.
    NoEndpoint,
}

impl std::fmt::Display for StompError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(msg) => write!(f, "Transport error: {msg}"),
            Self::Protocol {
                message,
                detail: Some(detail),
            } => write!(f, "Protocol error: {message} ({detail})"),
            Self::Protocol {
                message,
                detail: None,
            } => write!(f, "Protocol error: {message}"),
            Self::Serialization(msg) => write!(f, "Serialization error: {msg}"),
            Self::NotConnected => write!(f, "Not connected"),
            Self::NoEndpoint => write!(f, "No endpoint to reconnect to"),
        }
    }
}

impl std::error::Error for StompError {}

impl From<serde_json::Error> for StompError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_protocol_with_detail() {
        let err = StompError::Protocol {
            message: "bad destination".into(),
            detail: Some("no such queue".into()),
        };
        assert_eq!(
            err.to_string(),
            "Protocol error: bad destination (no such queue)"
        );
    }

    #[test]
    fn test_display_not_connected() {
        assert_eq!(StompError::NotConnected.to_string(), "Not connected");
    }
}
