//! Protocol constants for the STOMP client.
//!
//! Header names, ack mode strings and timing defaults live here so the
//! codec, session and command API agree on spelling.
//!
//! # Categories
//!
//! - **Wire**: terminators and the heartbeat frame
//! - **Headers**: request and response header names
//! - **Timing**: reconnection defaults

use std::time::Duration;

// ============================================================================
// Wire
// ============================================================================

/// Frame terminator appended to every encoded frame.
pub const NUL: char = '\0';

/// Heartbeat frame sent in reply to a server heartbeat (a single EOL).
pub const HEARTBEAT: &str = "\n";

/// Versions advertised in the CONNECT frame's `accept-version` header.
pub const ACCEPT_VERSIONS: &str = "1.1,1.2";

/// Content type applied by `send` when the caller did not set one.
pub const DEFAULT_CONTENT_TYPE: &str = "text/plain";

/// Content type applied by `send_json`.
pub const JSON_CONTENT_TYPE: &str = "application/json;charset=UTF-8";

// ============================================================================
// Headers
// ============================================================================

/// Header names used on outbound and inbound frames.
pub mod header {
    /// Versions the client accepts (CONNECT).
    pub const ACCEPT_VERSION: &str = "accept-version";
    /// Heartbeat negotiation (CONNECT).
    pub const HEART_BEAT: &str = "heart-beat";
    /// Virtual host (CONNECT).
    pub const HOST: &str = "host";
    /// Login name (CONNECT).
    pub const LOGIN: &str = "login";
    /// Password (CONNECT).
    pub const PASSCODE: &str = "passcode";
    /// Receipt request (any client frame).
    pub const RECEIPT: &str = "receipt";
    /// Destination of a SEND/SUBSCRIBE or delivered MESSAGE.
    pub const DESTINATION: &str = "destination";
    /// Subscription or message id.
    pub const ID: &str = "id";
    /// Body length in UTF-8 bytes.
    pub const CONTENT_LENGTH: &str = "content-length";
    /// Body MIME type.
    pub const CONTENT_TYPE: &str = "content-type";
    /// Ack mode of a subscription.
    pub const ACK: &str = "ack";
    /// Transaction id on BEGIN/COMMIT/ABORT.
    pub const TRANSACTION: &str = "transaction";
    /// Subscription id on ACK.
    pub const SUBSCRIPTION: &str = "subscription";
    /// Client-side timestamp carried by DISCONNECT.
    pub const DISCONNECTED: &str = "disconnected";
    /// Broker-assigned session id (CONNECTED).
    pub const SESSION: &str = "session";
    /// Negotiated protocol version (CONNECTED).
    pub const VERSION: &str = "version";
    /// Id of the frame a RECEIPT confirms.
    pub const RECEIPT_ID: &str = "receipt-id";
    /// Short error description (ERROR).
    pub const MESSAGE: &str = "message";
}

// ============================================================================
// Timing
// ============================================================================

/// Default polling interval of the reconnection supervisor.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(1);

/// Upper bound for the reconnect delay when backoff is enabled.
pub const MAX_RECONNECT_INTERVAL: Duration = Duration::from_secs(30);
