// ── Core error types ──
//
// User-facing errors from irrisync-core. These are NOT transport
// specific -- consumers never see reqwest errors or raw JSON failures.
// The `From<irrisync_api::Error>` impl translates transport-layer
// errors into domain-appropriate variants.

use thiserror::Error;

/// Broad classification attached to request failures.
///
/// Connection-manager failures (`ChannelClosed` and friends) never
/// appear here: they are absorbed by the reconnect loop and surface
/// only as `ConnectionState` changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Transport failure: refused connection, DNS, TLS.
    Network,
    /// The caller-supplied request timeout expired.
    Timeout,
    /// The server answered with a non-2xx status.
    Server,
    /// The payload could not be decoded.
    Decode,
}

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Network error: {message}")]
    Network { message: String },

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Server error (HTTP {status}): {message}")]
    Server { status: u16, message: String },

    #[error("Malformed server payload: {message}")]
    Decode { message: String },

    #[error("Session is shut down")]
    SessionClosed,

    #[error("Device not found: {device_id}")]
    DeviceNotFound { device_id: String },

    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl CoreError {
    /// The failure kind reported on the relevant request stream.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Timeout { .. } => FailureKind::Timeout,
            Self::Server { .. } => FailureKind::Server,
            Self::Decode { .. } => FailureKind::Decode,
            _ => FailureKind::Network,
        }
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<irrisync_api::Error> for CoreError {
    fn from(err: irrisync_api::Error) -> Self {
        match err {
            irrisync_api::Error::Timeout { timeout_secs } => CoreError::Timeout { timeout_secs },
            irrisync_api::Error::Transport(ref e) if e.is_timeout() => {
                CoreError::Timeout { timeout_secs: 0 }
            }
            irrisync_api::Error::Transport(e) => CoreError::Network {
                message: e.to_string(),
            },
            irrisync_api::Error::Server { status, message } => {
                CoreError::Server { status, message }
            }
            irrisync_api::Error::Decode { message, body: _ } => CoreError::Decode { message },
            irrisync_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            irrisync_api::Error::Tls(msg) => CoreError::Network {
                message: format!("TLS error: {msg}"),
            },
            // Channel failures are the connection manager's business;
            // if one escapes this far, report it as a network failure.
            irrisync_api::Error::ChannelConnect(reason) => CoreError::Network {
                message: format!("push channel connection failed: {reason}"),
            },
            irrisync_api::Error::ChannelClosed { code, reason } => CoreError::Network {
                message: format!("push channel closed (code {code}): {reason}"),
            },
        }
    }
}
