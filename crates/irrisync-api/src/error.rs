use thiserror::Error;

/// Top-level error type for the `irrisync-api` crate.
///
/// Covers every transport-level failure mode: HTTP, timeouts, server
/// rejections, payload decoding, and the push channel. `irrisync-core`
/// maps these into user-facing request failures.
#[derive(Debug, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, TLS, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Request timed out.
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// TLS configuration or handshake error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── Server ──────────────────────────────────────────────────────
    /// Non-2xx response with whatever message the server provided.
    #[error("Server error (HTTP {status}): {message}")]
    Server { status: u16, message: String },

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Decode error: {message}")]
    Decode { message: String, body: String },

    // ── Push channel ────────────────────────────────────────────────
    /// Push channel connection failed.
    #[error("Push channel connection failed: {0}")]
    ChannelConnect(String),

    /// Push channel closed unexpectedly.
    #[error("Push channel closed (code {code}): {reason}")]
    ChannelClosed { code: u16, reason: String },
}

impl Error {
    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::Timeout { .. } | Self::ChannelConnect(_) | Self::ChannelClosed { .. } => true,
            _ => false,
        }
    }

    /// Returns `true` if the underlying cause was a timeout.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Transport(e) => e.is_timeout(),
            _ => false,
        }
    }
}
