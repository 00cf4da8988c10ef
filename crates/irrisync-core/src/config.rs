// ── Runtime session configuration ──
//
// Describes *how* to reach the irrigation service. Built by the
// embedding application (mobile shell, tests) and handed in whole --
// the core never reads config files.

use std::time::Duration;

use secrecy::SecretString;
use url::Url;

/// Exponential backoff tuning for push-channel reconnection.
///
/// Retries are unlimited; a stuck-CONNECTING situation stays visible
/// through the connection state observable instead of erroring out.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Upper bound on the backoff delay.
    pub max_delay: Duration,
    /// A connected period longer than this resets backoff to
    /// `initial_delay` on the next failure.
    pub stability_threshold: Duration,
    /// How long a single connection attempt may take before it is
    /// treated as a failure.
    pub connect_timeout: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            stability_threshold: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Configuration for one session against the irrigation service.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Service root URL (e.g. `https://irrigation.example.com`).
    pub base_url: Url,
    /// Bearer token for the REST API and push channel, if required.
    pub auth_token: Option<SecretString>,
    /// Request timeout for REST calls.
    pub timeout: Duration,
    /// Push-channel reconnection tuning.
    pub reconnect: ReconnectConfig,
    /// How often to perform a full device refresh (seconds). 0 = never;
    /// push events keep the store current between refreshes.
    pub refresh_interval_secs: u64,
    /// Enable the push channel. Disabled, the store is fed by REST only.
    pub channel_enabled: bool,
}

impl SessionConfig {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            auth_token: None,
            timeout: Duration::from_secs(30),
            reconnect: ReconnectConfig::default(),
            refresh_interval_secs: 300,
            channel_enabled: true,
        }
    }
}
