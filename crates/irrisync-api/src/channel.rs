//! Push channel transport.
//!
//! Defines the abstract connector/connection pair the engine's channel
//! manager drives, the wire format of push messages, and the real
//! WebSocket implementation over tokio-tungstenite.
//!
//! The channel is current-state-only: the server announces state
//! changes as they happen and replays no history on (re)connect.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder};
use url::Url;

use futures_util::StreamExt;

use crate::error::Error;
use crate::models::{DeviceStatusKind, ValveState};

// ── Push messages ────────────────────────────────────────────────────

/// A parsed message from the push channel.
///
/// The server tags every frame with a `type` discriminator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushMessage {
    /// One piston changed state.
    #[serde(rename_all = "camelCase")]
    PistonUpdate {
        device_id: String,
        piston_number: u32,
        state: ValveState,
        /// Server-side event time, unix milliseconds. Used as the
        /// reconciliation stamp, so re-delivery is a no-op.
        timestamp: u64,
    },

    /// A device went on- or offline.
    #[serde(rename_all = "camelCase")]
    DeviceStatus {
        device_id: String,
        status: DeviceStatusKind,
    },
}

/// Parse one text frame. Malformed or unknown frames are dropped with
/// a logged diagnostic; they never take down the receive loop.
pub fn parse_frame(text: &str) -> Option<PushMessage> {
    match serde_json::from_str(text) {
        Ok(msg) => Some(msg),
        Err(e) => {
            tracing::debug!(error = %e, frame = text, "dropping malformed push frame");
            None
        }
    }
}

// ── Abstract connector ───────────────────────────────────────────────

/// Factory for push-channel connections.
///
/// The engine's channel manager owns the reconnect policy and calls
/// `connect` for every attempt; implementations only establish a single
/// connection. Tests substitute scripted connectors.
pub trait PushConnector: Send + Sync + 'static {
    type Conn: PushConnection;

    fn connect(&self) -> impl Future<Output = Result<Self::Conn, Error>> + Send;
}

/// A single established push-channel connection.
pub trait PushConnection: Send + 'static {
    /// Receive the next message.
    ///
    /// `None` means the channel ended cleanly (server close frame or
    /// stream end); `Some(Err(_))` means it failed. Either way the
    /// connection is finished and the caller decides whether to redial.
    fn next_message(&mut self) -> impl Future<Output = Option<Result<PushMessage, Error>>> + Send;
}

// ── WebSocket implementation ─────────────────────────────────────────

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Real connector over tokio-tungstenite.
pub struct WsConnector {
    url: Url,
    auth_token: Option<SecretString>,
}

impl WsConnector {
    pub fn new(url: Url, auth_token: Option<SecretString>) -> Self {
        Self { url, auth_token }
    }
}

impl PushConnector for WsConnector {
    type Conn = WsConnection;

    async fn connect(&self) -> Result<WsConnection, Error> {
        tracing::info!(url = %self.url, "connecting push channel");

        let uri: tungstenite::http::Uri = self
            .url
            .as_str()
            .parse()
            .map_err(|e: tungstenite::http::uri::InvalidUri| Error::ChannelConnect(e.to_string()))?;

        let mut request = ClientRequestBuilder::new(uri);
        if let Some(token) = &self.auth_token {
            request = request.with_header(
                "Authorization",
                format!("Bearer {}", token.expose_secret()),
            );
        }

        let (stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| Error::ChannelConnect(e.to_string()))?;

        tracing::info!("push channel connected");
        Ok(WsConnection { stream })
    }
}

/// One live WebSocket connection, read side only.
pub struct WsConnection {
    stream: WsStream,
}

impl PushConnection for WsConnection {
    async fn next_message(&mut self) -> Option<Result<PushMessage, Error>> {
        loop {
            match self.stream.next().await {
                Some(Ok(tungstenite::Message::Text(text))) => {
                    if let Some(msg) = parse_frame(&text) {
                        return Some(Ok(msg));
                    }
                    // Malformed frame already logged; keep reading.
                }
                Some(Ok(tungstenite::Message::Ping(_))) => {
                    // tungstenite queues the pong reply automatically.
                    tracing::trace!("push channel ping");
                }
                Some(Ok(tungstenite::Message::Close(frame))) => {
                    if let Some(ref cf) = frame {
                        tracing::info!(code = %cf.code, reason = %cf.reason, "push channel close frame");
                    } else {
                        tracing::info!("push channel close frame (no payload)");
                    }
                    return None;
                }
                Some(Err(e)) => {
                    return Some(Err(Error::ChannelClosed {
                        code: 0,
                        reason: e.to_string(),
                    }));
                }
                None => {
                    tracing::info!("push channel stream ended");
                    return None;
                }
                _ => {
                    // Binary, Pong, raw frames -- ignore.
                }
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────
