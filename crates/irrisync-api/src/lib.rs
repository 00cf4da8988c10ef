// irrisync-api: HTTP + push-channel transport for the irrigation service.
//
// This crate knows about URLs, JSON and sockets. Everything stateful
// (reconnection, reconciliation, fan-out) lives in irrisync-core.

pub mod channel;
pub mod client;
pub mod error;
pub mod models;
pub mod transport;

// ── Primary re-exports ──────────────────────────────────────────────
pub use channel::{PushConnection, PushConnector, PushMessage, WsConnection, WsConnector};
pub use client::ApiClient;
pub use error::Error;
pub use models::{DeviceDto, DeviceStatusKind, PistonDto, ScheduleDto, ScheduleRequest};
pub use transport::{TlsMode, TransportConfig};
