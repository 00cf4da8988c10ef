//! Reactive state-synchronization layer between `irrisync-api` and the
//! embedding application (mobile shell, tests).
//!
//! This crate owns the business logic, domain model, and reactive data
//! infrastructure for the irrigation client workspace:
//!
//! - **[`Session`]** — Central facade managing the full lifecycle:
//!   [`start()`](Session::start) connects the push channel, spawns the
//!   push-event pump and periodic refresh tasks, and kicks off the
//!   initial device fetch. Operations drive per-slot
//!   [`RequestResult`] streams.
//!
//! - **[`DeviceStore`]** — Versioned reactive storage built on a
//!   `tokio::sync::watch` snapshot channel. Applies full fetches and
//!   piston-level push events under last-writer-wins by sequence stamp,
//!   never by arrival order.
//!
//! - **[`DeviceStream`]** — Subscription handle vended by the store.
//!   A late subscriber observes the current snapshot first, then one
//!   item per accepted mutation.
//!
//! - **[`ChannelManager`]** — Owns the one push-channel connection:
//!   idempotent connect, capped exponential backoff with unlimited
//!   retries, and an observable [`ConnectionState`].
//!
//! - **[`Registry`]** — Identity-handle listener fan-out for push
//!   events; a panicking listener never takes down its siblings.
//!
//! - **Domain model** ([`model`]) — Canonical types ([`Device`],
//!   [`Piston`], [`Schedule`]) with per-piston version stamps driving
//!   reconciliation.

pub mod channel;
pub mod config;
pub mod convert;
pub mod error;
pub mod model;
pub mod reconcile;
pub mod registry;
pub mod request;
pub mod session;
pub mod store;
pub mod stream;

// ── Primary re-exports ──────────────────────────────────────────────
pub use channel::{ChannelManager, ConnectionState};
pub use config::{ReconnectConfig, SessionConfig};
pub use error::{CoreError, FailureKind};
pub use reconcile::{Reconciler, SyncClock};
pub use registry::{Registry, SubscriptionId};
pub use request::{RequestResult, RequestSlot};
pub use session::{DeviceStatusEvent, PistonUpdate, Session};
pub use store::DeviceStore;
pub use stream::DeviceStream;

// Re-export model types at the crate root for ergonomics.
pub use model::{Device, Piston, PistonState, Schedule};
