//! Push-channel connection manager.
//!
//! Owns the one logical connection to the push channel: connect,
//! disconnect, and reconnect with capped exponential backoff. The
//! manager is an explicitly owned instance injected into the session
//! (never a process global), and its `ConnectionState` is the only
//! thing consumers observe about channel health -- channel errors are
//! absorbed here, never surfaced as request errors.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use irrisync_api::{PushConnection, PushConnector, PushMessage};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ReconnectConfig;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Connection state observable by consumers. Owned exclusively by the
/// manager; exposed read-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Manages the persistent push channel.
///
/// At most one logical connection exists per manager regardless of how
/// many components ask for it: `connect()` is idempotent while a run
/// loop is alive. An explicit `disconnect()` stops the loop for good;
/// everything else (error, close, timeout) triggers backed-off retry,
/// forever. Push is current-state-only -- no history is replayed on
/// (re)connect.
pub struct ChannelManager<C: PushConnector> {
    connector: Arc<C>,
    config: ReconnectConfig,
    state: watch::Sender<ConnectionState>,
    event_tx: broadcast::Sender<Arc<PushMessage>>,
    run: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl<C: PushConnector> ChannelManager<C> {
    pub fn new(connector: impl Into<Arc<C>>, config: ReconnectConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            connector: connector.into(),
            config,
            state,
            event_tx,
            run: Mutex::new(None),
        }
    }

    /// Start (or re-trigger) the connection loop.
    ///
    /// No-op while already CONNECTING or CONNECTED. The embedding app
    /// calls this again on foreground resume; when the channel is
    /// healthy nothing happens.
    pub fn connect(&self) {
        let mut guard = self.run.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

        if let Some((_, handle)) = guard.as_ref() {
            if !handle.is_finished() {
                debug!("push channel already running, connect() is a no-op");
                return;
            }
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_loop(
            Arc::clone(&self.connector),
            self.config.clone(),
            self.state.clone(),
            self.event_tx.clone(),
            cancel.clone(),
        ));
        *guard = Some((cancel, handle));
    }

    /// Tear the channel down. Safe from any state; no auto-retry until
    /// the next explicit `connect()`.
    pub async fn disconnect(&self) {
        let taken = self
            .run
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();

        if let Some((cancel, handle)) = taken {
            cancel.cancel();
            let _ = handle.await;
        }
        let _ = self.state.send(ConnectionState::Disconnected);
        debug!("push channel disconnected");
    }

    /// Whether the channel is currently CONNECTED. Never blocks.
    pub fn is_connected(&self) -> bool {
        *self.state.borrow() == ConnectionState::Connected
    }

    /// Observe connection state changes.
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Get a new receiver for the push message stream. Multiple
    /// consumers subscribe concurrently; a lagging consumer receives
    /// `RecvError::Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<PushMessage>> {
        self.event_tx.subscribe()
    }
}

// ── Background reconnection loop ─────────────────────────────────────

/// Main loop: connect -> pump -> on failure, backoff -> reconnect.
async fn run_loop<C: PushConnector>(
    connector: Arc<C>,
    config: ReconnectConfig,
    state: watch::Sender<ConnectionState>,
    event_tx: broadcast::Sender<Arc<PushMessage>>,
    cancel: CancellationToken,
) {
    let mut attempt: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            break;
        }

        let _ = state.send(ConnectionState::Connecting);

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            res = tokio::time::timeout(config.connect_timeout, connector.connect()) => res,
        };

        match outcome {
            Ok(Ok(mut conn)) => {
                let _ = state.send(ConnectionState::Connected);
                let connected_at = tokio::time::Instant::now();

                pump(&mut conn, &event_tx, &cancel).await;
                if cancel.is_cancelled() {
                    break;
                }

                // A stable connected period earns a fresh backoff.
                if connected_at.elapsed() >= config.stability_threshold {
                    attempt = 0;
                }
                let _ = state.send(ConnectionState::Disconnected);
            }
            Ok(Err(e)) => {
                warn!(error = %e, attempt, "push channel connection failed");
                let _ = state.send(ConnectionState::Disconnected);
            }
            Err(_elapsed) => {
                warn!(
                    timeout_ms = config.connect_timeout.as_millis() as u64,
                    attempt,
                    "push channel connection attempt timed out"
                );
                let _ = state.send(ConnectionState::Disconnected);
            }
        }

        let delay = backoff_delay(attempt, &config);
        info!(
            delay_ms = delay.as_millis() as u64,
            attempt,
            "waiting before push channel reconnect"
        );

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }

        attempt = attempt.saturating_add(1);
    }

    let _ = state.send(ConnectionState::Disconnected);
    debug!("push channel loop exiting");
}

/// Forward messages from one live connection until it ends.
async fn pump<Conn: PushConnection>(
    conn: &mut Conn,
    event_tx: &broadcast::Sender<Arc<PushMessage>>,
    cancel: &CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            msg = conn.next_message() => match msg {
                Some(Ok(message)) => {
                    // Send errors just mean no active subscribers.
                    let _ = event_tx.send(Arc::new(message));
                }
                Some(Err(e)) => {
                    warn!(error = %e, "push channel receive error");
                    return;
                }
                None => {
                    info!("push channel closed by server");
                    return;
                }
            }
        }
    }
}

// ── Backoff calculation ──────────────────────────────────────────────

/// Exponential backoff with deterministic jitter:
/// `delay = min(initial * 2^attempt, max) * (1 + 0.25 * sin(attempt * 7.3))`.
///
/// The jitter spreads reconnection storms across clients without
/// needing a random source; it never shrinks a delay below the
/// previous attempt's within the exponential ramp.
fn backoff_delay(attempt: u32, config: &ReconnectConfig) -> Duration {
    let base = config.initial_delay.as_secs_f64() * 2.0_f64.powi(i32::try_from(attempt).unwrap_or(i32::MAX));
    let capped = base.min(config.max_delay.as_secs_f64());

    let jitter_factor = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();
    Duration::from_secs_f64((capped * jitter_factor).max(0.0))
}

// ── Tests ────────────────────────────────────────────────────────────
