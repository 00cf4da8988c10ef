// ── Session abstraction ──
//
// Full lifecycle management for one connection to the irrigation
// service. Wires the REST client, push channel, reconciler, store,
// listener registries, and per-operation request slots together, and
// owns the background tasks that keep them fed.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use irrisync_api::models::DeviceStatusKind;
use irrisync_api::transport::TransportConfig;
use irrisync_api::{ApiClient, PushConnector, PushMessage, ScheduleRequest, WsConnector};

use crate::channel::{ChannelManager, ConnectionState};
use crate::config::SessionConfig;
use crate::error::CoreError;
use crate::model::{Device, Piston, PistonState, Schedule};
use crate::reconcile::{Reconciler, SyncClock};
use crate::registry::{Registry, SubscriptionId};
use crate::request::{RequestResult, RequestSlot};
use crate::store::DeviceStore;
use crate::stream::DeviceStream;

// ── Push-event payloads ──────────────────────────────────────────────

/// A piston state change announced over the push channel, as delivered
/// to registered listeners. Every received event is fanned out, whether
/// or not it changed the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PistonUpdate {
    pub device_id: String,
    pub piston_number: u32,
    pub state: PistonState,
    /// Server timestamp of the event, unix milliseconds.
    pub timestamp: u64,
}

/// A device online/offline transition announced over the push channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceStatusEvent {
    pub device_id: String,
    pub status: DeviceStatusKind,
}

// ── Session ──────────────────────────────────────────────────────────

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<SessionInner>`. One session holds one
/// device store, one push channel, and one request slot per logical
/// operation; screens subscribe to the pieces they care about and the
/// session keeps them all consistent.
///
/// Generic over the push connector so tests can script the channel;
/// production code uses the default [`WsConnector`].
pub struct Session<C: PushConnector = WsConnector> {
    inner: Arc<SessionInner<C>>,
}

impl<C: PushConnector> Clone for Session<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct SessionInner<C: PushConnector> {
    config: SessionConfig,
    api: ApiClient,
    store: Arc<DeviceStore>,
    reconciler: Reconciler,
    channel: ChannelManager<C>,
    piston_listeners: Registry<PistonUpdate>,
    status_listeners: Registry<DeviceStatusEvent>,
    device_list: Arc<RequestSlot<Vec<Device>>>,
    single_device: Arc<RequestSlot<Device>>,
    toggle: Arc<RequestSlot<Piston>>,
    schedules: Arc<RequestSlot<Vec<Schedule>>>,
    schedule_write: Arc<RequestSlot<Schedule>>,
    schedule_delete: Arc<RequestSlot<()>>,
    cancel: CancellationToken,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Session {
    /// Create a session from configuration. Does NOT start anything --
    /// call [`start()`](Self::start) to connect the push channel and
    /// spawn background tasks.
    pub fn new(config: SessionConfig) -> Result<Self, CoreError> {
        let transport = TransportConfig {
            timeout: config.timeout,
            ..TransportConfig::default()
        };
        let api = ApiClient::new(config.base_url.clone(), config.auth_token.clone(), &transport)?;
        let connector = WsConnector::new(api.push_url()?, config.auth_token.clone());
        Ok(Self::from_parts(config, api, connector))
    }
}

impl<C: PushConnector> Session<C> {
    /// Assemble a session around an explicit connector (tests inject a
    /// scripted one here).
    pub fn with_connector(config: SessionConfig, connector: C) -> Result<Self, CoreError> {
        let transport = TransportConfig {
            timeout: config.timeout,
            ..TransportConfig::default()
        };
        let api = ApiClient::new(config.base_url.clone(), config.auth_token.clone(), &transport)?;
        Ok(Self::from_parts(config, api, connector))
    }

    fn from_parts(config: SessionConfig, api: ApiClient, connector: C) -> Self {
        let store = Arc::new(DeviceStore::new());
        let clock = Arc::new(SyncClock::new());
        let reconciler = Reconciler::new(Arc::clone(&store), clock);
        let channel = ChannelManager::new(connector, config.reconnect.clone());

        Self {
            inner: Arc::new(SessionInner {
                config,
                api,
                store,
                reconciler,
                channel,
                piston_listeners: Registry::new(),
                status_listeners: Registry::new(),
                device_list: RequestSlot::new(),
                single_device: RequestSlot::new(),
                toggle: RequestSlot::new(),
                schedules: RequestSlot::new(),
                schedule_write: RequestSlot::new(),
                schedule_delete: RequestSlot::new(),
                cancel: CancellationToken::new(),
                task_handles: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Access the session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Access the underlying device store.
    pub fn store(&self) -> &Arc<DeviceStore> {
        &self.inner.store
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Start the session: connect the push channel (if enabled), spawn
    /// the push-event pump and the periodic refresh task, and kick off
    /// an initial device fetch.
    pub fn start(&self) {
        let mut handles = self
            .inner
            .task_handles
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        if self.inner.config.channel_enabled {
            // Subscribe before connecting so no early message is lost.
            let rx = self.inner.channel.subscribe();
            self.inner.channel.connect();
            let session = self.clone();
            let cancel = self.inner.cancel.clone();
            handles.push(tokio::spawn(push_pump(session, rx, cancel)));
        }

        let interval_secs = self.inner.config.refresh_interval_secs;
        if interval_secs > 0 {
            let session = self.clone();
            let cancel = self.inner.cancel.clone();
            handles.push(tokio::spawn(refresh_task(session, interval_secs, cancel)));
        }
        drop(handles);

        self.refresh_devices();
        info!("session started");
    }

    /// Stop background tasks and tear down the push channel. The store
    /// and its snapshots stay readable afterwards.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        self.inner.channel.disconnect().await;

        let handles: Vec<JoinHandle<()>> = std::mem::take(
            &mut *self
                .inner
                .task_handles
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner),
        );
        for handle in handles {
            let _ = handle.await;
        }
        info!("session shut down");
    }

    /// Foreground-resume hook: re-trigger the channel loop. No-op when
    /// the channel is healthy or disabled.
    pub fn ensure_connected(&self) {
        if self.inner.config.channel_enabled {
            self.inner.channel.connect();
        }
    }

    // ── Device operations ────────────────────────────────────────────

    /// Fetch the full device list. Emits LOADING immediately on the
    /// device-list slot; success feeds the reconciler.
    pub fn refresh_devices(&self) -> watch::Receiver<RequestResult<Vec<Device>>> {
        let api = self.inner.api.clone();
        let inner = Arc::clone(&self.inner);
        self.inner.device_list.execute_with(
            async move {
                let dtos = api.list_devices().await?;
                Ok(dtos.into_iter().map(Device::from).collect())
            },
            move |devices: &Vec<Device>| {
                inner.reconciler.ingest_fetch(devices.clone());
            },
        );
        self.inner.device_list.subscribe()
    }

    /// Fetch one device; success merges into the store without touching
    /// other devices.
    pub fn fetch_device(&self, device_id: &str) -> watch::Receiver<RequestResult<Device>> {
        let api = self.inner.api.clone();
        let inner = Arc::clone(&self.inner);
        let id = device_id.to_owned();
        self.inner.single_device.execute_with(
            async move { Ok(Device::from(api.get_device(&id).await?)) },
            move |device: &Device| {
                inner.reconciler.ingest_device(device.clone());
            },
        );
        self.inner.single_device.subscribe()
    }

    /// Toggle a piston to the desired state. The confirmed piston from
    /// the server is applied to the store like a push event, stamped by
    /// the session clock so it outranks anything received earlier.
    pub fn toggle_piston(
        &self,
        device_id: &str,
        piston_number: u32,
        desired: PistonState,
    ) -> watch::Receiver<RequestResult<Piston>> {
        let api = self.inner.api.clone();
        let inner = Arc::clone(&self.inner);
        let id = device_id.to_owned();
        let confirm_id = id.clone();
        self.inner.toggle.execute_with(
            async move {
                let dto = api.toggle_piston(&id, piston_number, desired.into()).await?;
                Ok(Piston::from(dto))
            },
            move |piston: &Piston| {
                inner.reconciler.ingest_toggle(
                    &confirm_id,
                    piston.number,
                    piston.state,
                    piston.last_triggered,
                );
            },
        );
        self.inner.toggle.subscribe()
    }

    // ── Schedule operations ──────────────────────────────────────────

    /// Fetch all schedules for the account.
    pub fn load_schedules(&self) -> watch::Receiver<RequestResult<Vec<Schedule>>> {
        let api = self.inner.api.clone();
        self.inner.schedules.execute(async move {
            let dtos = api.list_schedules().await?;
            Ok(dtos.into_iter().map(Schedule::from).collect())
        });
        self.inner.schedules.subscribe()
    }

    /// Create a schedule. The caller reloads the list on SUCCESS.
    pub fn create_schedule(
        &self,
        request: ScheduleRequest,
    ) -> watch::Receiver<RequestResult<Schedule>> {
        let api = self.inner.api.clone();
        self.inner
            .schedule_write
            .execute(async move { Ok(Schedule::from(api.create_schedule(&request).await?)) });
        self.inner.schedule_write.subscribe()
    }

    /// Update an existing schedule.
    pub fn update_schedule(
        &self,
        schedule_id: &str,
        request: ScheduleRequest,
    ) -> watch::Receiver<RequestResult<Schedule>> {
        let api = self.inner.api.clone();
        let id = schedule_id.to_owned();
        self.inner.schedule_write.execute(async move {
            Ok(Schedule::from(api.update_schedule(&id, &request).await?))
        });
        self.inner.schedule_write.subscribe()
    }

    /// Delete a schedule.
    pub fn delete_schedule(&self, schedule_id: &str) -> watch::Receiver<RequestResult<()>> {
        let api = self.inner.api.clone();
        let id = schedule_id.to_owned();
        self.inner.schedule_delete.execute(async move {
            api.delete_schedule(&id).await?;
            Ok(())
        });
        self.inner.schedule_delete.subscribe()
    }

    // ── Observables ──────────────────────────────────────────────────

    /// Stream of device snapshots. A new subscriber sees the current
    /// snapshot first.
    pub fn devices(&self) -> DeviceStream {
        self.inner.store.changes()
    }

    /// The current device snapshot (cheap clone, never partial).
    pub fn devices_snapshot(&self) -> Arc<Vec<Arc<Device>>> {
        self.inner.store.snapshot()
    }

    /// Observe push-channel connection state.
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.channel.state()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.channel.is_connected()
    }

    // ── Request result streams ───────────────────────────────────────

    pub fn device_list_results(&self) -> watch::Receiver<RequestResult<Vec<Device>>> {
        self.inner.device_list.subscribe()
    }

    pub fn single_device_results(&self) -> watch::Receiver<RequestResult<Device>> {
        self.inner.single_device.subscribe()
    }

    pub fn toggle_results(&self) -> watch::Receiver<RequestResult<Piston>> {
        self.inner.toggle.subscribe()
    }

    pub fn schedule_results(&self) -> watch::Receiver<RequestResult<Vec<Schedule>>> {
        self.inner.schedules.subscribe()
    }

    pub fn schedule_write_results(&self) -> watch::Receiver<RequestResult<Schedule>> {
        self.inner.schedule_write.subscribe()
    }

    pub fn schedule_delete_results(&self) -> watch::Receiver<RequestResult<()>> {
        self.inner.schedule_delete.subscribe()
    }

    // ── Listener registries ──────────────────────────────────────────

    /// Register a piston-update listener. Keep the returned id; it is
    /// the only way to unsubscribe this exact registration.
    pub fn subscribe_piston_updates(
        &self,
        listener: impl Fn(&PistonUpdate) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.inner.piston_listeners.subscribe(listener)
    }

    pub fn unsubscribe_piston_updates(&self, id: SubscriptionId) {
        self.inner.piston_listeners.unsubscribe(id);
    }

    /// Register a device-status listener.
    pub fn subscribe_device_status(
        &self,
        listener: impl Fn(&DeviceStatusEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.inner.status_listeners.subscribe(listener)
    }

    pub fn unsubscribe_device_status(&self, id: SubscriptionId) {
        self.inner.status_listeners.unsubscribe(id);
    }

    // ── Push handling ────────────────────────────────────────────────

    /// Route one push message: reconcile into the store, then fan out
    /// to listeners. Fan-out is unconditional; the store drops stale
    /// and duplicate events on its own.
    fn handle_push(&self, message: &PushMessage) {
        match message {
            PushMessage::PistonUpdate {
                device_id,
                piston_number,
                state,
                timestamp,
            } => {
                let applied = self.inner.reconciler.ingest_push(
                    device_id,
                    *piston_number,
                    PistonState::from(*state),
                    *timestamp,
                );
                debug!(%device_id, piston_number, applied, "piston update received");

                self.inner.piston_listeners.dispatch(&PistonUpdate {
                    device_id: device_id.clone(),
                    piston_number: *piston_number,
                    state: PistonState::from(*state),
                    timestamp: *timestamp,
                });
            }
            PushMessage::DeviceStatus { device_id, status } => {
                debug!(%device_id, ?status, "device status received");
                self.inner.status_listeners.dispatch(&DeviceStatusEvent {
                    device_id: device_id.clone(),
                    status: *status,
                });
            }
        }
    }
}

// ── Background tasks ─────────────────────────────────────────────────

async fn push_pump<C: PushConnector>(
    session: Session<C>,
    mut rx: broadcast::Receiver<Arc<PushMessage>>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            msg = rx.recv() => match msg {
                Ok(message) => session.handle_push(&message),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "push pump lagged behind the channel");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
    debug!("push pump exiting");
}

async fn refresh_task<C: PushConnector>(
    session: Session<C>,
    interval_secs: u64,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
    interval.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                debug!("periodic device refresh");
                session.refresh_devices();
            }
        }
    }
    debug!("refresh task exiting");
}
