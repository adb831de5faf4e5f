/// Engine facade: one explicit instance owning every store
use crate::chat_store::{ChatMessage, ChatStore};
use crate::config::Config;
use crate::error::{EngineError, Result};
use crate::gps::{GpsStatus, GpsStatusStateMachine, LocationProvider, ProviderEvent};
use crate::location::{Location, OwnLocationStore};
use crate::location_cache::LocationCache;
use crate::notifier::{ChangeNotifier, Notification, ObserverId};
use crate::peer_store::PeerLocationStore;
use crate::scheduler::{SyncCycle, SyncScheduler};
use crate::transport::RelayTransport;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Peer location & chat synchronization engine. Constructed once at process
/// start and passed by handle to consumers; observers receive snapshots and
/// notifications, never references into mutable storage.
pub struct SyncEngine {
    /// Unique device identifier sent to the relay
    pub device_id: String,

    config: Config,
    own_location: OwnLocationStore,
    peer_locations: PeerLocationStore,
    chat: ChatStore,
    notifier: ChangeNotifier,
    scheduler: Arc<SyncScheduler>,
    gps: Arc<RwLock<GpsStatusStateMachine>>,
    cache: Option<LocationCache>,
    provider: Arc<RwLock<Option<Arc<dyn LocationProvider>>>>,
    shutdown: Arc<Mutex<Option<watch::Sender<bool>>>>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl SyncEngine {
    pub fn new(config: Config, transport: Arc<dyn RelayTransport>) -> Result<Self> {
        let device_id = Uuid::new_v4().to_string();

        let own_location = OwnLocationStore::new();
        let peer_locations = PeerLocationStore::new(config.peer_stale_timeout);
        let chat = ChatStore::new(config.max_message_length);
        let notifier = ChangeNotifier::new();
        let gps = Arc::new(RwLock::new(GpsStatusStateMachine::new(
            config.accuracy_threshold_meters,
        )));

        let cache = match &config.data_dir {
            Some(dir) => Some(LocationCache::open(dir, config.location_max_age)?),
            None => None,
        };

        let scheduler = Arc::new(SyncScheduler::new(
            transport,
            device_id.clone(),
            own_location.clone(),
            peer_locations.clone(),
            chat.clone(),
            notifier.clone(),
            config.backoff_base,
            config.backoff_max,
        ));

        info!("Created sync engine with device ID: {}", device_id);

        Ok(Self {
            device_id,
            config,
            own_location,
            peer_locations,
            chat,
            notifier,
            scheduler,
            gps,
            cache,
            provider: Arc::new(RwLock::new(None)),
            shutdown: Arc::new(Mutex::new(None)),
            tasks: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// Start the sync timer. Safe to call after `stop` (cycle state resets
    /// to defaults); a second `start` while running is a no-op.
    pub async fn start(&self) {
        let mut slot = self.shutdown.lock().await;
        if slot.is_some() {
            debug!("engine already running");
            return;
        }
        self.scheduler.reset().await;

        let (tx, rx) = watch::channel(false);
        *slot = Some(tx);

        let scheduler = self.scheduler.clone();
        let period = self.config.sync_interval;
        let handle = tokio::spawn(run_sync_loop(scheduler, period, rx));
        self.tasks.lock().await.push(handle);

        info!("sync engine started (device {})", self.device_id);
    }

    /// Stop syncing: cancels any in-flight request and halts the timer.
    /// Safe from any state; idempotent.
    pub async fn stop(&self) {
        let tx = self.shutdown.lock().await.take();
        match tx {
            Some(tx) => {
                let _ = tx.send(true);
            }
            None => return,
        }
        let mut tasks = self.tasks.lock().await;
        for handle in tasks.drain(..) {
            let _ = handle.await;
        }
        info!("sync engine stopped");
    }

    /// Wire up the platform location source. The machine is seeded from the
    /// provider's current permission/hardware state, then fed from the event
    /// channel until the provider side closes it.
    pub async fn attach_provider(
        &self,
        provider: Arc<dyn LocationProvider>,
        mut events: mpsc::UnboundedReceiver<ProviderEvent>,
    ) {
        let hardware = {
            let mut gps = self.gps.write().await;
            gps.set_hardware_present(provider.hardware_present())
        };
        if let Some(status) = hardware {
            self.notifier
                .notify(Notification::GpsStatusChanged(status))
                .await;
        }
        let initial = provider.current_permission_state();
        self.handle_provider_event(ProviderEvent::PermissionChanged(initial))
            .await;

        *self.provider.write().await = Some(provider);

        // Intake runs until the provider side closes the channel; it is not
        // tied to start/stop, which only govern the sync timer.
        let engine = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                engine.handle_provider_event(event).await;
            }
            debug!("provider event channel closed");
        });
    }

    /// Route one provider event into the stores and the GPS state machine.
    pub async fn handle_provider_event(&self, event: ProviderEvent) {
        if let ProviderEvent::FixUpdate(fix) = &event {
            let location = fix.location();
            self.own_location.accept(location).await;
            if let Some(cache) = &self.cache {
                if let Err(e) = cache.store(&location) {
                    warn!("location cache write failed: {}", e);
                }
            }
            self.notifier.notify(Notification::NewLocation).await;
        }

        let transition = self.gps.write().await.apply(&event);
        if let Some(status) = transition {
            self.notifier
                .notify(Notification::GpsStatusChanged(status))
                .await;
        }
    }

    /// Triggers the OS permission prompt via the attached provider; the
    /// outcome arrives later as a provider event, never here.
    pub async fn request_permission(&self) -> Result<()> {
        let provider = self.provider.read().await.clone();
        match provider {
            Some(provider) => {
                provider.request_permission();
                Ok(())
            }
            None => Err(EngineError::Permission(
                "no location provider attached".to_string(),
            )),
        }
    }

    pub async fn subscribe(&self) -> (ObserverId, mpsc::UnboundedReceiver<Notification>) {
        self.notifier.subscribe().await
    }

    pub async fn unsubscribe(&self, id: ObserverId) {
        self.notifier.unsubscribe(id).await;
    }

    pub async fn snapshot_peer_locations(&self) -> Vec<Location> {
        self.peer_locations.all_locations().await
    }

    pub async fn snapshot_chat_messages(&self) -> Vec<ChatMessage> {
        self.chat.visible_messages().await
    }

    pub async fn snapshot_gps_status(&self) -> GpsStatus {
        self.gps.read().await.status()
    }

    pub async fn sync_cycle_state(&self) -> SyncCycle {
        self.scheduler.cycle_state().await
    }

    /// Queue a chat message for the next sync cycle. Validation failures
    /// reject locally; nothing is sent.
    pub async fn enqueue_outgoing_message(&self, text: &str) -> Result<()> {
        self.chat.enqueue_outgoing(text).await
    }

    /// The current fix, or the persisted last-known location if no fresh fix
    /// exists and the cached entry is inside the freshness window.
    pub async fn own_location(&self) -> Option<Location> {
        if let Some(location) = self.own_location.current().await {
            return Some(location);
        }
        match &self.cache {
            Some(cache) => cache.fresh_location().unwrap_or_else(|e| {
                warn!("location cache read failed: {}", e);
                None
            }),
            None => None,
        }
    }
}

impl Clone for SyncEngine {
    fn clone(&self) -> Self {
        Self {
            device_id: self.device_id.clone(),
            config: self.config.clone(),
            own_location: self.own_location.clone(),
            peer_locations: self.peer_locations.clone(),
            chat: self.chat.clone(),
            notifier: self.notifier.clone(),
            scheduler: self.scheduler.clone(),
            gps: self.gps.clone(),
            cache: self.cache.clone(),
            provider: self.provider.clone(),
            shutdown: self.shutdown.clone(),
            tasks: self.tasks.clone(),
        }
    }
}

/// Timer-driven sync loop: Idle wait, one cycle per tick, backoff sleep on
/// failure. Shutdown cancels whichever await is pending, including the
/// in-flight request.
async fn run_sync_loop(
    scheduler: Arc<SyncScheduler>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {}
        }

        let backoff = tokio::select! {
            _ = shutdown.changed() => break,
            backoff = scheduler.tick() => backoff,
        };

        if let Some(delay) = backoff {
            debug!("sync backoff for {:?}", delay);
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = sleep(delay) => scheduler.backoff_elapsed().await,
            }
        }
    }
    debug!("sync loop exited");
}
