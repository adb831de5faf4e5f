/// Fixed-interval sync cycle against the relay
use crate::chat_store::ChatStore;
use crate::error::EngineError;
use crate::location::OwnLocationStore;
use crate::notifier::{ChangeNotifier, Notification};
use crate::peer_store::PeerLocationStore;
use crate::protocol::{SyncRequest, SyncResponse, WireLocation, WireOutgoingMessage, PROTOCOL_VERSION};
use crate::transport::RelayTransport;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Where the cycle currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    InFlight,
    Backoff,
}

/// Mutable cycle state, owned exclusively by the scheduler. The next-tick
/// deadline itself lives in the armed tokio timer.
#[derive(Debug, Clone)]
pub struct SyncCycle {
    pub phase: SyncPhase,
    pub consecutive_failures: u32,
    pub connected: bool,
}

impl Default for SyncCycle {
    fn default() -> Self {
        Self {
            phase: SyncPhase::Idle,
            consecutive_failures: 0,
            connected: true,
        }
    }
}

/// Drives one request/response exchange per tick, enforcing at most one
/// in-flight request and exponential backoff on failure.
pub struct SyncScheduler {
    transport: Arc<dyn RelayTransport>,
    device_id: String,
    own_location: OwnLocationStore,
    peer_locations: PeerLocationStore,
    chat: ChatStore,
    notifier: ChangeNotifier,
    cycle: Arc<RwLock<SyncCycle>>,
    backoff_base: Duration,
    backoff_max: Duration,
}

impl SyncScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        transport: Arc<dyn RelayTransport>,
        device_id: String,
        own_location: OwnLocationStore,
        peer_locations: PeerLocationStore,
        chat: ChatStore,
        notifier: ChangeNotifier,
        backoff_base: Duration,
        backoff_max: Duration,
    ) -> Self {
        Self {
            transport,
            device_id,
            own_location,
            peer_locations,
            chat,
            notifier,
            cycle: Arc::new(RwLock::new(SyncCycle::default())),
            backoff_base,
            backoff_max,
        }
    }

    pub async fn cycle_state(&self) -> SyncCycle {
        self.cycle.read().await.clone()
    }

    /// Reset cycle state to defaults, e.g. on engine restart after a long
    /// background period.
    pub async fn reset(&self) {
        *self.cycle.write().await = SyncCycle::default();
    }

    /// One timer tick: build the upload payload, exchange it with the relay
    /// and apply the response. A tick arriving while a request is already in
    /// flight is dropped. Returns the backoff delay to wait before re-arming
    /// if the cycle failed.
    pub async fn tick(&self) -> Option<Duration> {
        {
            let mut cycle = self.cycle.write().await;
            if cycle.phase == SyncPhase::InFlight {
                debug!("sync tick dropped: request already in flight");
                return None;
            }
            cycle.phase = SyncPhase::InFlight;
        }

        let request = self.build_request().await;
        match self.transport.exchange(request).await {
            Ok(response) => {
                self.handle_success(response).await;
                None
            }
            Err(err) => Some(self.handle_failure(err).await),
        }
    }

    /// Marks the backoff wait as elapsed; the timer re-arms in the driver.
    pub async fn backoff_elapsed(&self) {
        let mut cycle = self.cycle.write().await;
        if cycle.phase == SyncPhase::Backoff {
            cycle.phase = SyncPhase::Idle;
        }
    }

    async fn build_request(&self) -> SyncRequest {
        let location = self.own_location.current().await.map(WireLocation::from);
        let messages = self
            .chat
            .outgoing_queue()
            .await
            .into_iter()
            .map(|m| WireOutgoingMessage {
                text: m.text,
                timestamp: m.queued_at.timestamp(),
            })
            .collect();
        SyncRequest {
            version: PROTOCOL_VERSION,
            device: self.device_id.clone(),
            location,
            messages,
        }
    }

    async fn handle_success(&self, response: SyncResponse) {
        let peers_changed = self
            .peer_locations
            .apply_server_snapshot(response.peer_locations())
            .await;
        let chat_changed = self
            .chat
            .merge_server_history(response.confirmed_history())
            .await;

        let was_disconnected = {
            let mut cycle = self.cycle.write().await;
            let was_disconnected = !cycle.connected;
            cycle.connected = true;
            cycle.consecutive_failures = 0;
            cycle.phase = SyncPhase::Idle;
            was_disconnected
        };

        if was_disconnected {
            info!("relay reachable again");
            self.notifier
                .notify(Notification::ConnectivityChanged { connected: true })
                .await;
        }
        if peers_changed || chat_changed {
            self.notifier.notify(Notification::NewServerData).await;
        }
    }

    async fn handle_failure(&self, err: EngineError) -> Duration {
        let (delay, entered_disconnected) = {
            let mut cycle = self.cycle.write().await;
            // Clamp the exponent so the shift cannot overflow; the cap
            // dominates long before that.
            let exponent = cycle.consecutive_failures.min(16);
            let delay = self
                .backoff_base
                .saturating_mul(1u32 << exponent)
                .min(self.backoff_max);
            cycle.consecutive_failures += 1;
            let entered_disconnected = cycle.connected;
            cycle.connected = false;
            cycle.phase = SyncPhase::Backoff;
            (delay, entered_disconnected)
        };

        match &err {
            EngineError::Protocol(_) => warn!("sync failed (protocol): {}", err),
            _ => warn!("sync failed (transport): {}", err),
        }

        // One notification per entry into the disconnected state, not one
        // per failed attempt.
        if entered_disconnected {
            self.notifier
                .notify(Notification::ConnectivityChanged { connected: false })
                .await;
        }
        delay
    }
}
