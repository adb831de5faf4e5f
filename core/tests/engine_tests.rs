/// Sync engine integration tests
/// Covers the scheduler invariants, response reconciliation and the
/// provider/GPS path end to end, with fake transports in place of the relay.

// In integration tests, the package is available as an external crate
extern crate ridelink_core;

use chrono::Utc;
use futures_util::future::BoxFuture;
use ridelink_core::chat_store::ChatStore;
use ridelink_core::gps::{Fix, GpsStatus, LocationProvider, PermissionState, ProviderEvent};
use ridelink_core::location::OwnLocationStore;
use ridelink_core::notifier::{ChangeNotifier, Notification};
use ridelink_core::peer_store::PeerLocationStore;
use ridelink_core::protocol::{SyncRequest, SyncResponse, WireChatMessage, WireLocation};
use ridelink_core::scheduler::SyncScheduler;
use ridelink_core::transport::RelayTransport;
use ridelink_core::{Config, EngineError, SyncEngine};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::time::sleep;

/// Returns a canned response, recording every request.
struct ScriptedTransport {
    response: Mutex<SyncResponse>,
    calls: AtomicUsize,
    last_request: Mutex<Option<SyncRequest>>,
}

impl ScriptedTransport {
    fn new(response: SyncResponse) -> Self {
        Self {
            response: Mutex::new(response),
            calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        }
    }

    fn set_response(&self, response: SyncResponse) {
        *self.response.lock().unwrap() = response;
    }

    fn last_request(&self) -> Option<SyncRequest> {
        self.last_request.lock().unwrap().clone()
    }
}

impl RelayTransport for ScriptedTransport {
    fn exchange(&self, request: SyncRequest) -> BoxFuture<'_, ridelink_core::Result<SyncResponse>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some(request);
        let response = self.response.lock().unwrap().clone();
        Box::pin(async move { Ok(response) })
    }
}

/// Holds every request open until released, counting concurrency.
struct BlockingTransport {
    calls: AtomicUsize,
    concurrent: AtomicUsize,
    max_concurrent: AtomicUsize,
    release: Notify,
}

impl BlockingTransport {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            concurrent: AtomicUsize::new(0),
            max_concurrent: AtomicUsize::new(0),
            release: Notify::new(),
        }
    }
}

impl RelayTransport for BlockingTransport {
    fn exchange(&self, _request: SyncRequest) -> BoxFuture<'_, ridelink_core::Result<SyncResponse>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            let active = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_concurrent.fetch_max(active, Ordering::SeqCst);
            self.release.notified().await;
            self.concurrent.fetch_sub(1, Ordering::SeqCst);
            Ok(empty_response())
        })
    }
}

struct FakeProvider {
    permission: Mutex<PermissionState>,
    prompt_requested: AtomicBool,
}

impl FakeProvider {
    fn new(permission: PermissionState) -> Self {
        Self {
            permission: Mutex::new(permission),
            prompt_requested: AtomicBool::new(false),
        }
    }
}

impl LocationProvider for FakeProvider {
    fn current_permission_state(&self) -> PermissionState {
        *self.permission.lock().unwrap()
    }

    fn request_permission(&self) {
        self.prompt_requested.store(true, Ordering::SeqCst);
    }

    fn hardware_present(&self) -> bool {
        true
    }
}

fn empty_response() -> SyncResponse {
    SyncResponse {
        locations: HashMap::new(),
        chat_messages: Vec::new(),
    }
}

fn peer_response(peers: &[(&str, f64, f64)]) -> SyncResponse {
    let now = Utc::now().timestamp();
    SyncResponse {
        locations: peers
            .iter()
            .map(|(id, lat, lon)| {
                (
                    id.to_string(),
                    WireLocation {
                        latitude: *lat,
                        longitude: *lon,
                        timestamp: now,
                    },
                )
            })
            .collect(),
        chat_messages: Vec::new(),
    }
}

fn test_config() -> Config {
    Config {
        relay_url: "http://localhost:9/sync".to_string(),
        sync_interval: Duration::from_secs(1),
        data_dir: None,
        ..Default::default()
    }
}

fn make_scheduler(transport: Arc<dyn RelayTransport>) -> (Arc<SyncScheduler>, ChangeNotifier) {
    let notifier = ChangeNotifier::new();
    let scheduler = Arc::new(SyncScheduler::new(
        transport,
        "test-device".to_string(),
        OwnLocationStore::new(),
        PeerLocationStore::new(Duration::from_secs(300)),
        ChatStore::new(255),
        notifier.clone(),
        Duration::from_secs(1),
        Duration::from_secs(30),
    ));
    (scheduler, notifier)
}

async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn test_tick_dropped_while_request_in_flight() {
    let transport = Arc::new(BlockingTransport::new());
    let (scheduler, _notifier) = make_scheduler(transport.clone());

    let in_flight = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.tick().await })
    };
    while transport.calls.load(Ordering::SeqCst) == 0 {
        tokio::task::yield_now().await;
    }

    // A second tick while the first is still in flight is dropped
    assert!(scheduler.tick().await.is_none());
    assert_eq!(transport.calls.load(Ordering::SeqCst), 1);

    transport.release.notify_waiters();
    assert!(in_flight.await.unwrap().is_none());
    assert_eq!(transport.max_concurrent.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_timer_never_issues_concurrent_requests() {
    let transport = Arc::new(BlockingTransport::new());
    let engine = SyncEngine::new(test_config(), transport.clone()).unwrap();

    engine.start().await;
    // Several sync intervals pass while the first request hangs
    sleep(Duration::from_secs(5)).await;

    assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    assert_eq!(transport.max_concurrent.load(Ordering::SeqCst), 1);

    transport.release.notify_waiters();
    engine.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_sync_applies_response_and_notifies_once() {
    let transport = Arc::new(ScriptedTransport::new(peer_response(&[
        ("peer-1", 52.52, 13.405),
        ("peer-2", 48.13, 11.58),
    ])));
    let engine = SyncEngine::new(test_config(), transport.clone()).unwrap();
    let (_id, mut rx) = engine.subscribe().await;

    engine.start().await;
    sleep(Duration::from_millis(100)).await;

    assert_eq!(engine.snapshot_peer_locations().await.len(), 2);
    assert_eq!(rx.try_recv(), Ok(Notification::NewServerData));

    // Identical snapshot on the following cycles: content unchanged, so no
    // further notification
    sleep(Duration::from_secs(3)).await;
    assert!(transport.calls.load(Ordering::SeqCst) >= 3);
    assert!(rx.try_recv().is_err());

    engine.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_outgoing_message_uploaded_then_confirmed() {
    let transport = Arc::new(ScriptedTransport::new(empty_response()));
    let engine = SyncEngine::new(test_config(), transport.clone()).unwrap();

    engine.enqueue_outgoing_message("hello").await.unwrap();
    engine.start().await;
    sleep(Duration::from_millis(100)).await;

    // The queued message rode along on the first upload
    let request = transport.last_request().expect("one exchange done");
    assert_eq!(request.messages.len(), 1);
    assert_eq!(request.messages[0].text, "hello");

    // The relay confirms it in the next response
    transport.set_response(SyncResponse {
        locations: HashMap::new(),
        chat_messages: vec![WireChatMessage {
            id: "m-1".to_string(),
            device: "test-device".to_string(),
            message: "hello".to_string(),
            timestamp: Utc::now().timestamp() + 1,
        }],
    });
    sleep(Duration::from_secs(2)).await;

    let visible = engine.snapshot_chat_messages().await;
    assert_eq!(visible.len(), 1);
    assert!(visible[0].is_confirmed());
    assert_eq!(visible[0].text(), "hello");

    // Later uploads no longer carry the acknowledged message
    sleep(Duration::from_secs(1)).await;
    let request = transport.last_request().unwrap();
    assert!(request.messages.is_empty());

    engine.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_own_location_rides_along_once_known() {
    let transport = Arc::new(ScriptedTransport::new(empty_response()));
    let engine = SyncEngine::new(test_config(), transport.clone()).unwrap();

    engine.start().await;
    sleep(Duration::from_millis(100)).await;
    assert!(transport.last_request().unwrap().location.is_none());

    engine
        .handle_provider_event(ProviderEvent::FixUpdate(Fix {
            latitude: 52.52,
            longitude: 13.405,
            accuracy_meters: 5.0,
            observed_at: Utc::now(),
        }))
        .await;

    sleep(Duration::from_secs(2)).await;
    let location = transport.last_request().unwrap().location.expect("location uploaded");
    assert_eq!(location.latitude, 52.52);

    engine.stop().await;
}

#[tokio::test]
async fn test_validation_failures_never_reach_the_queue() {
    let transport = Arc::new(ScriptedTransport::new(empty_response()));
    let engine = SyncEngine::new(test_config(), transport).unwrap();

    let empty = engine.enqueue_outgoing_message("").await;
    assert!(matches!(empty, Err(EngineError::Validation(_))));

    let oversized = engine.enqueue_outgoing_message(&"x".repeat(256)).await;
    assert!(matches!(oversized, Err(EngineError::Validation(_))));

    assert!(engine.snapshot_chat_messages().await.is_empty());
}

#[tokio::test]
async fn test_request_permission_without_provider_fails() {
    let transport = Arc::new(ScriptedTransport::new(empty_response()));
    let engine = SyncEngine::new(test_config(), transport).unwrap();
    assert!(matches!(
        engine.request_permission().await,
        Err(EngineError::Permission(_))
    ));
}

#[tokio::test]
async fn test_provider_events_drive_gps_status_and_location() {
    let transport = Arc::new(ScriptedTransport::new(empty_response()));
    let engine = SyncEngine::new(test_config(), transport).unwrap();
    let provider = Arc::new(FakeProvider::new(PermissionState::Denied));

    let (tx, rx) = mpsc::unbounded_channel();
    engine.attach_provider(provider.clone(), rx).await;
    assert_eq!(engine.snapshot_gps_status().await, GpsStatus::NoPermission);

    let (_id, mut notifications) = engine.subscribe().await;

    // Enabling the provider without permission changes nothing
    tx.send(ProviderEvent::ProviderEnabled).unwrap();
    // Permission arrives (as if the prompt completed), then a good fix
    tx.send(ProviderEvent::PermissionChanged(PermissionState::Granted))
        .unwrap();
    tx.send(ProviderEvent::FixUpdate(Fix {
        latitude: 52.52,
        longitude: 13.405,
        accuracy_meters: 5.0,
        observed_at: Utc::now(),
    }))
    .unwrap();
    settle().await;

    assert_eq!(engine.snapshot_gps_status().await, GpsStatus::HighAccuracy);
    assert!(engine.own_location().await.is_some());

    assert_eq!(
        notifications.try_recv(),
        Ok(Notification::GpsStatusChanged(GpsStatus::Searching))
    );
    assert_eq!(notifications.try_recv(), Ok(Notification::NewLocation));
    assert_eq!(
        notifications.try_recv(),
        Ok(Notification::GpsStatusChanged(GpsStatus::HighAccuracy))
    );
    assert!(notifications.try_recv().is_err());

    // The prompt path goes through the attached provider
    engine.request_permission().await.unwrap();
    assert!(provider.prompt_requested.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn test_stop_is_idempotent_and_restart_resets_cycle() {
    let transport = Arc::new(BlockingTransport::new());
    let engine = SyncEngine::new(test_config(), transport.clone()).unwrap();

    engine.start().await;
    sleep(Duration::from_millis(100)).await;
    assert_eq!(transport.calls.load(Ordering::SeqCst), 1);

    // Stop cancels the in-flight request; calling it again is a no-op
    engine.stop().await;
    engine.stop().await;

    engine.start().await;
    let state = engine.sync_cycle_state().await;
    assert_eq!(state.consecutive_failures, 0);
    assert!(state.connected);

    sleep(Duration::from_millis(100)).await;
    assert_eq!(transport.calls.load(Ordering::SeqCst), 2);

    transport.release.notify_waiters();
    engine.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_failure_then_recovery_notifies_each_edge_once() {
    struct FlakyTransport {
        healthy: AtomicBool,
    }
    impl RelayTransport for FlakyTransport {
        fn exchange(&self, _request: SyncRequest) -> BoxFuture<'_, ridelink_core::Result<SyncResponse>> {
            let healthy = self.healthy.load(Ordering::SeqCst);
            Box::pin(async move {
                if healthy {
                    Ok(empty_response())
                } else {
                    Err(EngineError::Transport("connection refused".to_string()))
                }
            })
        }
    }

    let transport = Arc::new(FlakyTransport {
        healthy: AtomicBool::new(false),
    });
    let engine = SyncEngine::new(test_config(), transport.clone()).unwrap();
    let (_id, mut rx) = engine.subscribe().await;

    engine.start().await;
    // Several failing cycles, backoff included
    sleep(Duration::from_secs(10)).await;
    assert_eq!(
        rx.try_recv(),
        Ok(Notification::ConnectivityChanged { connected: false })
    );
    assert!(rx.try_recv().is_err());

    transport.healthy.store(true, Ordering::SeqCst);
    sleep(Duration::from_secs(40)).await;
    assert_eq!(
        rx.try_recv(),
        Ok(Notification::ConnectivityChanged { connected: true })
    );
    assert!(rx.try_recv().is_err());

    engine.stop().await;
}
