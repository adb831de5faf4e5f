/// Typed change-notification fan-out
use crate::gps::GpsStatus;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::trace;

/// Closed set of engine notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    /// A new own-location fix was accepted
    NewLocation,
    /// A sync response changed the peer-location or chat store
    NewServerData,
    GpsStatusChanged(GpsStatus),
    ConnectivityChanged { connected: bool },
}

/// Handle identifying a registered observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

struct NotifierState {
    next_id: u64,
    observers: Vec<(ObserverId, mpsc::UnboundedSender<Notification>)>,
}

/// Single-writer fan-out. Observers receive notifications on their own
/// channel, in registration order for each event; cross-event order follows
/// the order events were raised. The observer list is snapshotted before
/// each dispatch, so unregistering during a round neither skips nor
/// duplicates delivery to the others.
#[derive(Clone)]
pub struct ChangeNotifier {
    inner: Arc<RwLock<NotifierState>>,
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(NotifierState {
                next_id: 0,
                observers: Vec::new(),
            })),
        }
    }

    pub async fn subscribe(&self) -> (ObserverId, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.inner.write().await;
        state.next_id += 1;
        let id = ObserverId(state.next_id);
        state.observers.push((id, tx));
        (id, rx)
    }

    pub async fn unsubscribe(&self, id: ObserverId) {
        self.inner
            .write()
            .await
            .observers
            .retain(|(oid, _)| *oid != id);
    }

    /// Deliver to every observer registered at the time of the call.
    /// Observers whose receiver was dropped are removed afterwards.
    pub async fn notify(&self, notification: Notification) {
        let observers = self.inner.read().await.observers.clone();
        trace!("notify {:?} to {} observers", notification, observers.len());

        let mut dropped = Vec::new();
        for (id, tx) in &observers {
            if tx.send(notification).is_err() {
                dropped.push(*id);
            }
        }
        if !dropped.is_empty() {
            self.inner
                .write()
                .await
                .observers
                .retain(|(id, _)| !dropped.contains(id));
        }
    }

    pub async fn observer_count(&self) -> usize {
        self.inner.read().await.observers.len()
    }
}
