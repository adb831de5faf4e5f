/// Last-known peer locations with staleness pruning
use crate::location::Location;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Mapping from peer id to last-known location. At most one entry per peer;
/// entries older than the stale timeout are evicted after each snapshot
/// apply and lazily at read time.
#[derive(Clone)]
pub struct PeerLocationStore {
    peers: Arc<RwLock<HashMap<String, Location>>>,
    stale_after: Duration,
}

impl PeerLocationStore {
    pub fn new(stale_after: Duration) -> Self {
        Self {
            peers: Arc::new(RwLock::new(HashMap::new())),
            stale_after,
        }
    }

    fn is_stale(&self, location: &Location, now: DateTime<Utc>) -> bool {
        match (now - location.observed_at).to_std() {
            Ok(age) => age > self.stale_after,
            // Timestamps in the future count as fresh
            Err(_) => false,
        }
    }

    /// Full replace-by-key upsert followed by staleness pruning. Returns
    /// true if store content changed, so an identical snapshot applied twice
    /// triggers no spurious notification.
    pub async fn apply_server_snapshot(&self, snapshot: HashMap<String, Location>) -> bool {
        let now = Utc::now();
        let mut peers = self.peers.write().await;
        let before = peers.clone();

        for (peer_id, location) in snapshot {
            peers.insert(peer_id, location);
        }
        peers.retain(|_, location| !self.is_stale(location, now));

        *peers != before
    }

    /// Anonymous positions for rendering consumers; peer ids are
    /// intentionally not exposed. Prunes stale entries before answering.
    pub async fn all_locations(&self) -> Vec<Location> {
        let now = Utc::now();
        let mut peers = self.peers.write().await;
        peers.retain(|_, location| !self.is_stale(location, now));
        peers.values().copied().collect()
    }

    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }
}
