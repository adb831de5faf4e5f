/// Own-location types and store
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

/// A single accepted device position. Immutable once constructed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    pub observed_at: DateTime<Utc>,
}

/// A raw fix as reported by the platform location provider.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fix {
    pub latitude: f64,
    pub longitude: f64,
    /// Reported accuracy radius in meters
    pub accuracy_meters: f64,
    pub observed_at: DateTime<Utc>,
}

impl Fix {
    pub fn location(&self) -> Location {
        Location {
            latitude: self.latitude,
            longitude: self.longitude,
            observed_at: self.observed_at,
        }
    }
}

/// Holds the most recent accepted fix. The instance is replaced wholesale on
/// each accepted fix and never mutated in place; once populated it stays
/// populated for the remainder of the session even if provider status
/// degrades afterwards.
#[derive(Clone, Default)]
pub struct OwnLocationStore {
    current: Arc<RwLock<Option<Location>>>,
}

impl OwnLocationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn accept(&self, location: Location) {
        *self.current.write().await = Some(location);
    }

    pub async fn current(&self) -> Option<Location> {
        *self.current.read().await
    }

    pub async fn is_known(&self) -> bool {
        self.current.read().await.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fix_to_location() {
        let fix = Fix {
            latitude: 52.52,
            longitude: 13.405,
            accuracy_meters: 8.0,
            observed_at: Utc::now(),
        };
        let location = fix.location();
        assert_eq!(location.latitude, 52.52);
        assert_eq!(location.longitude, 13.405);
        assert_eq!(location.observed_at, fix.observed_at);
    }

    #[tokio::test]
    async fn test_accept_replaces_wholesale() {
        let store = OwnLocationStore::new();
        assert!(!store.is_known().await);

        let first = Location {
            latitude: 1.0,
            longitude: 2.0,
            observed_at: Utc::now(),
        };
        store.accept(first).await;
        assert_eq!(store.current().await, Some(first));

        let second = Location {
            latitude: 3.0,
            longitude: 4.0,
            observed_at: Utc::now(),
        };
        store.accept(second).await;
        assert_eq!(store.current().await, Some(second));
    }
}
