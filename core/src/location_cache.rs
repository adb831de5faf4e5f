/// Last-known-location cache: persists the most recent fix in sled so a
/// restart inside the freshness window still has a usable position
use crate::error::{EngineError, Result};
use crate::location::Location;
use chrono::Utc;
use std::path::Path;
use std::time::Duration;

const CACHE_KEY: &[u8] = b"last_location";

pub struct LocationCache {
    db: sled::Db,
    max_age: Duration,
}

impl LocationCache {
    pub fn open(data_dir: &Path, max_age: Duration) -> Result<Self> {
        let db = sled::open(data_dir.join("location.db"))
            .map_err(|e| EngineError::Storage(format!("location cache DB: {}", e)))?;
        Ok(Self { db, max_age })
    }

    pub fn store(&self, location: &Location) -> Result<()> {
        let val = serde_json::to_vec(location)?;
        self.db
            .insert(CACHE_KEY, val)
            .map_err(|e| EngineError::Storage(format!("store location: {}", e)))?;
        Ok(())
    }

    /// Returns the cached location only if it is younger than the configured
    /// max age. Stale or missing entries yield `None`.
    pub fn fresh_location(&self) -> Result<Option<Location>> {
        let raw = match self
            .db
            .get(CACHE_KEY)
            .map_err(|e| EngineError::Storage(format!("read location: {}", e)))?
        {
            Some(raw) => raw,
            None => return Ok(None),
        };

        let location: Location = serde_json::from_slice(&raw)?;
        match (Utc::now() - location.observed_at).to_std() {
            Ok(age) if age > self.max_age => Ok(None),
            // Timestamps in the future count as fresh
            _ => Ok(Some(location)),
        }
    }
}

impl Clone for LocationCache {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            max_age: self.max_age,
        }
    }
}
