/// RideLink - Peer Location & Chat Synchronization Engine
///
/// Client-side core for group rides: periodically exchanges own location and
/// queued chat messages with a central relay, reconciles the response into
/// local stores, derives a GPS availability state machine, and fans out
/// typed change notifications to consumers.

pub mod chat_store;
pub mod config;
pub mod engine;
pub mod error;
pub mod gps;
pub mod location;
pub mod location_cache;
pub mod notifier;
pub mod peer_store;
pub mod protocol;
pub mod scheduler;
pub mod transport;

pub use config::Config;
pub use engine::SyncEngine;
pub use error::{EngineError, Result};
