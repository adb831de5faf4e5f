/// Relay wire protocol (version 1, JSON over HTTPS)
use crate::chat_store::ConfirmedMessage;
use crate::location::Location;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// Protocol version, fixed once chosen.
pub const PROTOCOL_VERSION: u8 = 1;

/// A position on the wire; timestamps are unix seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: i64,
}

impl From<Location> for WireLocation {
    fn from(location: Location) -> Self {
        Self {
            latitude: location.latitude,
            longitude: location.longitude,
            timestamp: location.observed_at.timestamp(),
        }
    }
}

impl WireLocation {
    pub fn into_location(self) -> Option<Location> {
        let observed_at = DateTime::<Utc>::from_timestamp(self.timestamp, 0)?;
        Some(Location {
            latitude: self.latitude,
            longitude: self.longitude,
            observed_at,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireOutgoingMessage {
    pub text: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireChatMessage {
    pub id: String,
    pub device: String,
    pub message: String,
    pub timestamp: i64,
}

/// Upload payload: optional own location plus the outgoing-message queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRequest {
    pub version: u8,
    pub device: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<WireLocation>,
    pub messages: Vec<WireOutgoingMessage>,
}

/// Relay response: current peer locations and the recent confirmed chat
/// window. Unknown fields are ignored; missing collections decode empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncResponse {
    #[serde(default)]
    pub locations: HashMap<String, WireLocation>,
    #[serde(default)]
    pub chat_messages: Vec<WireChatMessage>,
}

impl SyncResponse {
    /// Peer locations with decodable timestamps; bad entries are skipped.
    pub fn peer_locations(&self) -> HashMap<String, Location> {
        self.locations
            .iter()
            .filter_map(|(peer_id, wire)| match wire.clone().into_location() {
                Some(location) => Some((peer_id.clone(), location)),
                None => {
                    debug!("skipping peer {} with invalid timestamp", peer_id);
                    None
                }
            })
            .collect()
    }

    /// Confirmed chat history in server order; bad entries are skipped.
    pub fn confirmed_history(&self) -> Vec<ConfirmedMessage> {
        self.chat_messages
            .iter()
            .filter_map(|wire| {
                let sent_at = DateTime::<Utc>::from_timestamp(wire.timestamp, 0)?;
                Some(ConfirmedMessage {
                    id: wire.id.clone(),
                    author: wire.device.clone(),
                    text: wire.message.clone(),
                    sent_at,
                })
            })
            .collect()
    }
}
