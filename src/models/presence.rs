//! Presence records: who is currently online.

use crate::models::room::ClientId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stored presence record for one connected client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceEntry {
    pub client_id: ClientId,
    pub display_name: String,
    /// Last-seen marker, refreshed while the owning session lives.
    pub last_seen: DateTime<Utc>,
}

impl PresenceEntry {
    pub fn new(client_id: ClientId, display_name: impl Into<String>) -> Self {
        Self {
            client_id,
            display_name: display_name.into(),
            last_seen: Utc::now(),
        }
    }
}
