use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::storage::lock;
use crate::transport::TransportSession;
use crate::types::{serde_flexible_timestamp, UserId};
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PresenceStatus {
    Online,
    #[default]
    Offline,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceUpdate {
    pub user_id: UserId,
    #[serde(default)]
    pub status: PresenceStatus,
    #[serde(default, deserialize_with = "serde_flexible_timestamp::deserialize")]
    pub last_seen: Option<DateTime<Utc>>,
}

/// Latest known presence per user: a REST snapshot overlaid with realtime updates.
#[derive(Default)]
pub struct PresenceBook {
    entries: Mutex<HashMap<UserId, PresenceUpdate>>,
}

impl PresenceBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace everything with a fresh snapshot.
    pub fn load_snapshot(&self, snapshot: Vec<PresenceUpdate>) {
        let mut entries = lock(&self.entries);
        entries.clear();
        for update in snapshot {
            entries.insert(update.user_id.clone(), update);
        }
    }

    pub fn apply(&self, update: PresenceUpdate) {
        tracing::debug!(user_id = %update.user_id, status = ?update.status, "presence update");
        lock(&self.entries).insert(update.user_id.clone(), update);
    }

    pub fn get(&self, user_id: &UserId) -> Option<PresenceUpdate> {
        lock(&self.entries).get(user_id).cloned()
    }

    pub fn is_online(&self, user_id: &UserId) -> bool {
        self.get(user_id)
            .is_some_and(|p| p.status == PresenceStatus::Online)
    }

    /// Feed realtime updates from `topic` into this book.
    pub fn attach(self: &Arc<Self>, transport: &TransportSession, topic: &str) -> Result<()> {
        let book = Arc::clone(self);
        transport.subscribe(
            topic,
            Arc::new(move |body: &str| match serde_json::from_str::<PresenceUpdate>(body) {
                Ok(update) => book.apply(update),
                Err(e) => tracing::warn!(error = %e, "malformed presence frame"),
            }),
        )
    }
}
