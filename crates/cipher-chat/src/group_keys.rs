use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::cipher::{self, SessionKey};
use crate::key_vault::KeyVault;
use crate::storage::lock;
use crate::types::{MemberKeyTable, RoomId, UserId};
use crate::{MissingKey, Result};

/// Resolved group keys for this session, keyed by `(group_id, user_id)`.
///
/// Entries are created on first need and only go away through
/// [`GroupKeyStore::invalidate`] or [`GroupKeyStore::clear`].
pub struct GroupKeyStore {
    vault: Arc<KeyVault>,
    cache: Mutex<HashMap<(RoomId, UserId), SessionKey>>,
}

impl GroupKeyStore {
    pub fn new(vault: Arc<KeyVault>) -> Self {
        Self {
            vault,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn resolve_group_key(
        &self,
        group_id: &RoomId,
        member_keys: &MemberKeyTable,
        my_user_id: &UserId,
    ) -> Result<SessionKey> {
        let cache_key = (group_id.clone(), my_user_id.clone());
        if let Some(key) = lock(&self.cache).get(&cache_key) {
            return Ok(key.clone());
        }

        let Some(wrapped) = member_keys.get(my_user_id) else {
            tracing::warn!(group_id = %group_id, user_id = %my_user_id, "no member key for user");
            return Err(MissingKey::MembershipKeyMissing {
                group_id: group_id.to_string(),
                user_id: my_user_id.to_string(),
            }
            .into());
        };

        let private = self.vault.private_key()?;
        let key = cipher::unwrap_key(&private, wrapped)?;

        lock(&self.cache).insert(cache_key, key.clone());
        tracing::debug!(group_id = %group_id, "resolved group key");
        Ok(key)
    }

    /// Drop every cached key for the group (membership change, leaving).
    pub fn invalidate(&self, group_id: &RoomId) {
        lock(&self.cache).retain(|(cached_group, _), _| cached_group != group_id);
    }

    /// Drop everything (logout).
    pub fn clear(&self) {
        lock(&self.cache).clear();
    }

    pub fn is_cached(&self, group_id: &RoomId, user_id: &UserId) -> bool {
        lock(&self.cache).contains_key(&(group_id.clone(), user_id.clone()))
    }
}
