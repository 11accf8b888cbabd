use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::types::{Room, RoomId, UserId};
use crate::{Result, StorageAdapter};

pub const AUTH_STORAGE_KEY: &str = "v1/session/auth";
pub const LAST_ROOM_STORAGE_KEY: &str = "v1/session/last-room";

/// What the login flow hands over: bearer token plus account identity.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthBundle {
    pub token: String,
    pub user_id: UserId,
    pub username: String,
    /// Public key registered for the account, if any.
    #[serde(default)]
    pub public_key: Option<String>,
}

impl std::fmt::Debug for AuthBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthBundle")
            .field("user_id", &self.user_id)
            .field("username", &self.username)
            .field("has_public_key", &self.public_key.is_some())
            .finish_non_exhaustive()
    }
}

/// Pointer to the last opened conversation. Groups are stored by id only;
/// their member keys are fetched again on restore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum LastRoom {
    #[serde(rename_all = "camelCase")]
    Private {
        counterpart: UserId,
        #[serde(default)]
        room_id: Option<RoomId>,
    },
    #[serde(rename_all = "camelCase")]
    Group { group_id: RoomId },
}

impl From<&Room> for LastRoom {
    fn from(room: &Room) -> Self {
        match room {
            Room::Private {
                counterpart,
                room_id,
            } => LastRoom::Private {
                counterpart: counterpart.clone(),
                room_id: room_id.clone(),
            },
            Room::Group { group_id, .. } => LastRoom::Group {
                group_id: group_id.clone(),
            },
        }
    }
}

/// Session state persisted next to the device key.
pub struct DeviceStore {
    storage: Arc<dyn StorageAdapter>,
}

impl DeviceStore {
    pub fn new(storage: Arc<dyn StorageAdapter>) -> Self {
        Self { storage }
    }

    pub fn auth(&self) -> Result<Option<AuthBundle>> {
        self.read(AUTH_STORAGE_KEY)
    }

    pub fn save_auth(&self, auth: &AuthBundle) -> Result<()> {
        self.write(AUTH_STORAGE_KEY, auth)
    }

    /// Forget the login. The device private key and last room stay.
    pub fn clear_auth(&self) -> Result<()> {
        self.storage.del(AUTH_STORAGE_KEY)
    }

    pub fn last_room(&self) -> Result<Option<LastRoom>> {
        self.read(LAST_ROOM_STORAGE_KEY)
    }

    pub fn set_last_room(&self, room: &Room) -> Result<()> {
        self.write(LAST_ROOM_STORAGE_KEY, &LastRoom::from(room))
    }

    fn read<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.storage.get(key)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    fn write<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        self.storage.put(key, serde_json::to_string(value)?)
    }
}
