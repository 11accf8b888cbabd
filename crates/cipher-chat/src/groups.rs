use std::sync::Arc;

use crate::api::ChatApi;
use crate::group_keys::GroupKeyStore;
use crate::types::{CreatedGroup, GroupMember, Room, RoomId, UserId};
use crate::{Error, Result};

/// Group membership operations. Anything that changes who holds a group's key
/// drops the cached key so it is resolved again from a fresh member table.
pub struct GroupDirectory {
    api: Arc<dyn ChatApi>,
    group_keys: Arc<GroupKeyStore>,
}

impl GroupDirectory {
    pub fn new(api: Arc<dyn ChatApi>, group_keys: Arc<GroupKeyStore>) -> Self {
        Self { api, group_keys }
    }

    /// Groups the user belongs to, ready to be activated.
    pub async fn my_groups(&self) -> Result<Vec<Room>> {
        let groups = self.api.fetch_my_groups().await?;
        tracing::debug!(count = groups.len(), "fetched groups");
        Ok(groups.into_iter().map(Room::from).collect())
    }

    pub async fn members(&self, group_id: &RoomId) -> Result<Vec<GroupMember>> {
        self.api.fetch_group_members(group_id).await
    }

    pub async fn create_group(&self, name: &str, member_ids: &[UserId]) -> Result<CreatedGroup> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::ProtocolViolation("group name is empty".to_string()));
        }
        if member_ids.is_empty() {
            return Err(Error::ProtocolViolation("group needs at least one member".to_string()));
        }
        let created = self.api.create_group(name, member_ids).await?;
        tracing::info!(group_id = %created.group_id, members = member_ids.len(), "group created");
        Ok(created)
    }

    pub async fn add_member(&self, group_id: &RoomId, user_id: &UserId) -> Result<()> {
        self.api.add_group_member(group_id, user_id).await?;
        self.membership_changed(group_id);
        Ok(())
    }

    pub async fn leave_group(&self, group_id: &RoomId) -> Result<()> {
        self.api.leave_group(group_id).await?;
        self.group_keys.invalidate(group_id);
        tracing::info!(group_id = %group_id, "left group");
        Ok(())
    }

    /// Membership of `group_id` changed elsewhere.
    pub fn membership_changed(&self, group_id: &RoomId) {
        tracing::debug!(group_id = %group_id, "membership changed, dropping cached group key");
        self.group_keys.invalidate(group_id);
    }
}
