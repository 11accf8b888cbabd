use std::future::Future;
use std::pin::Pin;

use crate::presence::PresenceUpdate;
use crate::types::{
    CreatedGroup, EncryptedMessage, GroupMember, GroupSummary, RoomId, UserId,
};
use crate::Result;

pub type ApiFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// REST collaborator. Authentication, base url and retries belong to the
/// implementation; the core only sees decoded payloads.
///
/// Transport failures should surface as [`crate::Error::Network`] so callers
/// can tell them apart from decryption and protocol problems.
pub trait ChatApi: Send + Sync {
    /// Stored messages of a room, in any order.
    fn fetch_history<'a>(&'a self, room_id: &'a RoomId) -> ApiFuture<'a, Vec<EncryptedMessage>>;

    fn mark_read<'a>(&'a self, message_id: &'a str) -> ApiFuture<'a, ()>;

    /// Find or create the private room shared with `counterpart`.
    fn resolve_private_room<'a>(&'a self, counterpart: &'a UserId) -> ApiFuture<'a, RoomId>;

    /// Registered public key (base64 SPKI) of `user_id`, if any.
    fn fetch_public_key<'a>(&'a self, user_id: &'a UserId) -> ApiFuture<'a, Option<String>>;

    /// Groups the caller belongs to, including their member-key tables.
    fn fetch_my_groups(&self) -> ApiFuture<'_, Vec<GroupSummary>>;

    fn fetch_group_members<'a>(&'a self, group_id: &'a RoomId) -> ApiFuture<'a, Vec<GroupMember>>;

    fn create_group<'a>(
        &'a self,
        name: &'a str,
        member_ids: &'a [UserId],
    ) -> ApiFuture<'a, CreatedGroup>;

    fn add_group_member<'a>(
        &'a self,
        group_id: &'a RoomId,
        user_id: &'a UserId,
    ) -> ApiFuture<'a, ()>;

    fn leave_group<'a>(&'a self, group_id: &'a RoomId) -> ApiFuture<'a, ()>;

    /// Presence of every known user, used to seed the [`crate::PresenceBook`].
    fn fetch_presence(&self) -> ApiFuture<'_, Vec<PresenceUpdate>>;
}

/// Scriptable in-memory [`ChatApi`] for tests and offline tooling.
pub mod test_utils {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use tokio::sync::Notify;

    use super::{ApiFuture, ChatApi};
    use crate::presence::PresenceUpdate;
    use crate::storage::lock;
    use crate::types::{
        CreatedGroup, EncryptedMessage, GroupMember, GroupSummary, RoomId, UserId,
    };
    use crate::{Error, Result};

    #[derive(Default)]
    struct FakeState {
        history: HashMap<RoomId, Vec<EncryptedMessage>>,
        gates: HashMap<RoomId, Arc<Notify>>,
        private_rooms: HashMap<UserId, RoomId>,
        public_keys: HashMap<UserId, String>,
        groups: Vec<GroupSummary>,
        members: HashMap<RoomId, Vec<GroupMember>>,
        presence: Vec<PresenceUpdate>,
        offline: bool,
        history_calls: Vec<RoomId>,
        marked_read: Vec<String>,
        created: Vec<(String, Vec<UserId>)>,
        added: Vec<(RoomId, UserId)>,
        left: Vec<RoomId>,
        next_group: u64,
    }

    #[derive(Default)]
    pub struct FakeChatApi {
        state: Mutex<FakeState>,
    }

    impl FakeChatApi {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_history(&self, room_id: &RoomId, messages: Vec<EncryptedMessage>) {
            lock(&self.state).history.insert(room_id.clone(), messages);
        }

        /// Hold history fetches for `room_id` until the returned gate is notified.
        pub fn hold_history(&self, room_id: &RoomId) -> Arc<Notify> {
            let gate = Arc::new(Notify::new());
            lock(&self.state).gates.insert(room_id.clone(), gate.clone());
            gate
        }

        pub fn set_private_room(&self, counterpart: &UserId, room_id: &RoomId) {
            lock(&self.state)
                .private_rooms
                .insert(counterpart.clone(), room_id.clone());
        }

        pub fn set_public_key(&self, user_id: &UserId, encoded: String) {
            lock(&self.state).public_keys.insert(user_id.clone(), encoded);
        }

        pub fn set_groups(&self, groups: Vec<GroupSummary>) {
            lock(&self.state).groups = groups;
        }

        pub fn set_members(&self, group_id: &RoomId, members: Vec<GroupMember>) {
            lock(&self.state).members.insert(group_id.clone(), members);
        }

        pub fn set_presence(&self, presence: Vec<PresenceUpdate>) {
            lock(&self.state).presence = presence;
        }

        /// Every call fails with a network error while offline.
        pub fn set_offline(&self, offline: bool) {
            lock(&self.state).offline = offline;
        }

        pub fn history_calls(&self) -> Vec<RoomId> {
            lock(&self.state).history_calls.clone()
        }

        pub fn marked_read(&self) -> Vec<String> {
            lock(&self.state).marked_read.clone()
        }

        pub fn created(&self) -> Vec<(String, Vec<UserId>)> {
            lock(&self.state).created.clone()
        }

        pub fn added(&self) -> Vec<(RoomId, UserId)> {
            lock(&self.state).added.clone()
        }

        pub fn left(&self) -> Vec<RoomId> {
            lock(&self.state).left.clone()
        }

        fn online(&self) -> Result<()> {
            if lock(&self.state).offline {
                return Err(Error::Network("fake api is offline".to_string()));
            }
            Ok(())
        }
    }

    impl ChatApi for FakeChatApi {
        fn fetch_history<'a>(
            &'a self,
            room_id: &'a RoomId,
        ) -> ApiFuture<'a, Vec<EncryptedMessage>> {
            Box::pin(async move {
                self.online()?;
                let gate = {
                    let mut state = lock(&self.state);
                    state.history_calls.push(room_id.clone());
                    state.gates.get(room_id).cloned()
                };
                if let Some(gate) = gate {
                    gate.notified().await;
                }
                Ok(lock(&self.state)
                    .history
                    .get(room_id)
                    .cloned()
                    .unwrap_or_default())
            })
        }

        fn mark_read<'a>(&'a self, message_id: &'a str) -> ApiFuture<'a, ()> {
            Box::pin(async move {
                self.online()?;
                lock(&self.state).marked_read.push(message_id.to_string());
                Ok(())
            })
        }

        fn resolve_private_room<'a>(&'a self, counterpart: &'a UserId) -> ApiFuture<'a, RoomId> {
            Box::pin(async move {
                self.online()?;
                lock(&self.state)
                    .private_rooms
                    .get(counterpart)
                    .cloned()
                    .ok_or_else(|| Error::Network(format!("no room with {counterpart}")))
            })
        }

        fn fetch_public_key<'a>(&'a self, user_id: &'a UserId) -> ApiFuture<'a, Option<String>> {
            Box::pin(async move {
                self.online()?;
                Ok(lock(&self.state).public_keys.get(user_id).cloned())
            })
        }

        fn fetch_my_groups(&self) -> ApiFuture<'_, Vec<GroupSummary>> {
            Box::pin(async move {
                self.online()?;
                Ok(lock(&self.state).groups.clone())
            })
        }

        fn fetch_group_members<'a>(
            &'a self,
            group_id: &'a RoomId,
        ) -> ApiFuture<'a, Vec<GroupMember>> {
            Box::pin(async move {
                self.online()?;
                Ok(lock(&self.state)
                    .members
                    .get(group_id)
                    .cloned()
                    .unwrap_or_default())
            })
        }

        fn create_group<'a>(
            &'a self,
            name: &'a str,
            member_ids: &'a [UserId],
        ) -> ApiFuture<'a, CreatedGroup> {
            Box::pin(async move {
                self.online()?;
                let mut state = lock(&self.state);
                state.next_group += 1;
                state.created.push((name.to_string(), member_ids.to_vec()));
                Ok(CreatedGroup {
                    group_id: RoomId::new(format!("G{}", state.next_group)),
                    encrypted_group_keys: Default::default(),
                })
            })
        }

        fn add_group_member<'a>(
            &'a self,
            group_id: &'a RoomId,
            user_id: &'a UserId,
        ) -> ApiFuture<'a, ()> {
            Box::pin(async move {
                self.online()?;
                lock(&self.state)
                    .added
                    .push((group_id.clone(), user_id.clone()));
                Ok(())
            })
        }

        fn leave_group<'a>(&'a self, group_id: &'a RoomId) -> ApiFuture<'a, ()> {
            Box::pin(async move {
                self.online()?;
                lock(&self.state).left.push(group_id.clone());
                Ok(())
            })
        }

        fn fetch_presence(&self) -> ApiFuture<'_, Vec<PresenceUpdate>> {
            Box::pin(async move {
                self.online()?;
                Ok(lock(&self.state).presence.clone())
            })
        }
    }
}
