//! Message list of the active room.
//!
//! History fetches and realtime frames both resolve asynchronously, and the
//! user may switch rooms while either is in flight. Every result is checked
//! against the room that is active when it lands; results for any other room
//! are dropped. The state lock is never held across an `.await`.

use chrono::Utc;
use std::sync::{Arc, Mutex, Weak};

use crate::api::ChatApi;
use crate::cipher::{self, SessionKey};
use crate::config::Destinations;
use crate::group_keys::GroupKeyStore;
use crate::key_vault::{import_public, KeyVault, WrappingKey};
use crate::receipts::ReadReceipts;
use crate::storage::lock;
use crate::transport::{MessageHandler, TransportSession};
use crate::types::{
    DeliveryStatus, EncryptedMessage, MessageContent, MessageId, MessageType, OutgoingMessage,
    RenderedMessage, Room, RoomId, RoomKey, UnreadableReason, UserId,
};
use crate::{Error, MissingKey, Result};

struct SyncState {
    active: Option<Room>,
    /// Channel subscribed on behalf of the active room.
    channel: Option<String>,
    messages: Vec<RenderedMessage>,
    next_local_seq: u64,
    counterpart_key: Option<(UserId, WrappingKey)>,
}

pub struct RoomSync {
    me: UserId,
    api: Arc<dyn ChatApi>,
    vault: Arc<KeyVault>,
    group_keys: Arc<GroupKeyStore>,
    transport: Arc<TransportSession>,
    destinations: Destinations,
    receipts: ReadReceipts,
    state: Mutex<SyncState>,
    weak_self: Weak<RoomSync>,
}

impl RoomSync {
    pub fn new(
        me: UserId,
        api: Arc<dyn ChatApi>,
        vault: Arc<KeyVault>,
        group_keys: Arc<GroupKeyStore>,
        transport: Arc<TransportSession>,
        destinations: Destinations,
        receipts: ReadReceipts,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            me,
            api,
            vault,
            group_keys,
            transport,
            destinations,
            receipts,
            state: Mutex::new(SyncState {
                active: None,
                channel: None,
                messages: Vec::new(),
                next_local_seq: 0,
                counterpart_key: None,
            }),
            weak_self: weak_self.clone(),
        })
    }

    pub fn me(&self) -> &UserId {
        &self.me
    }

    pub fn active_room(&self) -> Option<Room> {
        lock(&self.state).active.clone()
    }

    /// Snapshot of the rendered list, sorted by timestamp.
    pub fn messages(&self) -> Vec<RenderedMessage> {
        lock(&self.state).messages.clone()
    }

    /// Make `room` the active conversation.
    ///
    /// Re-selecting the active conversation does not clear, refetch or
    /// resubscribe; a group's member-key table is refreshed from `room`.
    /// The realtime subscription is set up even when the history fetch fails;
    /// that failure is returned afterwards.
    pub async fn activate_room(&self, room: Room) -> Result<()> {
        let previous_channel = {
            let mut state = lock(&self.state);
            if let Some(active) = state.active.as_mut() {
                if same_conversation(active, &room) {
                    if room.is_group() {
                        *active = room;
                    }
                    tracing::debug!("room already active");
                    return Ok(());
                }
            }
            state.active = Some(room.clone());
            state.messages.clear();
            state.counterpart_key = None;
            state.channel.take()
        };
        if let Some(channel) = previous_channel {
            self.transport.unsubscribe(&channel);
        }

        let key = room.key();
        tracing::info!(room = ?key, "activating room");

        let history = self.load_history(&room).await;
        if !self.is_active(&key) {
            tracing::debug!(room = ?key, "room switched during activation");
            return Ok(());
        }

        let channel = match &key {
            RoomKey::Room(room_id) => self.destinations.room_topic(room_id),
            RoomKey::PendingPrivate(_) => self.destinations.user_message_queue.clone(),
        };
        lock(&self.state).channel = Some(channel.clone());
        self.transport.subscribe(&channel, self.realtime_handler(key))?;

        history.map(|_| ())
    }

    /// Resolve (or create) the private room with `counterpart` and activate it.
    /// When the lookup fails the conversation opens without a room id and is
    /// bound later by the first realtime message that carries one.
    pub async fn open_private_chat(&self, counterpart: UserId) -> Result<Room> {
        let room = match self.api.resolve_private_room(&counterpart).await {
            Ok(room_id) => Room::private(counterpart, Some(room_id)),
            Err(e) => {
                tracing::warn!(counterpart = %counterpart, error = %e, "private room lookup failed, opening pending conversation");
                Room::private(counterpart, None)
            }
        };
        self.activate_room(room.clone()).await?;
        Ok(room)
    }

    /// Fetch, decrypt and merge the stored messages of `room`.
    ///
    /// Entries are merged by id (the later copy wins), a new entry replaces the
    /// earliest pending placeholder from the same sender, and the list is
    /// re-sorted by timestamp. Undecryptable messages become placeholders. Returns how
    /// many messages were merged; a fetch that resolves after the user moved
    /// to another room merges nothing.
    pub async fn load_history(&self, room: &Room) -> Result<usize> {
        let Some(room_id) = room.room_id() else {
            return Ok(0);
        };
        let fetched = self.api.fetch_history(room_id).await?;

        let key = room.key();
        if !self.is_active(&key) {
            tracing::debug!(room_id = %room_id, "discarding stale history");
            return Ok(0);
        }

        let rendered: Vec<RenderedMessage> =
            fetched.iter().map(|msg| self.render(room, msg)).collect();
        let merged = {
            let mut state = lock(&self.state);
            if state.active.as_ref().map(Room::key) != Some(key) {
                return Ok(0);
            }
            for entry in &rendered {
                let existing = state.messages.iter().position(|m| m.id == entry.id);
                let slot = existing.or_else(|| {
                    state.messages.iter().position(|m| {
                        m.status == DeliveryStatus::Pending && m.sender_id == entry.sender_id
                    })
                });
                match slot {
                    Some(pos) => state.messages[pos] = entry.clone(),
                    None => state.messages.push(entry.clone()),
                }
            }
            state.messages.sort_by_key(|m| m.timestamp);
            rendered.len()
        };

        for msg in &fetched {
            if msg.sender_id != self.me {
                self.receipts.mark_read(&msg.id);
            }
        }
        tracing::debug!(room_id = %room_id, merged, "history loaded");
        Ok(merged)
    }

    /// Encrypt `text` for the active room and publish it.
    ///
    /// With a known room id an optimistic `Pending` entry is shown until the
    /// server echo replaces it; its id is returned. A first message to a
    /// private counterpart has no room yet, so nothing is shown until the
    /// echo arrives and `None` is returned.
    pub async fn send(&self, text: &str) -> Result<Option<MessageId>> {
        if text.trim().is_empty() {
            return Err(Error::ProtocolViolation("message text is empty".to_string()));
        }
        let Some(room) = self.active_room() else {
            return Err(Error::ProtocolViolation("no active room".to_string()));
        };
        if !self.transport.is_connected() {
            return Err(Error::NotConnected);
        }

        let payload = match &room {
            Room::Group {
                group_id,
                member_keys,
                ..
            } => {
                let key = self
                    .group_keys
                    .resolve_group_key(group_id, member_keys, &self.me)
                    .map_err(|e| match e {
                        Error::MissingKey(missing) => Error::ProtocolViolation(format!(
                            "cannot send to group without its key: {missing}"
                        )),
                        other => other,
                    })?;
                let sealed = cipher::encrypt(&key, text)?;
                OutgoingMessage {
                    chat_room_id: Some(group_id.clone()),
                    receiver_id: None,
                    cipher_text: sealed.cipher_text,
                    iv: sealed.iv,
                    encrypted_aes_key_for_sender: None,
                    encrypted_aes_key_for_receiver: None,
                    message_type: MessageType::Text,
                }
            }
            Room::Private {
                counterpart,
                room_id,
            } => {
                let theirs = self.counterpart_key(counterpart).await?;
                let mine = self.vault.public_key()?;
                let key: SessionKey = cipher::generate_session_key();
                let sealed = cipher::encrypt(&key, text)?;
                OutgoingMessage {
                    chat_room_id: room_id.clone(),
                    receiver_id: Some(counterpart.clone()),
                    cipher_text: sealed.cipher_text,
                    iv: sealed.iv,
                    encrypted_aes_key_for_sender: Some(cipher::wrap_key(&mine, &key)?),
                    encrypted_aes_key_for_receiver: Some(cipher::wrap_key(&theirs, &key)?),
                    message_type: MessageType::Text,
                }
            }
        };

        if !self.transport.is_connected() {
            return Err(Error::NotConnected);
        }
        let local_id = payload
            .chat_room_id
            .as_ref()
            .and_then(|room_id| self.push_pending(&room.key(), room_id, text));

        if let Err(e) = self
            .transport
            .publish(&self.destinations.send_message, &payload)
        {
            if let Some(id) = &local_id {
                lock(&self.state).messages.retain(|m| &m.id != id);
            }
            return Err(e);
        }
        tracing::debug!(room = ?room.key(), optimistic = local_id.is_some(), "message sent");
        Ok(local_id)
    }

    /// Forget the active room and release its subscription.
    pub fn deactivate(&self) {
        let channel = {
            let mut state = lock(&self.state);
            state.active = None;
            state.messages.clear();
            state.counterpart_key = None;
            state.channel.take()
        };
        if let Some(channel) = channel {
            self.transport.unsubscribe(&channel);
        }
    }

    fn is_active(&self, key: &RoomKey) -> bool {
        lock(&self.state).active.as_ref().map(Room::key).as_ref() == Some(key)
    }

    fn push_pending(&self, key: &RoomKey, room_id: &RoomId, text: &str) -> Option<MessageId> {
        let mut state = lock(&self.state);
        if state.active.as_ref().map(Room::key).as_ref() != Some(key) {
            return None;
        }
        state.next_local_seq += 1;
        let id = MessageId::Local(state.next_local_seq);
        state.messages.push(RenderedMessage {
            id: id.clone(),
            room_id: Some(room_id.clone()),
            sender_id: self.me.clone(),
            sender_username: None,
            message_type: MessageType::Text,
            status: DeliveryStatus::Pending,
            timestamp: Utc::now(),
            content: MessageContent::Text(text.to_string()),
        });
        Some(id)
    }

    async fn counterpart_key(&self, counterpart: &UserId) -> Result<WrappingKey> {
        if let Some((user, key)) = lock(&self.state).counterpart_key.as_ref() {
            if user == counterpart {
                return Ok(key.clone());
            }
        }

        let encoded = self
            .api
            .fetch_public_key(counterpart)
            .await?
            .ok_or_else(|| {
                Error::ProtocolViolation(format!("user {counterpart} has no registered public key"))
            })?;
        let key = import_public(&encoded)?;

        let mut state = lock(&self.state);
        if matches!(&state.active, Some(Room::Private { counterpart: c, .. }) if c == counterpart) {
            state.counterpart_key = Some((counterpart.clone(), key.clone()));
        }
        Ok(key)
    }

    fn realtime_handler(&self, key: RoomKey) -> MessageHandler {
        let weak = self.weak_self.clone();
        Arc::new(move |body: &str| {
            if let Some(sync) = weak.upgrade() {
                sync.handle_frame(&key, body);
            }
        })
    }

    fn handle_frame(&self, registered: &RoomKey, body: &str) {
        match serde_json::from_str::<EncryptedMessage>(body) {
            Ok(msg) => self.handle_realtime(registered, msg),
            Err(e) => tracing::warn!(error = %e, "malformed chat frame"),
        }
    }

    fn handle_realtime(&self, registered: &RoomKey, msg: EncryptedMessage) {
        let Some(mut room) = self.active_room() else {
            return;
        };
        if room.key() != *registered {
            tracing::debug!(message_id = %msg.id, "dropping message for inactive room");
            return;
        }

        let adoption = match (&room, &msg.chat_room_id) {
            (
                Room::Private {
                    counterpart,
                    room_id: None,
                },
                carried,
            ) => {
                if msg.sender_id != *counterpart && msg.sender_id != self.me {
                    tracing::debug!(message_id = %msg.id, "queue message for another conversation");
                    return;
                }
                carried
                    .as_ref()
                    .map(|room_id| (counterpart.clone(), room_id.clone()))
            }
            (_, Some(carried)) if room.room_id() != Some(carried) => {
                tracing::debug!(message_id = %msg.id, "message carries another room id");
                return;
            }
            _ => None,
        };
        if let Some((counterpart, room_id)) = adoption {
            let Some(adopted) = self.adopt_room(&counterpart, &room_id) else {
                return;
            };
            room = adopted;
        }

        let rendered = self.render(&room, &msg);
        {
            let mut state = lock(&self.state);
            if state.active.as_ref().map(Room::key) != Some(room.key()) {
                return;
            }
            if state.messages.iter().any(|m| m.id == rendered.id) {
                tracing::debug!(message_id = %msg.id, "duplicate delivery ignored");
                return;
            }
            let placeholder = state.messages.iter().position(|m| {
                m.status == DeliveryStatus::Pending && m.sender_id == rendered.sender_id
            });
            match placeholder {
                Some(pos) => state.messages[pos] = rendered,
                None => state.messages.push(rendered),
            }
            state.messages.sort_by_key(|m| m.timestamp);
        }

        if msg.sender_id != self.me {
            self.receipts.mark_read(&msg.id);
        }
    }

    /// Bind the pending conversation with `counterpart` to `room_id` and move
    /// the subscription to the room topic. Returns the updated room.
    fn adopt_room(&self, counterpart: &UserId, room_id: &RoomId) -> Option<Room> {
        let topic = self.destinations.room_topic(room_id);
        let (adopted, previous_channel) = {
            let mut state = lock(&self.state);
            match state.active.as_mut() {
                Some(Room::Private {
                    counterpart: active,
                    room_id: slot,
                }) if *active == *counterpart && slot.is_none() => {
                    *slot = Some(room_id.clone())
                }
                _ => return None,
            }
            let adopted = state.active.clone()?;
            (adopted, state.channel.replace(topic.clone()))
        };
        tracing::info!(counterpart = %counterpart, room_id = %room_id, "adopted room for pending conversation");

        if let Err(e) = self
            .transport
            .subscribe(&topic, self.realtime_handler(adopted.key()))
        {
            tracing::warn!(room_id = %room_id, error = %e, "failed to subscribe adopted room");
        }
        if let Some(previous) = previous_channel.filter(|c| *c != topic) {
            self.transport.unsubscribe(&previous);
        }
        Some(adopted)
    }

    fn render(&self, room: &Room, msg: &EncryptedMessage) -> RenderedMessage {
        let content = match msg.sealed_body() {
            None => MessageContent::Legacy,
            Some((cipher_text, iv)) => match self.decrypt_body(room, msg, cipher_text, iv) {
                Ok(text) => MessageContent::Text(text),
                Err(e) => {
                    tracing::warn!(message_id = %msg.id, error = %e, "message unreadable");
                    MessageContent::Unreadable(unreadable_reason(&e))
                }
            },
        };
        RenderedMessage {
            id: MessageId::Server(msg.id.clone()),
            room_id: msg.chat_room_id.clone().or_else(|| room.room_id().cloned()),
            sender_id: msg.sender_id.clone(),
            sender_username: msg.sender_username.clone(),
            message_type: msg.message_type,
            status: DeliveryStatus::Confirmed,
            timestamp: msg.timestamp,
            content,
        }
    }

    fn decrypt_body(
        &self,
        room: &Room,
        msg: &EncryptedMessage,
        cipher_text: &str,
        iv: &str,
    ) -> Result<String> {
        match room {
            Room::Group {
                group_id,
                member_keys,
                ..
            } => {
                let key = self
                    .group_keys
                    .resolve_group_key(group_id, member_keys, &self.me)?;
                cipher::decrypt(&key, cipher_text, iv)
            }
            Room::Private { .. } => {
                let private = self.vault.private_key()?;
                let candidates = [
                    msg.encrypted_aes_key_for_sender.as_ref(),
                    msg.encrypted_aes_key_for_receiver.as_ref(),
                ];
                if candidates.iter().all(Option::is_none) {
                    return Err(Error::ProtocolViolation("no wrapped key on message".to_string()));
                }

                let mut last_error = None;
                for wrapped in candidates.into_iter().flatten() {
                    let Ok(key) = cipher::unwrap_key(&private, wrapped) else {
                        continue;
                    };
                    match cipher::decrypt(&key, cipher_text, iv) {
                        Ok(text) => return Ok(text),
                        Err(e) => last_error = Some(e),
                    }
                }
                Err(last_error.unwrap_or(Error::MissingKey(MissingKey::NotARecipient)))
            }
        }
    }
}

fn same_conversation(active: &Room, requested: &Room) -> bool {
    if active.key() == requested.key() {
        return true;
    }
    // A pending conversation that has since adopted a room is still the
    // conversation the caller asks for.
    match (active, requested) {
        (
            Room::Private {
                counterpart: a,
                room_id: Some(_),
            },
            Room::Private {
                counterpart: b,
                room_id: None,
            },
        ) => a == b,
        _ => false,
    }
}

fn unreadable_reason(error: &Error) -> UnreadableReason {
    match error {
        Error::MissingKey(MissingKey::DeviceKeyAbsent) | Error::PrivateKeyLost => {
            UnreadableReason::NoDeviceKey
        }
        Error::MissingKey(MissingKey::NotARecipient) => UnreadableReason::NotARecipient,
        Error::MissingKey(MissingKey::MembershipKeyMissing { .. }) => {
            UnreadableReason::MembershipKeyMissing
        }
        _ => UnreadableReason::Corrupted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adopted_conversation_matches_pending_request() {
        let adopted = Room::private("bob", Some(RoomId::from("R1")));
        assert!(same_conversation(&adopted, &Room::private("bob", None)));
        assert!(!same_conversation(&adopted, &Room::private("carol", None)));
        assert!(!same_conversation(
            &Room::private("bob", None),
            &Room::private("bob", Some(RoomId::from("R1")))
        ));
    }

    #[test]
    fn error_classification_for_placeholders() {
        assert_eq!(
            unreadable_reason(&MissingKey::DeviceKeyAbsent.into()),
            UnreadableReason::NoDeviceKey
        );
        assert_eq!(
            unreadable_reason(&MissingKey::NotARecipient.into()),
            UnreadableReason::NotARecipient
        );
        assert_eq!(
            unreadable_reason(&Error::Decryption("tag".into())),
            UnreadableReason::Corrupted
        );
    }
}
