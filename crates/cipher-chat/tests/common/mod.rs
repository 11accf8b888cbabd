#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use std::sync::{Arc, OnceLock};
use tokio::sync::mpsc::UnboundedReceiver;

use cipher_chat::api::test_utils::FakeChatApi;
use cipher_chat::cipher::{self, SessionKey};
use cipher_chat::key_vault::{export_public, generate_identity_key_pair};
use cipher_chat::pubsub::test_utils::CommandReceiver;
use cipher_chat::{
    ChannelConnection, Destinations, EncryptedMessage, GroupKeyStore, IdentityKeyPair, KeyVault,
    MessageType, OutgoingMessage, ReadReceipts, RoomId, RoomSync, ServerStatus, StorageAdapter,
    InMemoryStorage, TransportSession, UserId,
};

pub fn alice() -> &'static IdentityKeyPair {
    static KEY: OnceLock<IdentityKeyPair> = OnceLock::new();
    KEY.get_or_init(|| generate_identity_key_pair().unwrap())
}

pub fn bob() -> &'static IdentityKeyPair {
    static KEY: OnceLock<IdentityKeyPair> = OnceLock::new();
    KEY.get_or_init(|| generate_identity_key_pair().unwrap())
}

pub fn carol() -> &'static IdentityKeyPair {
    static KEY: OnceLock<IdentityKeyPair> = OnceLock::new();
    KEY.get_or_init(|| generate_identity_key_pair().unwrap())
}

pub fn public_of(pair: &IdentityKeyPair) -> String {
    export_public(&pair.wrapping_key()).unwrap()
}

pub fn at(seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap()
}

/// One client: a `RoomSync` wired to fakes.
pub struct Harness {
    pub me: UserId,
    pub api: Arc<FakeChatApi>,
    pub transport: Arc<TransportSession>,
    pub commands: CommandReceiver,
    pub vault: Arc<KeyVault>,
    pub group_keys: Arc<GroupKeyStore>,
    pub sync: Arc<RoomSync>,
    pub receipts: UnboundedReceiver<String>,
    pub destinations: Destinations,
}

impl Harness {
    pub fn new(me: impl Into<UserId>, identity: Option<&IdentityKeyPair>) -> Self {
        let me = me.into();
        let storage: Arc<dyn StorageAdapter> = Arc::new(InMemoryStorage::new());
        let vault = Arc::new(KeyVault::new(storage));
        if let Some(pair) = identity {
            vault.store_identity(pair).unwrap();
        }

        let api = Arc::new(FakeChatApi::new());
        let (connection, rx) = ChannelConnection::unbounded();
        let transport = Arc::new(TransportSession::new(Arc::new(connection)));
        let group_keys = Arc::new(GroupKeyStore::new(vault.clone()));
        let (receipts_tx, receipts) = ReadReceipts::channel();
        let destinations = Destinations::default();

        let sync = RoomSync::new(
            me.clone(),
            api.clone(),
            vault.clone(),
            group_keys.clone(),
            transport.clone(),
            destinations.clone(),
            receipts_tx,
        );

        Self {
            me,
            api,
            transport,
            commands: CommandReceiver::new(rx),
            vault,
            group_keys,
            sync,
            receipts,
            destinations,
        }
    }

    pub fn connect(&self) {
        self.transport.connect("jwt").unwrap();
        self.transport.on_connected();
    }

    pub fn deliver(&self, channel: &str, msg: &EncryptedMessage) {
        self.transport
            .dispatch(channel, &serde_json::to_string(msg).unwrap());
    }

    pub fn room_topic(&self, room_id: &str) -> String {
        self.destinations.room_topic(&RoomId::from(room_id))
    }

    pub fn texts(&self) -> Vec<String> {
        self.sync
            .messages()
            .iter()
            .map(|m| m.content.display_text().to_string())
            .collect()
    }

    /// Every payload published to the send destination since the last drain.
    pub fn sent_messages(&self) -> Vec<OutgoingMessage> {
        self.commands
            .sent_to(&self.destinations.send_message)
            .iter()
            .map(|body| serde_json::from_str(body).unwrap())
            .collect()
    }

    pub fn drain_receipts(&mut self) -> Vec<String> {
        let mut ids = Vec::new();
        while let Ok(id) = self.receipts.try_recv() {
            ids.push(id);
        }
        ids
    }
}

/// What the server stores and fans out for a published payload.
pub fn echo(
    id: &str,
    sender: &UserId,
    room_id: &str,
    payload: &OutgoingMessage,
    timestamp: DateTime<Utc>,
) -> EncryptedMessage {
    EncryptedMessage {
        id: id.to_string(),
        chat_room_id: Some(RoomId::from(room_id)),
        sender_id: sender.clone(),
        sender_username: None,
        cipher_text: Some(payload.cipher_text.clone()),
        iv: Some(payload.iv.clone()),
        encrypted_aes_key_for_sender: payload.encrypted_aes_key_for_sender.clone(),
        encrypted_aes_key_for_receiver: payload.encrypted_aes_key_for_receiver.clone(),
        message_type: MessageType::Text,
        status: ServerStatus::Sent,
        timestamp,
    }
}

/// A private message sealed by `sender_pair` for `receiver_pair`.
pub fn private_message(
    id: &str,
    room_id: Option<&str>,
    sender: impl Into<UserId>,
    text: &str,
    sender_pair: &IdentityKeyPair,
    receiver_pair: &IdentityKeyPair,
    timestamp: DateTime<Utc>,
) -> EncryptedMessage {
    let key = cipher::generate_session_key();
    let sealed = cipher::encrypt(&key, text).unwrap();
    EncryptedMessage {
        id: id.to_string(),
        chat_room_id: room_id.map(RoomId::from),
        sender_id: sender.into(),
        sender_username: None,
        cipher_text: Some(sealed.cipher_text),
        iv: Some(sealed.iv),
        encrypted_aes_key_for_sender: Some(
            cipher::wrap_key(&sender_pair.wrapping_key(), &key).unwrap(),
        ),
        encrypted_aes_key_for_receiver: Some(
            cipher::wrap_key(&receiver_pair.wrapping_key(), &key).unwrap(),
        ),
        message_type: MessageType::Text,
        status: ServerStatus::Sent,
        timestamp,
    }
}

pub fn group_message(
    id: &str,
    group_id: &str,
    sender: impl Into<UserId>,
    text: &str,
    group_key: &SessionKey,
    timestamp: DateTime<Utc>,
) -> EncryptedMessage {
    let sealed = cipher::encrypt(group_key, text).unwrap();
    EncryptedMessage {
        id: id.to_string(),
        chat_room_id: Some(RoomId::from(group_id)),
        sender_id: sender.into(),
        sender_username: None,
        cipher_text: Some(sealed.cipher_text),
        iv: Some(sealed.iv),
        encrypted_aes_key_for_sender: None,
        encrypted_aes_key_for_receiver: None,
        message_type: MessageType::Text,
        status: ServerStatus::Sent,
        timestamp,
    }
}
