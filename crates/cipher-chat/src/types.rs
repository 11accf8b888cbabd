use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

pub const PLACEHOLDER_LEGACY: &str = "Old message";
pub const PLACEHOLDER_UNREADABLE: &str = "Unable to decrypt";

/// Canonical user identity.
///
/// Servers emit user ids both as JSON numbers and as JSON strings (member-key
/// tables are always string-keyed). Both decode to the same decimal string so
/// table lookups never depend on which encoding a payload happened to use.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<u64> for UserId {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl<'de> Deserialize<'de> for UserId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        serde_flexible_id::deserialize(deserializer).map(UserId::new)
    }
}

/// Server-assigned chat room identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl<'de> Deserialize<'de> for RoomId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        serde_flexible_id::deserialize(deserializer).map(RoomId)
    }
}

/// A symmetric key encrypted under one recipient's RSA public key (base64).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WrappedKey(pub String);

impl WrappedKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Wrapped group key per current member, produced server-side.
pub type MemberKeyTable = HashMap<UserId, WrappedKey>;

/// Identity of an entry in the rendered message list.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageId {
    /// Assigned by the server.
    Server(String),
    /// Local monotonic sequence number of an optimistic send.
    Local(u64),
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageId::Server(id) => f.write_str(id),
            MessageId::Local(seq) => write!(f, "local-{seq}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Pending,
    Confirmed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    #[default]
    Text,
    Image,
    File,
    #[serde(other)]
    Unknown,
}

/// Status as reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerStatus {
    #[default]
    Sent,
    Delivered,
    Read,
    #[serde(other)]
    Unknown,
}

/// Encrypted message as delivered by history fetches and the realtime topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "WireMessage")]
pub struct EncryptedMessage {
    pub id: String,
    pub chat_room_id: Option<RoomId>,
    pub sender_id: UserId,
    pub sender_username: Option<String>,
    pub cipher_text: Option<String>,
    pub iv: Option<String>,
    pub encrypted_aes_key_for_sender: Option<WrappedKey>,
    pub encrypted_aes_key_for_receiver: Option<WrappedKey>,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub status: ServerStatus,
    pub timestamp: DateTime<Utc>,
}

impl EncryptedMessage {
    /// Ciphertext and iv travel together; without both there is nothing to decrypt.
    pub fn sealed_body(&self) -> Option<(&str, &str)> {
        match (self.cipher_text.as_deref(), self.iv.as_deref()) {
            (Some(ct), Some(iv)) if !ct.is_empty() && !iv.is_empty() => Some((ct, iv)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSender {
    id: UserId,
    #[serde(default)]
    username: Option<String>,
}

/// Accepts every field spelling observed on the wire: nested or flat sender,
/// `createdAt` or `timestamp`, and the single-key legacy `encryptedAesKey`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMessage {
    #[serde(deserialize_with = "serde_flexible_id::deserialize")]
    id: String,
    #[serde(default)]
    chat_room_id: Option<RoomId>,
    #[serde(default)]
    sender: Option<WireSender>,
    #[serde(default)]
    sender_id: Option<UserId>,
    #[serde(default)]
    sender_username: Option<String>,
    #[serde(default)]
    cipher_text: Option<String>,
    #[serde(default)]
    iv: Option<String>,
    #[serde(default)]
    encrypted_aes_key_for_sender: Option<WrappedKey>,
    #[serde(default)]
    encrypted_aes_key_for_receiver: Option<WrappedKey>,
    #[serde(default)]
    encrypted_aes_key: Option<WrappedKey>,
    #[serde(default, rename = "type")]
    message_type: Option<MessageType>,
    #[serde(default)]
    status: Option<ServerStatus>,
    #[serde(default, with = "serde_flexible_timestamp")]
    timestamp: Option<DateTime<Utc>>,
    #[serde(default, with = "serde_flexible_timestamp")]
    created_at: Option<DateTime<Utc>>,
}

impl From<WireMessage> for EncryptedMessage {
    fn from(wire: WireMessage) -> Self {
        let (sender_id, nested_username) = match wire.sender {
            Some(sender) => (sender.id, sender.username),
            None => (wire.sender_id.unwrap_or_else(|| UserId::new("")), None),
        };
        Self {
            id: wire.id,
            chat_room_id: wire.chat_room_id,
            sender_id,
            sender_username: nested_username.or(wire.sender_username),
            cipher_text: wire.cipher_text,
            iv: wire.iv,
            encrypted_aes_key_for_sender: wire
                .encrypted_aes_key_for_sender
                .or_else(|| wire.encrypted_aes_key.clone()),
            encrypted_aes_key_for_receiver: wire
                .encrypted_aes_key_for_receiver
                .or(wire.encrypted_aes_key),
            message_type: wire.message_type.unwrap_or_default(),
            status: wire.status.unwrap_or_default(),
            timestamp: wire.created_at.or(wire.timestamp).unwrap_or_else(Utc::now),
        }
    }
}

/// Publish payload for the send-message destination.
///
/// `chat_room_id` is `None` for the first message to a private counterpart; the
/// server then allocates the room from `receiver_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    pub chat_room_id: Option<RoomId>,
    pub receiver_id: Option<UserId>,
    pub cipher_text: String,
    pub iv: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub encrypted_aes_key_for_sender: Option<WrappedKey>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub encrypted_aes_key_for_receiver: Option<WrappedKey>,
    #[serde(rename = "type")]
    pub message_type: MessageType,
}

/// A conversation the user can select.
#[derive(Debug, Clone, PartialEq)]
pub enum Room {
    /// `room_id` is `None` until the server allocates one on first message.
    Private {
        counterpart: UserId,
        room_id: Option<RoomId>,
    },
    /// Groups are created server-side before selection, so the id is always known.
    Group {
        group_id: RoomId,
        name: String,
        member_keys: MemberKeyTable,
    },
}

impl Room {
    pub fn private(counterpart: impl Into<UserId>, room_id: Option<RoomId>) -> Self {
        Room::Private {
            counterpart: counterpart.into(),
            room_id,
        }
    }

    pub fn room_id(&self) -> Option<&RoomId> {
        match self {
            Room::Private { room_id, .. } => room_id.as_ref(),
            Room::Group { group_id, .. } => Some(group_id),
        }
    }

    pub fn key(&self) -> RoomKey {
        match self {
            Room::Private {
                room_id: Some(id), ..
            } => RoomKey::Room(id.clone()),
            Room::Private {
                counterpart,
                room_id: None,
            } => RoomKey::PendingPrivate(counterpart.clone()),
            Room::Group { group_id, .. } => RoomKey::Room(group_id.clone()),
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self, Room::Group { .. })
    }
}

/// Identity under which a room is activated and subscribed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RoomKey {
    Room(RoomId),
    PendingPrivate(UserId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnreadableReason {
    /// This device has no private key for the identity.
    NoDeviceKey,
    /// The key was wrapped for someone else; rejoining may help.
    NotARecipient,
    /// The group member-key table has no entry for us.
    MembershipKeyMissing,
    /// Authentication tag mismatch or malformed payload.
    Corrupted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageContent {
    Text(String),
    /// Stored before encryption was introduced; no ciphertext/iv.
    Legacy,
    Unreadable(UnreadableReason),
}

impl MessageContent {
    pub fn display_text(&self) -> &str {
        match self {
            MessageContent::Text(text) => text,
            MessageContent::Legacy => PLACEHOLDER_LEGACY,
            MessageContent::Unreadable(_) => PLACEHOLDER_UNREADABLE,
        }
    }

    pub fn is_plaintext(&self) -> bool {
        matches!(self, MessageContent::Text(_))
    }
}

/// Decrypted projection of a message, used only for display.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedMessage {
    pub id: MessageId,
    pub room_id: Option<RoomId>,
    pub sender_id: UserId,
    pub sender_username: Option<String>,
    pub message_type: MessageType,
    pub status: DeliveryStatus,
    pub timestamp: DateTime<Utc>,
    pub content: MessageContent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupSummary {
    pub id: RoomId,
    #[serde(default)]
    pub room_id: Option<RoomId>,
    pub name: String,
    #[serde(default)]
    pub member_count: u32,
    #[serde(default)]
    pub encrypted_group_keys: MemberKeyTable,
}

impl From<GroupSummary> for Room {
    fn from(summary: GroupSummary) -> Self {
        Room::Group {
            group_id: summary.room_id.unwrap_or(summary.id),
            name: summary.name,
            member_keys: summary.encrypted_group_keys,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMember {
    pub user_id: UserId,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub admin: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedGroup {
    pub group_id: RoomId,
    #[serde(default)]
    pub encrypted_group_keys: MemberKeyTable,
}

mod serde_flexible_id {
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Number(u64),
        Text(String),
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: Deserializer<'de>,
    {
        match RawId::deserialize(deserializer)? {
            RawId::Number(n) => Ok(n.to_string()),
            RawId::Text(s) => Ok(s),
        }
    }
}

pub(crate) mod serde_flexible_timestamp {
    use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawTimestamp {
        Millis(i64),
        Text(String),
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let Some(raw) = Option::<RawTimestamp>::deserialize(deserializer)? else {
            return Ok(None);
        };
        match raw {
            RawTimestamp::Millis(ms) => Ok(Utc.timestamp_millis_opt(ms).single()),
            RawTimestamp::Text(text) => parse(&text).map(Some).map_err(serde::de::Error::custom),
        }
    }

    // Zone-less timestamps are server-local LocalDateTime values, taken as UTC.
    pub fn parse(text: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
        match DateTime::parse_from_rfc3339(text) {
            Ok(dt) => Ok(dt.with_timezone(&Utc)),
            Err(_) => NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
                .map(|naive| naive.and_utc()),
        }
    }
}
