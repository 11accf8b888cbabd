//! Client core for an end-to-end encrypted chat service.
//!
//! Each device owns an RSA identity key ([`KeyVault`]). Private messages are
//! sealed with a fresh AES-256-GCM key wrapped for both participants; groups
//! share one AES key wrapped per member ([`GroupKeyStore`]). [`RoomSync`]
//! merges stored history with the realtime stream delivered through
//! [`TransportSession`].

pub mod api;
pub mod call_signal;
pub mod cipher;
pub mod config;
pub mod device_store;
pub mod error;
pub mod group_keys;
pub mod groups;
pub mod key_vault;
pub mod presence;
pub mod pubsub;
pub mod receipts;
pub mod room_sync;
pub mod session;
pub mod storage;
pub mod transport;
pub mod types;

pub use api::{ApiFuture, ChatApi};
pub use call_signal::{CallSignal, CallSignalType};
pub use cipher::{Sealed, SessionKey};
pub use config::{ClientConfig, Destinations};
pub use device_store::{AuthBundle, DeviceStore, LastRoom};
pub use error::{Error, ErrorKind, MissingKey, Result};
pub use group_keys::GroupKeyStore;
pub use groups::GroupDirectory;
pub use key_vault::{IdentityKeyPair, KeyVault, Provisioning, UnwrappingKey, WrappingKey};
pub use presence::{PresenceBook, PresenceStatus, PresenceUpdate};
pub use pubsub::{ChannelConnection, ConnectionCommand, RealtimeConnection};
pub use receipts::ReadReceipts;
pub use room_sync::RoomSync;
pub use session::ChatSession;
pub use storage::{FileStorage, InMemoryStorage, StorageAdapter};
pub use transport::{ConnectionState, MessageHandler, TransportSession};
pub use types::*;
