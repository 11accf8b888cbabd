use std::sync::Arc;

use crate::api::ChatApi;
use crate::call_signal::{self, CallSignal};
use crate::config::ClientConfig;
use crate::device_store::{AuthBundle, DeviceStore, LastRoom};
use crate::group_keys::GroupKeyStore;
use crate::groups::GroupDirectory;
use crate::key_vault::{KeyVault, Provisioning};
use crate::presence::PresenceBook;
use crate::pubsub::RealtimeConnection;
use crate::receipts::ReadReceipts;
use crate::room_sync::RoomSync;
use crate::transport::TransportSession;
use crate::types::{Room, UserId};
use crate::{Error, Result, StorageAdapter};

/// A logged-in device: every component wired to one account.
pub struct ChatSession {
    config: ClientConfig,
    auth: AuthBundle,
    device: DeviceStore,
    vault: Arc<KeyVault>,
    group_keys: Arc<GroupKeyStore>,
    transport: Arc<TransportSession>,
    room_sync: Arc<RoomSync>,
    groups: GroupDirectory,
    presence: Arc<PresenceBook>,
    generated_public_key: Option<String>,
}

impl ChatSession {
    /// Start a session for the stored login.
    ///
    /// Fails with [`Error::MissingCredential`] when nobody is logged in. When
    /// the account has a registered public key but this device lost the
    /// private half, the login is dropped and [`Error::PrivateKeyLost`] is
    /// returned. Must run inside a tokio runtime.
    pub async fn start(
        config: ClientConfig,
        storage: Arc<dyn StorageAdapter>,
        api: Arc<dyn ChatApi>,
        connection: Arc<dyn RealtimeConnection>,
    ) -> Result<Self> {
        let device = DeviceStore::new(storage.clone());
        let mut auth = device.auth()?.ok_or(Error::MissingCredential)?;
        let vault = Arc::new(KeyVault::new(storage));

        let generated_public_key = match vault.provision(auth.public_key.as_deref()) {
            Ok(Provisioning::Ready) => None,
            Ok(Provisioning::Generated { public_key }) => {
                auth.public_key = Some(public_key.clone());
                device.save_auth(&auth)?;
                Some(public_key)
            }
            Err(e) => {
                if matches!(e, Error::PrivateKeyLost) {
                    tracing::warn!(user_id = %auth.user_id, "forcing logout, device key lost");
                    device.clear_auth()?;
                }
                return Err(e);
            }
        };

        let group_keys = Arc::new(GroupKeyStore::new(vault.clone()));
        let transport = Arc::new(TransportSession::new(connection));
        let room_sync = RoomSync::new(
            auth.user_id.clone(),
            api.clone(),
            vault.clone(),
            group_keys.clone(),
            transport.clone(),
            config.destinations.clone(),
            ReadReceipts::spawn(api.clone()),
        );
        let groups = GroupDirectory::new(api.clone(), group_keys.clone());

        let presence = Arc::new(PresenceBook::new());
        match api.fetch_presence().await {
            Ok(snapshot) => presence.load_snapshot(snapshot),
            Err(e) => tracing::warn!(error = %e, "presence snapshot unavailable"),
        }
        presence.attach(&transport, &config.destinations.presence_topic)?;

        tracing::info!(user_id = %auth.user_id, "chat session started");
        Ok(Self {
            config,
            auth,
            device,
            vault,
            group_keys,
            transport,
            room_sync,
            groups,
            presence,
            generated_public_key,
        })
    }

    pub fn me(&self) -> &UserId {
        &self.auth.user_id
    }

    pub fn username(&self) -> &str {
        &self.auth.username
    }

    /// Public key generated during this start; the caller registers it.
    pub fn generated_public_key(&self) -> Option<&str> {
        self.generated_public_key.as_deref()
    }

    pub fn connect(&self) -> Result<()> {
        self.transport.connect(&self.auth.token)
    }

    pub async fn open_room(&self, room: Room) -> Result<()> {
        let result = self.room_sync.activate_room(room).await;
        self.remember_active_room();
        result
    }

    pub async fn open_private_chat(&self, counterpart: UserId) -> Result<Room> {
        let room = self.room_sync.open_private_chat(counterpart).await?;
        self.remember_active_room();
        Ok(room)
    }

    /// Persist the active room; call again after a pending conversation is
    /// bound to its room so the pointer carries the room id.
    pub fn remember_active_room(&self) {
        let Some(room) = self.room_sync.active_room() else {
            return;
        };
        if let Err(e) = self.device.set_last_room(&room) {
            tracing::warn!(error = %e, "failed to persist last room");
        }
    }

    /// Reopen the conversation that was active last time, if it still exists.
    pub async fn restore_last_room(&self) -> Result<Option<Room>> {
        let room = match self.device.last_room()? {
            None => return Ok(None),
            Some(LastRoom::Private {
                counterpart,
                room_id,
            }) => Room::private(counterpart, room_id),
            Some(LastRoom::Group { group_id }) => {
                let groups = self.groups.my_groups().await?;
                match groups
                    .into_iter()
                    .find(|g| g.room_id() == Some(&group_id))
                {
                    Some(room) => room,
                    None => {
                        tracing::info!(group_id = %group_id, "last group no longer available");
                        return Ok(None);
                    }
                }
            }
        };
        self.room_sync.activate_room(room.clone()).await?;
        Ok(Some(room))
    }

    pub fn subscribe_call_signals<F>(&self, on_signal: F) -> Result<()>
    where
        F: Fn(CallSignal) + Send + Sync + 'static,
    {
        call_signal::subscribe_call_signals(&self.transport, &self.config.destinations, on_signal)
    }

    pub fn send_call_signal(&self, signal: &CallSignal) -> Result<()> {
        call_signal::send_call_signal(&self.transport, &self.config.destinations, signal)
    }

    /// Drop the realtime connection, every cached group key and the stored
    /// login. The device private key is kept.
    pub fn logout(&self) -> Result<()> {
        self.room_sync.deactivate();
        self.transport.disconnect();
        self.group_keys.clear();
        self.device.clear_auth()?;
        tracing::info!(user_id = %self.auth.user_id, "logged out");
        Ok(())
    }

    pub fn room_sync(&self) -> &Arc<RoomSync> {
        &self.room_sync
    }

    pub fn transport(&self) -> &Arc<TransportSession> {
        &self.transport
    }

    pub fn groups(&self) -> &GroupDirectory {
        &self.groups
    }

    pub fn presence(&self) -> &Arc<PresenceBook> {
        &self.presence
    }

    pub fn vault(&self) -> &Arc<KeyVault> {
        &self.vault
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}
