mod common;

use common::*;
use std::sync::Arc;

use cipher_chat::api::test_utils::FakeChatApi;
use cipher_chat::pubsub::test_utils::CommandReceiver;
use cipher_chat::{
    AuthBundle, ChannelConnection, ChatSession, ClientConfig, ConnectionCommand, DeviceStore,
    Error, GroupSummary, InMemoryStorage, KeyVault, LastRoom, MemberKeyTable, PresenceStatus,
    PresenceUpdate, Room, RoomId, StorageAdapter, UserId,
};

struct Setup {
    storage: Arc<dyn StorageAdapter>,
    api: Arc<FakeChatApi>,
}

impl Setup {
    fn logged_in(public_key: Option<String>) -> Self {
        let storage: Arc<dyn StorageAdapter> = Arc::new(InMemoryStorage::new());
        DeviceStore::new(storage.clone())
            .save_auth(&AuthBundle {
                token: "jwt".to_string(),
                user_id: UserId::from(1u64),
                username: "alice".to_string(),
                public_key,
            })
            .unwrap();
        Self {
            storage,
            api: Arc::new(FakeChatApi::new()),
        }
    }

    async fn start(&self) -> cipher_chat::Result<(ChatSession, CommandReceiver)> {
        let (connection, rx) = ChannelConnection::unbounded();
        let session = ChatSession::start(
            ClientConfig::default(),
            self.storage.clone(),
            self.api.clone(),
            Arc::new(connection),
        )
        .await?;
        Ok((session, CommandReceiver::new(rx)))
    }
}

#[tokio::test]
async fn start_without_login_is_missing_credential() {
    let storage: Arc<dyn StorageAdapter> = Arc::new(InMemoryStorage::new());
    let (connection, _rx) = ChannelConnection::unbounded();
    let result = ChatSession::start(
        ClientConfig::default(),
        storage,
        Arc::new(FakeChatApi::new()),
        Arc::new(connection),
    )
    .await;
    assert!(matches!(result, Err(Error::MissingCredential)));
}

#[tokio::test]
async fn new_account_generates_identity_for_upload() {
    let setup = Setup::logged_in(None);
    let (session, _commands) = setup.start().await.unwrap();

    let generated = session.generated_public_key().unwrap().to_string();
    assert_eq!(
        DeviceStore::new(setup.storage.clone())
            .auth()
            .unwrap()
            .unwrap()
            .public_key,
        Some(generated)
    );
    assert!(session.vault().has_private_key().unwrap());
}

#[tokio::test]
async fn lost_private_key_forces_logout() {
    let setup = Setup::logged_in(Some(public_of(alice())));
    let err = setup.start().await.err().unwrap();

    assert!(matches!(err, Error::PrivateKeyLost));
    assert!(DeviceStore::new(setup.storage.clone())
        .auth()
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn connect_presents_token_and_flushes_presence() {
    let setup = Setup::logged_in(Some(public_of(alice())));
    KeyVault::new(setup.storage.clone())
        .store_identity(alice())
        .unwrap();
    setup.api.set_presence(vec![PresenceUpdate {
        user_id: UserId::from(2u64),
        status: PresenceStatus::Online,
        last_seen: None,
    }]);

    let (session, commands) = setup.start().await.unwrap();
    assert!(session.generated_public_key().is_none());
    assert!(session.presence().is_online(&UserId::from(2u64)));

    session.connect().unwrap();
    session.transport().on_connected();
    let sent = commands.drain();
    assert_eq!(
        sent[0],
        ConnectionCommand::Connect {
            bearer_token: "jwt".to_string()
        }
    );
    assert!(sent.iter().any(|c| matches!(
        c,
        ConnectionCommand::Subscribe { destination, .. } if destination == "/topic/presence"
    )));

    session
        .transport()
        .dispatch("/topic/presence", r#"{"userId": 2, "status": "OFFLINE"}"#);
    assert!(!session.presence().is_online(&UserId::from(2u64)));
}

#[tokio::test]
async fn logout_keeps_device_key() {
    let setup = Setup::logged_in(Some(public_of(alice())));
    KeyVault::new(setup.storage.clone())
        .store_identity(alice())
        .unwrap();
    let (session, commands) = setup.start().await.unwrap();
    session.connect().unwrap();
    session.transport().on_connected();
    session
        .open_room(Room::private(UserId::from(2u64), Some(RoomId::from("R1"))))
        .await
        .unwrap();
    commands.drain();

    session.logout().unwrap();

    assert!(!session.transport().is_connected());
    assert!(session.room_sync().active_room().is_none());
    assert_eq!(commands.drain().last(), Some(&ConnectionCommand::Disconnect));
    let device = DeviceStore::new(setup.storage.clone());
    assert!(device.auth().unwrap().is_none());
    assert!(KeyVault::new(setup.storage.clone())
        .has_private_key()
        .unwrap());
    assert_eq!(
        device.last_room().unwrap(),
        Some(LastRoom::Private {
            counterpart: UserId::from(2u64),
            room_id: Some(RoomId::from("R1")),
        })
    );
}

#[tokio::test]
async fn last_group_is_restored_with_fresh_member_keys() {
    let setup = Setup::logged_in(Some(public_of(alice())));
    KeyVault::new(setup.storage.clone())
        .store_identity(alice())
        .unwrap();
    DeviceStore::new(setup.storage.clone())
        .set_last_room(&Room::Group {
            group_id: RoomId::from("G1"),
            name: "crew".to_string(),
            member_keys: MemberKeyTable::new(),
        })
        .unwrap();
    setup.api.set_groups(vec![GroupSummary {
        id: RoomId::from("G1"),
        room_id: None,
        name: "crew".to_string(),
        member_count: 3,
        encrypted_group_keys: MemberKeyTable::new(),
    }]);

    let (session, _commands) = setup.start().await.unwrap();
    let restored = session.restore_last_room().await.unwrap().unwrap();
    assert!(restored.is_group());
    assert_eq!(
        session.room_sync().active_room().unwrap().room_id(),
        Some(&RoomId::from("G1"))
    );
}

#[tokio::test]
async fn vanished_group_is_not_restored() {
    let setup = Setup::logged_in(Some(public_of(alice())));
    KeyVault::new(setup.storage.clone())
        .store_identity(alice())
        .unwrap();
    DeviceStore::new(setup.storage.clone())
        .set_last_room(&Room::Group {
            group_id: RoomId::from("G9"),
            name: "gone".to_string(),
            member_keys: MemberKeyTable::new(),
        })
        .unwrap();

    let (session, _commands) = setup.start().await.unwrap();
    assert!(session.restore_last_room().await.unwrap().is_none());
    assert!(session.room_sync().active_room().is_none());
}
