use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::types::RoomId;
use crate::{Error, Result};

pub const CONFIG_FILE_NAME: &str = "config.json";

/// Client configuration, stored as `config.json` in the data directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientConfig {
    /// Realtime broker endpoint.
    pub broker_url: String,
    /// REST base used by the external API collaborator.
    pub api_base_url: String,
    pub destinations: Destinations,
    pub heartbeat_incoming_ms: u64,
    pub heartbeat_outgoing_ms: u64,

    #[serde(skip)]
    pub path: PathBuf,
}

/// Realtime topics and publish destinations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Destinations {
    /// Per-room topic prefix; the room id is appended.
    pub room_topic_prefix: String,
    pub presence_topic: String,
    pub call_signal_queue: String,
    /// Per-user queue carrying messages for conversations that have no room yet.
    pub user_message_queue: String,
    pub send_message: String,
    pub send_call_signal: String,
}

impl Default for Destinations {
    fn default() -> Self {
        Self {
            room_topic_prefix: "/topic/chat/".to_string(),
            presence_topic: "/topic/presence".to_string(),
            call_signal_queue: "/user/queue/call".to_string(),
            user_message_queue: "/user/queue/messages".to_string(),
            send_message: "/app/chat.send".to_string(),
            send_call_signal: "/app/call.signal".to_string(),
        }
    }
}

impl Destinations {
    pub fn room_topic(&self, room_id: &RoomId) -> String {
        format!("{}{}", self.room_topic_prefix, room_id)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            broker_url: "ws://localhost:8080/api/ws".to_string(),
            api_base_url: "http://localhost:8080/api".to_string(),
            destinations: Destinations::default(),
            heartbeat_incoming_ms: 10_000,
            heartbeat_outgoing_ms: 10_000,
            path: PathBuf::new(),
        }
    }
}

impl ClientConfig {
    /// Platform data directory for the client (`<data dir>/cipher-chat`).
    pub fn default_data_dir() -> Option<PathBuf> {
        dirs::data_dir().map(|dir| dir.join("cipher-chat"))
    }

    /// Load from `data_dir`, falling back to defaults when no file exists.
    pub fn load(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(CONFIG_FILE_NAME);
        if !path.exists() {
            return Ok(Self {
                path,
                ..Default::default()
            });
        }

        let content = std::fs::read_to_string(&path)
            .map_err(|e| Error::Storage(format!("Failed to read config: {e}")))?;
        let mut config: ClientConfig = serde_json::from_str(&content)
            .map_err(|e| Error::Serialization(format!("Failed to parse config: {e}")))?;
        config.path = path;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&self.path, content)
            .map_err(|e| Error::Storage(format!("Failed to write config: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn load_without_file_uses_defaults() {
        let temp = TempDir::new().unwrap();
        let config = ClientConfig::load(temp.path()).unwrap();
        assert_eq!(config.destinations.send_message, "/app/chat.send");
        assert_eq!(config.path, temp.path().join(CONFIG_FILE_NAME));
    }

    #[test]
    fn partial_file_keeps_remaining_defaults() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join(CONFIG_FILE_NAME),
            r#"{"brokerUrl": "wss://chat.example/ws", "destinations": {"presenceTopic": "/topic/online"}}"#,
        )
        .unwrap();

        let config = ClientConfig::load(temp.path()).unwrap();
        assert_eq!(config.broker_url, "wss://chat.example/ws");
        assert_eq!(config.destinations.presence_topic, "/topic/online");
        assert_eq!(config.destinations.room_topic_prefix, "/topic/chat/");
        assert_eq!(config.heartbeat_incoming_ms, 10_000);
    }

    #[test]
    fn save_and_reload() {
        let temp = TempDir::new().unwrap();
        let mut config = ClientConfig::load(temp.path()).unwrap();
        config.heartbeat_outgoing_ms = 2_500;
        config.save().unwrap();

        let loaded = ClientConfig::load(temp.path()).unwrap();
        assert_eq!(loaded.heartbeat_outgoing_ms, 2_500);
    }

    #[test]
    fn malformed_file_is_a_serialization_error() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join(CONFIG_FILE_NAME), "{not json").unwrap();
        assert!(matches!(
            ClientConfig::load(temp.path()).unwrap_err(),
            Error::Serialization(_)
        ));
    }

    #[test]
    fn room_topic_appends_id() {
        let destinations = Destinations::default();
        assert_eq!(destinations.room_topic(&RoomId::from("R1")), "/topic/chat/R1");
    }
}
