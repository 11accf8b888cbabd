use crate::{Error, Result};

/// The socket underneath [`crate::TransportSession`] (a STOMP-style broker
/// connection). Implementations only move frames; state, queuing and
/// handler dispatch live in the session.
pub trait RealtimeConnection: Send + Sync {
    /// Start the handshake, presenting `bearer_token` as the connect credential.
    /// Completion is reported back through [`crate::TransportSession::on_connected`].
    fn connect(&self, bearer_token: &str) -> Result<()>;

    /// Subscribe to a destination. Returns the broker subscription id.
    fn subscribe(&self, destination: &str) -> Result<String>;

    fn unsubscribe(&self, subscription_id: &str) -> Result<()>;

    fn send(&self, destination: &str, body: String) -> Result<()>;

    /// Release the connection. Must be safe to call at any time.
    fn disconnect(&self);
}

/// Commands emitted by [`ChannelConnection`] for an external socket driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionCommand {
    Connect { bearer_token: String },
    Subscribe { subscription_id: String, destination: String },
    Unsubscribe(String),
    Send { destination: String, body: String },
    Disconnect,
}

/// Channel-backed [`RealtimeConnection`]: every call becomes a
/// [`ConnectionCommand`] on a crossbeam channel, and the driver owning the
/// receiver talks to the broker.
#[derive(Clone)]
pub struct ChannelConnection {
    command_tx: crossbeam_channel::Sender<ConnectionCommand>,
}

impl ChannelConnection {
    pub fn new(command_tx: crossbeam_channel::Sender<ConnectionCommand>) -> Self {
        Self { command_tx }
    }

    /// Unbounded connection plus the receiver the driver consumes.
    pub fn unbounded() -> (Self, crossbeam_channel::Receiver<ConnectionCommand>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Self::new(tx), rx)
    }

    fn emit(&self, command: ConnectionCommand) -> Result<()> {
        self.command_tx
            .send(command)
            .map_err(|_| Error::Network("connection driver has gone away".to_string()))
    }
}

impl RealtimeConnection for ChannelConnection {
    fn connect(&self, bearer_token: &str) -> Result<()> {
        self.emit(ConnectionCommand::Connect {
            bearer_token: bearer_token.to_string(),
        })
    }

    fn subscribe(&self, destination: &str) -> Result<String> {
        let subscription_id = format!("sub-{}", uuid::Uuid::new_v4());
        self.emit(ConnectionCommand::Subscribe {
            subscription_id: subscription_id.clone(),
            destination: destination.to_string(),
        })?;
        Ok(subscription_id)
    }

    fn unsubscribe(&self, subscription_id: &str) -> Result<()> {
        self.emit(ConnectionCommand::Unsubscribe(subscription_id.to_string()))
    }

    fn send(&self, destination: &str, body: String) -> Result<()> {
        self.emit(ConnectionCommand::Send {
            destination: destination.to_string(),
            body,
        })
    }

    fn disconnect(&self) {
        let _ = self.emit(ConnectionCommand::Disconnect);
    }
}

/// Helpers for draining a [`ChannelConnection`] in tests.
pub mod test_utils {
    use super::ConnectionCommand;

    pub struct CommandReceiver {
        rx: crossbeam_channel::Receiver<ConnectionCommand>,
    }

    impl CommandReceiver {
        pub fn new(rx: crossbeam_channel::Receiver<ConnectionCommand>) -> Self {
            Self { rx }
        }

        pub fn drain(&self) -> Vec<ConnectionCommand> {
            self.rx.try_iter().collect()
        }

        /// Bodies of every `Send` to `destination` still in the channel.
        pub fn sent_to(&self, destination: &str) -> Vec<String> {
            self.drain()
                .into_iter()
                .filter_map(|command| match command {
                    ConnectionCommand::Send { destination: d, body } if d == destination => {
                        Some(body)
                    }
                    _ => None,
                })
                .collect()
        }
    }
}
