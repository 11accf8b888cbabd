//! Realtime session: connection state, per-channel handlers and the queue of
//! subscriptions requested before the connection is up.
//!
//! ```text
//! Disconnected --connect()--> Connecting --on_connected()--> Connected
//!      ^                                                         |
//!      +------------- disconnect() / on_connection_lost() -------+
//! ```
//!
//! Outgoing publishes are never buffered: publishing while not connected is a
//! logged no-op.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::pubsub::RealtimeConnection;
use crate::storage::lock;
use crate::{Error, Result};

/// Receives the raw frame body of a channel.
pub type MessageHandler = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

struct ActiveSubscription {
    subscription_id: String,
    handler: MessageHandler,
}

struct SessionState {
    state: ConnectionState,
    active: HashMap<String, ActiveSubscription>,
    /// Requested while not connected, in request order, one entry per channel.
    pending: Vec<(String, MessageHandler)>,
}

pub struct TransportSession {
    connection: Arc<dyn RealtimeConnection>,
    inner: Mutex<SessionState>,
}

impl TransportSession {
    pub fn new(connection: Arc<dyn RealtimeConnection>) -> Self {
        Self {
            connection,
            inner: Mutex::new(SessionState {
                state: ConnectionState::Disconnected,
                active: HashMap::new(),
                pending: Vec::new(),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        lock(&self.inner).state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Begin the handshake with `bearer_token` as the connect credential.
    /// Calling it while a connection is active or in progress does nothing.
    pub fn connect(&self, bearer_token: &str) -> Result<()> {
        if bearer_token.trim().is_empty() {
            return Err(Error::MissingCredential);
        }
        {
            let mut inner = lock(&self.inner);
            if inner.state != ConnectionState::Disconnected {
                tracing::warn!(state = ?inner.state, "realtime session already active");
                return Ok(());
            }
            inner.state = ConnectionState::Connecting;
        }

        if let Err(e) = self.connection.connect(bearer_token) {
            lock(&self.inner).state = ConnectionState::Disconnected;
            return Err(e);
        }
        Ok(())
    }

    /// Handshake completed: flush every queued subscription exactly once.
    pub fn on_connected(&self) {
        let queued = {
            let mut inner = lock(&self.inner);
            if inner.state != ConnectionState::Connecting {
                tracing::warn!(state = ?inner.state, "ignoring handshake completion");
                return;
            }
            inner.state = ConnectionState::Connected;
            std::mem::take(&mut inner.pending)
        };
        tracing::info!(queued = queued.len(), "realtime session connected");

        for (channel, handler) in queued {
            if let Err(e) = self.activate(&channel, handler) {
                tracing::warn!(channel = %channel, error = %e, "failed to flush subscription");
            }
        }
    }

    /// The broker dropped us. Active subscriptions are queued again so the
    /// next successful connect restores them.
    pub fn on_connection_lost(&self) {
        let mut inner = lock(&self.inner);
        if inner.state == ConnectionState::Disconnected {
            return;
        }
        inner.state = ConnectionState::Disconnected;
        let dropped: Vec<(String, MessageHandler)> = inner
            .active
            .drain()
            .map(|(channel, sub)| (channel, sub.handler))
            .collect();
        for (channel, handler) in dropped {
            enqueue(&mut inner.pending, channel, handler);
        }
        tracing::warn!(requeued = inner.pending.len(), "realtime connection lost");
    }

    /// Subscribe `handler` to `channel`, replacing any previous handler.
    /// While not connected the request is queued (once per channel).
    pub fn subscribe(&self, channel: &str, handler: MessageHandler) -> Result<()> {
        {
            let mut inner = lock(&self.inner);
            if inner.state != ConnectionState::Connected {
                enqueue(&mut inner.pending, channel.to_string(), handler);
                tracing::debug!(channel = %channel, "queued subscription until connected");
                return Ok(());
            }
        }
        self.activate(channel, handler)
    }

    pub fn unsubscribe(&self, channel: &str) {
        let removed = {
            let mut inner = lock(&self.inner);
            inner.pending.retain(|(queued, _)| queued != channel);
            inner.active.remove(channel)
        };
        if let Some(sub) = removed {
            if let Err(e) = self.connection.unsubscribe(&sub.subscription_id) {
                tracing::debug!(channel = %channel, error = %e, "unsubscribe failed");
            }
        }
    }

    pub fn is_subscribed(&self, channel: &str) -> bool {
        lock(&self.inner).active.contains_key(channel)
    }

    pub fn pending_channels(&self) -> Vec<String> {
        lock(&self.inner)
            .pending
            .iter()
            .map(|(channel, _)| channel.clone())
            .collect()
    }

    /// Publish `payload` as JSON. Without a connection this logs and returns
    /// without sending; nothing is kept for later.
    pub fn publish<T: Serialize>(&self, destination: &str, payload: &T) -> Result<()> {
        if !self.is_connected() {
            tracing::warn!(destination = %destination, "not connected, dropping publish");
            return Ok(());
        }
        let body = serde_json::to_string(payload)?;
        self.connection.send(destination, body)
    }

    /// Route an inbound frame to the handler registered for `channel`.
    pub fn dispatch(&self, channel: &str, body: &str) {
        let handler = lock(&self.inner)
            .active
            .get(channel)
            .map(|sub| sub.handler.clone());
        match handler {
            Some(handler) => handler(body),
            None => tracing::debug!(channel = %channel, "frame for channel without handler"),
        }
    }

    /// Tear everything down. Safe from any state.
    pub fn disconnect(&self) {
        let active: Vec<ActiveSubscription> = {
            let mut inner = lock(&self.inner);
            inner.pending.clear();
            inner.state = ConnectionState::Disconnected;
            inner.active.drain().map(|(_, sub)| sub).collect()
        };
        for sub in &active {
            if let Err(e) = self.connection.unsubscribe(&sub.subscription_id) {
                tracing::debug!(error = %e, "unsubscribe during disconnect failed");
            }
        }
        self.connection.disconnect();
        tracing::info!(released = active.len(), "realtime session disconnected");
    }

    fn activate(&self, channel: &str, handler: MessageHandler) -> Result<()> {
        let previous = lock(&self.inner).active.remove(channel);
        if let Some(previous) = previous {
            if let Err(e) = self.connection.unsubscribe(&previous.subscription_id) {
                tracing::debug!(channel = %channel, error = %e, "replacing stale subscription");
            }
        }

        let subscription_id = self.connection.subscribe(channel)?;
        lock(&self.inner).active.insert(
            channel.to_string(),
            ActiveSubscription {
                subscription_id,
                handler,
            },
        );
        tracing::debug!(channel = %channel, "subscribed");
        Ok(())
    }
}

fn enqueue(pending: &mut Vec<(String, MessageHandler)>, channel: String, handler: MessageHandler) {
    match pending.iter_mut().find(|(queued, _)| *queued == channel) {
        Some(slot) => slot.1 = handler,
        None => pending.push((channel, handler)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pubsub::test_utils::CommandReceiver;
    use crate::pubsub::{ChannelConnection, ConnectionCommand};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn session() -> (TransportSession, CommandReceiver) {
        let (connection, rx) = ChannelConnection::unbounded();
        (
            TransportSession::new(Arc::new(connection)),
            CommandReceiver::new(rx),
        )
    }

    fn counting_handler(counter: &Arc<AtomicUsize>) -> MessageHandler {
        let counter = counter.clone();
        Arc::new(move |_body: &str| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn subscribes(commands: &[ConnectionCommand]) -> Vec<String> {
        commands
            .iter()
            .filter_map(|c| match c {
                ConnectionCommand::Subscribe { destination, .. } => Some(destination.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn connect_attaches_bearer_token() {
        let (session, commands) = session();
        session.connect("jwt").unwrap();

        assert_eq!(session.state(), ConnectionState::Connecting);
        assert_eq!(
            commands.drain(),
            vec![ConnectionCommand::Connect {
                bearer_token: "jwt".to_string()
            }]
        );
        session.on_connected();
        assert!(session.is_connected());
    }

    #[test]
    fn connect_without_token_is_rejected() {
        let (session, _commands) = session();
        assert!(matches!(session.connect(" ").unwrap_err(), Error::MissingCredential));
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn queued_subscriptions_flush_once_without_duplicates() {
        let (session, commands) = session();
        let counter = Arc::new(AtomicUsize::new(0));

        session.subscribe("/topic/chat/R1", counting_handler(&counter)).unwrap();
        session.subscribe("/topic/chat/R1", counting_handler(&counter)).unwrap();
        session.subscribe("/topic/presence", counting_handler(&counter)).unwrap();
        assert_eq!(session.pending_channels(), vec!["/topic/chat/R1", "/topic/presence"]);

        session.connect("jwt").unwrap();
        session.on_connected();
        session.on_connected();

        assert_eq!(
            subscribes(&commands.drain()),
            vec!["/topic/chat/R1", "/topic/presence"]
        );
        assert!(session.pending_channels().is_empty());
        assert!(session.is_subscribed("/topic/chat/R1"));
    }

    #[test]
    fn resubscribe_replaces_previous_handler() {
        let (session, commands) = session();
        session.connect("jwt").unwrap();
        session.on_connected();

        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        session.subscribe("/topic/chat/R1", counting_handler(&first)).unwrap();
        session.subscribe("/topic/chat/R1", counting_handler(&second)).unwrap();

        session.dispatch("/topic/chat/R1", "{}");
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);

        let unsubscribed = commands
            .drain()
            .into_iter()
            .filter(|c| matches!(c, ConnectionCommand::Unsubscribe(_)))
            .count();
        assert_eq!(unsubscribed, 1);
    }

    #[test]
    fn publish_while_disconnected_is_a_noop() {
        let (session, commands) = session();
        session.publish("/app/chat.send", &serde_json::json!({"x": 1})).unwrap();
        assert!(commands.drain().is_empty());

        session.connect("jwt").unwrap();
        session.on_connected();
        session.publish("/app/chat.send", &serde_json::json!({"x": 1})).unwrap();
        assert_eq!(commands.sent_to("/app/chat.send"), vec![r#"{"x":1}"#.to_string()]);
    }

    #[test]
    fn disconnect_releases_everything_from_any_state() {
        let (session, commands) = session();
        session.disconnect();
        assert_eq!(commands.drain(), vec![ConnectionCommand::Disconnect]);

        session.subscribe("/topic/presence", Arc::new(|_: &str| {})).unwrap();
        session.connect("jwt").unwrap();
        session.on_connected();
        session.subscribe("/topic/chat/R1", Arc::new(|_: &str| {})).unwrap();
        session.subscribe("/user/queue/call", Arc::new(|_: &str| {})).unwrap();
        commands.drain();

        session.disconnect();
        let released = commands.drain();
        assert_eq!(
            released
                .iter()
                .filter(|c| matches!(c, ConnectionCommand::Unsubscribe(_)))
                .count(),
            3
        );
        assert_eq!(released.last(), Some(&ConnectionCommand::Disconnect));
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(!session.is_subscribed("/topic/chat/R1"));
        assert!(session.pending_channels().is_empty());
    }

    #[test]
    fn disconnect_survives_a_vanished_driver() {
        let (session, commands) = session();
        session.connect("jwt").unwrap();
        session.on_connected();
        session.subscribe("/topic/chat/R1", Arc::new(|_: &str| {})).unwrap();
        drop(commands);

        session.disconnect();
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(!session.is_subscribed("/topic/chat/R1"));
    }

    #[test]
    fn connection_loss_requeues_active_subscriptions() {
        let (session, commands) = session();
        session.connect("jwt").unwrap();
        session.on_connected();
        session.subscribe("/topic/chat/R1", Arc::new(|_: &str| {})).unwrap();

        session.on_connection_lost();
        assert_eq!(session.pending_channels(), vec!["/topic/chat/R1"]);
        commands.drain();

        session.connect("jwt").unwrap();
        session.on_connected();
        assert_eq!(subscribes(&commands.drain()), vec!["/topic/chat/R1"]);
    }

    #[test]
    fn handshake_after_teardown_is_ignored() {
        let (session, _commands) = session();
        session.connect("jwt").unwrap();
        session.disconnect();
        session.on_connected();
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }
}
