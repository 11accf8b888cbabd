use std::sync::Arc;
use tokio::sync::mpsc;

use crate::api::ChatApi;

/// Fire-and-forget read receipts.
///
/// Receipts are queued on an unbounded channel and delivered by a background
/// task; failures are logged and never reach the message flow.
#[derive(Clone)]
pub struct ReadReceipts {
    tx: mpsc::UnboundedSender<String>,
}

impl ReadReceipts {
    /// Spawn the delivery task on the current tokio runtime.
    pub fn spawn(api: Arc<dyn ChatApi>) -> Self {
        let (receipts, mut rx) = Self::channel();
        tokio::spawn(async move {
            while let Some(message_id) = rx.recv().await {
                if let Err(e) = api.mark_read(&message_id).await {
                    tracing::debug!(message_id = %message_id, error = %e, "mark-read failed");
                }
            }
        });
        receipts
    }

    /// Sender plus the raw receiver, for callers that deliver receipts themselves.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn mark_read(&self, message_id: &str) {
        if self.tx.send(message_id.to_string()).is_err() {
            tracing::debug!(message_id = %message_id, "read receipt worker stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queued_in_order() {
        let (receipts, mut rx) = ReadReceipts::channel();
        receipts.mark_read("m1");
        receipts.mark_read("m2");
        assert_eq!(rx.try_recv().unwrap(), "m1");
        assert_eq!(rx.try_recv().unwrap(), "m2");
    }

    #[test]
    fn closed_worker_is_not_an_error() {
        let (receipts, rx) = ReadReceipts::channel();
        drop(rx);
        receipts.mark_read("m1");
    }
}
