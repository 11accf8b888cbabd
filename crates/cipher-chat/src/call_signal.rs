//! Call signaling plumbing. The call flow itself (media, WebRTC) lives outside
//! this crate; only the frames travel through here.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::Destinations;
use crate::transport::TransportSession;
use crate::types::UserId;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallSignalType {
    CallRequest,
    CallAccepted,
    CallReject,
    CallEnd,
    Offer,
    Answer,
    IceCandidate,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSignal {
    #[serde(rename = "type")]
    pub signal_type: CallSignalType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_user_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_user_id: Option<UserId>,
    /// Opaque to this crate (SDP, ICE candidates).
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Deliver every frame on the call queue to `on_signal`.
pub fn subscribe_call_signals<F>(
    transport: &TransportSession,
    destinations: &Destinations,
    on_signal: F,
) -> Result<()>
where
    F: Fn(CallSignal) + Send + Sync + 'static,
{
    transport.subscribe(
        &destinations.call_signal_queue,
        Arc::new(move |body: &str| match serde_json::from_str::<CallSignal>(body) {
            Ok(signal) => on_signal(signal),
            Err(e) => tracing::warn!(error = %e, "malformed call signal"),
        }),
    )
}

pub fn send_call_signal(
    transport: &TransportSession,
    destinations: &Destinations,
    signal: &CallSignal,
) -> Result<()> {
    tracing::debug!(signal_type = ?signal.signal_type, "sending call signal");
    transport.publish(&destinations.send_call_signal, signal)
}
