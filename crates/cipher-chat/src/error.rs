use thiserror::Error;

/// Why a key needed for decryption or encryption is unavailable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MissingKey {
    /// This device never held (or lost) the private key for the identity.
    /// Requires re-provisioning the device.
    DeviceKeyAbsent,
    /// The group's member-key table has no entry for the caller.
    /// Requires rejoining the group.
    MembershipKeyMissing { group_id: String, user_id: String },
    /// None of the wrapped keys on the message could be unwrapped by this device.
    NotARecipient,
}

impl std::fmt::Display for MissingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MissingKey::DeviceKeyAbsent => write!(f, "private key absent on this device"),
            MissingKey::MembershipKeyMissing { group_id, user_id } => {
                write!(f, "no group key for user {user_id} in group {group_id}")
            }
            MissingKey::NotARecipient => write!(f, "message key was wrapped for someone else"),
        }
    }
}

/// Coarse classification used by callers to pick a user-facing status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    TransientNetwork,
    Decryption,
    MissingKey,
    ProtocolViolation,
    Local,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Realtime connection is not connected")]
    NotConnected,

    #[error("Bearer token missing")]
    MissingCredential,

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Decryption error: {0}")]
    Decryption(String),

    #[error("Missing key: {0}")]
    MissingKey(MissingKey),

    #[error("Private key lost: a public key is registered for this account but this device has no private key")]
    PrivateKeyLost,

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Base64(#[from] base64::DecodeError),

    #[error(transparent)]
    Rsa(#[from] rsa::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Network(_) | Error::NotConnected | Error::MissingCredential => {
                ErrorKind::TransientNetwork
            }
            Error::Decryption(_) | Error::Base64(_) => ErrorKind::Decryption,
            Error::MissingKey(_) | Error::PrivateKeyLost => ErrorKind::MissingKey,
            Error::ProtocolViolation(_) => ErrorKind::ProtocolViolation,
            Error::Encryption(_)
            | Error::InvalidKey(_)
            | Error::Storage(_)
            | Error::Serialization(_)
            | Error::Json(_)
            | Error::Rsa(_) => ErrorKind::Local,
        }
    }

    /// Only transient network failures may succeed if the user tries again.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::TransientNetwork
    }

    /// The device can no longer read anything wrapped for its identity.
    pub fn requires_reprovisioning(&self) -> bool {
        matches!(
            self,
            Error::PrivateKeyLost | Error::MissingKey(MissingKey::DeviceKeyAbsent)
        )
    }
}

impl From<MissingKey> for Error {
    fn from(missing: MissingKey) -> Self {
        Error::MissingKey(missing)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_device_key_is_terminal_and_distinct_from_membership() {
        let device = Error::from(MissingKey::DeviceKeyAbsent);
        let membership = Error::from(MissingKey::MembershipKeyMissing {
            group_id: "G1".to_string(),
            user_id: "42".to_string(),
        });

        assert_eq!(device.kind(), ErrorKind::MissingKey);
        assert!(device.requires_reprovisioning());
        assert!(!membership.requires_reprovisioning());
        assert!(!device.is_retryable());
        assert!(!membership.is_retryable());
    }

    #[test]
    fn network_errors_are_retryable() {
        assert!(Error::Network("timeout".to_string()).is_retryable());
        assert!(Error::NotConnected.is_retryable());
        assert!(!Error::ProtocolViolation("no room".to_string()).is_retryable());
        assert!(!Error::Decryption("tag".to_string()).is_retryable());
    }
}
