//! Device identity keys.
//!
//! Each device holds one RSA-OAEP (2048-bit, SHA-256) identity key pair. The
//! public half is registered with the server and used by other clients to wrap
//! message keys; the private half is persisted locally and never leaves the
//! device. Losing it is terminal: anything wrapped only for the matching
//! public key is unreadable from then on.

use base64::Engine;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use std::sync::{Arc, Mutex};
use zeroize::Zeroizing;

use crate::storage::lock;
use crate::{Error, MissingKey, Result, StorageAdapter};

pub const IDENTITY_KEY_BITS: usize = 2048;
pub const PRIVATE_KEY_STORAGE_KEY: &str = "v1/identity/private-key";

const B64: base64::engine::GeneralPurpose = base64::engine::general_purpose::STANDARD;

/// Public half, restricted to wrapping session keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrappingKey(RsaPublicKey);

impl WrappingKey {
    pub(crate) fn rsa(&self) -> &RsaPublicKey {
        &self.0
    }

    /// Hex SHA-256 of the SPKI encoding. Safe to log.
    pub fn fingerprint(&self) -> Result<String> {
        let der = self
            .0
            .to_public_key_der()
            .map_err(|e| Error::InvalidKey(e.to_string()))?;
        Ok(hex::encode(Sha256::digest(der.as_bytes())))
    }
}

/// Private half, restricted to unwrapping session keys.
#[derive(Clone)]
pub struct UnwrappingKey(RsaPrivateKey);

impl UnwrappingKey {
    pub(crate) fn rsa(&self) -> &RsaPrivateKey {
        &self.0
    }

    pub fn public(&self) -> WrappingKey {
        WrappingKey(self.0.to_public_key())
    }
}

impl std::fmt::Debug for UnwrappingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("UnwrappingKey(..)")
    }
}

#[derive(Clone)]
pub struct IdentityKeyPair {
    private: RsaPrivateKey,
    public: RsaPublicKey,
}

impl IdentityKeyPair {
    pub fn wrapping_key(&self) -> WrappingKey {
        WrappingKey(self.public.clone())
    }

    pub fn unwrapping_key(&self) -> UnwrappingKey {
        UnwrappingKey(self.private.clone())
    }
}

impl std::fmt::Debug for IdentityKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityKeyPair").finish_non_exhaustive()
    }
}

/// Outcome of checking the device identity against the account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provisioning {
    /// A fresh pair was generated and stored; upload this public key.
    Generated { public_key: String },
    /// The registered public key and a local private key are both present.
    Ready,
}

pub fn generate_identity_key_pair() -> Result<IdentityKeyPair> {
    let private = RsaPrivateKey::new(&mut rand::rngs::OsRng, IDENTITY_KEY_BITS)?;
    let public = private.to_public_key();
    Ok(IdentityKeyPair { private, public })
}

/// Base64 of the SPKI DER encoding.
pub fn export_public(key: &WrappingKey) -> Result<String> {
    let der = key
        .0
        .to_public_key_der()
        .map_err(|e| Error::InvalidKey(e.to_string()))?;
    Ok(B64.encode(der.as_bytes()))
}

/// Base64 of the PKCS#8 DER encoding.
pub fn export_private(key: &UnwrappingKey) -> Result<Zeroizing<String>> {
    let der = key
        .0
        .to_pkcs8_der()
        .map_err(|e| Error::InvalidKey(e.to_string()))?;
    Ok(Zeroizing::new(B64.encode(der.as_bytes())))
}

pub fn import_public(encoded: &str) -> Result<WrappingKey> {
    let der = B64.decode(encoded.trim())?;
    RsaPublicKey::from_public_key_der(&der)
        .map(WrappingKey)
        .map_err(|e| Error::InvalidKey(e.to_string()))
}

pub fn import_private(encoded: &str) -> Result<UnwrappingKey> {
    let der = Zeroizing::new(B64.decode(encoded.trim())?);
    RsaPrivateKey::from_pkcs8_der(&der)
        .map(UnwrappingKey)
        .map_err(|e| Error::InvalidKey(e.to_string()))
}

/// Owns the device's private key and its local persistence.
pub struct KeyVault {
    storage: Arc<dyn StorageAdapter>,
    cached: Mutex<Option<UnwrappingKey>>,
}

impl KeyVault {
    pub fn new(storage: Arc<dyn StorageAdapter>) -> Self {
        Self {
            storage,
            cached: Mutex::new(None),
        }
    }

    pub fn has_private_key(&self) -> Result<bool> {
        if lock(&self.cached).is_some() {
            return Ok(true);
        }
        Ok(self.storage.get(PRIVATE_KEY_STORAGE_KEY)?.is_some())
    }

    /// The device private key, or [`MissingKey::DeviceKeyAbsent`].
    pub fn private_key(&self) -> Result<UnwrappingKey> {
        if let Some(key) = lock(&self.cached).as_ref() {
            return Ok(key.clone());
        }

        let Some(encoded) = self.storage.get(PRIVATE_KEY_STORAGE_KEY)?.map(Zeroizing::new) else {
            return Err(MissingKey::DeviceKeyAbsent.into());
        };
        let key = import_private(&encoded)?;
        *lock(&self.cached) = Some(key.clone());
        Ok(key)
    }

    pub fn public_key(&self) -> Result<WrappingKey> {
        self.private_key().map(|key| key.public())
    }

    pub fn store_identity(&self, pair: &IdentityKeyPair) -> Result<()> {
        let unwrapping = pair.unwrapping_key();
        let encoded = export_private(&unwrapping)?;
        self.storage
            .put(PRIVATE_KEY_STORAGE_KEY, encoded.as_str().to_string())?;
        *lock(&self.cached) = Some(unwrapping);
        Ok(())
    }

    /// Delete the local private key. Everything wrapped for it becomes unreadable.
    pub fn forget(&self) -> Result<()> {
        self.storage.del(PRIVATE_KEY_STORAGE_KEY)?;
        *lock(&self.cached) = None;
        tracing::warn!("device private key deleted");
        Ok(())
    }

    /// Reconcile the local key with the public key registered for the account.
    ///
    /// A registered public key without a local private key cannot be repaired
    /// here and yields [`Error::PrivateKeyLost`]; callers log the user out.
    pub fn provision(&self, registered_public_key: Option<&str>) -> Result<Provisioning> {
        match (registered_public_key, self.has_private_key()?) {
            (Some(_), true) => Ok(Provisioning::Ready),
            (Some(_), false) => {
                tracing::warn!("registered public key has no local private key");
                Err(Error::PrivateKeyLost)
            }
            (None, _) => {
                let pair = generate_identity_key_pair()?;
                self.store_identity(&pair)?;
                let public_key = export_public(&pair.wrapping_key())?;
                tracing::info!(
                    fingerprint = %pair.wrapping_key().fingerprint()?,
                    "generated device identity"
                );
                Ok(Provisioning::Generated { public_key })
            }
        }
    }
}
