use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::Aes256Gcm;
use base64::Engine;
use rsa::Oaep;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::key_vault::{UnwrappingKey, WrappingKey};
use crate::types::WrappedKey;
use crate::{Error, Result};

pub const SESSION_KEY_LEN: usize = 32;
pub const IV_LEN: usize = 12;

const B64: base64::engine::GeneralPurpose = base64::engine::general_purpose::STANDARD;

/// AES-256-GCM key. One per private message, or one shared per group.
///
/// Keys recovered by [`unwrap_key`] keep both directions so a sender can
/// re-read its own history through the sender-wrapped copy.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; SESSION_KEY_LEN]);

impl SessionKey {
    pub fn from_bytes(bytes: [u8; SESSION_KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SESSION_KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

/// Base64 ciphertext (with GCM tag) and the base64 iv it was sealed under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub cipher_text: String,
    pub iv: String,
}

pub fn generate_session_key() -> SessionKey {
    SessionKey(rand::random::<[u8; SESSION_KEY_LEN]>())
}

/// Seal `plaintext` under a fresh random 96-bit iv.
pub fn encrypt(key: &SessionKey, plaintext: &str) -> Result<Sealed> {
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| Error::Encryption(e.to_string()))?;
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext.as_bytes())
        .map_err(|_| Error::Encryption("AES-GCM seal failed".to_string()))?;

    Ok(Sealed {
        cipher_text: B64.encode(ciphertext),
        iv: B64.encode(nonce),
    })
}

pub fn decrypt(key: &SessionKey, cipher_text: &str, iv: &str) -> Result<String> {
    let iv_bytes = B64
        .decode(iv)
        .map_err(|e| Error::Decryption(format!("iv: {e}")))?;
    if iv_bytes.len() != IV_LEN {
        return Err(Error::Decryption(format!(
            "iv must be {IV_LEN} bytes, got {}",
            iv_bytes.len()
        )));
    }
    let ciphertext = B64
        .decode(cipher_text)
        .map_err(|e| Error::Decryption(format!("ciphertext: {e}")))?;

    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| Error::Decryption(e.to_string()))?;
    let nonce = aes_gcm::Nonce::from_slice(&iv_bytes);
    let plaintext = cipher
        .decrypt(nonce, ciphertext.as_ref())
        .map_err(|_| Error::Decryption("authentication tag mismatch".to_string()))?;

    String::from_utf8(plaintext).map_err(|e| Error::Decryption(e.to_string()))
}

/// Encrypt a session key for the holder of `public`'s private half.
pub fn wrap_key(public: &WrappingKey, key: &SessionKey) -> Result<WrappedKey> {
    let wrapped = public
        .rsa()
        .encrypt(&mut rand::rngs::OsRng, Oaep::new::<Sha256>(), key.as_bytes())?;
    Ok(WrappedKey(B64.encode(wrapped)))
}

pub fn unwrap_key(private: &UnwrappingKey, wrapped: &WrappedKey) -> Result<SessionKey> {
    let bytes = B64.decode(wrapped.as_str())?;
    let raw = Zeroizing::new(
        private
            .rsa()
            .decrypt(Oaep::new::<Sha256>(), &bytes)
            .map_err(|e| Error::Decryption(format!("unwrap: {e}")))?,
    );
    let array: [u8; SESSION_KEY_LEN] = raw
        .as_slice()
        .try_into()
        .map_err(|_| Error::InvalidKey(format!("unwrapped key is {} bytes", raw.len())))?;
    Ok(SessionKey(array))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key_vault::test_support::{alice, bob};
    use std::collections::HashSet;

    #[test]
    fn decrypt_inverts_encrypt() {
        let key = generate_session_key();
        for plaintext in ["hi", "", "how are you", "ünïcødé 🔐"] {
            let sealed = encrypt(&key, plaintext).unwrap();
            assert_eq!(decrypt(&key, &sealed.cipher_text, &sealed.iv).unwrap(), plaintext);
        }
    }

    #[test]
    fn ivs_never_repeat_under_one_key() {
        let key = generate_session_key();
        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            let sealed = encrypt(&key, "same plaintext").unwrap();
            assert!(seen.insert(sealed.iv), "iv repeated");
        }
    }

    #[test]
    fn wrong_key_fails_with_decryption_error() {
        let sealed = encrypt(&generate_session_key(), "secret").unwrap();
        let err = decrypt(&generate_session_key(), &sealed.cipher_text, &sealed.iv).unwrap_err();
        assert!(matches!(err, Error::Decryption(_)));
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let key = generate_session_key();
        let sealed = encrypt(&key, "secret").unwrap();
        let mut bytes = B64.decode(&sealed.cipher_text).unwrap();
        bytes[0] ^= 0x01;
        let tampered = B64.encode(bytes);
        assert!(decrypt(&key, &tampered, &sealed.iv).is_err());
    }

    #[test]
    fn short_iv_is_rejected_not_panicking() {
        let key = generate_session_key();
        let sealed = encrypt(&key, "secret").unwrap();
        let err = decrypt(&key, &sealed.cipher_text, &B64.encode([0u8; 8])).unwrap_err();
        assert!(matches!(err, Error::Decryption(_)));
    }

    #[test]
    fn unwrap_yields_identical_key_usable_both_ways() {
        let key = generate_session_key();
        let wrapped = wrap_key(&alice().wrapping_key(), &key).unwrap();
        let unwrapped = unwrap_key(&alice().unwrapping_key(), &wrapped).unwrap();
        assert_eq!(unwrapped.as_bytes(), key.as_bytes());

        let sealed = encrypt(&unwrapped, "re-encrypted by recipient").unwrap();
        assert_eq!(
            decrypt(&key, &sealed.cipher_text, &sealed.iv).unwrap(),
            "re-encrypted by recipient"
        );
    }

    #[test]
    fn unwrap_with_other_identity_fails() {
        let wrapped = wrap_key(&alice().wrapping_key(), &generate_session_key()).unwrap();
        assert!(unwrap_key(&bob().unwrapping_key(), &wrapped).is_err());
    }
}
