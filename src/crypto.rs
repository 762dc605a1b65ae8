//! At-rest protection for provider secrets.
//!
//! One scheme only: AES-256-GCM with a random 96-bit nonce per encryption and a
//! 128-bit authentication tag. The key is derived once, at bootstrap, from the
//! configured secret with HKDF-SHA256.
//!
//! Stored layout is the `(iv, ciphertext, tag)` triple, one BYTEA column each.

use std::fmt;

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng},
};
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::config::{ConfigurationError, check_secret};

/// Minimum length, in characters, of the configured encryption secret.
pub const MIN_SECRET_LEN: usize = 32;

/// Scheme label persisted next to every ciphertext.
pub const SCHEME: &str = "aes-256-gcm/v1";

pub const IV_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

const HKDF_SALT: &[u8] = b"provider-credential-service/hkdf-salt/v1";
const HKDF_INFO: &[u8] = b"provider-credentials/aes-256-gcm/v1";

/// Placeholder shown in place of a secret everywhere outside the store.
pub const SECRET_PREVIEW: &str = "***";

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("encryption failed")]
    Encrypt,

    /// Tag verification failed: wrong key, tampered ciphertext, iv or tag.
    #[error("decryption failed: authentication tag did not verify")]
    Decrypt,

    #[error("malformed ciphertext: {0}")]
    Malformed(&'static str),
}

/// Output of [`CryptoEngine::encrypt`].
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptedSecret {
    pub iv: Vec<u8>,
    pub ciphertext: Vec<u8>,
    pub tag: Vec<u8>,
}

impl fmt::Debug for EncryptedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedSecret")
            .field("iv_len", &self.iv.len())
            .field("ciphertext_len", &self.ciphertext.len())
            .field("tag_len", &self.tag.len())
            .finish()
    }
}

/// Symmetric AEAD engine, shared by `Arc` across the process.
pub struct CryptoEngine {
    cipher: Aes256Gcm,
}

impl CryptoEngine {
    /// Derive the key from the configured secret.
    ///
    /// # Errors
    ///
    /// [`ConfigurationError`] if the secret is missing or shorter than
    /// [`MIN_SECRET_LEN`]. Callers treat this as fatal.
    pub fn from_secret(secret: Option<&str>) -> Result<Self, ConfigurationError> {
        let secret = check_secret(secret)?;

        let hk = Hkdf::<Sha256>::new(Some(HKDF_SALT), secret.as_bytes());
        let mut okm = Zeroizing::new([0u8; 32]);
        hk.expand(HKDF_INFO, &mut okm[..])
            .map_err(|e| ConfigurationError::Invalid {
                field: "CREDENTIAL_ENCRYPTION_SECRET",
                reason: e.to_string(),
            })?;

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&okm[..]));
        Ok(Self { cipher })
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<EncryptedSecret, CryptoError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let mut sealed = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| CryptoError::Encrypt)?;

        // aes-gcm appends the tag to the ciphertext
        let tag = sealed.split_off(sealed.len() - TAG_LEN);

        Ok(EncryptedSecret {
            iv: nonce.to_vec(),
            ciphertext: sealed,
            tag,
        })
    }

    pub fn decrypt(&self, secret: &EncryptedSecret) -> Result<Zeroizing<String>, CryptoError> {
        if secret.iv.len() != IV_LEN {
            return Err(CryptoError::Malformed("iv must be 12 bytes"));
        }
        if secret.tag.len() != TAG_LEN {
            return Err(CryptoError::Malformed("tag must be 16 bytes"));
        }

        let mut sealed = Vec::with_capacity(secret.ciphertext.len() + TAG_LEN);
        sealed.extend_from_slice(&secret.ciphertext);
        sealed.extend_from_slice(&secret.tag);

        let plaintext = Zeroizing::new(
            self.cipher
                .decrypt(Nonce::from_slice(&secret.iv), sealed.as_ref())
                .map_err(|_| CryptoError::Decrypt)?,
        );

        let text = std::str::from_utf8(&plaintext)
            .map_err(|_| CryptoError::Malformed("plaintext is not UTF-8"))?;
        Ok(Zeroizing::new(text.to_owned()))
    }
}

impl fmt::Debug for CryptoEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptoEngine")
            .field("scheme", &SCHEME)
            .finish_non_exhaustive()
    }
}

/// Fixed-width form of a key for log lines: the last four characters only.
pub fn redact_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("****{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-encryption-secret-0123456789abcdef";

    fn engine() -> CryptoEngine {
        CryptoEngine::from_secret(Some(SECRET)).unwrap()
    }

    #[test]
    fn round_trip() {
        let engine = engine();
        let long = "x".repeat(4096);
        for plaintext in ["sk-live-abc123", "", "ключ-🔑-with-unicode", long.as_str()] {
            let sealed = engine.encrypt(plaintext).unwrap();
            assert_eq!(sealed.iv.len(), IV_LEN);
            assert_eq!(sealed.tag.len(), TAG_LEN);
            assert_eq!(engine.decrypt(&sealed).unwrap().as_str(), plaintext);
        }
    }

    #[test]
    fn nonce_is_fresh_per_call() {
        let engine = engine();
        let a = engine.encrypt("same-secret").unwrap();
        let b = engine.encrypt("same-secret").unwrap();
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn flipping_any_bit_fails_verification() {
        let engine = engine();
        let sealed = engine.encrypt("sk-ant-secret-value").unwrap();

        for byte in 0..sealed.ciphertext.len() {
            for bit in 0..8 {
                let mut tampered = sealed.clone();
                tampered.ciphertext[byte] ^= 1 << bit;
                assert!(matches!(engine.decrypt(&tampered), Err(CryptoError::Decrypt)));
            }
        }
        for byte in 0..TAG_LEN {
            let mut tampered = sealed.clone();
            tampered.tag[byte] ^= 0x01;
            assert!(matches!(engine.decrypt(&tampered), Err(CryptoError::Decrypt)));
        }
        let mut tampered = sealed.clone();
        tampered.iv[0] ^= 0x80;
        assert!(matches!(engine.decrypt(&tampered), Err(CryptoError::Decrypt)));
    }

    #[test]
    fn wrong_key_fails() {
        let sealed = engine().encrypt("sk-secret").unwrap();
        let other = CryptoEngine::from_secret(Some("another-secret-of-sufficient-length!!")).unwrap();
        assert!(matches!(other.decrypt(&sealed), Err(CryptoError::Decrypt)));
    }

    #[test]
    fn wrong_sized_parts_are_malformed() {
        let engine = engine();
        let mut sealed = engine.encrypt("sk-secret").unwrap();
        sealed.tag.pop();
        assert!(matches!(engine.decrypt(&sealed), Err(CryptoError::Malformed(_))));
    }

    #[test]
    fn short_secret_is_a_configuration_error() {
        assert!(matches!(
            CryptoEngine::from_secret(Some("short")),
            Err(ConfigurationError::EncryptionSecretTooShort)
        ));
        assert!(matches!(
            CryptoEngine::from_secret(None),
            Err(ConfigurationError::MissingEncryptionSecret)
        ));
    }

    #[test]
    fn redact_key_keeps_only_tail() {
        assert_eq!(redact_key("sk-proj-abcdefgh1234"), "****1234");
        assert_eq!(redact_key("short"), "****");
    }
}
