//! AES-256-GCM sealing for secret values at rest.
//!
//! A sealed value is base64 of `nonce || ciphertext || tag`, with a fresh
//! random 96-bit nonce per value.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::{DbError, DbResult};

const NONCE_LEN: usize = 12;

/// Key length in bytes.
pub const KEY_LEN: usize = 32;

#[derive(Clone)]
pub struct SecretCipher {
    cipher: Aes256Gcm,
}

impl SecretCipher {
    pub fn new(key: &[u8]) -> DbResult<Self> {
        let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| {
            DbError::Crypto(format!(
                "encryption key must be {KEY_LEN} bytes, got {}",
                key.len()
            ))
        })?;
        Ok(Self { cipher })
    }

    pub fn encrypt(&self, plaintext: &str) -> DbResult<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| DbError::Crypto(format!("encryption failed: {e}")))?;

        let mut sealed = nonce.to_vec();
        sealed.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(sealed))
    }

    pub fn decrypt(&self, sealed: &str) -> DbResult<String> {
        let raw = STANDARD
            .decode(sealed)
            .map_err(|e| DbError::Crypto(format!("invalid base64: {e}")))?;
        if raw.len() < NONCE_LEN {
            return Err(DbError::Crypto("sealed value too short".to_string()));
        }

        let (nonce, ciphertext) = raw.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| DbError::Crypto(format!("decryption failed: {e}")))?;
        String::from_utf8(plaintext)
            .map_err(|e| DbError::Crypto(format!("decrypted value is not valid UTF-8: {e}")))
    }
}

impl std::fmt::Debug for SecretCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretCipher").finish_non_exhaustive()
    }
}
