//! Reversible cipher for secrets kept in auth config files
//!
//! Stored secrets are AES-256-GCM sealed under a key derived from an
//! optional master key. Without a master key the cipher is a pass-through:
//! values are treated as plaintext on both encode and decode. Decode
//! failures are reported to the caller, which keeps the stored value as-is
//! (the value may simply never have been encoded).

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

const NONCE_LEN: usize = 12;

/// Symmetric cipher keyed by an optional master key
pub struct Cpass {
    key: Option<[u8; 32]>,
}

impl Cpass {
    /// An empty master key yields a pass-through cipher
    pub fn new(master_key: &str) -> Self {
        let key = if master_key.is_empty() {
            None
        } else {
            let digest = Sha256::digest(master_key.as_bytes());
            let mut key = [0u8; 32];
            key.copy_from_slice(&digest);
            Some(key)
        };
        Self { key }
    }

    /// Seal a secret for storage, base64(nonce || ciphertext)
    pub fn encode(&self, plain: &str) -> Result<String> {
        let Some(key) = &self.key else {
            return Ok(plain.to_string());
        };
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| Error::config(format!("cipher init failed: {e}")))?;

        let mut nonce = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce);

        let sealed = cipher
            .encrypt(Nonce::from_slice(&nonce), plain.as_bytes())
            .map_err(|e| Error::config(format!("encryption failed: {e}")))?;

        let mut payload = Vec::with_capacity(NONCE_LEN + sealed.len());
        payload.extend_from_slice(&nonce);
        payload.extend_from_slice(&sealed);
        Ok(BASE64.encode(payload))
    }

    /// Open a stored secret; errors when the value is not a sealed payload
    pub fn decode(&self, stored: &str) -> Result<String> {
        let Some(key) = &self.key else {
            return Ok(stored.to_string());
        };
        let payload = BASE64
            .decode(stored)
            .map_err(|e| Error::config(format!("not a sealed secret: {e}")))?;
        if payload.len() <= NONCE_LEN {
            return Err(Error::config("sealed secret is too short"));
        }

        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| Error::config(format!("cipher init failed: {e}")))?;
        let (nonce, sealed) = payload.split_at(NONCE_LEN);
        let plain = cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|e| Error::config(format!("decryption failed: {e}")))?;

        String::from_utf8(plain).map_err(|e| Error::config(format!("sealed secret is not utf-8: {e}")))
    }
}
