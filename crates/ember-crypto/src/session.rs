use std::sync::{RwLock, RwLockReadGuard};

use tracing::{debug, info, warn};

use crate::CryptoError;
use crate::encrypt::{decrypt_payload, encrypt_payload};
use crate::envelope::{Content, Envelope};
use crate::keys::{self, DEFAULT_ITERATIONS, MIN_ITERATIONS, SessionKey};

/// Shown in place of content that cannot be decrypted.
pub const UNAVAILABLE: &str = "message unavailable";

/// Holds the derived key for one login session.
///
/// The key is written at login (`derive_key`/`install`) and at logout
/// (`clear`). Every encrypt/decrypt call reads it.
pub struct CryptoSession {
    key: RwLock<Option<SessionKey>>,
    iterations: u32,
}

impl Default for CryptoSession {
    fn default() -> Self {
        Self::new(DEFAULT_ITERATIONS)
    }
}

impl CryptoSession {
    pub fn new(iterations: u32) -> Self {
        Self {
            key: RwLock::new(None),
            iterations: iterations.max(MIN_ITERATIONS),
        }
    }

    /// Stretch the secret on the blocking pool and make the result the session key.
    pub async fn derive_key(&self, secret: &str, salt: &[u8]) -> Result<(), CryptoError> {
        let secret = secret.to_string();
        let salt = salt.to_vec();
        let iterations = self.iterations;

        let key = tokio::task::spawn_blocking(move || keys::derive_key(&secret, &salt, iterations))
            .await
            .map_err(|e| CryptoError::Derivation(format!("spawn_blocking join error: {}", e)))??;

        self.install(key);
        info!("Session key derived ({} iterations)", iterations);
        Ok(())
    }

    /// Replace the session key. Only expected around login.
    pub fn install(&self, key: SessionKey) {
        let mut guard = self.key.write().unwrap_or_else(|e| e.into_inner());
        *guard = Some(key);
    }

    /// Drop the key at logout. Subsequent encrypts run in degraded mode.
    pub fn clear(&self) {
        let mut guard = self.key.write().unwrap_or_else(|e| e.into_inner());
        if guard.take().is_some() {
            debug!("Session key cleared");
        }
    }

    pub fn has_key(&self) -> bool {
        self.read_key().is_some()
    }

    /// Seal `plaintext`. With no key loaded the text passes through as `Content::Plain`.
    pub fn encrypt(&self, plaintext: &str) -> Result<Content, CryptoError> {
        let guard = self.read_key();
        let Some(key) = guard.as_ref() else {
            return Ok(Content::Plain(plaintext.to_string()));
        };

        let (ciphertext, nonce) = encrypt_payload(key, plaintext.as_bytes())
            .map_err(|e| CryptoError::Encrypt(e.to_string()))?;
        Ok(Content::Encrypted(Envelope { nonce, ciphertext }))
    }

    /// Shorthand for `encrypt(..).to_wire()`.
    pub fn seal(&self, plaintext: &str) -> Result<String, CryptoError> {
        Ok(self.encrypt(plaintext)?.to_wire())
    }

    /// Open stored content. Never fails: plaintext passes through, anything
    /// that cannot be opened becomes `UNAVAILABLE`.
    pub fn decrypt(&self, wire: &str) -> String {
        match Content::parse(wire) {
            Ok(content) => self.open(&content),
            Err(e) => {
                warn!("Unreadable envelope: {}", e);
                UNAVAILABLE.to_string()
            }
        }
    }

    pub fn open(&self, content: &Content) -> String {
        let envelope = match content {
            Content::Plain(text) => return text.clone(),
            Content::Encrypted(envelope) => envelope,
        };

        let guard = self.read_key();
        let Some(key) = guard.as_ref() else {
            return UNAVAILABLE.to_string();
        };

        match decrypt_payload(key, &envelope.ciphertext, &envelope.nonce) {
            Ok(bytes) => String::from_utf8(bytes).unwrap_or_else(|_| UNAVAILABLE.to_string()),
            Err(e) => {
                debug!("{}", e);
                UNAVAILABLE.to_string()
            }
        }
    }

    fn read_key(&self) -> RwLockReadGuard<'_, Option<SessionKey>> {
        self.key.read().unwrap_or_else(|e| e.into_inner())
    }
}
