use std::fmt;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::CryptoError;

/// PBKDF2 rounds never go below this.
pub const MIN_ITERATIONS: u32 = 100_000;

/// Rounds used when the caller does not configure any.
pub const DEFAULT_ITERATIONS: u32 = 210_000;

/// 256-bit AES-GCM key. Wiped from memory on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; 32]);

impl SessionKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub(crate) fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

/// Stretch `secret` with PBKDF2-HMAC-SHA256. Blocking; callers on an async
/// runtime should go through `CryptoSession::derive_key`.
pub fn derive_key(secret: &str, salt: &[u8], iterations: u32) -> Result<SessionKey, CryptoError> {
    if secret.is_empty() {
        return Err(CryptoError::EmptySecret);
    }
    if salt.is_empty() {
        return Err(CryptoError::EmptySalt);
    }

    let mut key = [0u8; 32];
    pbkdf2::pbkdf2_hmac::<Sha256>(
        secret.as_bytes(),
        salt,
        iterations.max(MIN_ITERATIONS),
        &mut key,
    );
    let session_key = SessionKey(key);
    key.zeroize();
    Ok(session_key)
}

/// Generate a random 128-bit salt, base64 encoded for storage on the profile.
pub fn generate_salt() -> String {
    let salt: [u8; 16] = rand::random();
    BASE64.encode(salt)
}

/// Decode a stored salt.
pub fn salt_from_base64(encoded: &str) -> Result<Vec<u8>, CryptoError> {
    let salt = BASE64
        .decode(encoded)
        .map_err(|e| CryptoError::Derivation(format!("invalid salt: {}", e)))?;
    if salt.is_empty() {
        return Err(CryptoError::EmptySalt);
    }
    Ok(salt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_inputs_same_key() {
        let a = derive_key("hunter22", b"salt-one", MIN_ITERATIONS).unwrap();
        let b = derive_key("hunter22", b"salt-one", MIN_ITERATIONS).unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn salt_changes_key() {
        let a = derive_key("hunter22", b"salt-one", MIN_ITERATIONS).unwrap();
        let b = derive_key("hunter22", b"salt-two", MIN_ITERATIONS).unwrap();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn low_iteration_counts_are_raised_to_floor() {
        let floor = derive_key("pw", b"salt", MIN_ITERATIONS).unwrap();
        let low = derive_key("pw", b"salt", 1).unwrap();
        assert_eq!(floor.as_bytes(), low.as_bytes());
    }

    #[test]
    fn empty_secret_rejected() {
        assert!(matches!(
            derive_key("", b"salt", MIN_ITERATIONS),
            Err(CryptoError::EmptySecret)
        ));
    }

    #[test]
    fn generated_salt_decodes() {
        let salt = generate_salt();
        assert_eq!(salt_from_base64(&salt).unwrap().len(), 16);
        assert_ne!(generate_salt(), salt);
    }
}
