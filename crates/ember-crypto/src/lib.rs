/// Ember Crypto Library
///
/// Message content at rest is sealed with AES-256-GCM under a key stretched
/// from the user's secret with PBKDF2-HMAC-SHA256. The key lives only in a
/// `CryptoSession` for the lifetime of a login and is zeroized when dropped.
///
/// Content that was written before a key existed stays readable: anything
/// without the envelope prefix is treated as plaintext. Plaintext that starts
/// with a tag is written behind the `v0:` escape.

pub mod encrypt;
pub mod envelope;
pub mod keys;
pub mod session;

pub use envelope::{Content, Envelope, ENVELOPE_PREFIX, PLAIN_PREFIX};
pub use keys::SessionKey;
pub use session::{CryptoSession, UNAVAILABLE};

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("secret must not be empty")]
    EmptySecret,

    #[error("salt must not be empty")]
    EmptySalt,

    #[error("key derivation failed: {0}")]
    Derivation(String),

    #[error("encryption failed: {0}")]
    Encrypt(String),

    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),
}
