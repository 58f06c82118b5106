use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize};

use crate::CryptoError;
use crate::encrypt::NONCE_LEN;

/// Marks stored content as a version 1 envelope.
pub const ENVELOPE_PREFIX: &str = "v1:";

/// Escapes plaintext that would otherwise read as a tagged string.
pub const PLAIN_PREFIX: &str = "v0:";

/// Sealed payload: nonce plus AES-GCM ciphertext (tag included).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub nonce: [u8; NONCE_LEN],
    pub ciphertext: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct EnvelopeBody {
    nonce: String,
    ciphertext: String,
}

/// Stored message content, tagged instead of sniffed at every call site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    /// Written before a key existed, or by a peer without encryption.
    Plain(String),
    Encrypted(Envelope),
}

impl Content {
    /// Classify a stored string. `v0:` strips to plaintext, untagged text is
    /// plaintext as-is. A `v1:` body that does not decode is an error, never plaintext.
    pub fn parse(raw: &str) -> Result<Self, CryptoError> {
        if let Some(text) = raw.strip_prefix(PLAIN_PREFIX) {
            return Ok(Self::Plain(text.to_string()));
        }
        let Some(body) = raw.strip_prefix(ENVELOPE_PREFIX) else {
            return Ok(Self::Plain(raw.to_string()));
        };

        let body: EnvelopeBody = serde_json::from_str(body)
            .map_err(|e| CryptoError::MalformedEnvelope(e.to_string()))?;

        let nonce = BASE64
            .decode(&body.nonce)
            .map_err(|e| CryptoError::MalformedEnvelope(format!("nonce: {}", e)))?;
        let nonce: [u8; NONCE_LEN] = nonce
            .try_into()
            .map_err(|_| CryptoError::MalformedEnvelope("nonce length".into()))?;
        let ciphertext = BASE64
            .decode(&body.ciphertext)
            .map_err(|e| CryptoError::MalformedEnvelope(format!("ciphertext: {}", e)))?;

        Ok(Self::Encrypted(Envelope { nonce, ciphertext }))
    }

    /// Content received from a peer. Malformed envelopes are kept as the
    /// plaintext they arrived as.
    pub fn from_peer(raw: &str) -> Self {
        Self::parse(raw).unwrap_or_else(|_| Self::Plain(raw.to_string()))
    }

    /// The string form written to the store and the transport.
    pub fn to_wire(&self) -> String {
        match self {
            Self::Plain(text) if is_tagged(text) => format!("{}{}", PLAIN_PREFIX, text),
            Self::Plain(text) => text.clone(),
            Self::Encrypted(envelope) => {
                let body = EnvelopeBody {
                    nonce: BASE64.encode(envelope.nonce),
                    ciphertext: BASE64.encode(&envelope.ciphertext),
                };
                // Two string fields cannot fail to serialize.
                let json = serde_json::to_string(&body).unwrap_or_default();
                format!("{}{}", ENVELOPE_PREFIX, json)
            }
        }
    }
}

fn is_tagged(text: &str) -> bool {
    text.starts_with(ENVELOPE_PREFIX) || text.starts_with(PLAIN_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unprefixed_text_is_plain() {
        for raw in ["hello", "", "v2:{}", "V1:nope", " v1:leading space"] {
            assert_eq!(Content::parse(raw).unwrap(), Content::Plain(raw.to_string()));
            assert_eq!(Content::Plain(raw.to_string()).to_wire(), raw);
        }
    }

    #[test]
    fn tagged_looking_plaintext_is_escaped() {
        for text in ["v1: release notes", r#"v1:{"nonce":1}"#, "v0:already", "v1:"] {
            let wire = Content::Plain(text.to_string()).to_wire();
            assert!(wire.starts_with(PLAIN_PREFIX));
            assert_eq!(Content::parse(&wire).unwrap(), Content::Plain(text.to_string()));
        }
    }

    #[test]
    fn peer_garbage_stays_plaintext() {
        let raw = r#"v1:{"nonce":1}"#;
        assert_eq!(Content::from_peer(raw), Content::Plain(raw.to_string()));
        assert_eq!(Content::from_peer(raw).to_wire(), format!("v0:{}", raw));
    }

    #[test]
    fn wire_form_parses_back() {
        let content = Content::Encrypted(Envelope {
            nonce: [7u8; NONCE_LEN],
            ciphertext: vec![1, 2, 3, 4],
        });
        let wire = content.to_wire();
        assert!(wire.starts_with(ENVELOPE_PREFIX));
        assert_eq!(Content::parse(&wire).unwrap(), content);
    }

    #[test]
    fn prefixed_garbage_is_malformed() {
        assert!(matches!(
            Content::parse("v1:not json"),
            Err(CryptoError::MalformedEnvelope(_))
        ));
        assert!(matches!(
            Content::parse(r#"v1:{"nonce":"AAAA","ciphertext":"AAAA"}"#),
            Err(CryptoError::MalformedEnvelope(_))
        ));
    }
}
