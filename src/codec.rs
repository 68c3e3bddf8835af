//! Opaque download tokens.
//!
//! A token is `base64url(nonce || ChaCha20-Poly1305(payload))` where the
//! payload is `{"fileId": ...}`. The key is derived from a shared secret, so
//! any node holding the same secret can decode what another node encoded.
//! Nothing is stored server-side.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{DecodeError, EncodeError};

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const ASSOCIATED_DATA: &[u8] = b"download-uri:v1";

#[derive(Serialize, Deserialize)]
struct TokenPayload {
    #[serde(rename = "fileId")]
    file_id: String,
}

#[derive(Clone)]
pub struct SecureUriCodec {
    cipher: ChaCha20Poly1305,
}

impl SecureUriCodec {
    pub fn new(secret: &str) -> Self {
        let key = Sha256::digest(secret.as_bytes());
        Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(&key)),
        }
    }

    /// Encrypts `file_id` under a fresh random nonce. Empty ids are refused
    /// since they could never be decoded.
    pub fn encode(&self, file_id: &str) -> Result<String, EncodeError> {
        if file_id.is_empty() {
            return Err(EncodeError::EmptyId);
        }
        let payload = serde_json::to_vec(&TokenPayload {
            file_id: file_id.to_string(),
        })
        .map_err(|_| EncodeError::Payload)?;
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: &payload,
                    aad: ASSOCIATED_DATA,
                },
            )
            .map_err(|_| EncodeError::Cipher)?;

        let mut raw = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        raw.extend_from_slice(&nonce);
        raw.extend_from_slice(&ciphertext);
        Ok(URL_SAFE_NO_PAD.encode(raw))
    }

    pub fn decode(&self, token: &str) -> Result<String, DecodeError> {
        let raw = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|_| DecodeError::Encoding)?;
        if raw.len() < NONCE_LEN + TAG_LEN {
            return Err(DecodeError::Truncated);
        }

        let (nonce, ciphertext) = raw.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: ASSOCIATED_DATA,
                },
            )
            .map_err(|_| DecodeError::Tampered)?;

        let payload: TokenPayload =
            serde_json::from_slice(&plaintext).map_err(|_| DecodeError::Payload)?;
        if payload.file_id.is_empty() {
            return Err(DecodeError::Payload);
        }
        Ok(payload.file_id)
    }
}
