//! ChaCha20-Poly1305 envelope and episode sealing.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::analysis::tokenize;
use crate::models::Episode;
use crate::{Error, Result};

/// Nonce size (96 bits).
pub const NONCE_SIZE: usize = 12;
/// Poly1305 authentication tag size.
pub const TAG_SIZE: usize = 16;
/// Key size (256 bits).
pub const KEY_SIZE: usize = 32;

/// A serialized AEAD envelope: `{ nonce, ciphertext, tag }`, all hex.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// 12-byte nonce.
    pub nonce: String,
    /// Ciphertext without the tag.
    pub ciphertext: String,
    /// 16-byte Poly1305 tag.
    pub tag: String,
}

/// ChaCha20-Poly1305 encryptor holding the store key for the orchestrator's
/// lifetime. The key is never logged or returned.
pub struct Encryptor {
    cipher: ChaCha20Poly1305,
}

impl Encryptor {
    /// Creates an encryptor from a resolved 32-byte key.
    #[must_use]
    pub fn new(key: &[u8; KEY_SIZE]) -> Self {
        let key = Key::from_slice(key);
        Self {
            cipher: ChaCha20Poly1305::new(key),
        }
    }

    /// Encrypts a string into an envelope with a fresh random nonce.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Integrity`] if the cipher rejects the input.
    pub fn seal_str(&self, plaintext: &str) -> Result<Envelope> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let sealed = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| Error::Integrity {
                cause: format!("encryption failed: {e}"),
            })?;

        // The aead API appends the tag; the envelope keeps it separate
        let split = sealed.len() - TAG_SIZE;
        Ok(Envelope {
            nonce: hex::encode(nonce_bytes),
            ciphertext: hex::encode(&sealed[..split]),
            tag: hex::encode(&sealed[split..]),
        })
    }

    /// Decrypts an envelope back to its plaintext.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Integrity`] on tag mismatch (wrong key or tampered
    /// data) and [`Error::Malformed`] when the envelope fields are not valid
    /// hex.
    pub fn open(&self, envelope: &Envelope) -> Result<String> {
        let decode = |field: &str, value: &str| {
            hex::decode(value).map_err(|e| Error::Malformed {
                what: format!("envelope {field}"),
                cause: e.to_string(),
            })
        };
        let nonce_bytes = decode("nonce", &envelope.nonce)?;
        let mut sealed = decode("ciphertext", &envelope.ciphertext)?;
        sealed.extend(decode("tag", &envelope.tag)?);

        if nonce_bytes.len() != NONCE_SIZE {
            return Err(Error::Malformed {
                what: "envelope nonce".to_string(),
                cause: format!("expected {NONCE_SIZE} bytes, got {}", nonce_bytes.len()),
            });
        }

        let nonce = Nonce::from_slice(&nonce_bytes);
        let plain = self
            .cipher
            .decrypt(nonce, sealed.as_slice())
            .map_err(|_| Error::Integrity {
                cause: "AEAD tag mismatch (wrong key or tampered data)".to_string(),
            })?;

        String::from_utf8(plain).map_err(|e| Error::Malformed {
            what: "decrypted payload".to_string(),
            cause: e.to_string(),
        })
    }

    /// Produces the storable form of an episode: text wrapped in an
    /// envelope, tags (if any) wrapped once as a single serialized list, and
    /// the token list stripped so ciphertext stores leak no content through
    /// derived fields.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Integrity`] if encryption fails.
    pub fn seal_episode(&self, episode: &Episode) -> Result<Episode> {
        let mut sealed = episode.clone();

        let envelope = self.seal_str(&episode.text)?;
        sealed.text = serde_json::to_string(&envelope).map_err(|e| Error::Integrity {
            cause: format!("envelope serialization failed: {e}"),
        })?;
        sealed.encrypted = true;

        if !episode.tags.is_empty() {
            let tag_list = serde_json::to_string(&episode.tags).map_err(|e| Error::Integrity {
                cause: format!("tag serialization failed: {e}"),
            })?;
            let envelope = self.seal_str(&tag_list)?;
            sealed.tags = vec![serde_json::to_string(&envelope).map_err(|e| {
                Error::Integrity {
                    cause: format!("envelope serialization failed: {e}"),
                }
            })?];
            sealed.tags_encrypted = true;
        }

        sealed.tokens = Vec::new();
        Ok(sealed)
    }

    /// Reverses [`seal_episode`](Self::seal_episode), recomputing the token
    /// list from the decrypted text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Integrity`] on tag mismatch; a decryption failure is
    /// never silently coerced into returning ciphertext.
    pub fn open_episode(&self, mut episode: Episode) -> Result<Episode> {
        if episode.encrypted {
            let envelope: Envelope =
                serde_json::from_str(&episode.text).map_err(|e| Error::Malformed {
                    what: format!("text envelope of {}", episode.id),
                    cause: e.to_string(),
                })?;
            episode.text = self.open(&envelope)?;
            episode.encrypted = false;
            episode.tokens = tokenize(&episode.text);
        }

        if episode.tags_encrypted {
            let raw = episode.tags.first().ok_or_else(|| Error::Malformed {
                what: format!("tag envelope of {}", episode.id),
                cause: "empty tag list marked encrypted".to_string(),
            })?;
            let envelope: Envelope = serde_json::from_str(raw).map_err(|e| Error::Malformed {
                what: format!("tag envelope of {}", episode.id),
                cause: e.to_string(),
            })?;
            let tag_list = self.open(&envelope)?;
            episode.tags = serde_json::from_str(&tag_list).map_err(|e| Error::Malformed {
                what: format!("decrypted tag list of {}", episode.id),
                cause: e.to_string(),
            })?;
            episode.tags_encrypted = false;
        }

        Ok(episode)
    }
}
