//! Encryption at rest for episode payloads.
//!
//! Episode text (and the tag list) can be wrapped in a ChaCha20-Poly1305
//! envelope before hitting storage. Identifiers, timestamps, importance,
//! supersession edges, and metadata deliberately stay cleartext so the index
//! remains usable and graph traversal stays cheap — the tag *index* also
//! keeps cleartext tag names. Deployments must account for both leaks in
//! their threat model.

mod envelope;
mod keys;

pub use envelope::{Encryptor, Envelope, KEY_SIZE, NONCE_SIZE, TAG_SIZE};
pub use keys::{KeyConfig, ENV_KEY, KEY_FILE, PBKDF2_ITERATIONS, SALT_FILE};
