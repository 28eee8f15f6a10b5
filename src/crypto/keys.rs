//! Key material resolution.
//!
//! A store key is 32 bytes, resolved from (in priority order): an explicit
//! raw hex key, a password with a persisted PBKDF2 salt, the `ENGRAM_KEY`
//! environment variable, or the per-store key file.

use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha512;
use std::fs;
use std::path::Path;

use crate::crypto::envelope::KEY_SIZE;
use crate::{Error, Result};

/// Environment variable holding a 64-hex key.
pub const ENV_KEY: &str = "ENGRAM_KEY";
/// Per-store key file name (64-hex, trailing newline tolerated).
pub const KEY_FILE: &str = "engram.key";
/// Per-store PBKDF2 salt file name (32-hex).
pub const SALT_FILE: &str = "engram.salt";
/// PBKDF2-HMAC-SHA512 iteration count.
pub const PBKDF2_ITERATIONS: u32 = 100_000;

const SALT_SIZE: usize = 16;

/// Where the store key comes from.
#[derive(Debug, Clone)]
pub enum KeyConfig {
    /// An explicit 64-hex raw key.
    RawHex(String),
    /// A password; the salt is persisted next to the store and created
    /// before any episode is ever sealed.
    Password(String),
    /// Resolve from the environment, then the per-store key file.
    Resolve,
}

impl KeyConfig {
    /// Resolves the 32-byte key, creating and persisting a salt when a
    /// password source is used for the first time.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Policy`] when no key is resolvable or material has
    /// the wrong length, [`Error::Transport`] on salt/key file I/O failures.
    pub fn resolve(&self, base_path: &Path) -> Result<[u8; KEY_SIZE]> {
        match self {
            Self::RawHex(hex_key) => parse_hex_key(hex_key, "explicit key"),
            Self::Password(password) => derive_from_password(password, base_path),
            Self::Resolve => {
                if let Ok(env_key) = std::env::var(ENV_KEY) {
                    if !env_key.trim().is_empty() {
                        return parse_hex_key(&env_key, ENV_KEY);
                    }
                }
                let key_path = base_path.join(KEY_FILE);
                if key_path.exists() {
                    let raw = fs::read_to_string(&key_path).map_err(|e| Error::Transport {
                        operation: "read_key_file".to_string(),
                        cause: e.to_string(),
                    })?;
                    return parse_hex_key(&raw, KEY_FILE);
                }
                Err(Error::Policy(format!(
                    "encryption enabled but no key found: set {ENV_KEY} or create {}",
                    key_path.display()
                )))
            },
        }
    }
}

fn parse_hex_key(raw: &str, source: &str) -> Result<[u8; KEY_SIZE]> {
    let bytes = hex::decode(raw.trim())
        .map_err(|e| Error::Policy(format!("{source} is not valid hex: {e}")))?;
    let len = bytes.len();
    bytes
        .try_into()
        .map_err(|_| Error::Policy(format!("{source} must be {KEY_SIZE} bytes, got {len}")))
}

/// PBKDF2-HMAC-SHA512, 100 000 iterations, 32-byte output. The salt is
/// written before the key is handed out so a crash cannot orphan ciphertext
/// behind an unpersisted salt.
fn derive_from_password(password: &str, base_path: &Path) -> Result<[u8; KEY_SIZE]> {
    if password.is_empty() {
        return Err(Error::Policy("encryption password is empty".to_string()));
    }

    let salt_path = base_path.join(SALT_FILE);
    let salt: [u8; SALT_SIZE] = if salt_path.exists() {
        let raw = fs::read_to_string(&salt_path).map_err(|e| Error::Transport {
            operation: "read_salt".to_string(),
            cause: e.to_string(),
        })?;
        let bytes = hex::decode(raw.trim())
            .map_err(|e| Error::Policy(format!("{SALT_FILE} is not valid hex: {e}")))?;
        let len = bytes.len();
        bytes.try_into().map_err(|_| {
            Error::Policy(format!("{SALT_FILE} must be {SALT_SIZE} bytes, got {len}"))
        })?
    } else {
        let mut salt = [0u8; SALT_SIZE];
        rand::thread_rng().fill_bytes(&mut salt);
        fs::create_dir_all(base_path).map_err(|e| Error::Transport {
            operation: "create_storage_dir".to_string(),
            cause: e.to_string(),
        })?;
        fs::write(&salt_path, hex::encode(salt)).map_err(|e| Error::Transport {
            operation: "write_salt".to_string(),
            cause: e.to_string(),
        })?;
        tracing::info!(path = %salt_path.display(), "Generated PBKDF2 salt");
        salt
    };

    let mut key = [0u8; KEY_SIZE];
    pbkdf2_hmac::<Sha512>(password.as_bytes(), &salt, PBKDF2_ITERATIONS, &mut key);
    Ok(key)
}
