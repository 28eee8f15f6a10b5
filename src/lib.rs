//! # Engram
//!
//! A persistent, searchable episodic memory store for autonomous agents.
//!
//! Agents call [`AgentMemory::remember`] to persist an **episode** (a typed,
//! tagged, timestamped textual record) and [`AgentMemory::recall`] to retrieve
//! the most relevant episodes via BM25 full-text search blended with recency
//! and importance.
//!
//! ## Features
//!
//! - Incremental on-disk BM25 index, restored on startup and kept in sync
//!   with a content-addressed episode store
//! - Supersession graph (newer facts override older ones) with chain traversal
//! - Synonym expansion with layered vocabulary loading
//! - Order-independent Merkle snapshots with per-episode proofs
//! - Optional ChaCha20-Poly1305 encryption of episode content at rest
//! - Pluggable storage: local file tree or a remote key-value transport
//!
//! ## Example
//!
//! ```rust,ignore
//! use engram::{AgentMemory, MemoryConfig, RememberOptions, RecallOptions};
//!
//! let mut memory = AgentMemory::open(MemoryConfig::new("./memory", "agent-1"))?;
//! memory.remember(
//!     "User prefers dark mode for the interface",
//!     RememberOptions::new().with_type("fact").with_tags(["preferences", "ui"]),
//! )?;
//! let hits = memory.recall("dark mode", &RecallOptions::default())?;
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]
// Scoring math mixes counts and floats throughout
#![allow(clippy::cast_precision_loss)]

use std::error::Error as StdError;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

pub mod analysis;
pub mod cli;
pub mod crypto;
pub mod integrity;
pub mod memory;
pub mod models;
pub mod observability;
pub mod search;
pub mod storage;

pub use crypto::{Encryptor, KeyConfig};
pub use memory::{
    AgentMemory, CompactionOptions, InjectOptions, MemoryConfig, MemoryStats, PruneOptions,
    PruneReport, RememberOptions,
};
pub use models::{Episode, EpisodeType, RecalledEpisode, TemporalQuery};
pub use search::{MemoryIndex, PersistedIndex, RecallOptions, SynonymTable};
pub use storage::{EpisodeStore, FilesystemStore, StorageStats};

/// Error type for engram operations.
///
/// Variants map onto the failure kinds the engine distinguishes: lookups that
/// miss, unreadable artifacts, cryptographic/integrity violations, policy
/// problems at configuration time, storage transport failures, and bad input.
#[derive(Debug)]
pub enum Error {
    /// A lookup by id found nothing.
    NotFound {
        /// What was looked up (id, tag, path).
        what: String,
    },
    /// An on-disk artifact could not be parsed.
    Malformed {
        /// The artifact that failed to parse.
        what: String,
        /// The underlying parse error.
        cause: String,
    },
    /// An AEAD tag mismatch, failed proof, or snapshot root mismatch.
    Integrity {
        /// What failed verification.
        cause: String,
    },
    /// Encryption demanded but no key resolvable, wrong key length, etc.
    Policy(String),
    /// A storage I/O failure.
    Transport {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },
    /// Invalid caller-supplied input.
    InvalidInput(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { what } => write!(f, "not found: {what}"),
            Self::Malformed { what, cause } => write!(f, "malformed {what}: {cause}"),
            Self::Integrity { cause } => write!(f, "integrity failure: {cause}"),
            Self::Policy(msg) => write!(f, "policy error: {msg}"),
            Self::Transport { operation, cause } => {
                write!(f, "storage operation '{operation}' failed: {cause}")
            },
            Self::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
        }
    }
}

impl StdError for Error {}

/// Result type alias for engram operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Milliseconds in one day.
pub const DAY_MS: i64 = 86_400_000;

/// Returns the current Unix timestamp in milliseconds.
#[must_use]
#[allow(clippy::cast_possible_wrap, clippy::cast_possible_truncation)]
pub fn current_timestamp_ms() -> i64 {
    // Cast is safe for any realistic wall clock
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Fractional days elapsed between `then` and `now`, clamped at zero.
#[must_use]
pub fn days_since(then: i64, now: i64) -> f64 {
    if now <= then {
        return 0.0;
    }
    (now - then) as f64 / DAY_MS as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::NotFound {
            what: "ep_test_1".to_string(),
        };
        assert_eq!(err.to_string(), "not found: ep_test_1");

        let err = Error::Transport {
            operation: "save_episode".to_string(),
            cause: "disk full".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "storage operation 'save_episode' failed: disk full"
        );

        let err = Error::Integrity {
            cause: "AEAD tag mismatch".to_string(),
        };
        assert_eq!(err.to_string(), "integrity failure: AEAD tag mismatch");
    }

    #[test]
    fn test_days_since() {
        let now = 10 * DAY_MS;
        assert!((days_since(0, now) - 10.0).abs() < f64::EPSILON);
        assert!(days_since(now, now).abs() < f64::EPSILON);
        // Future timestamps clamp to zero rather than going negative
        assert!(days_since(now + DAY_MS, now).abs() < f64::EPSILON);
    }

    #[test]
    fn test_current_timestamp_is_millis() {
        let ts = current_timestamp_ms();
        // After 2020-01-01 and before 2100-01-01, in milliseconds
        assert!(ts > 1_577_836_800_000);
        assert!(ts < 4_102_444_800_000);
    }
}
