//! Episode record and its open type enumeration.

use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

use crate::{current_timestamp_ms, days_since};

/// Per-day multiplicative importance decay applied since last access.
pub const IMPORTANCE_DECAY_PER_DAY: f64 = 0.95;

/// The category of an episode.
///
/// This is an open enumeration: the named variants carry ranking semantics
/// (see [`EpisodeType::compaction_priority`]), and any other string is
/// accepted and round-tripped unchanged through storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EpisodeType {
    /// A standing fact about the world or the user.
    Fact,
    /// A conversational exchange.
    Conversation,
    /// An ingested document chunk.
    Document,
    /// Something that happened.
    Event,
    /// A generated summary of other episodes.
    Summary,
    /// An executed trade.
    Trade,
    /// An open position.
    Position,
    /// A triggered alert.
    Alert,
    /// A decision that was made.
    Decision,
    /// A lesson learned.
    Lesson,
    /// A compaction checkpoint.
    Checkpoint,
    /// Caller-defined, uncategorized.
    Custom,
    /// Any unknown type string, preserved verbatim.
    Other(String),
}

impl EpisodeType {
    /// Returns the type as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Fact => "fact",
            Self::Conversation => "conversation",
            Self::Document => "document",
            Self::Event => "event",
            Self::Summary => "summary",
            Self::Trade => "trade",
            Self::Position => "position",
            Self::Alert => "alert",
            Self::Decision => "decision",
            Self::Lesson => "lesson",
            Self::Checkpoint => "checkpoint",
            Self::Custom => "custom",
            Self::Other(s) => s,
        }
    }

    /// Ordering rank used when rebuilding context after a compaction:
    /// lower ranks surface first.
    #[must_use]
    pub const fn compaction_priority(&self) -> u8 {
        match self {
            Self::Checkpoint => 0,
            Self::Decision => 1,
            Self::Lesson => 2,
            Self::Event | Self::Alert => 3,
            Self::Fact => 4,
            Self::Trade => 5,
            Self::Position => 6,
            Self::Document => 7,
            Self::Summary => 8,
            Self::Conversation => 9,
            Self::Custom | Self::Other(_) => 10,
        }
    }
}

impl Default for EpisodeType {
    fn default() -> Self {
        Self::Fact
    }
}

impl From<String> for EpisodeType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "fact" => Self::Fact,
            "conversation" => Self::Conversation,
            "document" => Self::Document,
            "event" => Self::Event,
            "summary" => Self::Summary,
            "trade" => Self::Trade,
            "position" => Self::Position,
            "alert" => Self::Alert,
            "decision" => Self::Decision,
            "lesson" => Self::Lesson,
            "checkpoint" => Self::Checkpoint,
            "custom" => Self::Custom,
            _ => Self::Other(s),
        }
    }
}

impl From<&str> for EpisodeType {
    fn from(s: &str) -> Self {
        Self::from(s.to_string())
    }
}

impl From<EpisodeType> for String {
    fn from(t: EpisodeType) -> Self {
        t.as_str().to_string()
    }
}

impl fmt::Display for EpisodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// The atomic stored unit: a text chunk with metadata, tags, timestamps,
/// importance, and supersession edges.
///
/// The serialized form is the on-disk schema: camelCase keys, `type` for the
/// episode type, and the `_encrypted` / `_tagsEncrypted` sidebands marking
/// AEAD-wrapped fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Episode {
    /// Stable unique id, `ep_<agentId>_<unixMillis>_<8-hex-random>`.
    pub id: String,
    /// Chunk body. Holds a serialized AEAD envelope when `encrypted` is set.
    pub text: String,
    /// Episode category.
    #[serde(rename = "type")]
    pub episode_type: EpisodeType,
    /// Display-ordered tag set, no duplicates. Holds a one-element envelope
    /// array when `tags_encrypted` is set.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Salience in `[0, 1]`. The stored value never changes; ranking applies
    /// decay since last access on the fly.
    pub importance: f64,
    /// Scoping namespace.
    pub agent_id: String,
    /// Opaque key-value bag; never indexed.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// Position of this chunk within its `remember` call.
    pub chunk_index: usize,
    /// Total chunks produced by that call.
    pub total_chunks: usize,
    /// 12-hex SHA-256 prefix of the pre-chunk text, shared by sibling chunks.
    pub source_id: String,
    /// Creation time, unix millis.
    pub created_at: i64,
    /// Last recall time, unix millis.
    pub last_accessed_at: i64,
    /// Number of recalls that returned this episode.
    pub access_count: u64,
    /// Derived token list, persisted for deterministic index rebuild.
    /// Stripped from the stored form when the episode is encrypted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tokens: Vec<String>,
    /// Ids this episode supersedes; present only on the first chunk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supersedes: Option<Vec<String>>,
    /// Back-references from newer episodes, maintained by the engine.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub superseded_by: Vec<String>,
    /// Set when `text` is an AEAD envelope.
    #[serde(rename = "_encrypted", default, skip_serializing_if = "is_false")]
    pub encrypted: bool,
    /// Set when `tags` holds a single AEAD envelope element.
    #[serde(rename = "_tagsEncrypted", default, skip_serializing_if = "is_false")]
    pub tags_encrypted: bool,
}

impl Episode {
    /// Creates an episode with the given id, owner, and body; everything else
    /// takes its default.
    #[must_use]
    pub fn new(id: impl Into<String>, agent_id: impl Into<String>, text: impl Into<String>) -> Self {
        let now = current_timestamp_ms();
        Self {
            id: id.into(),
            text: text.into(),
            episode_type: EpisodeType::default(),
            tags: Vec::new(),
            importance: 0.5,
            agent_id: agent_id.into(),
            metadata: BTreeMap::new(),
            chunk_index: 0,
            total_chunks: 1,
            source_id: String::new(),
            created_at: now,
            last_accessed_at: now,
            access_count: 0,
            tokens: Vec::new(),
            supersedes: None,
            superseded_by: Vec::new(),
            encrypted: false,
            tags_encrypted: false,
        }
    }

    /// Importance after decay: `importance × 0.95^daysSinceLastAccess`.
    #[must_use]
    pub fn effective_importance(&self, now_ms: i64) -> f64 {
        self.importance * IMPORTANCE_DECAY_PER_DAY.powf(days_since(self.last_accessed_at, now_ms))
    }

    /// Age in fractional days at `now_ms`.
    #[must_use]
    pub fn age_days(&self, now_ms: i64) -> f64 {
        days_since(self.created_at, now_ms)
    }
}

/// Generates a fresh episode id: `ep_<agentId>_<unixMillis>_<8-hex>`.
#[must_use]
pub fn generate_episode_id(agent_id: &str, now_ms: i64) -> String {
    let suffix: u32 = rand::thread_rng().gen();
    format!("ep_{agent_id}_{now_ms}_{suffix:08x}")
}

/// Derives the shared source id for a `remember` call: the first 12 hex
/// characters of the SHA-256 of the pre-chunk text.
#[must_use]
pub fn source_id_for(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..12].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DAY_MS;

    #[test]
    fn test_type_roundtrip_known() {
        for name in [
            "fact", "conversation", "document", "event", "summary", "trade", "position",
            "alert", "decision", "lesson", "checkpoint", "custom",
        ] {
            let t = EpisodeType::from(name);
            assert_eq!(t.as_str(), name);
            assert!(!matches!(t, EpisodeType::Other(_)), "{name} parsed as Other");
        }
    }

    #[test]
    fn test_type_roundtrip_unknown() {
        let t = EpisodeType::from("observation");
        assert_eq!(t, EpisodeType::Other("observation".to_string()));
        assert_eq!(t.as_str(), "observation");

        let json = serde_json::to_string(&t).unwrap();
        assert_eq!(json, "\"observation\"");
        let back: EpisodeType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t);
    }

    #[test]
    fn test_compaction_priority_table() {
        assert_eq!(EpisodeType::Checkpoint.compaction_priority(), 0);
        assert_eq!(EpisodeType::Decision.compaction_priority(), 1);
        assert_eq!(EpisodeType::Conversation.compaction_priority(), 9);
        assert_eq!(EpisodeType::Other("x".into()).compaction_priority(), 10);
    }

    #[test]
    fn test_episode_serde_shape() {
        let mut ep = Episode::new("ep_test_1_00000000", "test", "hello world");
        ep.episode_type = EpisodeType::Lesson;
        ep.tags = vec!["alpha".to_string(), "beta".to_string()];
        ep.created_at = 1_000;
        ep.last_accessed_at = 1_000;
        ep.source_id = "abcdefabcdef".to_string();
        ep.tokens = vec!["hello".to_string(), "world".to_string()];

        let json = serde_json::to_value(&ep).unwrap();
        assert_eq!(json["type"], "lesson");
        assert_eq!(json["agentId"], "test");
        assert_eq!(json["createdAt"], 1_000);
        assert_eq!(json["chunkIndex"], 0);
        // Sidebands are omitted when unset
        assert!(json.get("_encrypted").is_none());
        assert!(json.get("supersedes").is_none());

        let back: Episode = serde_json::from_value(json).unwrap();
        assert_eq!(back.id, ep.id);
        assert_eq!(back.episode_type, EpisodeType::Lesson);
        assert_eq!(back.tags, ep.tags);
        assert!(!back.encrypted);
    }

    #[test]
    fn test_effective_importance_decay() {
        let mut ep = Episode::new("ep_test_1_00000000", "test", "x");
        ep.importance = 0.8;
        ep.last_accessed_at = 0;

        // Fresh access: no decay
        assert!((ep.effective_importance(0) - 0.8).abs() < 1e-12);
        // Ten days idle: 0.8 * 0.95^10
        let expected = 0.8 * 0.95f64.powi(10);
        assert!((ep.effective_importance(10 * DAY_MS) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_generate_episode_id_shape() {
        let id = generate_episode_id("test", 1_700_000_000_000);
        assert!(id.starts_with("ep_test_1700000000000_"));
        let suffix = id.rsplit('_').next().unwrap();
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_source_id_is_stable_prefix() {
        let a = source_id_for("some text");
        let b = source_id_for("some text");
        assert_eq!(a, b);
        assert_eq!(a.len(), 12);
        assert_ne!(a, source_id_for("other text"));
    }
}
