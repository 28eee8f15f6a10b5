//! Storage contracts.
//!
//! [`EpisodeStore`] is the operation set the core requires of every backend.
//! Optional abilities (persisting the BM25 index, anchoring snapshots) live
//! on separate capability traits that backends opt into through the typed
//! accessors, so the engine never probes for method presence.

use crate::integrity::SnapshotRecord;
use crate::models::Episode;
use crate::search::PersistedIndex;
use crate::Result;

/// Aggregate counts reported by a backend.
#[derive(Debug, Clone)]
pub struct StorageStats {
    /// Number of stored episodes.
    pub episode_count: usize,
    /// Approximate bytes used by episode bodies.
    pub total_bytes: u64,
    /// Human-readable backing location (path, address).
    pub location: String,
}

/// Episode CRUD plus the tag index. The authoritative source of truth.
///
/// All operations may fail with [`crate::Error::Transport`]; absent records
/// surface as `Ok(None)` / `Ok(false)` rather than errors.
pub trait EpisodeStore: Send {
    /// Creates any backing containers. Idempotent.
    fn init(&mut self) -> Result<()>;

    /// Persists an episode, overwriting by id. Last writer wins.
    fn save_episode(&mut self, episode: &Episode) -> Result<()>;

    /// Loads the episode most recently written under `id`.
    fn get_episode(&self, id: &str) -> Result<Option<Episode>>;

    /// Removes an episode. Returns false if it was absent.
    fn delete_episode(&mut self, id: &str) -> Result<bool>;

    /// Loads every episode. Order unspecified; individual malformed records
    /// are skipped with a warning rather than poisoning the whole load.
    fn get_all_episodes(&self) -> Result<Vec<Episode>>;

    /// Lists all episode ids without reading bodies.
    fn list_episode_ids(&self) -> Result<Vec<String>>;

    /// Loads all episodes with `createdAt > since_ms`.
    fn get_episodes_since(&self, since_ms: i64) -> Result<Vec<Episode>>;

    /// Records the episode's tags in the tag index. Ids stay unique per tag,
    /// in insertion order.
    fn add_to_tag_index(&mut self, episode: &Episode) -> Result<()>;

    /// Removes an id from every tag it appears under.
    fn remove_from_tag_index(&mut self, id: &str) -> Result<()>;

    /// Returns the ids recorded under a tag, in insertion order.
    fn get_by_tag(&self, tag: &str) -> Result<Vec<String>>;

    /// Reports aggregate counts.
    fn get_stats(&self) -> Result<StorageStats>;

    /// BM25-index persistence, when this backend supports it. Backends
    /// without it force a full rebuild on every startup.
    fn index_store(&mut self) -> Option<&mut dyn IndexStore> {
        None
    }

    /// Snapshot anchoring, when this backend supports it.
    fn anchor_store(&mut self) -> Option<&mut dyn AnchorStore> {
        None
    }
}

/// Optional capability: (de)serialization of the BM25 index.
pub trait IndexStore {
    /// Loads the persisted index. `None` when absent or unreadable (an
    /// unreadable index is treated as absent and triggers a full rebuild).
    fn load_index(&self) -> Result<Option<PersistedIndex>>;

    /// Persists the index, replacing any previous version.
    fn save_index(&mut self, index: &PersistedIndex) -> Result<()>;
}

/// Optional capability: durable snapshot records.
pub trait AnchorStore {
    /// Persists a snapshot record. Returns a human-readable location.
    fn save_snapshot(&mut self, record: &SnapshotRecord) -> Result<String>;
}
