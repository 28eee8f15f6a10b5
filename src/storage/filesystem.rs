//! Local file-tree storage backend.
//!
//! On-disk layout under the base path:
//!
//! ```text
//! episodes/<id>.json            one pretty-JSON file per episode
//! index/tags.json               { tag: [id, ...] }
//! index/bm25-index.json         persisted BM25 statistics
//! anchors/snapshot-<ms>.json    snapshot records
//! synonyms.json                 optional per-store synonym overlay
//! engram.key / engram.salt      optional key material
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::integrity::SnapshotRecord;
use crate::models::Episode;
use crate::search::PersistedIndex;
use crate::storage::traits::{AnchorStore, EpisodeStore, IndexStore, StorageStats};
use crate::{Error, Result};

/// Filesystem-backed episode store.
pub struct FilesystemStore {
    base_path: PathBuf,
}

impl FilesystemStore {
    /// Creates a store rooted at `base_path`. Directories are created on
    /// [`init`](EpisodeStore::init).
    #[must_use]
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Returns the base path.
    #[must_use]
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn episodes_dir(&self) -> PathBuf {
        self.base_path.join("episodes")
    }

    fn index_dir(&self) -> PathBuf {
        self.base_path.join("index")
    }

    fn anchors_dir(&self) -> PathBuf {
        self.base_path.join("anchors")
    }

    fn episode_path(&self, id: &str) -> PathBuf {
        self.episodes_dir().join(format!("{id}.json"))
    }

    fn tags_path(&self) -> PathBuf {
        self.index_dir().join("tags.json")
    }

    fn bm25_path(&self) -> PathBuf {
        self.index_dir().join("bm25-index.json")
    }

    fn load_tags(&self) -> Result<BTreeMap<String, Vec<String>>> {
        let path = self.tags_path();
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let raw = fs::read_to_string(&path).map_err(|e| Error::Transport {
            operation: "read_tag_index".to_string(),
            cause: e.to_string(),
        })?;
        serde_json::from_str(&raw).map_err(|e| Error::Malformed {
            what: "tag index".to_string(),
            cause: e.to_string(),
        })
    }

    fn save_tags(&self, tags: &BTreeMap<String, Vec<String>>) -> Result<()> {
        let json = serde_json::to_string_pretty(tags).map_err(|e| Error::Transport {
            operation: "serialize_tag_index".to_string(),
            cause: e.to_string(),
        })?;
        fs::write(self.tags_path(), json).map_err(|e| Error::Transport {
            operation: "write_tag_index".to_string(),
            cause: e.to_string(),
        })
    }

    /// Loads every episode, applying `filter` to the parsed value and
    /// skipping malformed files with a warning.
    fn load_episodes_where<F>(&self, mut filter: F) -> Result<Vec<Episode>>
    where
        F: FnMut(&Episode) -> bool,
    {
        let dir = self.episodes_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(&dir).map_err(|e| Error::Transport {
            operation: "read_episodes_dir".to_string(),
            cause: e.to_string(),
        })?;

        let mut episodes = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::Transport {
                operation: "read_dir_entry".to_string(),
                cause: e.to_string(),
            })?;
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }

            let raw = match fs::read_to_string(&path) {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable episode file");
                    continue;
                },
            };
            match serde_json::from_str::<Episode>(&raw) {
                Ok(ep) => {
                    if filter(&ep) {
                        episodes.push(ep);
                    }
                },
                Err(e) => {
                    // One corrupt episode must not poison the whole store
                    tracing::warn!(path = %path.display(), error = %e, "Skipping malformed episode file");
                },
            }
        }
        Ok(episodes)
    }
}

impl EpisodeStore for FilesystemStore {
    fn init(&mut self) -> Result<()> {
        for dir in [self.episodes_dir(), self.index_dir()] {
            fs::create_dir_all(&dir).map_err(|e| Error::Transport {
                operation: "create_storage_dir".to_string(),
                cause: format!("{}: {e}", dir.display()),
            })?;
        }
        Ok(())
    }

    fn save_episode(&mut self, episode: &Episode) -> Result<()> {
        let json = serde_json::to_string_pretty(episode).map_err(|e| Error::Transport {
            operation: "serialize_episode".to_string(),
            cause: e.to_string(),
        })?;
        fs::write(self.episode_path(&episode.id), json).map_err(|e| Error::Transport {
            operation: "write_episode".to_string(),
            cause: e.to_string(),
        })
    }

    fn get_episode(&self, id: &str) -> Result<Option<Episode>> {
        let path = self.episode_path(id);
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path).map_err(|e| Error::Transport {
            operation: "read_episode".to_string(),
            cause: e.to_string(),
        })?;
        let episode = serde_json::from_str(&raw).map_err(|e| Error::Malformed {
            what: format!("episode {id}"),
            cause: e.to_string(),
        })?;
        Ok(Some(episode))
    }

    fn delete_episode(&mut self, id: &str) -> Result<bool> {
        let path = self.episode_path(id);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path).map_err(|e| Error::Transport {
            operation: "delete_episode".to_string(),
            cause: e.to_string(),
        })?;
        Ok(true)
    }

    fn get_all_episodes(&self) -> Result<Vec<Episode>> {
        self.load_episodes_where(|_| true)
    }

    fn list_episode_ids(&self) -> Result<Vec<String>> {
        let dir = self.episodes_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(&dir).map_err(|e| Error::Transport {
            operation: "read_episodes_dir".to_string(),
            cause: e.to_string(),
        })?;

        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::Transport {
                operation: "read_dir_entry".to_string(),
                cause: e.to_string(),
            })?;
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    ids.push(stem.to_string());
                }
            }
        }
        Ok(ids)
    }

    fn get_episodes_since(&self, since_ms: i64) -> Result<Vec<Episode>> {
        self.load_episodes_where(|ep| ep.created_at > since_ms)
    }

    fn add_to_tag_index(&mut self, episode: &Episode) -> Result<()> {
        if episode.tags.is_empty() {
            return Ok(());
        }
        let mut tags = self.load_tags()?;
        for tag in &episode.tags {
            let ids = tags.entry(tag.clone()).or_default();
            if !ids.iter().any(|i| i == &episode.id) {
                ids.push(episode.id.clone());
            }
        }
        self.save_tags(&tags)
    }

    fn remove_from_tag_index(&mut self, id: &str) -> Result<()> {
        let mut tags = self.load_tags()?;
        let mut changed = false;
        tags.retain(|_, ids| {
            let before = ids.len();
            ids.retain(|i| i != id);
            changed |= ids.len() != before;
            !ids.is_empty()
        });
        if changed {
            self.save_tags(&tags)?;
        }
        Ok(())
    }

    fn get_by_tag(&self, tag: &str) -> Result<Vec<String>> {
        Ok(self.load_tags()?.remove(tag).unwrap_or_default())
    }

    fn get_stats(&self) -> Result<StorageStats> {
        let dir = self.episodes_dir();
        let mut episode_count = 0;
        let mut total_bytes = 0u64;
        if dir.exists() {
            let entries = fs::read_dir(&dir).map_err(|e| Error::Transport {
                operation: "read_episodes_dir".to_string(),
                cause: e.to_string(),
            })?;
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().is_some_and(|ext| ext == "json") {
                    episode_count += 1;
                    if let Ok(meta) = entry.metadata() {
                        total_bytes += meta.len();
                    }
                }
            }
        }
        Ok(StorageStats {
            episode_count,
            total_bytes,
            location: self.base_path.display().to_string(),
        })
    }

    fn index_store(&mut self) -> Option<&mut dyn IndexStore> {
        Some(self)
    }

    fn anchor_store(&mut self) -> Option<&mut dyn AnchorStore> {
        Some(self)
    }
}

impl IndexStore for FilesystemStore {
    fn load_index(&self) -> Result<Option<PersistedIndex>> {
        let path = self.bm25_path();
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path).map_err(|e| Error::Transport {
            operation: "read_bm25_index".to_string(),
            cause: e.to_string(),
        })?;
        match serde_json::from_str::<PersistedIndex>(&raw) {
            Ok(index) => Ok(Some(index)),
            Err(e) => {
                // An unreadable index is absent: the engine rebuilds from episodes
                tracing::warn!(error = %e, "Persisted BM25 index unreadable, treating as absent");
                Ok(None)
            },
        }
    }

    fn save_index(&mut self, index: &PersistedIndex) -> Result<()> {
        // The index dir may not exist yet when persisting before first init
        let _ = fs::create_dir_all(self.index_dir());
        let json = serde_json::to_string(index).map_err(|e| Error::Transport {
            operation: "serialize_bm25_index".to_string(),
            cause: e.to_string(),
        })?;
        fs::write(self.bm25_path(), json).map_err(|e| Error::Transport {
            operation: "write_bm25_index".to_string(),
            cause: e.to_string(),
        })
    }
}

impl AnchorStore for FilesystemStore {
    fn save_snapshot(&mut self, record: &SnapshotRecord) -> Result<String> {
        fs::create_dir_all(self.anchors_dir()).map_err(|e| Error::Transport {
            operation: "create_anchors_dir".to_string(),
            cause: e.to_string(),
        })?;
        let path = self
            .anchors_dir()
            .join(format!("snapshot-{}.json", record.timestamp));
        let json = serde_json::to_string_pretty(record).map_err(|e| Error::Transport {
            operation: "serialize_snapshot".to_string(),
            cause: e.to_string(),
        })?;
        fs::write(&path, json).map_err(|e| Error::Transport {
            operation: "write_snapshot".to_string(),
            cause: e.to_string(),
        })?;
        Ok(path.display().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::tokenize;
    use tempfile::TempDir;

    fn test_episode(id: &str, text: &str) -> Episode {
        let mut ep = Episode::new(id, "test", text);
        ep.tokens = tokenize(text);
        ep.tags = vec!["alpha".to_string()];
        ep
    }

    fn store() -> (TempDir, FilesystemStore) {
        let dir = TempDir::new().unwrap();
        let mut store = FilesystemStore::new(dir.path());
        store.init().unwrap();
        (dir, store)
    }

    #[test]
    fn test_save_get_roundtrip() {
        let (_dir, mut store) = store();
        let ep = test_episode("ep_test_1_aaaaaaaa", "hello world");
        store.save_episode(&ep).unwrap();

        let loaded = store.get_episode("ep_test_1_aaaaaaaa").unwrap().unwrap();
        assert_eq!(loaded.id, ep.id);
        assert_eq!(loaded.text, "hello world");
        assert_eq!(loaded.tokens, ep.tokens);
    }

    #[test]
    fn test_get_missing_is_none() {
        let (_dir, store) = store();
        assert!(store.get_episode("nope").unwrap().is_none());
    }

    #[test]
    fn test_delete() {
        let (_dir, mut store) = store();
        store.save_episode(&test_episode("e1", "x")).unwrap();
        assert!(store.delete_episode("e1").unwrap());
        assert!(!store.delete_episode("e1").unwrap());
        assert!(store.get_episode("e1").unwrap().is_none());
    }

    #[test]
    fn test_list_ids_and_since() {
        let (_dir, mut store) = store();
        let mut e1 = test_episode("e1", "one");
        e1.created_at = 100;
        let mut e2 = test_episode("e2", "two");
        e2.created_at = 200;
        store.save_episode(&e1).unwrap();
        store.save_episode(&e2).unwrap();

        let mut ids = store.list_episode_ids().unwrap();
        ids.sort();
        assert_eq!(ids, vec!["e1", "e2"]);

        let since = store.get_episodes_since(100).unwrap();
        assert_eq!(since.len(), 1);
        assert_eq!(since[0].id, "e2");
    }

    #[test]
    fn test_malformed_episode_skipped_on_bulk_load() {
        let (_dir, mut store) = store();
        store.save_episode(&test_episode("good", "fine")).unwrap();
        fs::write(store.episode_path("broken"), "{oops").unwrap();

        let all = store.get_all_episodes().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, "good");

        // Single-record reads surface the parse failure
        assert!(matches!(
            store.get_episode("broken"),
            Err(Error::Malformed { .. })
        ));
    }

    #[test]
    fn test_tag_index_order_and_uniqueness() {
        let (_dir, mut store) = store();
        let mut e1 = test_episode("e1", "x");
        e1.tags = vec!["shared".to_string()];
        let mut e2 = test_episode("e2", "y");
        e2.tags = vec!["shared".to_string(), "own".to_string()];

        store.add_to_tag_index(&e1).unwrap();
        store.add_to_tag_index(&e2).unwrap();
        store.add_to_tag_index(&e2).unwrap(); // no duplicates

        assert_eq!(store.get_by_tag("shared").unwrap(), vec!["e1", "e2"]);
        assert_eq!(store.get_by_tag("own").unwrap(), vec!["e2"]);
        assert!(store.get_by_tag("absent").unwrap().is_empty());

        store.remove_from_tag_index("e1").unwrap();
        assert_eq!(store.get_by_tag("shared").unwrap(), vec!["e2"]);
    }

    #[test]
    fn test_bm25_index_roundtrip_and_corruption() {
        let (_dir, mut store) = store();
        assert!(store.load_index().unwrap().is_none());

        let mut index = crate::search::MemoryIndex::new();
        index.add(&test_episode("e1", "alpha beta"));
        store.save_index(&index.to_persisted()).unwrap();

        let loaded = store.load_index().unwrap().unwrap();
        assert_eq!(loaded.total_docs, 1);

        // Corrupt index is treated as absent
        fs::write(store.bm25_path(), "garbage").unwrap();
        assert!(store.load_index().unwrap().is_none());
    }

    #[test]
    fn test_stats() {
        let (_dir, mut store) = store();
        store.save_episode(&test_episode("e1", "one")).unwrap();
        store.save_episode(&test_episode("e2", "two")).unwrap();

        let stats = store.get_stats().unwrap();
        assert_eq!(stats.episode_count, 2);
        assert!(stats.total_bytes > 0);
    }

    #[test]
    fn test_init_idempotent() {
        let (_dir, mut store) = store();
        store.init().unwrap();
        store.init().unwrap();
    }
}
