//! Remote key-value storage adapter.
//!
//! [`RemoteStore`] speaks the [`EpisodeStore`] contract over any transport
//! implementing [`KvTransport`] (a plain get/set/delete/keys command set).
//! The crate ships an in-process [`MemoryTransport`]; network clients (a
//! RESP client, an HTTP KV service) plug in by implementing the same four
//! commands.

use std::collections::{BTreeMap, HashMap};

use crate::models::Episode;
use crate::search::PersistedIndex;
use crate::storage::traits::{EpisodeStore, IndexStore, StorageStats};
use crate::{Error, Result};

/// Minimal key-value command set a remote backend must provide.
pub trait KvTransport: Send {
    /// Reads a value.
    fn get(&self, key: &str) -> Result<Option<String>>;
    /// Writes a value, overwriting any previous one.
    fn set(&mut self, key: &str, value: &str) -> Result<()>;
    /// Deletes a key. Returns false if it was absent.
    fn delete(&mut self, key: &str) -> Result<bool>;
    /// Lists keys starting with `prefix`.
    fn keys(&self, prefix: &str) -> Result<Vec<String>>;
    /// Human-readable address for stats output.
    fn location(&self) -> String {
        "kv".to_string()
    }
}

/// In-process transport backed by a map. Used in tests and as the reference
/// implementation of the command semantics.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    map: HashMap<String, String>,
}

impl MemoryTransport {
    /// Creates an empty transport.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvTransport for MemoryTransport {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.map.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.map.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<bool> {
        Ok(self.map.remove(key).is_some())
    }

    fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .map
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}

/// Episode store over a key-value transport.
///
/// Key layout: `<ns>:episode:<id>` for bodies, `<ns>:tags` for the whole tag
/// map, `<ns>:index` for the persisted BM25 index.
pub struct RemoteStore<T: KvTransport> {
    transport: T,
    namespace: String,
}

impl<T: KvTransport> RemoteStore<T> {
    /// Creates a store over `transport`, namespaced by `namespace`.
    pub fn new(transport: T, namespace: impl Into<String>) -> Self {
        Self {
            transport,
            namespace: namespace.into(),
        }
    }

    fn episode_key(&self, id: &str) -> String {
        format!("{}:episode:{id}", self.namespace)
    }

    fn episode_prefix(&self) -> String {
        format!("{}:episode:", self.namespace)
    }

    fn tags_key(&self) -> String {
        format!("{}:tags", self.namespace)
    }

    fn index_key(&self) -> String {
        format!("{}:index", self.namespace)
    }

    fn load_tags(&self) -> Result<BTreeMap<String, Vec<String>>> {
        match self.transport.get(&self.tags_key())? {
            None => Ok(BTreeMap::new()),
            Some(raw) => serde_json::from_str(&raw).map_err(|e| Error::Malformed {
                what: "tag index".to_string(),
                cause: e.to_string(),
            }),
        }
    }

    fn save_tags(&mut self, tags: &BTreeMap<String, Vec<String>>) -> Result<()> {
        let json = serde_json::to_string(tags).map_err(|e| Error::Transport {
            operation: "serialize_tag_index".to_string(),
            cause: e.to_string(),
        })?;
        self.transport.set(&self.tags_key(), &json)
    }

    fn load_episodes_where<F>(&self, mut filter: F) -> Result<Vec<Episode>>
    where
        F: FnMut(&Episode) -> bool,
    {
        let mut episodes = Vec::new();
        for key in self.transport.keys(&self.episode_prefix())? {
            let Some(raw) = self.transport.get(&key)? else {
                continue;
            };
            match serde_json::from_str::<Episode>(&raw) {
                Ok(ep) => {
                    if filter(&ep) {
                        episodes.push(ep);
                    }
                },
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Skipping malformed episode record");
                },
            }
        }
        Ok(episodes)
    }
}

impl<T: KvTransport> EpisodeStore for RemoteStore<T> {
    fn init(&mut self) -> Result<()> {
        // The transport owns its containers; nothing to create
        Ok(())
    }

    fn save_episode(&mut self, episode: &Episode) -> Result<()> {
        let json = serde_json::to_string(episode).map_err(|e| Error::Transport {
            operation: "serialize_episode".to_string(),
            cause: e.to_string(),
        })?;
        self.transport.set(&self.episode_key(&episode.id), &json)
    }

    fn get_episode(&self, id: &str) -> Result<Option<Episode>> {
        match self.transport.get(&self.episode_key(id))? {
            None => Ok(None),
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| Error::Malformed {
                    what: format!("episode {id}"),
                    cause: e.to_string(),
                }),
        }
    }

    fn delete_episode(&mut self, id: &str) -> Result<bool> {
        self.transport.delete(&self.episode_key(id))
    }

    fn get_all_episodes(&self) -> Result<Vec<Episode>> {
        self.load_episodes_where(|_| true)
    }

    fn list_episode_ids(&self) -> Result<Vec<String>> {
        let prefix = self.episode_prefix();
        Ok(self
            .transport
            .keys(&prefix)?
            .into_iter()
            .map(|k| k[prefix.len()..].to_string())
            .collect())
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
        let mut episode_count = 0;
        let mut total_bytes = 0u64;
        for key in self.transport.keys(&self.episode_prefix())? {
            episode_count += 1;
            if let Some(raw) = self.transport.get(&key)? {
                total_bytes += raw.len() as u64;
            }
        }
        Ok(StorageStats {
            episode_count,
            total_bytes,
            location: self.transport.location(),
        })
    }

    fn index_store(&mut self) -> Option<&mut dyn IndexStore> {
        Some(self)
    }
}

impl<T: KvTransport> IndexStore for RemoteStore<T> {
    fn load_index(&self) -> Result<Option<PersistedIndex>> {
        match self.transport.get(&self.index_key())? {
            None => Ok(None),
            Some(raw) => match serde_json::from_str::<PersistedIndex>(&raw) {
                Ok(index) => Ok(Some(index)),
                Err(e) => {
                    tracing::warn!(error = %e, "Persisted BM25 index unreadable, treating as absent");
                    Ok(None)
                },
            },
        }
    }

    fn save_index(&mut self, index: &PersistedIndex) -> Result<()> {
        let json = serde_json::to_string(index).map_err(|e| Error::Transport {
            operation: "serialize_bm25_index".to_string(),
            cause: e.to_string(),
        })?;
        self.transport.set(&self.index_key(), &json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::tokenize;

    fn test_episode(id: &str, text: &str) -> Episode {
        let mut ep = Episode::new(id, "test", text);
        ep.tokens = tokenize(text);
        ep.tags = vec!["tag1".to_string()];
        ep
    }

    fn store() -> RemoteStore<MemoryTransport> {
        let mut store = RemoteStore::new(MemoryTransport::new(), "agent");
        store.init().unwrap();
        store
    }

    #[test]
    fn test_roundtrip() {
        let mut store = store();
        store.save_episode(&test_episode("e1", "hello")).unwrap();
        let loaded = store.get_episode("e1").unwrap().unwrap();
        assert_eq!(loaded.text, "hello");
        assert!(store.get_episode("missing").unwrap().is_none());
    }

    #[test]
    fn test_delete_and_list() {
        let mut store = store();
        store.save_episode(&test_episode("e1", "one")).unwrap();
        store.save_episode(&test_episode("e2", "two")).unwrap();

        let mut ids = store.list_episode_ids().unwrap();
        ids.sort();
        assert_eq!(ids, vec!["e1", "e2"]);

        assert!(store.delete_episode("e1").unwrap());
        assert!(!store.delete_episode("e1").unwrap());
        assert_eq!(store.list_episode_ids().unwrap(), vec!["e2"]);
    }

    #[test]
    fn test_since_filter() {
        let mut store = store();
        let mut e1 = test_episode("e1", "one");
        e1.created_at = 100;
        let mut e2 = test_episode("e2", "two");
        e2.created_at = 300;
        store.save_episode(&e1).unwrap();
        store.save_episode(&e2).unwrap();

        let since = store.get_episodes_since(200).unwrap();
        assert_eq!(since.len(), 1);
        assert_eq!(since[0].id, "e2");
    }

    #[test]
    fn test_tag_index() {
        let mut store = store();
        let ep = test_episode("e1", "x");
        store.add_to_tag_index(&ep).unwrap();
        assert_eq!(store.get_by_tag("tag1").unwrap(), vec!["e1"]);

        store.remove_from_tag_index("e1").unwrap();
        assert!(store.get_by_tag("tag1").unwrap().is_empty());
    }

    #[test]
    fn test_index_capability() {
        let mut store = store();
        assert!(store.load_index().unwrap().is_none());

        let mut index = crate::search::MemoryIndex::new();
        index.add(&test_episode("e1", "alpha beta"));
        store.save_index(&index.to_persisted()).unwrap();
        assert_eq!(store.load_index().unwrap().unwrap().total_docs, 1);
    }

    #[test]
    fn test_malformed_record_skipped_on_bulk_load() {
        let mut store = store();
        store.save_episode(&test_episode("good", "fine")).unwrap();
        store
            .transport
            .set("agent:episode:bad", "{corrupt")
            .unwrap();

        let all = store.get_all_episodes().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, "good");
    }

    #[test]
    fn test_stats() {
        let mut store = store();
        store.save_episode(&test_episode("e1", "one")).unwrap();
        let stats = store.get_stats().unwrap();
        assert_eq!(stats.episode_count, 1);
        assert!(stats.total_bytes > 0);
        assert_eq!(stats.location, "memory");
    }
}
