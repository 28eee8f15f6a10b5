//! The agent memory orchestrator.
//!
//! [`AgentMemory`] owns the in-memory index, the synonym table, the key
//! material, and a storage backend, and sequences every operation across
//! them. All methods are synchronous and mutually excluding through `&mut
//! self`; multiple orchestrators over the same store are unsupported
//! multi-writer access.

mod context;

pub use context::{CompactionOptions, InjectOptions};

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::time::Instant;

use tracing::instrument;

use crate::analysis::{chunk_text, tokenize, ChunkMode};
use crate::crypto::{Encryptor, KeyConfig};
use crate::integrity::Snapshot;
use crate::models::{
    generate_episode_id, parse_temporal, source_id_for, Episode, EpisodeType, RecallOptions,
    RecalledEpisode,
};
use crate::search::{MemoryIndex, SynonymTable};
use crate::storage::{EpisodeStore, FilesystemStore};
use crate::{current_timestamp_ms, Error, Result};

/// Default token budget per chunk.
pub const DEFAULT_CHUNK_TOKENS: usize = 400;
/// Token overlap between consecutive fixed-mode windows.
pub const DEFAULT_CHUNK_OVERLAP: usize = 32;

/// Configuration for an [`AgentMemory`].
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Base path for the store (and for key/synonym side files).
    pub base_path: PathBuf,
    /// Scoping namespace for episode ids.
    pub agent_id: String,
    /// Encryption key source; `None` stores cleartext.
    pub encryption: Option<KeyConfig>,
    /// Explicit synonym file merged after the per-store layer.
    pub synonyms_path: Option<PathBuf>,
    /// Default chunking mode for `remember`.
    pub chunk_mode: ChunkMode,
    /// Default chunk token budget.
    pub max_chunk_tokens: usize,
    /// Overlap for fixed-window chunking.
    pub chunk_overlap: usize,
}

impl MemoryConfig {
    /// Creates a configuration for a store rooted at `base_path`.
    #[must_use]
    pub fn new(base_path: impl Into<PathBuf>, agent_id: impl Into<String>) -> Self {
        Self {
            base_path: base_path.into(),
            agent_id: agent_id.into(),
            encryption: None,
            synonyms_path: None,
            chunk_mode: ChunkMode::Sentence,
            max_chunk_tokens: DEFAULT_CHUNK_TOKENS,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }

    /// Enables encryption at rest with the given key source.
    #[must_use]
    pub fn with_encryption(mut self, key: KeyConfig) -> Self {
        self.encryption = Some(key);
        self
    }

    /// Adds an explicit synonym file layer.
    #[must_use]
    pub fn with_synonyms_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.synonyms_path = Some(path.into());
        self
    }

    /// Overrides the default chunking.
    #[must_use]
    pub const fn with_chunking(mut self, mode: ChunkMode, max_tokens: usize) -> Self {
        self.chunk_mode = mode;
        self.max_chunk_tokens = max_tokens;
        self
    }
}

/// Options for a single `remember` call.
#[derive(Debug, Clone)]
pub struct RememberOptions {
    /// Episode type, default `fact`.
    pub episode_type: EpisodeType,
    /// Tags, duplicates dropped while preserving first-seen order.
    pub tags: Vec<String>,
    /// Importance in `[0, 1]`, default 0.5. Out-of-range values clamp.
    pub importance: f64,
    /// Opaque metadata bag.
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// Ids the new episode supersedes.
    pub supersedes: Option<Vec<String>>,
    /// Chunk mode override for this call.
    pub chunk_mode: Option<ChunkMode>,
    /// Chunk token budget override for this call.
    pub max_chunk_tokens: Option<usize>,
}

impl Default for RememberOptions {
    fn default() -> Self {
        Self {
            episode_type: EpisodeType::default(),
            tags: Vec::new(),
            importance: 0.5,
            metadata: BTreeMap::new(),
            supersedes: None,
            chunk_mode: None,
            max_chunk_tokens: None,
        }
    }
}

impl RememberOptions {
    /// Creates default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the episode type.
    #[must_use]
    pub fn with_type(mut self, episode_type: impl Into<EpisodeType>) -> Self {
        self.episode_type = episode_type.into();
        self
    }

    /// Sets the tags.
    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the importance.
    #[must_use]
    pub const fn with_importance(mut self, importance: f64) -> Self {
        self.importance = importance;
        self
    }

    /// Marks the ids this episode supersedes.
    #[must_use]
    pub fn with_supersedes<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.supersedes = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    /// Attaches a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Prune policy.
#[derive(Debug, Clone)]
pub struct PruneOptions {
    /// Keep at most this many episodes by decayed-importance rank.
    pub keep: usize,
    /// Age bound in days for the low-importance cut.
    pub max_age_days: f64,
    /// Decayed-importance floor for the age cut.
    pub min_importance: f64,
}

impl Default for PruneOptions {
    fn default() -> Self {
        Self {
            keep: 1_000,
            max_age_days: 90.0,
            min_importance: 0.05,
        }
    }
}

/// Outcome of a prune.
#[derive(Debug, Clone, Copy)]
pub struct PruneReport {
    /// Episodes removed.
    pub pruned: usize,
    /// Episodes kept.
    pub kept: usize,
}

/// Aggregate statistics over the store and the index.
#[derive(Debug, Clone)]
pub struct MemoryStats {
    /// Episodes on the backend.
    pub episode_count: usize,
    /// Documents in the in-memory index.
    pub indexed_docs: usize,
    /// Distinct terms in the index.
    pub term_count: usize,
    /// Approximate bytes used by episode bodies.
    pub total_bytes: u64,
    /// Backing location.
    pub location: String,
    /// Owning agent id.
    pub agent_id: String,
}

/// The orchestrator: a persistent, searchable episodic memory for one agent.
pub struct AgentMemory {
    config: MemoryConfig,
    storage: Box<dyn EpisodeStore>,
    pub(crate) index: MemoryIndex,
    synonyms: SynonymTable,
    encryptor: Option<Encryptor>,
    initialized: bool,
}

/// Decrypts a stored episode when needed. Encrypted records without a
/// configured key surface a policy error rather than ciphertext.
fn open_stored(encryptor: Option<&Encryptor>, episode: Episode) -> Result<Episode> {
    if !episode.encrypted && !episode.tags_encrypted {
        return Ok(episode);
    }
    let Some(enc) = encryptor else {
        return Err(Error::Policy(format!(
            "episode {} is encrypted but no key is configured",
            episode.id
        )));
    };
    enc.open_episode(episode)
}

fn seal_for_storage(encryptor: Option<&Encryptor>, episode: &Episode) -> Result<Episode> {
    match encryptor {
        Some(enc) => enc.seal_episode(episode),
        None => Ok(episode.clone()),
    }
}

impl AgentMemory {
    /// Creates an orchestrator over a local file tree at the configured base
    /// path. Initialization is lazy: the first operation resolves keys,
    /// loads synonym layers, and restores or rebuilds the index.
    #[must_use]
    pub fn new(config: MemoryConfig) -> Self {
        let storage = Box::new(FilesystemStore::new(&config.base_path));
        Self::with_storage(config, storage)
    }

    /// Creates an orchestrator over a caller-supplied storage backend.
    #[must_use]
    pub fn with_storage(config: MemoryConfig, storage: Box<dyn EpisodeStore>) -> Self {
        Self {
            config,
            storage,
            index: MemoryIndex::new(),
            synonyms: SynonymTable::new(),
            encryptor: None,
            initialized: false,
        }
    }

    /// Creates and eagerly initializes an orchestrator over the local store.
    ///
    /// # Errors
    ///
    /// Surfaces the same failures as the first lazy operation would:
    /// [`Error::Policy`] for unresolvable keys, [`Error::Transport`] for
    /// storage failures.
    pub fn open(config: MemoryConfig) -> Result<Self> {
        let mut memory = Self::new(config);
        memory.ensure_initialized()?;
        Ok(memory)
    }

    /// The configured agent id.
    #[must_use]
    pub fn agent_id(&self) -> &str {
        &self.config.agent_id
    }

    /// Adds a runtime synonym group (the last loading layer).
    pub fn add_synonym_group(&mut self, group: Vec<String>) {
        self.synonyms.add_group(group);
    }

    /// Resolves keys, loads synonym layers, initializes storage, and brings
    /// the index up: incrementally when the persisted index is consistent
    /// with the on-disk episode set, by full rebuild otherwise.
    pub(crate) fn ensure_initialized(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }

        if let Some(key_config) = &self.config.encryption {
            let key = key_config.resolve(&self.config.base_path)?;
            self.encryptor = Some(Encryptor::new(&key));
        }

        let mut synonyms = SynonymTable::with_defaults();
        synonyms.load_env_layer();
        let store_file = self.config.base_path.join("synonyms.json");
        if store_file.exists() {
            if let Err(e) = synonyms.load_file(&store_file) {
                tracing::warn!(error = %e, "Skipping per-store synonym layer");
            }
        }
        if let Some(path) = &self.config.synonyms_path {
            if let Err(e) = synonyms.load_file(path) {
                tracing::warn!(path = %path.display(), error = %e, "Skipping configured synonym layer");
            }
        }
        self.synonyms = synonyms;

        self.storage.init()?;
        self.bring_up_index()?;
        self.persist_index()?;
        self.initialized = true;
        Ok(())
    }

    /// Incremental-or-full index bring-up (see the startup contract).
    fn bring_up_index(&mut self) -> Result<()> {
        let persisted = match self.storage.index_store() {
            Some(store) => store.load_index()?,
            None => None,
        };

        let Some(persisted) = persisted else {
            tracing::info!("No persisted index, rebuilding from episodes");
            return self.full_rebuild();
        };

        let new_episodes = self
            .storage
            .get_episodes_since(persisted.last_indexed_timestamp)?;
        let all_ids = self.storage.list_episode_ids()?;

        // Consistent iff the on-disk count sits within [totalDocs,
        // totalDocs + new]: anything else means lost or foreign writes.
        let lo = persisted.total_docs;
        let hi = persisted.total_docs + new_episodes.len();
        if all_ids.len() < lo || all_ids.len() > hi {
            tracing::info!(
                on_disk = all_ids.len(),
                indexed = persisted.total_docs,
                new = new_episodes.len(),
                "Persisted index inconsistent with episode set, rebuilding"
            );
            return self.full_rebuild();
        }

        let restored = match MemoryIndex::restore(&persisted) {
            Ok(index) => index,
            Err(e) => {
                tracing::warn!(error = %e, "Persisted index unreadable, rebuilding");
                return self.full_rebuild();
            },
        };
        self.index = restored;

        // The persisted form omits per-doc term frequencies, so the index is
        // an acceptance oracle, not a zero-cost reload: every episode is
        // loaded back and its tokens re-attached.
        let mut seen: HashSet<String> = HashSet::with_capacity(all_ids.len());
        for stored in self.storage.get_all_episodes()? {
            let episode = open_stored(self.encryptor.as_ref(), stored)?;
            seen.insert(episode.id.clone());
            if self.index.contains(&episode.id) {
                let tokens = episode_tokens(&episode);
                self.index.attach_episode(&episode, &tokens);
            } else {
                let episode = with_tokens(episode);
                self.index.add(&episode);
            }
        }

        // An indexed id with no backing episode breaks the df bookkeeping;
        // fall back to the rebuild path
        let orphaned: Vec<String> = self
            .index
            .iter()
            .map(|(id, _)| id.clone())
            .filter(|id| !seen.contains(id))
            .collect();
        if !orphaned.is_empty() {
            tracing::info!(orphaned = orphaned.len(), "Index holds deleted episodes, rebuilding");
            return self.full_rebuild();
        }

        tracing::debug!(docs = self.index.total_docs(), "Incremental index restore accepted");
        Ok(())
    }

    fn full_rebuild(&mut self) -> Result<()> {
        let mut episodes = Vec::new();
        for stored in self.storage.get_all_episodes()? {
            let episode = open_stored(self.encryptor.as_ref(), stored)?;
            episodes.push(with_tokens(episode));
        }
        self.index.rebuild(episodes.iter());
        tracing::info!(docs = self.index.total_docs(), "Index rebuilt");
        Ok(())
    }

    fn persist_index(&mut self) -> Result<()> {
        let persisted = self.index.to_persisted();
        if let Some(store) = self.storage.index_store() {
            store.save_index(&persisted)?;
        }
        Ok(())
    }

    /// Persists one or more episodes built from `text`.
    ///
    /// The text is chunked, one episode is created per chunk (sharing a
    /// `sourceId`), each is indexed, sealed if encryption is on, and saved.
    /// Supersession back-links on the referenced episodes are updated last.
    /// Returns the created episodes in cleartext form.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for empty text or a supersession that
    /// would close a cycle, plus any storage or crypto failure.
    #[instrument(skip(self, text, opts), fields(agent = %self.config.agent_id, len = text.len()))]
    pub fn remember(&mut self, text: &str, opts: RememberOptions) -> Result<Vec<Episode>> {
        self.ensure_initialized()?;

        if text.trim().is_empty() {
            return Err(Error::InvalidInput("cannot remember empty text".to_string()));
        }

        let now = current_timestamp_ms();
        let source_id = source_id_for(text);
        let mode = opts.chunk_mode.unwrap_or(self.config.chunk_mode);
        let max_tokens = opts.max_chunk_tokens.unwrap_or(self.config.max_chunk_tokens);
        let chunks = chunk_text(text, mode, max_tokens, self.config.chunk_overlap);

        let mut tags: Vec<String> = Vec::new();
        for tag in &opts.tags {
            if !tags.contains(tag) {
                tags.push(tag.clone());
            }
        }

        let mut episodes = Vec::with_capacity(chunks.len());
        let total_chunks = chunks.len();
        for (chunk_index, chunk) in chunks.into_iter().enumerate() {
            let id = generate_episode_id(&self.config.agent_id, now);

            if chunk_index == 0 {
                if let Some(supersedes) = &opts.supersedes {
                    self.reject_supersession_cycle(&id, supersedes)?;
                }
            }

            let episode = Episode {
                id,
                tokens: tokenize(&chunk),
                text: chunk,
                episode_type: opts.episode_type.clone(),
                tags: tags.clone(),
                importance: opts.importance.clamp(0.0, 1.0),
                agent_id: self.config.agent_id.clone(),
                metadata: opts.metadata.clone(),
                chunk_index,
                total_chunks,
                source_id: source_id.clone(),
                created_at: now,
                last_accessed_at: now,
                access_count: 0,
                supersedes: if chunk_index == 0 {
                    opts.supersedes.clone()
                } else {
                    None
                },
                superseded_by: Vec::new(),
                encrypted: false,
                tags_encrypted: false,
            };

            self.index.add(&episode);
            let stored = seal_for_storage(self.encryptor.as_ref(), &episode)?;
            self.storage.save_episode(&stored)?;
            self.storage.add_to_tag_index(&episode)?;
            episodes.push(episode);
        }

        if let (Some(supersedes), Some(first)) = (&opts.supersedes, episodes.first()) {
            let new_id = first.id.clone();
            for old_id in supersedes {
                match self.storage.get_episode(old_id)? {
                    Some(stored) => {
                        let mut old = open_stored(self.encryptor.as_ref(), stored)?;
                        if !old.superseded_by.iter().any(|b| b == &new_id) {
                            old.superseded_by.push(new_id.clone());
                            let sealed = seal_for_storage(self.encryptor.as_ref(), &old)?;
                            self.storage.save_episode(&sealed)?;
                        }
                        self.index.mark_superseded(old_id, &new_id);
                    },
                    None => {
                        tracing::warn!(old_id = %old_id, "Superseded episode not found");
                    },
                }
            }
        }

        self.persist_index()?;
        metrics::counter!("engram_remember_total").increment(episodes.len() as u64);
        tracing::info!(episodes = episodes.len(), source_id = %source_id, "Remembered");
        Ok(episodes)
    }

    /// Rejects a `supersedes` list that would close a cycle: the new id must
    /// not be reachable from any referenced episode through the
    /// `supersededBy` closure.
    fn reject_supersession_cycle(&self, new_id: &str, supersedes: &[String]) -> Result<()> {
        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<String> = supersedes.iter().cloned().collect();
        while let Some(id) = queue.pop_front() {
            if id == new_id {
                return Err(Error::InvalidInput(format!(
                    "supersedes would create a cycle through {id}"
                )));
            }
            if !visited.insert(id.clone()) {
                continue;
            }
            if let Some(doc) = self.index.doc(&id) {
                queue.extend(doc.superseded_by.iter().cloned());
            }
        }
        Ok(())
    }

    /// Retrieves the most relevant episodes for a query.
    ///
    /// Each returned episode is hydrated from storage, decrypted, and has
    /// its access statistics bumped before being handed back.
    ///
    /// # Errors
    ///
    /// Surfaces storage and crypto failures; an empty query yields an empty
    /// result, not an error.
    #[instrument(skip(self, query, opts), fields(agent = %self.config.agent_id, limit = opts.limit))]
    pub fn recall(&mut self, query: &str, opts: &RecallOptions) -> Result<Vec<RecalledEpisode>> {
        self.ensure_initialized()?;
        let start = Instant::now();
        let now = current_timestamp_ms();

        let opts = opts.clone().clamped();
        let hits = self.index.search(query, &self.synonyms, &opts, now);

        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            let Some(stored) = self.storage.get_episode(&hit.id)? else {
                tracing::warn!(id = %hit.id, "Indexed episode missing from storage");
                continue;
            };
            let mut episode = open_stored(self.encryptor.as_ref(), stored)?;
            episode.last_accessed_at = now;
            episode.access_count += 1;

            let sealed = seal_for_storage(self.encryptor.as_ref(), &episode)?;
            self.storage.save_episode(&sealed)?;
            self.index.touch(&hit.id, now);

            results.push(RecalledEpisode {
                episode,
                score: hit.score,
                bm25: hit.bm25,
                recency: hit.recency,
            });
        }

        metrics::counter!("engram_recall_total").increment(1);
        metrics::histogram!("engram_recall_duration_ms")
            .record(start.elapsed().as_secs_f64() * 1000.0);
        Ok(results)
    }

    /// Returns the newest episodes, most recent first. Does not bump access
    /// statistics.
    ///
    /// # Errors
    ///
    /// Surfaces storage and crypto failures.
    pub fn get_recent(&mut self, limit: usize) -> Result<Vec<Episode>> {
        self.ensure_initialized()?;

        let mut ids: Vec<(String, i64)> = self
            .index
            .iter()
            .map(|(id, doc)| (id.clone(), doc.created_at))
            .collect();
        ids.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ids.truncate(limit);

        let mut episodes = Vec::with_capacity(ids.len());
        for (id, _) in ids {
            if let Some(stored) = self.storage.get_episode(&id)? {
                episodes.push(open_stored(self.encryptor.as_ref(), stored)?);
            }
        }
        Ok(episodes)
    }

    /// Returns the episodes recorded under a tag, in insertion order.
    ///
    /// # Errors
    ///
    /// Surfaces storage and crypto failures.
    pub fn find_by_tag(&mut self, tag: &str) -> Result<Vec<Episode>> {
        self.ensure_initialized()?;
        let mut episodes = Vec::new();
        for id in self.storage.get_by_tag(tag)? {
            if let Some(stored) = self.storage.get_episode(&id)? {
                episodes.push(open_stored(self.encryptor.as_ref(), stored)?);
            }
        }
        Ok(episodes)
    }

    /// Removes an episode from storage, the tag index, and the in-memory
    /// index. Returns false when the id was absent.
    ///
    /// # Errors
    ///
    /// Surfaces storage failures.
    pub fn forget(&mut self, id: &str) -> Result<bool> {
        self.ensure_initialized()?;

        let removed = self.storage.delete_episode(id)?;
        if removed {
            self.storage.remove_from_tag_index(id)?;
            self.index.remove(id);
            self.persist_index()?;
            metrics::counter!("engram_forget_total").increment(1);
            tracing::info!(id = %id, "Forgot episode");
        }
        Ok(removed)
    }

    /// Reports aggregate statistics.
    ///
    /// # Errors
    ///
    /// Surfaces storage failures.
    pub fn stats(&mut self) -> Result<MemoryStats> {
        self.ensure_initialized()?;
        let storage = self.storage.get_stats()?;
        Ok(MemoryStats {
            episode_count: storage.episode_count,
            indexed_docs: self.index.total_docs(),
            term_count: self.index.term_count(),
            total_bytes: storage.total_bytes,
            location: storage.location,
            agent_id: self.config.agent_id.clone(),
        })
    }

    /// Applies the prune policy: episodes ranked past `keep` by decayed
    /// importance, or both older than `max_age_days` and below
    /// `min_importance`, are forgotten.
    ///
    /// # Errors
    ///
    /// Surfaces storage failures.
    pub fn prune(&mut self, opts: &PruneOptions) -> Result<PruneReport> {
        self.ensure_initialized()?;
        let now = current_timestamp_ms();

        let mut ranked: Vec<(String, f64, f64)> = self
            .storage
            .get_all_episodes()?
            .into_iter()
            .map(|ep| {
                let eff = ep.effective_importance(now);
                let age = ep.age_days(now);
                (ep.id, eff, age)
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });

        let mut pruned = 0;
        for (rank, (id, eff, age)) in ranked.iter().enumerate() {
            let over_budget = rank >= opts.keep;
            let stale = *age > opts.max_age_days && *eff < opts.min_importance;
            if over_budget || stale {
                if self.storage.delete_episode(id)? {
                    self.storage.remove_from_tag_index(id)?;
                    self.index.remove(id);
                    pruned += 1;
                }
            }
        }
        if pruned > 0 {
            self.persist_index()?;
        }

        metrics::counter!("engram_pruned_total").increment(pruned as u64);
        tracing::info!(pruned, kept = ranked.len() - pruned, "Prune complete");
        Ok(PruneReport {
            pruned,
            kept: ranked.len() - pruned,
        })
    }

    /// Answers a temporal query.
    ///
    /// When the query is only a time phrase, every episode in the window is
    /// returned newest-first (scores zero). Otherwise the residual text is
    /// recalled with the window applied as a filter.
    ///
    /// # Errors
    ///
    /// Surfaces storage and crypto failures.
    pub fn temporal(&mut self, query: &str) -> Result<Vec<RecalledEpisode>> {
        self.ensure_initialized()?;
        let now = current_timestamp_ms();
        let parsed = parse_temporal(query, now);

        if parsed.has_range() && tokenize(&parsed.remaining).is_empty() {
            let mut in_range: Vec<(String, i64)> = self
                .index
                .iter()
                .filter(|(_, doc)| {
                    parsed.after.is_none_or(|a| doc.created_at >= a)
                        && parsed.before.is_none_or(|b| doc.created_at <= b)
                })
                .map(|(id, doc)| (id.clone(), doc.created_at))
                .collect();
            in_range.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

            let mut results = Vec::with_capacity(in_range.len());
            for (id, _) in in_range {
                if let Some(stored) = self.storage.get_episode(&id)? {
                    results.push(RecalledEpisode {
                        episode: open_stored(self.encryptor.as_ref(), stored)?,
                        score: 0.0,
                        bm25: 0.0,
                        recency: 0.0,
                    });
                }
            }
            return Ok(results);
        }

        let opts = RecallOptions::default().with_range(parsed.after, parsed.before);
        self.recall(&parsed.remaining, &opts)
    }

    /// Returns the full supersession chain containing `id`, oldest first.
    ///
    /// The back-walk follows only the first `supersedes` parent; the forward
    /// walk fans out across `supersededBy`. Both walks carry a visited set,
    /// so a corrupted cyclic graph terminates. Unknown ids yield an empty
    /// chain.
    ///
    /// # Errors
    ///
    /// Surfaces storage and crypto failures.
    pub fn supersession_chain(&mut self, id: &str) -> Result<Vec<Episode>> {
        self.ensure_initialized()?;

        let Some(stored) = self.storage.get_episode(id)? else {
            return Ok(Vec::new());
        };
        let mut current = open_stored(self.encryptor.as_ref(), stored)?;

        // Back-walk to the earliest ancestor via the first parent link
        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(current.id.clone());
        while let Some(parent_id) = current
            .supersedes
            .as_ref()
            .and_then(|s| s.first())
            .cloned()
        {
            if visited.contains(&parent_id) {
                tracing::warn!(id = %parent_id, "Supersession cycle detected on back-walk");
                break;
            }
            let Some(stored) = self.storage.get_episode(&parent_id)? else {
                break;
            };
            visited.insert(parent_id);
            current = open_stored(self.encryptor.as_ref(), stored)?;
        }

        // Forward-walk the fan-out from the root, oldest first
        let mut chain = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<Episode> = VecDeque::new();
        seen.insert(current.id.clone());
        queue.push_back(current);
        while let Some(episode) = queue.pop_front() {
            for next_id in &episode.superseded_by {
                if !seen.insert(next_id.clone()) {
                    continue;
                }
                if let Some(stored) = self.storage.get_episode(next_id)? {
                    queue.push_back(open_stored(self.encryptor.as_ref(), stored)?);
                }
            }
            chain.push(episode);
        }

        Ok(chain)
    }

    /// Builds a cryptographic snapshot over the as-stored episode set and
    /// persists it when the backend supports anchoring. Returns the snapshot
    /// and the record location, if written.
    ///
    /// # Errors
    ///
    /// Surfaces storage failures.
    pub fn create_snapshot(&mut self) -> Result<(Snapshot, Option<String>)> {
        self.ensure_initialized()?;
        let now = current_timestamp_ms();

        // Hash the stored representation: ciphertext stays ciphertext
        let stored = self.storage.get_all_episodes()?;
        let snapshot = Snapshot::build(&stored, now);

        let location = match self.storage.anchor_store() {
            Some(anchors) => Some(anchors.save_snapshot(&snapshot.to_record())?),
            None => None,
        };
        tracing::info!(root = %snapshot.root_hex(), episodes = snapshot.episode_count(), "Snapshot created");
        Ok((snapshot, location))
    }

    /// Recomputes the snapshot root and compares it against an expected one.
    ///
    /// # Errors
    ///
    /// Surfaces storage failures; a malformed expected root is
    /// [`Error::InvalidInput`].
    pub fn verify_root(&mut self, expected_root_hex: &str) -> Result<bool> {
        let expected = expected_root_hex.trim().to_lowercase();
        if expected.len() != 64 || !expected.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::InvalidInput("root must be 64 hex characters".to_string()));
        }
        let (snapshot, _) = self.create_snapshot()?;
        Ok(snapshot.root_hex() == expected)
    }

    /// Loads an episode in its as-stored form (no decryption), for proof
    /// verification against a snapshot.
    ///
    /// # Errors
    ///
    /// Surfaces storage failures.
    pub fn stored_episode(&mut self, id: &str) -> Result<Option<Episode>> {
        self.ensure_initialized()?;
        self.storage.get_episode(id)
    }

    /// Emits one `summary` episode covering all non-summary episodes of the
    /// last `hours` hours, optionally superseding them. Returns `None` when
    /// the window is empty.
    ///
    /// # Errors
    ///
    /// Surfaces storage and crypto failures.
    pub fn hourly_summary(&mut self, hours: u64, mark_superseded: bool) -> Result<Option<Episode>> {
        self.ensure_initialized()?;
        let now = current_timestamp_ms();
        #[allow(clippy::cast_possible_wrap)]
        let cutoff = now - (hours as i64) * 3_600_000;

        let mut sources: Vec<(String, i64)> = self
            .index
            .iter()
            .filter(|(_, doc)| {
                doc.created_at >= cutoff && doc.episode_type != EpisodeType::Summary
            })
            .map(|(id, doc)| (id.clone(), doc.created_at))
            .collect();
        if sources.is_empty() {
            return Ok(None);
        }
        sources.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

        let mut lines = Vec::with_capacity(sources.len());
        let mut source_ids = Vec::with_capacity(sources.len());
        for (id, _) in &sources {
            let Some(stored) = self.storage.get_episode(id)? else {
                continue;
            };
            let episode = open_stored(self.encryptor.as_ref(), stored)?;
            let time = format_time(episode.created_at);
            let mut excerpt: String = episode.text.chars().take(80).collect();
            if episode.text.chars().count() > 80 {
                excerpt.push('…');
            }
            lines.push(format!("- [{time}] ({}) {excerpt}", episode.episode_type));
            source_ids.push(episode.id);
        }

        let text = format!(
            "Summary of the last {hours}h ({} episodes):\n{}",
            source_ids.len(),
            lines.join("\n")
        );

        let mut opts = RememberOptions::new()
            .with_type(EpisodeType::Summary)
            .with_tags(["summary"]);
        if mark_superseded {
            opts.supersedes = Some(source_ids);
        }
        let mut created = self.remember(&text, opts)?;
        Ok(Some(created.remove(0)))
    }
}

/// `HH:MM` UTC for summary listings.
fn format_time(ms: i64) -> String {
    use chrono::TimeZone;
    chrono::Utc
        .timestamp_millis_opt(ms)
        .single()
        .map_or_else(|| "??:??".to_string(), |dt| dt.format("%H:%M").to_string())
}

/// Ensures an episode carries tokens, recomputing from text when the stored
/// form stripped them (encrypted stores).
fn with_tokens(mut episode: Episode) -> Episode {
    if episode.tokens.is_empty() && !episode.text.is_empty() {
        episode.tokens = tokenize(&episode.text);
    }
    episode
}

fn episode_tokens(episode: &Episode) -> Vec<String> {
    if episode.tokens.is_empty() {
        tokenize(&episode.text)
    } else {
        episode.tokens.clone()
    }
}
