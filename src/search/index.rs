//! In-memory inverted statistics and ranked search.
//!
//! The index holds document frequencies, per-document term frequencies, and
//! the episode metadata ranking needs. It is owned by the orchestrator and
//! rebuilt or restored from [`PersistedIndex`] on startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::analysis::tokenize;
use crate::models::{
    Episode, EpisodeType, RecallOptions, SearchHit, IMPORTANCE_DECAY_PER_DAY, SUPERSEDED_PENALTY,
};
use crate::search::scoring::{bm25, idf};
use crate::search::SynonymTable;
use crate::{days_since, Error, Result};

/// Version tag of the persisted index format.
pub const INDEX_VERSION: &str = "1.1";

/// Per-document entry: length, term frequencies, and ranking metadata.
#[derive(Debug, Clone, Default)]
pub struct DocEntry {
    /// Document length in tokens.
    pub dl: usize,
    /// Term frequencies. Empty right after a restore until tokens are
    /// attached from the reloaded episode.
    pub tf: HashMap<String, u32>,
    /// Creation time (unix ms).
    pub created_at: i64,
    /// Stored importance.
    pub importance: f64,
    /// Last access time (unix ms).
    pub last_accessed_at: i64,
    /// Tag set.
    pub tags: Vec<String>,
    /// Episode type.
    pub episode_type: EpisodeType,
    /// Ids of episodes superseding this one.
    pub superseded_by: Vec<String>,
}

/// Serialized metadata for one document inside the persisted index.
/// Stored as a JSON string value to keep the wire format stable.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedDocMeta {
    created_at: i64,
    importance: f64,
    last_accessed_at: i64,
    tags: Vec<String>,
    #[serde(rename = "type")]
    episode_type: String,
}

/// The on-disk BM25 index format (version 1.1).
///
/// Per-document term frequencies are deliberately not part of this format;
/// a restore therefore yields an index that can accept or reject itself
/// against the episode set but must re-attach tokens before searching.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedIndex {
    /// Format version tag.
    pub version: String,
    /// Document frequency per term.
    pub df: HashMap<String, u32>,
    /// Token count per document.
    pub doc_lengths: HashMap<String, usize>,
    /// JSON-string metadata per document.
    pub doc_meta: HashMap<String, String>,
    /// Number of indexed documents.
    pub total_docs: usize,
    /// Sum of all document lengths.
    pub total_length: usize,
    /// Newest `createdAt` ever indexed.
    pub last_indexed_timestamp: i64,
}

/// In-memory BM25 index over the currently indexed episodes.
#[derive(Debug, Default)]
pub struct MemoryIndex {
    df: HashMap<String, u32>,
    docs: HashMap<String, DocEntry>,
    total_docs: usize,
    total_length: usize,
    last_indexed_timestamp: i64,
}

impl MemoryIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of indexed documents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    /// Returns whether the index is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Total indexed documents (equals [`len`](Self::len) by invariant).
    #[must_use]
    pub const fn total_docs(&self) -> usize {
        self.total_docs
    }

    /// Sum of document lengths.
    #[must_use]
    pub const fn total_length(&self) -> usize {
        self.total_length
    }

    /// Newest `createdAt` the index has seen.
    #[must_use]
    pub const fn last_indexed_timestamp(&self) -> i64 {
        self.last_indexed_timestamp
    }

    /// Number of distinct terms.
    #[must_use]
    pub fn term_count(&self) -> usize {
        self.df.len()
    }

    /// Document frequency of a term.
    #[must_use]
    pub fn df(&self, term: &str) -> u32 {
        self.df.get(term).copied().unwrap_or(0)
    }

    /// Mean document length; 1 when empty.
    #[must_use]
    pub fn avgdl(&self) -> f64 {
        if self.total_docs == 0 {
            1.0
        } else {
            self.total_length as f64 / self.total_docs as f64
        }
    }

    /// Returns the entry for an indexed document.
    #[must_use]
    pub fn doc(&self, id: &str) -> Option<&DocEntry> {
        self.docs.get(id)
    }

    /// Returns whether a document is indexed.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.docs.contains_key(id)
    }

    /// Iterates over all indexed `(id, entry)` pairs in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &DocEntry)> {
        self.docs.iter()
    }

    /// Indexes an episode. No-op if the id is already present.
    pub fn add(&mut self, episode: &Episode) {
        if self.docs.contains_key(&episode.id) {
            return;
        }

        let mut tf: HashMap<String, u32> = HashMap::new();
        for token in &episode.tokens {
            *tf.entry(token.clone()).or_insert(0) += 1;
        }
        for term in tf.keys() {
            *self.df.entry(term.clone()).or_insert(0) += 1;
        }

        let dl = episode.tokens.len();
        self.total_docs += 1;
        self.total_length += dl;
        self.last_indexed_timestamp = self.last_indexed_timestamp.max(episode.created_at);

        self.docs.insert(
            episode.id.clone(),
            DocEntry {
                dl,
                tf,
                created_at: episode.created_at,
                importance: episode.importance,
                last_accessed_at: episode.last_accessed_at,
                tags: episode.tags.clone(),
                episode_type: episode.episode_type.clone(),
                superseded_by: episode.superseded_by.clone(),
            },
        );
    }

    /// Removes a document, decrementing each of its terms' document
    /// frequencies. Returns false if the id was not indexed.
    pub fn remove(&mut self, id: &str) -> bool {
        let Some(entry) = self.docs.remove(id) else {
            return false;
        };

        for term in entry.tf.keys() {
            if let Some(df) = self.df.get_mut(term) {
                *df = df.saturating_sub(1);
                if *df == 0 {
                    self.df.remove(term);
                }
            }
        }

        self.total_docs = self.total_docs.saturating_sub(1);
        self.total_length = self.total_length.saturating_sub(entry.dl);
        true
    }

    /// Clears the index and adds every episode.
    pub fn rebuild<'a, I>(&mut self, episodes: I)
    where
        I: IntoIterator<Item = &'a Episode>,
    {
        self.df.clear();
        self.docs.clear();
        self.total_docs = 0;
        self.total_length = 0;
        self.last_indexed_timestamp = 0;
        for ep in episodes {
            self.add(ep);
        }
    }

    /// Restores df, totals, and per-document metadata from the persisted
    /// form. Per-document `tf` starts empty; callers must attach tokens from
    /// reloaded episodes before searching.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] when any embedded metadata string fails
    /// to parse; the caller treats that as an absent index.
    pub fn restore(persisted: &PersistedIndex) -> Result<Self> {
        let mut docs = HashMap::with_capacity(persisted.doc_meta.len());
        for (id, raw) in &persisted.doc_meta {
            let meta: PersistedDocMeta =
                serde_json::from_str(raw).map_err(|e| Error::Malformed {
                    what: format!("persisted doc meta for {id}"),
                    cause: e.to_string(),
                })?;
            docs.insert(
                id.clone(),
                DocEntry {
                    dl: persisted.doc_lengths.get(id).copied().unwrap_or(0),
                    tf: HashMap::new(),
                    created_at: meta.created_at,
                    importance: meta.importance,
                    last_accessed_at: meta.last_accessed_at,
                    tags: meta.tags,
                    episode_type: EpisodeType::from(meta.episode_type),
                    superseded_by: Vec::new(),
                },
            );
        }

        Ok(Self {
            df: persisted.df.clone(),
            docs,
            total_docs: persisted.total_docs,
            total_length: persisted.total_length,
            last_indexed_timestamp: persisted.last_indexed_timestamp,
        })
    }

    /// Re-attaches term frequencies (and current metadata) to a restored
    /// document from its reloaded episode. Returns false when the id is not
    /// indexed.
    pub fn attach_episode(&mut self, episode: &Episode, tokens: &[String]) -> bool {
        let Some(entry) = self.docs.get_mut(&episode.id) else {
            return false;
        };

        let mut tf: HashMap<String, u32> = HashMap::new();
        for token in tokens {
            *tf.entry(token.clone()).or_insert(0) += 1;
        }

        // The episode on disk is the source of truth for everything except
        // the df table, which the persisted index already accounts for.
        if entry.dl != tokens.len() {
            self.total_length = self.total_length - entry.dl + tokens.len();
            entry.dl = tokens.len();
        }
        entry.tf = tf;
        entry.created_at = episode.created_at;
        entry.importance = episode.importance;
        entry.last_accessed_at = episode.last_accessed_at;
        entry.tags = episode.tags.clone();
        entry.episode_type = episode.episode_type.clone();
        entry.superseded_by = episode.superseded_by.clone();
        true
    }

    /// Updates a document's last-access time after a recall.
    pub fn touch(&mut self, id: &str, now_ms: i64) {
        if let Some(entry) = self.docs.get_mut(id) {
            entry.last_accessed_at = now_ms;
        }
    }

    /// Records a supersession back-edge on an indexed document.
    pub fn mark_superseded(&mut self, id: &str, by: &str) {
        if let Some(entry) = self.docs.get_mut(id) {
            if !entry.superseded_by.iter().any(|b| b == by) {
                entry.superseded_by.push(by.to_string());
            }
        }
    }

    /// Serializes the index into the persisted wire format.
    ///
    /// # Panics
    ///
    /// Does not panic: metadata serialization of plain structs is infallible.
    #[must_use]
    pub fn to_persisted(&self) -> PersistedIndex {
        let mut doc_lengths = HashMap::with_capacity(self.docs.len());
        let mut doc_meta = HashMap::with_capacity(self.docs.len());
        for (id, entry) in &self.docs {
            doc_lengths.insert(id.clone(), entry.dl);
            let meta = PersistedDocMeta {
                created_at: entry.created_at,
                importance: entry.importance,
                last_accessed_at: entry.last_accessed_at,
                tags: entry.tags.clone(),
                episode_type: entry.episode_type.as_str().to_string(),
            };
            doc_meta.insert(
                id.clone(),
                serde_json::to_string(&meta).unwrap_or_default(),
            );
        }

        PersistedIndex {
            version: INDEX_VERSION.to_string(),
            df: self.df.clone(),
            doc_lengths,
            doc_meta,
            total_docs: self.total_docs,
            total_length: self.total_length,
            last_indexed_timestamp: self.last_indexed_timestamp,
        }
    }

    /// Executes a filtered, ranked search.
    ///
    /// Scores blend BM25 (query terms plus weighted synonym terms) with an
    /// exponential recency term, scale by decayed importance, and down-rank
    /// superseded documents unless the options include them.
    #[must_use]
    pub fn search(
        &self,
        query: &str,
        synonyms: &SynonymTable,
        opts: &RecallOptions,
        now_ms: i64,
    ) -> Vec<SearchHit> {
        let qtokens = tokenize(query);
        if qtokens.is_empty() {
            return Vec::new();
        }

        let syntokens: Vec<String> = if opts.use_synonyms {
            let expansion = synonyms.expand(query);
            tokenize(&expansion.expanded.join(" "))
                .into_iter()
                .filter(|t| !qtokens.contains(t))
                .collect()
        } else {
            Vec::new()
        };

        let avgdl = self.avgdl();
        let mut hits: Vec<SearchHit> = Vec::new();

        for (id, doc) in &self.docs {
            if !opts.tags.iter().all(|t| doc.tags.contains(t)) {
                continue;
            }
            if let Some(wanted) = &opts.episode_type {
                if doc.episode_type != *wanted {
                    continue;
                }
            }
            if let Some(after) = opts.after {
                if doc.created_at < after {
                    continue;
                }
            }
            if let Some(before) = opts.before {
                if doc.created_at > before {
                    continue;
                }
            }

            let eff_importance = doc.importance
                * IMPORTANCE_DECAY_PER_DAY.powf(days_since(doc.last_accessed_at, now_ms));
            if let Some(min) = opts.min_importance {
                if eff_importance < min {
                    continue;
                }
            }

            let score_terms = |terms: &[String]| -> f64 {
                terms
                    .iter()
                    .map(|t| {
                        let tf = doc.tf.get(t).copied().unwrap_or(0);
                        bm25(tf, doc.dl, avgdl, idf(self.df(t) as usize, self.total_docs))
                    })
                    .sum()
            };

            let base = score_terms(&qtokens);
            let syn = score_terms(&syntokens);
            let total_bm25 = syn.mul_add(opts.synonym_weight, base);
            if total_bm25 <= 0.0 {
                continue;
            }

            let recency = (-opts.recency_lambda * days_since(doc.created_at, now_ms)).exp();
            let blended =
                (1.0 - opts.recency_weight) * total_bm25 + opts.recency_weight * recency;
            let mut score = blended * (0.5 + eff_importance);

            if !opts.include_superseded && !doc.superseded_by.is_empty() {
                score *= SUPERSEDED_PENALTY;
            }

            hits.push(SearchHit {
                id: id.clone(),
                score,
                bm25: total_bm25,
                recency,
            });
        }

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(opts.limit);
        hits
    }
}
