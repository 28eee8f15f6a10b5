//! Synonym equivalence groups and query expansion.
//!
//! A group is a set of phrases treated as mutually equivalent. Loading is
//! strictly additive across layers: bundled defaults, then the file named by
//! `ENGRAM_SYNONYMS`, then the per-store `synonyms.json`, then an explicit
//! configuration path, then runtime additions. The table is an injected
//! handle owned by the orchestrator, so per-store vocabularies never leak
//! across instances.

use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::Path;

use crate::{Error, Result};

/// Environment variable naming an extra synonym file.
pub const ENV_SYNONYMS: &str = "ENGRAM_SYNONYMS";

/// Bundled default groups: common crypto tickers and agent-task vocabulary.
const DEFAULT_GROUPS: &[&[&str]] = &[
    &["fxrp", "flare xrp"],
    &["xrp", "ripple"],
    &["usdt", "tether"],
    &["usdc", "usd coin"],
    &["btc", "bitcoin"],
    &["eth", "ethereum"],
    &["allocation", "position", "holding"],
    &["trade", "swap", "exchange"],
    &["buy", "purchase", "acquire"],
    &["sell", "liquidate"],
    &["fee", "cost", "charge"],
    &["wallet", "account"],
    &["price", "rate", "quote"],
    &["profit", "gain", "return"],
    &["error", "failure", "fault"],
    &["config", "configuration", "settings"],
    &["preference", "setting"],
    &["memory", "recollection"],
];

/// Accepts both synonym file shapes: `{ "groups": [...] }` and a bare array.
#[derive(Deserialize)]
#[serde(untagged)]
enum SynonymFile {
    Wrapped { groups: Vec<Vec<String>> },
    Bare(Vec<Vec<String>>),
}

/// The result of expanding a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expansion {
    /// Lowercased words of the query itself.
    pub original: Vec<String>,
    /// Words contributed by synonym peers, minus anything in `original`.
    pub expanded: Vec<String>,
}

/// Bidirectional equivalence-class lookup for query expansion.
#[derive(Debug, Clone, Default)]
pub struct SynonymTable {
    groups: Vec<Vec<String>>,
    /// phrase -> peer phrases (excluding the phrase itself)
    lookup: HashMap<String, BTreeSet<String>>,
}

impl SynonymTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a table pre-loaded with the bundled default groups.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut table = Self::new();
        for group in DEFAULT_GROUPS {
            table.add_group(group.iter().map(|s| (*s).to_string()).collect());
        }
        table
    }

    /// Number of loaded groups.
    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Returns whether no groups are loaded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Adds one equivalence group. Groups with fewer than two entries are
    /// ignored.
    pub fn add_group(&mut self, group: Vec<String>) {
        let group: Vec<String> = group
            .into_iter()
            .map(|p| p.trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .collect();
        if group.len() < 2 {
            return;
        }

        for phrase in &group {
            let peers = self.lookup.entry(phrase.clone()).or_default();
            for other in &group {
                if other != phrase {
                    peers.insert(other.clone());
                }
            }
        }
        self.groups.push(group);
    }

    /// Merges groups from a synonym file (either `{ "groups": [...] }` or a
    /// top-level array). Returns the number of groups added.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] when the file exists but cannot be
    /// parsed, [`Error::Transport`] when it cannot be read.
    pub fn load_file(&mut self, path: &Path) -> Result<usize> {
        let raw = fs::read_to_string(path).map_err(|e| Error::Transport {
            operation: "read_synonyms".to_string(),
            cause: format!("{}: {e}", path.display()),
        })?;

        let parsed: SynonymFile = serde_json::from_str(&raw).map_err(|e| Error::Malformed {
            what: format!("synonym file {}", path.display()),
            cause: e.to_string(),
        })?;

        let groups = match parsed {
            SynonymFile::Wrapped { groups } | SynonymFile::Bare(groups) => groups,
        };

        let before = self.groups.len();
        for group in groups {
            self.add_group(group);
        }
        let added = self.groups.len() - before;
        tracing::debug!(path = %path.display(), groups = added, "Loaded synonym layer");
        Ok(added)
    }

    /// Merges the optional layer named by the `ENGRAM_SYNONYMS` environment
    /// variable. Missing or unreadable files are skipped with a warning.
    pub fn load_env_layer(&mut self) {
        let Ok(path) = std::env::var(ENV_SYNONYMS) else {
            return;
        };
        if path.trim().is_empty() {
            return;
        }
        if let Err(e) = self.load_file(Path::new(&path)) {
            tracing::warn!(path = %path, error = %e, "Skipping env synonym layer");
        }
    }

    /// Expands a query through the table.
    ///
    /// Phrase keys are tried longest-first; every key that occurs as a
    /// substring of the lowercased query contributes its peers' individual
    /// words, excluding words already present in the query.
    #[must_use]
    pub fn expand(&self, query: &str) -> Expansion {
        let lowered = query.to_lowercase();
        let original: Vec<String> = lowered.split_whitespace().map(String::from).collect();

        let mut keys: Vec<&String> = self.lookup.keys().collect();
        keys.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

        let mut expanded: Vec<String> = Vec::new();
        for key in keys {
            if !lowered.contains(key.as_str()) {
                continue;
            }
            for peer in &self.lookup[key] {
                for word in peer.split_whitespace() {
                    if original.iter().any(|w| w == word) {
                        continue;
                    }
                    if expanded.iter().any(|w| w == word) {
                        continue;
                    }
                    expanded.push(word.to_string());
                }
            }
        }

        Expansion { original, expanded }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_loaded() {
        let table = SynonymTable::with_defaults();
        assert!(!table.is_empty());
    }

    #[test]
    fn test_small_groups_ignored() {
        let mut table = SynonymTable::new();
        table.add_group(vec!["alone".to_string()]);
        table.add_group(vec![]);
        assert!(table.is_empty());
    }

    #[test]
    fn test_expand_bidirectional() {
        let mut table = SynonymTable::new();
        table.add_group(vec!["fxrp".to_string(), "flare xrp".to_string()]);

        let e = table.expand("FXRP allocation");
        assert_eq!(e.original, vec!["fxrp", "allocation"]);
        assert!(e.expanded.contains(&"flare".to_string()));
        assert!(e.expanded.contains(&"xrp".to_string()));

        // And the other direction: a multi-word phrase maps back to the ticker
        let e = table.expand("my flare xrp holdings");
        assert!(e.expanded.contains(&"fxrp".to_string()));
    }

    #[test]
    fn test_expand_excludes_original_words() {
        let mut table = SynonymTable::new();
        table.add_group(vec!["trade".to_string(), "swap".to_string()]);

        let e = table.expand("trade or swap");
        assert!(e.expanded.is_empty());
    }

    #[test]
    fn test_expand_no_match() {
        let table = SynonymTable::with_defaults();
        let e = table.expand("completely unrelated zzz");
        assert!(e.expanded.is_empty());
    }

    #[test]
    fn test_load_wrapped_and_bare_formats() {
        let dir = tempfile::tempdir().unwrap();

        let wrapped = dir.path().join("wrapped.json");
        let mut f = std::fs::File::create(&wrapped).unwrap();
        write!(f, r#"{{"groups": [["gas", "fuel"], ["solo"]]}}"#).unwrap();

        let bare = dir.path().join("bare.json");
        let mut f = std::fs::File::create(&bare).unwrap();
        write!(f, r#"[["node", "validator"]]"#).unwrap();

        let mut table = SynonymTable::new();
        // The one-element group is dropped
        assert_eq!(table.load_file(&wrapped).unwrap(), 1);
        assert_eq!(table.load_file(&bare).unwrap(), 1);
        assert_eq!(table.len(), 2);

        assert!(table.expand("gas fees").expanded.contains(&"fuel".to_string()));
        assert!(table.expand("node down").expanded.contains(&"validator".to_string()));
    }

    #[test]
    fn test_load_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "not json at all").unwrap();

        let mut table = SynonymTable::new();
        let err = table.load_file(&path).unwrap_err();
        assert!(matches!(err, Error::Malformed { .. }));
    }

    #[test]
    fn test_layers_are_additive() {
        let mut table = SynonymTable::with_defaults();
        let before = table.len();
        table.add_group(vec!["custom".to_string(), "bespoke".to_string()]);
        assert_eq!(table.len(), before + 1);
        // Earlier layers still answer
        assert!(!table.expand("fxrp").expanded.is_empty());
    }
}
