//! Verifiable snapshots over the full episode set.

use serde::{Deserialize, Serialize};

use crate::integrity::canonical::canonical_hash;
use crate::integrity::merkle::{verify_proof, Hash32, MerkleProof, MerkleTree};
use crate::models::Episode;
use crate::{Error, Result};

/// A cryptographic snapshot: every episode's canonical hash, the Merkle tree
/// over them, and the root.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// `(episodeId, leafHash)` pairs, sorted by id for determinism.
    pub entries: Vec<(String, Hash32)>,
    /// The tree over all leaves.
    pub tree: MerkleTree,
    /// Creation time, unix ms.
    pub created_at: i64,
    /// Format/version tag.
    pub version: String,
}

impl Snapshot {
    /// Builds a snapshot over the given episodes (their as-stored forms).
    #[must_use]
    pub fn build(episodes: &[Episode], now_ms: i64) -> Self {
        let mut entries: Vec<(String, Hash32)> = episodes
            .iter()
            .map(|ep| (ep.id.clone(), canonical_hash(ep)))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let leaves: Vec<Hash32> = entries.iter().map(|(_, h)| *h).collect();
        let tree = MerkleTree::from_leaves(leaves);

        Self {
            entries,
            tree,
            created_at: now_ms,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// The Merkle root.
    #[must_use]
    pub fn root(&self) -> Hash32 {
        self.tree.root()
    }

    /// Hex form of the root.
    #[must_use]
    pub fn root_hex(&self) -> String {
        hex::encode(self.root())
    }

    /// Number of episodes covered.
    #[must_use]
    pub fn episode_count(&self) -> usize {
        self.entries.len()
    }

    /// Builds the inclusion proof for an episode id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when the id is not part of the snapshot.
    pub fn proof_for(&self, id: &str) -> Result<MerkleProof> {
        let leaf = self
            .entries
            .iter()
            .find(|(eid, _)| eid == id)
            .map(|(_, h)| h)
            .ok_or_else(|| Error::NotFound {
                what: format!("episode {id} in snapshot"),
            })?;
        self.tree.proof_of(leaf).ok_or_else(|| Error::Integrity {
            cause: format!("snapshot tree does not contain the leaf for {id}"),
        })
    }

    /// Serializes into the on-disk snapshot record.
    #[must_use]
    pub fn to_record(&self) -> SnapshotRecord {
        SnapshotRecord {
            root: self.root_hex(),
            episode_count: self.episode_count(),
            timestamp: self.created_at,
            episode_hashes: self.entries.iter().map(|(_, h)| hex::encode(h)).collect(),
            episode_ids: self.entries.iter().map(|(id, _)| id.clone()).collect(),
            engram_version: self.version.clone(),
        }
    }
}

/// Verifies that an episode's as-stored form is covered by `root`.
#[must_use]
pub fn verify_episode(episode: &Episode, proof: &MerkleProof, root: &Hash32) -> bool {
    verify_proof(&canonical_hash(episode), proof, root)
}

/// The persisted snapshot record (`anchors/snapshot-<ms>.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotRecord {
    /// Hex Merkle root.
    pub root: String,
    /// Number of episodes covered.
    pub episode_count: usize,
    /// Creation time, unix ms.
    pub timestamp: i64,
    /// Hex leaf hashes, in id order.
    pub episode_hashes: Vec<String>,
    /// Episode ids, lexicographically sorted.
    pub episode_ids: Vec<String>,
    /// Version of the engine that produced the record.
    pub engram_version: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrity::EMPTY_ROOT;

    fn episode(id: &str, text: &str) -> Episode {
        let mut ep = Episode::new(id, "test", text);
        ep.created_at = 1_000;
        ep.last_accessed_at = 1_000;
        ep
    }

    #[test]
    fn test_snapshot_is_deterministic() {
        let eps = vec![
            episode("ep-001", "first body"),
            episode("ep-002", "second body"),
            episode("ep-003", "third body"),
        ];
        let a = Snapshot::build(&eps, 42);
        let b = Snapshot::build(&eps, 42);
        assert_eq!(a.root(), b.root());

        // Input order does not matter
        let mut shuffled = eps;
        shuffled.reverse();
        let c = Snapshot::build(&shuffled, 42);
        assert_eq!(a.root(), c.root());
        assert_eq!(a.entries, c.entries, "entries are id-sorted");
    }

    #[test]
    fn test_body_swap_changes_root() {
        let eps = vec![episode("ep-001", "original"), episode("ep-002", "other")];
        let before = Snapshot::build(&eps, 42).root();

        let mut swapped = eps;
        swapped[0].text = "tampered".to_string();
        let after = Snapshot::build(&swapped, 42).root();
        assert_ne!(before, after);
    }

    #[test]
    fn test_proof_roundtrip_and_tamper() {
        let eps = vec![
            episode("ep-001", "first body"),
            episode("ep-002", "second body"),
            episode("ep-003", "third body"),
        ];
        let snap = Snapshot::build(&eps, 42);
        let root = snap.root();

        let proof = snap.proof_for("ep-001").unwrap();
        assert!(verify_episode(&eps[0], &proof, &root));

        let mut tampered = eps[0].clone();
        tampered.text = "evil".to_string();
        assert!(!verify_episode(&tampered, &proof, &root));
    }

    #[test]
    fn test_proof_for_unknown_id() {
        let snap = Snapshot::build(&[episode("ep-001", "x")], 42);
        assert!(matches!(
            snap.proof_for("ep-404"),
            Err(crate::Error::NotFound { .. })
        ));
    }

    #[test]
    fn test_empty_snapshot() {
        let snap = Snapshot::build(&[], 42);
        assert_eq!(snap.root(), EMPTY_ROOT);
        assert_eq!(snap.episode_count(), 0);
    }

    #[test]
    fn test_record_shape() {
        let eps = vec![episode("ep-002", "b"), episode("ep-001", "a")];
        let snap = Snapshot::build(&eps, 42);
        let record = snap.to_record();

        assert_eq!(record.episode_count, 2);
        assert_eq!(record.timestamp, 42);
        assert_eq!(record.episode_ids, vec!["ep-001", "ep-002"]);
        assert_eq!(record.root.len(), 64);

        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("episodeCount").is_some());
        assert!(json.get("episodeHashes").is_some());
        assert!(json.get("engramVersion").is_some());
    }
}
