//! Order-independent Merkle tree with per-leaf proofs.
//!
//! Two canonicalizations make the root a pure function of the leaf multiset:
//! every layer is byte-ordered before pairing, and each pair is sorted before
//! hashing. An odd node at any layer is paired with itself.

use sha2::{Digest, Sha256};

/// A SHA-256 digest.
pub type Hash32 = [u8; 32];

/// Root of a tree over zero leaves.
pub const EMPTY_ROOT: Hash32 = [0u8; 32];

/// Combines two nodes: `SHA-256(min(a,b) || max(a,b))`.
#[must_use]
pub fn hash_pair(a: &Hash32, b: &Hash32) -> Hash32 {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    let mut hasher = Sha256::new();
    hasher.update(lo);
    hasher.update(hi);
    hasher.finalize().into()
}

/// Which side of the current node a proof sibling sits on.
///
/// The combine step sorts the pair, so verification does not depend on the
/// position; it is recorded for display and for cross-checking other
/// implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiblingPosition {
    /// Sibling was the left element of the pair.
    Left,
    /// Sibling was the right element of the pair.
    Right,
}

/// One layer step of a Merkle proof.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofStep {
    /// The sibling hash at this layer.
    pub sibling: Hash32,
    /// The sibling's side.
    pub position: SiblingPosition,
}

/// A path from a leaf to the root.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MerkleProof {
    /// Sibling hashes, leaf layer first.
    pub steps: Vec<ProofStep>,
}

/// A Merkle tree with all layers retained for proof generation.
///
/// Layers hold their nodes in the byte order used for pairing, which is why
/// the original leaf order is not recoverable from the tree; callers that
/// need it (snapshots) keep their own `(id, leaf)` list.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    /// `layers[0]` holds the sorted leaves; the last layer holds the root.
    layers: Vec<Vec<Hash32>>,
}

impl MerkleTree {
    /// Builds a tree over the given leaves. Leaf order is irrelevant.
    #[must_use]
    pub fn from_leaves(mut leaves: Vec<Hash32>) -> Self {
        leaves.sort_unstable();
        let mut layers = vec![leaves];

        while layers.last().is_some_and(|l| l.len() > 1) {
            let current = layers.last().expect("layer exists");
            let mut next = Vec::with_capacity(current.len().div_ceil(2));
            for pair in current.chunks(2) {
                let combined = match pair {
                    [a, b] => hash_pair(a, b),
                    // Odd node: duplicated by pairing with itself
                    [a] => hash_pair(a, a),
                    _ => unreachable!("chunks(2) yields 1 or 2 elements"),
                };
                next.push(combined);
            }
            next.sort_unstable();
            layers.push(next);
        }

        Self { layers }
    }

    /// Number of leaves.
    #[must_use]
    pub fn leaf_count(&self) -> usize {
        self.layers.first().map_or(0, Vec::len)
    }

    /// The root. All-zero for an empty tree; the leaf itself for one leaf.
    #[must_use]
    pub fn root(&self) -> Hash32 {
        match self.layers.last() {
            Some(top) if !top.is_empty() => top[0],
            _ => EMPTY_ROOT,
        }
    }

    /// Builds the proof for a leaf, walking the recorded layers by value.
    /// Returns `None` when the leaf is not in the tree.
    #[must_use]
    pub fn proof_of(&self, leaf: &Hash32) -> Option<MerkleProof> {
        if self.leaf_count() == 0 {
            return None;
        }

        let mut current = *leaf;
        let mut steps = Vec::with_capacity(self.layers.len());
        for layer in &self.layers[..self.layers.len() - 1] {
            let i = layer.iter().position(|h| *h == current)?;
            let sibling_index = i ^ 1;
            let (sibling, position) = if sibling_index < layer.len() {
                let position = if sibling_index > i {
                    SiblingPosition::Right
                } else {
                    SiblingPosition::Left
                };
                (layer[sibling_index], position)
            } else {
                // Odd node pairs with itself
                (current, SiblingPosition::Right)
            };
            current = hash_pair(&current, &sibling);
            steps.push(ProofStep { sibling, position });
        }

        // One-leaf trees have a single layer and an empty path
        if self.layers.len() == 1 && self.layers[0][0] != *leaf {
            return None;
        }

        Some(MerkleProof { steps })
    }
}

/// Recomputes the path from `leaf` through `proof` and compares against
/// `root`. Position is irrelevant to the arithmetic because the combine step
/// canonicalizes pair order.
#[must_use]
pub fn verify_proof(leaf: &Hash32, proof: &MerkleProof, root: &Hash32) -> bool {
    let mut current = *leaf;
    for step in &proof.steps {
        current = hash_pair(&current, &step.sibling);
    }
    current == *root
}
