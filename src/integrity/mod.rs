//! Integrity: canonical episode hashing, the order-independent Merkle tree,
//! and verifiable snapshots.

mod canonical;
mod merkle;
mod snapshot;

pub use canonical::{canonical_hash, canonical_hash_hex, canonical_json};
pub use merkle::{
    hash_pair, verify_proof, Hash32, MerkleProof, MerkleTree, ProofStep, SiblingPosition,
    EMPTY_ROOT,
};
pub use snapshot::{verify_episode, Snapshot, SnapshotRecord};
