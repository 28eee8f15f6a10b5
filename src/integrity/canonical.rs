//! Canonical episode serialization and hashing.

use sha2::{Digest, Sha256};

use crate::integrity::Hash32;
use crate::models::Episode;

/// Serializes an episode with lexicographically ordered keys.
///
/// The value tree goes through `serde_json::Value`, whose object maps are
/// ordered, so key order in the source representation cannot influence the
/// output. Hash the *as-stored* form: for an encrypted episode that is the
/// ciphertext envelope, which lets a remote verifier check proofs without
/// holding the key.
#[must_use]
pub fn canonical_json(episode: &Episode) -> String {
    serde_json::to_value(episode)
        .and_then(|v| serde_json::to_string(&v))
        .unwrap_or_default()
}

/// SHA-256 over the canonical UTF-8 bytes of an episode.
#[must_use]
pub fn canonical_hash(episode: &Episode) -> Hash32 {
    let mut hasher = Sha256::new();
    hasher.update(canonical_json(episode).as_bytes());
    hasher.finalize().into()
}

/// Hex form of [`canonical_hash`].
#[must_use]
pub fn canonical_hash_hex(episode: &Episode) -> String {
    hex::encode(canonical_hash(episode))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn episode(id: &str, text: &str) -> Episode {
        let mut ep = Episode::new(id, "test", text);
        ep.created_at = 1_000;
        ep.last_accessed_at = 1_000;
        ep
    }

    #[test]
    fn test_canonical_keys_are_sorted() {
        let json = canonical_json(&episode("ep-001", "body"));
        // agentId sorts before createdAt which sorts before text
        let agent = json.find("\"agentId\"").unwrap();
        let created = json.find("\"createdAt\"").unwrap();
        let text = json.find("\"text\"").unwrap();
        assert!(agent < created && created < text);
    }

    #[test]
    fn test_hash_is_deterministic() {
        let ep = episode("ep-001", "body");
        assert_eq!(canonical_hash(&ep), canonical_hash(&ep));
        assert_eq!(canonical_hash_hex(&ep).len(), 64);
    }

    #[test]
    fn test_hash_ignores_source_key_order() {
        // Two wire forms of the same episode with different key order
        let a: Episode = serde_json::from_str(
            r#"{"id":"e1","text":"t","type":"fact","importance":0.5,"agentId":"a",
                "chunkIndex":0,"totalChunks":1,"sourceId":"s","createdAt":1,
                "lastAccessedAt":1,"accessCount":0}"#,
        )
        .unwrap();
        let b: Episode = serde_json::from_str(
            r#"{"agentId":"a","accessCount":0,"createdAt":1,"chunkIndex":0,
                "id":"e1","importance":0.5,"lastAccessedAt":1,"sourceId":"s",
                "text":"t","totalChunks":1,"type":"fact"}"#,
        )
        .unwrap();
        assert_eq!(canonical_hash(&a), canonical_hash(&b));
    }

    #[test]
    fn test_hash_changes_with_content() {
        let a = episode("ep-001", "body");
        let mut b = a.clone();
        b.text = "different body".to_string();
        assert_ne!(canonical_hash(&a), canonical_hash(&b));
    }
}
