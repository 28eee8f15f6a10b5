//! Property-based tests for the universal contracts: tokenizer determinism,
//! BM25 monotonicity, index algebra, encryption round-trips, canonical hash
//! order-independence, and Merkle soundness.

use proptest::prelude::*;
use std::collections::HashMap;

use engram::analysis::{is_stopword, stem, tokenize};
use engram::crypto::Encryptor;
use engram::integrity::{canonical_hash, MerkleTree, Snapshot};
use engram::models::{Episode, RecallOptions};
use engram::search::{bm25, idf, MemoryIndex, SynonymTable};

fn episode(id: &str, text: &str) -> Episode {
    let mut ep = Episode::new(id, "prop", text);
    ep.created_at = 1_000;
    ep.last_accessed_at = 1_000;
    ep.tokens = tokenize(text);
    ep
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    /// Tokenization is deterministic and never emits stopwords or
    /// single-character tokens.
    #[test]
    fn prop_tokenizer_deterministic_and_clean(text in ".{0,300}") {
        let a = tokenize(&text);
        let b = tokenize(&text);
        prop_assert_eq!(&a, &b);
        for token in &a {
            prop_assert!(!is_stopword(token), "stopword leaked: {}", token);
            prop_assert!(token.len() > 1, "short token leaked: {}", token);
        }
    }

    /// Stemming an already-stemmed suffix-table form is stable for the
    /// common plural rule.
    #[test]
    fn prop_stem_plural_stable(word in "[a-z]{4,12}") {
        let stemmed = stem(&word);
        // A second pass never reintroduces the stripped plural
        if word.ends_with('s') && !word.ends_with("ss") {
            prop_assert!(!stem(&stemmed).ends_with("ss"));
        }
        // Stemming output never grows beyond ies->y replacement
        prop_assert!(stem(&stemmed).len() <= stemmed.len());
    }

    /// BM25 is monotone in tf; IDF is monotone non-increasing in df.
    #[test]
    fn prop_bm25_monotonicity(
        tf1 in 0u32..50,
        tf2 in 0u32..50,
        dl in 1usize..200,
        df1 in 1usize..100,
        df2 in 1usize..100,
    ) {
        let (lo_tf, hi_tf) = (tf1.min(tf2), tf1.max(tf2));
        let idf_term = idf(df1, 100);
        prop_assert!(bm25(lo_tf, dl, 50.0, idf_term) <= bm25(hi_tf, dl, 50.0, idf_term) + 1e-12);

        let (lo_df, hi_df) = (df1.min(df2), df1.max(df2));
        prop_assert!(idf(hi_df, 100) <= idf(lo_df, 100) + 1e-12);
    }

    /// After any interleaving of adds and removes, df counts exactly the
    /// documents holding each term, and the totals agree.
    #[test]
    fn prop_index_algebra(ops in prop::collection::vec((0usize..8, "[a-z]{2,6}( [a-z]{2,6}){0,5}"), 1..40)) {
        let mut index = MemoryIndex::new();
        let mut live: HashMap<String, Episode> = HashMap::new();

        for (i, (slot, text)) in ops.iter().enumerate() {
            let id = format!("doc{slot}");
            if live.contains_key(&id) {
                index.remove(&id);
                live.remove(&id);
            } else {
                let ep = episode(&id, text);
                index.add(&ep);
                live.insert(id, ep);
            }

            // Invariants hold at every step
            prop_assert_eq!(index.total_docs(), live.len(), "step {}", i);
            let expected_length: usize = live.values().map(|e| e.tokens.len()).sum();
            prop_assert_eq!(index.total_length(), expected_length, "step {}", i);
            for (id, ep) in &live {
                prop_assert!(index.contains(id), "step {}: {} missing", i, id);
                for term in &ep.tokens {
                    let holders = live
                        .values()
                        .filter(|e| e.tokens.contains(term))
                        .count();
                    prop_assert_eq!(index.df(term) as usize, holders, "step {}: df[{}]", i, term);
                }
            }
        }
    }

    /// decrypt(encrypt(T, K), K) == T for any UTF-8 text; a different key
    /// must fail.
    #[test]
    fn prop_encryption_roundtrip(text in ".{0,200}", key_a in any::<[u8; 32]>(), key_b in any::<[u8; 32]>()) {
        let enc = Encryptor::new(&key_a);
        let envelope = enc.seal_str(&text).unwrap();
        prop_assert_eq!(enc.open(&envelope).unwrap(), text);

        if key_a != key_b {
            prop_assert!(Encryptor::new(&key_b).open(&envelope).is_err());
        }
    }

    /// The canonical hash does not depend on metadata insertion order.
    #[test]
    fn prop_canonical_hash_order_independent(
        keys in prop::collection::hash_set("[a-z]{1,8}", 1..6),
    ) {
        let keys: Vec<String> = keys.into_iter().collect();
        let mut forward = episode("ep-prop", "body");
        for k in &keys {
            forward.metadata.insert(k.clone(), serde_json::json!(1));
        }
        let mut backward = episode("ep-prop", "body");
        for k in keys.iter().rev() {
            backward.metadata.insert(k.clone(), serde_json::json!(1));
        }
        prop_assert_eq!(canonical_hash(&forward), canonical_hash(&backward));
    }

    /// Every leaf of a tree proves against the root; permuting leaves never
    /// changes the root.
    #[test]
    fn prop_merkle_soundness(seed_texts in prop::collection::hash_set("[a-z]{1,12}", 1..12), rotation in 0usize..12) {
        let episodes: Vec<Episode> = seed_texts
            .iter()
            .enumerate()
            .map(|(i, t)| episode(&format!("ep-{i:03}"), t))
            .collect();
        let leaves: Vec<_> = episodes.iter().map(canonical_hash).collect();

        let tree = MerkleTree::from_leaves(leaves.clone());
        let root = tree.root();
        for leaf in &leaves {
            let proof = tree.proof_of(leaf).unwrap();
            prop_assert!(engram::integrity::verify_proof(leaf, &proof, &root));
        }

        let mut rotated = leaves.clone();
        let k = rotation % rotated.len().max(1);
        rotated.rotate_left(k);
        prop_assert_eq!(MerkleTree::from_leaves(rotated).root(), root);
    }

    /// Snapshot roots are stable under episode input order.
    #[test]
    fn prop_snapshot_order_independent(texts in prop::collection::vec("[a-z ]{1,30}", 1..8)) {
        let episodes: Vec<Episode> = texts
            .iter()
            .enumerate()
            .map(|(i, t)| episode(&format!("ep-{i:03}"), t))
            .collect();
        let forward = Snapshot::build(&episodes, 7).root();

        let mut reversed = episodes;
        reversed.reverse();
        prop_assert_eq!(Snapshot::build(&reversed, 7).root(), forward);
    }
}

/// Search over a fixed corpus is a pure function of the index state.
#[test]
fn search_is_deterministic() {
    let mut index = MemoryIndex::new();
    for (i, text) in [
        "the gas fee doubled overnight",
        "checked the gas price on flare",
        "moved tokens across the bridge",
    ]
    .iter()
    .enumerate()
    {
        index.add(&episode(&format!("doc{i}"), text));
    }

    let synonyms = SynonymTable::with_defaults();
    let opts = RecallOptions::default();
    let a = index.search("gas fee", &synonyms, &opts, 2_000);
    let b = index.search("gas fee", &synonyms, &opts, 2_000);
    assert_eq!(a, b);
    assert!(!a.is_empty());
}
