//! Search: BM25 scoring, synonym expansion, and the in-memory index.

mod index;
mod scoring;
mod synonyms;

pub use index::{DocEntry, MemoryIndex, PersistedIndex, INDEX_VERSION};
pub use scoring::{bm25, idf, B, K1};
pub use synonyms::{Expansion, SynonymTable};

pub use crate::models::RecallOptions;
