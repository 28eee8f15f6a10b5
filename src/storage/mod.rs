//! Storage backends for episodes, the tag index, and the persisted BM25 index.

mod filesystem;
mod remote;
mod traits;

pub use filesystem::FilesystemStore;
pub use remote::{KvTransport, MemoryTransport, RemoteStore};
pub use traits::{AnchorStore, EpisodeStore, IndexStore, StorageStats};
