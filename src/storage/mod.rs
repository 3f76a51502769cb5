pub mod local;

pub use local::{FileStorage, MemoryStorage, StorageBackend, StorageKey};
