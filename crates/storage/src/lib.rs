#![forbid(unsafe_code)]

pub mod blob;
pub mod scoped;

pub use blob::{BlobStore, JsonFileStore, MemoryBlobStore, StorageError};
pub use scoped::{Owned, Resync, ScopedStore};
