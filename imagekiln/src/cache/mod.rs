//! Local filesystem cache.
//!
//! Derived images and their source originals are cached as plain files
//! under `{root}/{namespace}/{cache key}/`. The layout is the contract:
//! the store writes it, the reaper sweeps it, and the upload pool mirrors
//! the same relative paths to the remote store.
//!
//! There is deliberately no in-memory index. The reaper deletes files
//! underneath the store on its own schedule, so presence is only ever
//! established by asking the filesystem; a deleted file is simply a miss.

pub mod paths;
pub mod store;

pub use paths::{CachePaths, SOURCE_FILENAME};
pub use store::{CacheEntry, CacheError, CacheStore};
