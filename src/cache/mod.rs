//! Offline cache for API responses
//!
//! This module provides the network-first loader and the persistent stores it
//! writes to. A successful fetch overwrites the stored copy under its key; when a
//! later fetch fails, the stored copy is served instead and flagged as stale.

mod loader;
mod store;

pub use loader::{CacheFirstLoader, FetchError, LoadError, LoadNotice, Loaded, Source};
pub use store::{FileStore, KeyValueStore, MemoryStore, StoreError};
