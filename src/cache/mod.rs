//! Namespaced request/response cache store.
//!
//! This module provides the storage half of the offline layer:
//! - Entries keyed by request identity (method + normalized URL)
//! - Stored responses answer only requests that agree on their `Vary` headers
//! - Namespaces, with versioned names that can be superseded in one step
//! - Per-namespace count and age limits, oldest evicted first
//! - Only GET requests with 200 responses are ever stored

mod layer;
mod storage;
mod traits;

pub use layer::{versioned_name, Cache, CacheStore, ExpirationPolicy, MAX_AGE_LIMIT_SECONDS};
pub use storage::SqliteStorage;
pub use traits::{CacheResult, CacheSource};

#[cfg(test)]
pub use storage::CacheStorage;
#[cfg(test)]
pub use traits::CachedResponse;
