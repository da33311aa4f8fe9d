//! Per-type object caches keyed by row id.
//!
//! Caches are best-effort: a missing, unreadable or stale entry is a miss, never an error.
//! They compose as decorators over a storing [`Cache`]:
//!
//! - [`MemoryCache`]: in-process map
//! - [`DiskCache`]: one JSON file per entry under a directory
//! - [`DelegatingCache`]: forwards to another cache, counting hits and misses
//! - [`IdBackedCache`]: outermost layer, evicts entries whose backing row is gone
//!
//! Every entry carries a version that changes on each `put`. Reaping only removes an entry
//! whose version is unchanged since it was checked, so a concurrent `put` is never lost.

mod delegating;
mod disk;
mod id_backed;
mod memory;

pub use delegating::DelegatingCache;
pub use disk::DiskCache;
pub use id_backed::IdBackedCache;
pub use memory::MemoryCache;

use crate::properties::RowId;

pub trait Cache<V>: Send + Sync {
    fn get(&self, id: RowId) -> Option<V>;

    /// Store `value`, returning the entry's new version.
    fn put(&self, id: RowId, value: V) -> u64;

    fn remove(&self, id: RowId) -> Option<V>;

    fn keys(&self) -> Vec<RowId>;

    fn version(&self, id: RowId) -> Option<u64>;

    /// Remove `id` only if it is still at `version`. Returns whether it was removed.
    fn remove_if_version(&self, id: RowId, version: u64) -> bool;

    fn clear(&self);

    fn len(&self) -> usize {
        self.keys().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn contains(&self, id: RowId) -> bool {
        self.version(id).is_some()
    }
}
