use std::sync::atomic::{AtomicU64, Ordering};

use super::Cache;
use crate::properties::RowId;

/// Forwards every call to `inner`, keeping hit/miss counters.
#[derive(Debug)]
pub struct DelegatingCache<C> {
    name: String,
    inner: C,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<C> DelegatingCache<C> {
    pub fn new(name: &str, inner: C) -> Self {
        DelegatingCache {
            name: name.to_string(),
            inner,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

impl<V, C: Cache<V>> Cache<V> for DelegatingCache<C> {
    fn get(&self, id: RowId) -> Option<V> {
        let value = self.inner.get(id);
        if value.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            tracing::trace!("[DelegatingCache {}] miss for {}", self.name, id);
        }
        value
    }

    fn put(&self, id: RowId, value: V) -> u64 {
        self.inner.put(id, value)
    }

    fn remove(&self, id: RowId) -> Option<V> {
        self.inner.remove(id)
    }

    fn keys(&self) -> Vec<RowId> {
        self.inner.keys()
    }

    fn version(&self, id: RowId) -> Option<u64> {
        self.inner.version(id)
    }

    fn remove_if_version(&self, id: RowId, version: u64) -> bool {
        self.inner.remove_if_version(id, version)
    }

    fn clear(&self) {
        tracing::debug!("[DelegatingCache {}] cleared", self.name);
        self.inner.clear()
    }

    fn len(&self) -> usize {
        self.inner.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use test_log::test;

    #[test]
    fn counts_hits_and_misses() {
        let cache = DelegatingCache::new("Image", MemoryCache::<u32>::new());
        cache.put(1, 100);
        assert_eq!(cache.get(1), Some(100));
        assert_eq!(cache.get(2), None);
        assert_eq!(cache.get(1), Some(100));
        assert_eq!((cache.hits(), cache.misses()), (2, 1));
        assert_eq!(cache.inner().len(), 1);
    }
}
