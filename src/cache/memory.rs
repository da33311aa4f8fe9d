use parking_lot::RwLock;
use std::{collections::BTreeMap, sync::Arc};

use super::Cache;
use crate::properties::RowId;

#[derive(Debug)]
struct Entries<V> {
    next_version: u64,
    map: BTreeMap<RowId, (u64, V)>,
}

/// In-process cache. Cloning is cheap and clones share the same entries.
#[derive(Debug)]
pub struct MemoryCache<V>(Arc<RwLock<Entries<V>>>);

impl<V> Clone for MemoryCache<V> {
    fn clone(&self) -> Self {
        MemoryCache(self.0.clone())
    }
}

impl<V> Default for MemoryCache<V> {
    fn default() -> Self {
        MemoryCache(Arc::new(RwLock::new(Entries {
            next_version: 1,
            map: BTreeMap::new(),
        })))
    }
}

impl<V> MemoryCache<V> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<V: Clone + Send + Sync> Cache<V> for MemoryCache<V> {
    fn get(&self, id: RowId) -> Option<V> {
        self.0.read().map.get(&id).map(|(_, v)| v.clone())
    }

    fn put(&self, id: RowId, value: V) -> u64 {
        let mut writer = self.0.write();
        let version = writer.next_version;
        writer.next_version += 1;
        writer.map.insert(id, (version, value));
        version
    }

    fn remove(&self, id: RowId) -> Option<V> {
        self.0.write().map.remove(&id).map(|(_, v)| v)
    }

    fn keys(&self) -> Vec<RowId> {
        self.0.read().map.keys().copied().collect()
    }

    fn version(&self, id: RowId) -> Option<u64> {
        self.0.read().map.get(&id).map(|(version, _)| *version)
    }

    fn remove_if_version(&self, id: RowId, version: u64) -> bool {
        let mut writer = self.0.write();
        match writer.map.get(&id) {
            Some((current, _)) if *current == version => {
                writer.map.remove(&id);
                true
            }
            _ => false,
        }
    }

    fn clear(&self) {
        self.0.write().map.clear();
    }

    fn len(&self) -> usize {
        self.0.read().map.len()
    }
}
