use std::marker::PhantomData;

use super::Cache;
use crate::{
    config::DEFAULT_REAP_BATCH_SIZE,
    properties::{ObjectType, RowId},
    session::GraphSession,
};

/// A cache whose keys are ids of `object_type` rows.
///
/// `get` confirms the row still exists before answering, evicting the entry if it does not.
/// `reap` sweeps every key in batches of `batch_size` existence queries.
#[derive(Debug)]
pub struct IdBackedCache<V, C, S> {
    object_type: ObjectType,
    inner: C,
    session: S,
    batch_size: usize,
    _value: PhantomData<fn() -> V>,
}

impl<V, C, S> IdBackedCache<V, C, S>
where
    C: Cache<V>,
    S: GraphSession,
{
    pub fn new(object_type: ObjectType, inner: C, session: S) -> Self {
        IdBackedCache {
            object_type,
            inner,
            session,
            batch_size: DEFAULT_REAP_BATCH_SIZE,
            _value: PhantomData,
        }
    }

    /// Zero is treated as one.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn object_type(&self) -> &ObjectType {
        &self.object_type
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    /// The cached value for `id`, if its row still exists.
    ///
    /// A failed existence query counts as "gone": the entry is evicted and the call misses.
    pub async fn get(&self, id: RowId) -> Option<V> {
        let version = self.inner.version(id)?;
        let exists = match self.session.existing_ids(&self.object_type, &[id]).await {
            Ok(found) => found.contains(&id),
            Err(e) => {
                tracing::warn!(
                    "[IdBackedCache {}] existence check for {} failed: {}",
                    self.object_type,
                    id,
                    e
                );
                false
            }
        };
        if !exists {
            tracing::debug!(
                "[IdBackedCache {}] evicting {}: row no longer exists",
                self.object_type,
                id
            );
            self.inner.remove_if_version(id, version);
            return None;
        }
        self.inner.get(id)
    }

    pub fn put(&self, id: RowId, value: V) -> u64 {
        self.inner.put(id, value)
    }

    pub fn remove(&self, id: RowId) -> Option<V> {
        self.inner.remove(id)
    }

    pub fn keys(&self) -> Vec<RowId> {
        self.inner.keys()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Evict every entry whose row no longer exists. Returns the number evicted.
    ///
    /// Entries are snapshotted with their versions first; an entry re-`put` while the sweep is
    /// running keeps its new value. A batch whose query fails is skipped and left for the next
    /// sweep.
    #[tracing::instrument(skip(self), fields(object_type = %self.object_type))]
    pub async fn reap(&self) -> usize {
        let snapshot = self
            .inner
            .keys()
            .into_iter()
            .filter_map(|id| self.inner.version(id).map(|v| (id, v)))
            .collect::<Vec<(RowId, u64)>>();

        let mut evicted = 0;
        for batch in snapshot.chunks(self.batch_size) {
            let ids = batch.iter().map(|(id, _)| *id).collect::<Vec<RowId>>();
            let existing = match self.session.existing_ids(&self.object_type, &ids).await {
                Ok(existing) => existing,
                Err(e) => {
                    tracing::warn!(
                        "[IdBackedCache {}] skipping batch of {} during reap: {}",
                        self.object_type,
                        ids.len(),
                        e
                    );
                    continue;
                }
            };
            for (id, version) in batch {
                if !existing.contains(id) && self.inner.remove_if_version(*id, *version) {
                    evicted += 1;
                }
            }
        }
        tracing::debug!(
            "[IdBackedCache {}] reaped {} of {} entries",
            self.object_type,
            evicted,
            snapshot.len()
        );
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cache::MemoryCache,
        error::GraphOpError,
        properties::{GroupId, LockCandidate},
        session::MemorySession,
    };
    use std::collections::BTreeSet;
    use test_log::test;

    fn image() -> ObjectType {
        ObjectType::new("Image").unwrap()
    }

    #[test(tokio::test)]
    async fn get_evicts_stale_entries() {
        let session = MemorySession::new();
        session.insert("Image", 1, GroupId(3));
        session.insert("Image", 2, GroupId(3));
        let cache = IdBackedCache::new(image(), MemoryCache::new(), session.clone());
        cache.put(1, "one");
        cache.put(2, "two");

        session.delete_rows("Image", &[2]).await.unwrap();

        assert_eq!(cache.get(1).await, Some("one"));
        assert_eq!(cache.get(2).await, None);
        assert_eq!(cache.keys(), vec![1]);
    }

    #[test(tokio::test)]
    async fn reap_sweeps_in_batches() {
        let session = MemorySession::new();
        let cache =
            IdBackedCache::new(image(), MemoryCache::new(), session.clone()).with_batch_size(3);
        for id in 0..10 {
            if id % 2 == 0 {
                session.insert("Image", id, GroupId(3));
            }
            cache.put(id, id * 10);
        }

        assert_eq!(cache.reap().await, 5);
        assert_eq!(cache.keys(), vec![0, 2, 4, 6, 8]);
        assert_eq!(cache.reap().await, 0);
    }

    /// Session that re-puts an entry while the sweep is waiting on its existence query.
    struct RacingSession {
        rows: MemorySession,
        cache: MemoryCache<&'static str>,
    }

    impl GraphSession for RacingSession {
        async fn change_group(
            &self,
            object_type: &ObjectType,
            ids: &[RowId],
            group: GroupId,
        ) -> Result<u64, GraphOpError> {
            self.rows.change_group(object_type, ids, group).await
        }

        async fn delete_rows(&self, table: &str, ids: &[RowId]) -> Result<u64, GraphOpError> {
            self.rows.delete_rows(table, ids).await
        }

        async fn find_improper_links(
            &self,
            lock: &LockCandidate,
            target_id: RowId,
            group: GroupId,
            user_group: GroupId,
        ) -> Result<Vec<RowId>, GraphOpError> {
            self.rows
                .find_improper_links(lock, target_id, group, user_group)
                .await
        }

        async fn existing_ids(
            &self,
            object_type: &ObjectType,
            ids: &[RowId],
        ) -> Result<BTreeSet<RowId>, GraphOpError> {
            self.cache.put(4, "fresh");
            self.rows.existing_ids(object_type, ids).await
        }
    }

    #[test(tokio::test)]
    async fn reap_keeps_entries_replaced_mid_sweep() {
        let inner = MemoryCache::new();
        let session = RacingSession {
            rows: MemorySession::new(),
            cache: inner.clone(),
        };
        let cache = IdBackedCache::new(image(), inner.clone(), session);
        cache.put(4, "stale");
        cache.put(5, "gone");

        assert_eq!(cache.reap().await, 1);
        assert_eq!(cache.keys(), vec![4]);
        assert_eq!(inner.get(4), Some("fresh"));
    }
}
