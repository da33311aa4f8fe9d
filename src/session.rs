//! The database seam the executor and caches run against.
//!
//! [`GraphSession`] is implemented by the in-process [`MemorySession`] and, with the
//! `service` feature, by the sqlite-backed [`DbConnection`](crate::db::DbConnection).
//! Both also implement [`TransactionalSession`], which the executor uses to run a whole plan
//! as one unit of work.

use parking_lot::RwLock;
use std::{
    collections::{BTreeMap, BTreeSet},
    future::Future,
    sync::Arc,
};

use crate::{
    error::GraphOpError,
    properties::{GroupId, LockCandidate, ObjectType, RowId},
};

pub trait GraphSession: Sync {
    /// Move `ids` of `object_type` into `group`. Fails if any row does not exist.
    fn change_group(
        &self,
        object_type: &ObjectType,
        ids: &[RowId],
        group: GroupId,
    ) -> impl Future<Output = Result<u64, GraphOpError>> + Send;

    /// Delete `ids` from `table`, returning how many rows were removed. Missing rows are not
    /// an error.
    fn delete_rows(
        &self,
        table: &str,
        ids: &[RowId],
    ) -> impl Future<Output = Result<u64, GraphOpError>> + Send;

    /// Ids of `lock.table` rows whose `lock.column` points at `target_id` while the row itself
    /// sits in neither `group` nor `user_group`.
    fn find_improper_links(
        &self,
        lock: &LockCandidate,
        target_id: RowId,
        group: GroupId,
        user_group: GroupId,
    ) -> impl Future<Output = Result<Vec<RowId>, GraphOpError>> + Send;

    /// The subset of `ids` that still exist in `object_type`'s table.
    fn existing_ids(
        &self,
        object_type: &ObjectType,
        ids: &[RowId],
    ) -> impl Future<Output = Result<BTreeSet<RowId>, GraphOpError>> + Send;
}

/// A [`GraphSession`] that can open an all-or-nothing unit of work.
pub trait TransactionalSession: GraphSession {
    type Transaction: GraphTransaction;

    fn begin(&self) -> impl Future<Output = Result<Self::Transaction, GraphOpError>> + Send;
}

/// Writes made through a transaction are kept by `commit` and undone by `rollback`.
///
/// Dropping a transaction without committing it rolls it back.
pub trait GraphTransaction: GraphSession + Send {
    fn commit(self) -> impl Future<Output = Result<(), GraphOpError>> + Send;

    fn rollback(self) -> impl Future<Output = Result<(), GraphOpError>> + Send;
}

/// Sorted, duplicate-free copy of `ids`.
pub(crate) fn unique_ids(ids: &[RowId]) -> Vec<RowId> {
    let mut unique = ids.to_vec();
    unique.sort_unstable();
    unique.dedup();
    unique
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryRow {
    pub group: GroupId,
    /// Foreign-key columns, `column -> referenced id`.
    pub links: BTreeMap<String, RowId>,
}

type Tables = BTreeMap<String, BTreeMap<RowId, MemoryRow>>;

/// In-process [`GraphSession`]. Cloning is cheap and clones share the same tables.
#[derive(Debug, Clone, Default)]
pub struct MemorySession(Arc<RwLock<Tables>>);

impl MemorySession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, table: &str, id: RowId, group: GroupId) {
        self.0.write().entry(table.to_string()).or_default().insert(
            id,
            MemoryRow {
                group,
                links: BTreeMap::new(),
            },
        );
    }

    /// Set `table.column` of row `id` to reference `target`.
    pub fn link(
        &self,
        table: &str,
        id: RowId,
        column: &str,
        target: RowId,
    ) -> Result<(), GraphOpError> {
        let mut writer = self.0.write();
        let row = writer
            .get_mut(table)
            .and_then(|rows| rows.get_mut(&id))
            .ok_or_else(|| GraphOpError::NotFound(format!("{table}:{id}")))?;
        row.links.insert(column.to_string(), target);
        Ok(())
    }

    pub fn row(&self, table: &str, id: RowId) -> Option<MemoryRow> {
        self.0
            .read()
            .get(table)
            .and_then(|rows| rows.get(&id))
            .cloned()
    }

    pub fn group_of(&self, table: &str, id: RowId) -> Option<GroupId> {
        self.row(table, id).map(|row| row.group)
    }

    pub fn contains(&self, table: &str, id: RowId) -> bool {
        self.row(table, id).is_some()
    }

    pub fn row_count(&self) -> usize {
        self.0.read().values().map(|rows| rows.len()).sum()
    }
}

impl GraphSession for MemorySession {
    async fn change_group(
        &self,
        object_type: &ObjectType,
        ids: &[RowId],
        group: GroupId,
    ) -> Result<u64, GraphOpError> {
        let mut writer = self.0.write();
        let Some(rows) = writer.get_mut(object_type.table()) else {
            return Err(GraphOpError::NotFound(format!(
                "no rows of type {object_type}"
            )));
        };
        let ids = unique_ids(ids);
        if let Some(missing) = ids.iter().find(|id| !rows.contains_key(id)) {
            return Err(GraphOpError::NotFound(format!("{object_type}:{missing}")));
        }
        for id in ids.iter() {
            if let Some(row) = rows.get_mut(id) {
                row.group = group;
            }
        }
        Ok(ids.len() as u64)
    }

    async fn delete_rows(&self, table: &str, ids: &[RowId]) -> Result<u64, GraphOpError> {
        let mut writer = self.0.write();
        let Some(rows) = writer.get_mut(table) else {
            return Ok(0);
        };
        Ok(ids.iter().filter(|id| rows.remove(id).is_some()).count() as u64)
    }

    async fn find_improper_links(
        &self,
        lock: &LockCandidate,
        target_id: RowId,
        group: GroupId,
        user_group: GroupId,
    ) -> Result<Vec<RowId>, GraphOpError> {
        let reader = self.0.read();
        let Some(rows) = reader.get(&lock.table) else {
            return Ok(Vec::new());
        };
        Ok(rows
            .iter()
            .filter(|(_, row)| {
                row.links.get(&lock.column) == Some(&target_id)
                    && row.group != group
                    && row.group != user_group
            })
            .map(|(id, _)| *id)
            .collect())
    }

    async fn existing_ids(
        &self,
        object_type: &ObjectType,
        ids: &[RowId],
    ) -> Result<BTreeSet<RowId>, GraphOpError> {
        let reader = self.0.read();
        let Some(rows) = reader.get(object_type.table()) else {
            return Ok(BTreeSet::new());
        };
        Ok(ids
            .iter()
            .filter(|id| rows.contains_key(id))
            .copied()
            .collect())
    }
}

impl TransactionalSession for MemorySession {
    type Transaction = MemoryTransaction;

    async fn begin(&self) -> Result<MemoryTransaction, GraphOpError> {
        Ok(MemoryTransaction {
            session: self.clone(),
            snapshot: Some(self.0.read().clone()),
        })
    }
}

/// Undo log over a [`MemorySession`].
///
/// Writes go straight to the shared tables; rolling back restores the tables captured by
/// `begin`, discarding any other writer's changes made in between.
#[derive(Debug)]
pub struct MemoryTransaction {
    session: MemorySession,
    snapshot: Option<Tables>,
}

impl MemoryTransaction {
    fn restore(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            *self.session.0.write() = snapshot;
        }
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        self.restore();
    }
}

impl GraphSession for MemoryTransaction {
    async fn change_group(
        &self,
        object_type: &ObjectType,
        ids: &[RowId],
        group: GroupId,
    ) -> Result<u64, GraphOpError> {
        self.session.change_group(object_type, ids, group).await
    }

    async fn delete_rows(&self, table: &str, ids: &[RowId]) -> Result<u64, GraphOpError> {
        self.session.delete_rows(table, ids).await
    }

    async fn find_improper_links(
        &self,
        lock: &LockCandidate,
        target_id: RowId,
        group: GroupId,
        user_group: GroupId,
    ) -> Result<Vec<RowId>, GraphOpError> {
        self.session
            .find_improper_links(lock, target_id, group, user_group)
            .await
    }

    async fn existing_ids(
        &self,
        object_type: &ObjectType,
        ids: &[RowId],
    ) -> Result<BTreeSet<RowId>, GraphOpError> {
        self.session.existing_ids(object_type, ids).await
    }
}

impl GraphTransaction for MemoryTransaction {
    async fn commit(mut self) -> Result<(), GraphOpError> {
        self.snapshot = None;
        Ok(())
    }

    async fn rollback(mut self) -> Result<(), GraphOpError> {
        self.restore();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn image() -> ObjectType {
        ObjectType::new("Image").unwrap()
    }

    #[test(tokio::test)]
    async fn change_group_is_all_or_nothing() {
        let session = MemorySession::new();
        session.insert("Image", 1, GroupId(3));
        session.insert("Image", 2, GroupId(3));

        assert!(session
            .change_group(&image(), &[1, 99], GroupId(4))
            .await
            .is_err());
        assert_eq!(session.group_of("Image", 1), Some(GroupId(3)));

        assert_eq!(
            session.change_group(&image(), &[1, 2], GroupId(4)).await.unwrap(),
            2
        );
        assert_eq!(session.group_of("Image", 2), Some(GroupId(4)));
    }

    #[test(tokio::test)]
    async fn improper_links_exclude_target_and_user_groups() {
        let session = MemorySession::new();
        session.insert("Image", 1, GroupId(4));
        for (id, group) in [(10, 4), (11, 1), (12, 3), (13, 5)] {
            session.insert("DatasetImageLink", id, GroupId(group));
            session.link("DatasetImageLink", id, "child", 1).unwrap();
        }
        session.insert("DatasetImageLink", 14, GroupId(3));
        session.link("DatasetImageLink", 14, "child", 2).unwrap();

        let lock = LockCandidate::new("DatasetImageLink", "child").unwrap();
        let ids = session
            .find_improper_links(&lock, 1, GroupId(4), GroupId(1))
            .await
            .unwrap();
        assert_eq!(ids, vec![12, 13]);
    }

    #[test(tokio::test)]
    async fn change_group_counts_distinct_rows() {
        let session = MemorySession::new();
        session.insert("Image", 1, GroupId(3));
        session.insert("Image", 2, GroupId(3));
        let moved = session
            .change_group(&image(), &[2, 1, 2], GroupId(4))
            .await
            .unwrap();
        assert_eq!(moved, 2);
    }

    #[test(tokio::test)]
    async fn transactions_roll_back_and_commit() {
        let session = MemorySession::new();
        session.insert("Image", 1, GroupId(3));
        session.insert("Image", 2, GroupId(3));

        let tx = session.begin().await.unwrap();
        tx.change_group(&image(), &[1], GroupId(4)).await.unwrap();
        tx.delete_rows("Image", &[2]).await.unwrap();
        assert_eq!(session.group_of("Image", 1), Some(GroupId(4)));
        tx.rollback().await.unwrap();
        assert_eq!(session.group_of("Image", 1), Some(GroupId(3)));
        assert!(session.contains("Image", 2));

        {
            let dropped = session.begin().await.unwrap();
            dropped.delete_rows("Image", &[1]).await.unwrap();
        }
        assert!(session.contains("Image", 1));

        let tx = session.begin().await.unwrap();
        tx.change_group(&image(), &[1, 2], GroupId(4)).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(session.group_of("Image", 2), Some(GroupId(4)));
    }

    #[test(tokio::test)]
    async fn delete_and_existence() {
        let session = MemorySession::new();
        session.insert("Image", 1, GroupId(3));
        session.insert("Image", 2, GroupId(3));
        assert_eq!(session.delete_rows("Image", &[2, 7]).await.unwrap(), 1);
        assert_eq!(session.delete_rows("Nothing", &[1]).await.unwrap(), 0);
        let existing = session.existing_ids(&image(), &[1, 2, 3]).await.unwrap();
        assert_eq!(existing, BTreeSet::from([1]));
        assert_eq!(session.row_count(), 1);
    }
}
