use crate::{
    error::GraphOpError,
    event::{EventAction, EventBus, EventLogMessage},
    executor::{ExecutionReport, GraphExecutor},
    metadata::ExtendedMetadata,
    properties::{check_identifier, GraphOpts, GroupId, LockCandidate, ObjectType, RowId},
    session::{unique_ids, GraphSession, GraphTransaction, TransactionalSession},
    step::StepStack,
};
use futures_core::future::BoxFuture;
use sqlx::{
    error::BoxDynError,
    migrate::{MigrateDatabase, Migration as SqlxMigration, MigrationSource, Migrator},
    sqlite::{Sqlite, SqliteConnectOptions, SqliteConnection},
    ConnectOptions, Connection, Row, Transaction,
};
use sqlx::{migrate::MigrationType, Execute, Pool, QueryBuilder};
use tokio::sync::Mutex;
use std::{
    collections::{BTreeMap, BTreeSet},
    path::Path,
    result::Result,
    str::FromStr,
};

/// <https://www.sqlite.org/limits.html#max_variable_number>
pub const SQLITE_LIMIT_VARIABLE_NUMBER: usize = 32766;

/// Ids bound per `IN (...)` list, leaving room for the other parameters of a statement.
const ID_CHUNK: usize = SQLITE_LIMIT_VARIABLE_NUMBER - 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventLogEntry {
    pub action: String,
    pub entity_type: String,
    pub entity_id: RowId,
}

/// Sqlite-backed [`GraphSession`].
///
/// Every object table has `id INTEGER PRIMARY KEY` and `group_id INTEGER NOT NULL` plus one
/// integer column per foreign key.
#[derive(Debug, Clone)]
pub struct DbConnection(pub Pool<Sqlite>);

fn push_id_list(qb: &mut QueryBuilder<'_, Sqlite>, ids: &[RowId]) {
    qb.push("(");
    let mut separated = qb.separated(", ");
    for id in ids {
        separated.push_bind(*id);
    }
    separated.push_unseparated(")");
}

impl DbConnection {
    /// Create `table` if missing, with the given foreign-key columns.
    pub async fn ensure_object_table(
        &self,
        table: &str,
        link_columns: &[&str],
    ) -> Result<(), GraphOpError> {
        check_identifier(table)?;
        let mut ddl =
            format!("CREATE TABLE IF NOT EXISTS {table} (id INTEGER PRIMARY KEY, group_id INTEGER NOT NULL");
        for column in link_columns {
            check_identifier(column)?;
            ddl.push_str(&format!(", {column} INTEGER"));
        }
        ddl.push_str(");");
        sqlx::query(&ddl).execute(&self.0).await?;
        Ok(())
    }

    pub async fn insert_row(
        &self,
        table: &str,
        id: RowId,
        group: GroupId,
        links: &BTreeMap<String, RowId>,
    ) -> Result<(), GraphOpError> {
        check_identifier(table)?;
        let mut qb = QueryBuilder::<Sqlite>::new(format!("INSERT OR REPLACE INTO {table} (id, group_id"));
        for column in links.keys() {
            check_identifier(column)?;
            qb.push(format!(", {column}"));
        }
        qb.push(") VALUES (");
        let mut separated = qb.separated(", ");
        separated.push_bind(id);
        separated.push_bind(group.0);
        for target in links.values() {
            separated.push_bind(*target);
        }
        separated.push_unseparated(")");
        qb.build().execute(&self.0).await?;
        Ok(())
    }

    pub async fn group_of(&self, table: &str, id: RowId) -> Result<Option<GroupId>, GraphOpError> {
        check_identifier(table)?;
        let row = sqlx::query(&format!("SELECT group_id FROM {table} WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.0)
            .await?;
        Ok(row.map(|r| GroupId(r.get::<i64, usize>(0))))
    }

    /// Persist one event log row per id in `message`.
    pub async fn record_event(&self, message: &EventLogMessage) -> Result<(), GraphOpError> {
        if message.ids.is_empty() {
            return Ok(());
        }
        for chunk in message.ids.chunks(SQLITE_LIMIT_VARIABLE_NUMBER / 3) {
            let mut qb =
                QueryBuilder::<Sqlite>::new("INSERT INTO event_log (action, entity_type, entity_id) ");
            qb.push_values(chunk.iter(), |mut b, id| {
                b.push_bind(message.action.tag())
                    .push_bind(message.object_type.as_str().to_string())
                    .push_bind(*id);
            });
            qb.build().execute(&self.0).await?;
        }
        Ok(())
    }

    pub async fn event_log(&self) -> Result<Vec<EventLogEntry>, GraphOpError> {
        let rows = sqlx::query_as::<_, (String, String, i64)>(
            "SELECT action, entity_type, entity_id FROM event_log ORDER BY seq",
        )
        .fetch_all(&self.0)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(action, entity_type, entity_id)| EventLogEntry {
                action,
                entity_type,
                entity_id,
            })
            .collect())
    }

    /// Run `plan` and persist the event log messages it publishes.
    ///
    /// The plan runs as one transaction; messages are recorded only once it has committed,
    /// so a failed operation leaves neither row changes nor log entries behind.
    pub async fn execute_and_record(
        &self,
        metadata: &ExtendedMetadata,
        plan: &StepStack,
        opts: GraphOpts,
    ) -> Result<ExecutionReport, GraphOpError> {
        let (bus, mut rx) = EventBus::channel();
        let report = GraphExecutor::new(self, metadata, opts)
            .with_bus(&bus)
            .run(plan)
            .await?;
        drop(bus);
        while let Some(message) = rx.recv().await {
            self.record_event(&message).await?;
        }
        Ok(report)
    }

    pub async fn event_count(&self, action: EventAction) -> Result<u64, GraphOpError> {
        let row = sqlx::query("SELECT COUNT(*) FROM event_log WHERE action = ?")
            .bind(action.tag())
            .fetch_one(&self.0)
            .await?;
        Ok(row.get::<i64, usize>(0) as u64)
    }
}

async fn update_group(
    conn: &mut SqliteConnection,
    object_type: &ObjectType,
    ids: &[RowId],
    group: GroupId,
) -> Result<u64, GraphOpError> {
    let table = object_type.table();
    let ids = unique_ids(ids);
    let mut moved = 0;
    for chunk in ids.chunks(ID_CHUNK) {
        let mut qb = QueryBuilder::<Sqlite>::new(format!("UPDATE {table} SET group_id = "));
        qb.push_bind(group.0);
        qb.push(" WHERE id IN ");
        push_id_list(&mut qb, chunk);
        let query = qb.build();
        let sql = query.sql().to_string();
        let result = query.execute(&mut *conn).await.map_err(|e| {
            tracing::error!(
                "[DbConnection.change_group] SQL error processing '{}'\n\terror: {}",
                sql,
                e
            );
            e
        })?;
        moved += result.rows_affected();
    }
    if moved < ids.len() as u64 {
        return Err(GraphOpError::NotFound(format!(
            "{} of {} {} rows do not exist",
            ids.len() as u64 - moved,
            ids.len(),
            object_type
        )));
    }
    Ok(moved)
}

async fn remove_rows(
    conn: &mut SqliteConnection,
    table: &str,
    ids: &[RowId],
) -> Result<u64, GraphOpError> {
    check_identifier(table)?;
    let mut deleted = 0;
    for chunk in ids.chunks(ID_CHUNK) {
        let mut qb = QueryBuilder::<Sqlite>::new(format!("DELETE FROM {table} WHERE id IN "));
        push_id_list(&mut qb, chunk);
        deleted += qb.build().execute(&mut *conn).await?.rows_affected();
    }
    Ok(deleted)
}

async fn improper_links(
    conn: &mut SqliteConnection,
    lock: &LockCandidate,
    target_id: RowId,
    group: GroupId,
    user_group: GroupId,
) -> Result<Vec<RowId>, GraphOpError> {
    check_identifier(&lock.table)?;
    check_identifier(&lock.column)?;
    let sql = format!(
        "SELECT source.id FROM {} source WHERE source.{} = ? \
         AND source.group_id NOT IN (?, ?) ORDER BY source.id",
        lock.table, lock.column
    );
    let rows = sqlx::query_as::<_, (i64,)>(&sql)
        .bind(target_id)
        .bind(group.0)
        .bind(user_group.0)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| {
            tracing::error!(
                "[DbConnection.find_improper_links] SQL error processing '{}'\n\terror: {}",
                sql,
                e
            );
            e
        })?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

async fn present_ids(
    conn: &mut SqliteConnection,
    object_type: &ObjectType,
    ids: &[RowId],
) -> Result<BTreeSet<RowId>, GraphOpError> {
    let mut found = BTreeSet::new();
    for chunk in ids.chunks(ID_CHUNK) {
        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT id FROM {} WHERE id IN ",
            object_type.table()
        ));
        push_id_list(&mut qb, chunk);
        let rows = qb
            .build_query_as::<(i64,)>()
            .fetch_all(&mut *conn)
            .await?;
        found.extend(rows.into_iter().map(|(id,)| id));
    }
    Ok(found)
}

impl GraphSession for DbConnection {
    #[tracing::instrument(skip(self, ids), fields(count = ids.len()))]
    async fn change_group(
        &self,
        object_type: &ObjectType,
        ids: &[RowId],
        group: GroupId,
    ) -> Result<u64, GraphOpError> {
        let mut tx = self.0.begin().await?;
        // dropping tx on error rolls the partial move back
        let moved = update_group(&mut tx, object_type, ids, group).await?;
        tx.commit().await?;
        Ok(moved)
    }

    async fn delete_rows(&self, table: &str, ids: &[RowId]) -> Result<u64, GraphOpError> {
        let mut conn = self.0.acquire().await?;
        remove_rows(&mut conn, table, ids).await
    }

    async fn find_improper_links(
        &self,
        lock: &LockCandidate,
        target_id: RowId,
        group: GroupId,
        user_group: GroupId,
    ) -> Result<Vec<RowId>, GraphOpError> {
        let mut conn = self.0.acquire().await?;
        improper_links(&mut conn, lock, target_id, group, user_group).await
    }

    async fn existing_ids(
        &self,
        object_type: &ObjectType,
        ids: &[RowId],
    ) -> Result<BTreeSet<RowId>, GraphOpError> {
        let mut conn = self.0.acquire().await?;
        present_ids(&mut conn, object_type, ids).await
    }
}

impl TransactionalSession for DbConnection {
    type Transaction = DbTransaction;

    async fn begin(&self) -> Result<DbTransaction, GraphOpError> {
        Ok(DbTransaction {
            tx: Mutex::new(Some(self.0.begin().await?)),
        })
    }
}

/// One sqlite transaction shared by every step of an operation.
pub struct DbTransaction {
    tx: Mutex<Option<Transaction<'static, Sqlite>>>,
}

fn finished() -> GraphOpError {
    GraphOpError::Database("transaction already finished".to_string())
}

impl GraphSession for DbTransaction {
    #[tracing::instrument(skip(self, ids), fields(count = ids.len()))]
    async fn change_group(
        &self,
        object_type: &ObjectType,
        ids: &[RowId],
        group: GroupId,
    ) -> Result<u64, GraphOpError> {
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(finished)?;
        // A savepoint keeps a failed move from leaving part of its rows changed.
        let mut savepoint = Connection::begin(&mut **tx).await?;
        let moved = update_group(&mut savepoint, object_type, ids, group).await?;
        savepoint.commit().await?;
        Ok(moved)
    }

    async fn delete_rows(&self, table: &str, ids: &[RowId]) -> Result<u64, GraphOpError> {
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(finished)?;
        remove_rows(tx, table, ids).await
    }

    async fn find_improper_links(
        &self,
        lock: &LockCandidate,
        target_id: RowId,
        group: GroupId,
        user_group: GroupId,
    ) -> Result<Vec<RowId>, GraphOpError> {
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(finished)?;
        improper_links(tx, lock, target_id, group, user_group).await
    }

    async fn existing_ids(
        &self,
        object_type: &ObjectType,
        ids: &[RowId],
    ) -> Result<BTreeSet<RowId>, GraphOpError> {
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(finished)?;
        present_ids(tx, object_type, ids).await
    }
}

impl GraphTransaction for DbTransaction {
    async fn commit(self) -> Result<(), GraphOpError> {
        let tx = self.tx.into_inner().ok_or_else(finished)?;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<(), GraphOpError> {
        let tx = self.tx.into_inner().ok_or_else(finished)?;
        tx.rollback().await?;
        Ok(())
    }
}

/// A migration definition.
#[derive(Debug, Clone)]
pub struct Migration {
    pub version: i64,
    pub description: &'static str,
    pub sql: &'static str,
    pub kind: MigrationType,
}

#[derive(Debug, Clone)]
struct MigrationList(Vec<Migration>);

impl MigrationSource<'static> for MigrationList {
    fn resolve(self) -> BoxFuture<'static, Result<Vec<SqlxMigration>, BoxDynError>> {
        Box::pin(async move {
            let mut migrations = Vec::new();
            for migration in self.0 {
                if matches!(migration.kind, MigrationType::ReversibleUp) {
                    migrations.push(SqlxMigration::new(
                        migration.version,
                        migration.description.into(),
                        migration.kind,
                        migration.sql.into(),
                        false,
                    ));
                }
            }
            Ok(migrations)
        })
    }
}

pub async fn db_init<P: AsRef<Path>>(db_path: P) -> Result<Pool<Sqlite>, GraphOpError> {
    let Some(path_str) = db_path.as_ref().to_str() else {
        return Err(GraphOpError::InvalidInput(format!(
            "database path {:?} is not valid UTF-8",
            db_path.as_ref()
        )));
    };
    let fqdb = format!("sqlite:{path_str}");
    tracing::debug!("Initializing graph db from file: {:?}", fqdb);
    if !Sqlite::database_exists(&fqdb).await.unwrap_or(false) {
        Sqlite::create_database(&fqdb).await?;
    }
    let options = SqliteConnectOptions::from_str(&fqdb)?
        .read_only(false)
        .disable_statement_logging()
        .create_if_missing(true);

    use sqlx::pool::PoolOptions;
    let pool = PoolOptions::<Sqlite>::new()
        .connect_with(options)
        .await?;

    let migrations = MigrationList(vec![Migration {
        version: 1,
        description: "create_event_log",
        sql: "\
        CREATE TABLE event_log (seq INTEGER PRIMARY KEY AUTOINCREMENT, action TEXT NOT NULL, \
        entity_type TEXT NOT NULL, entity_id INTEGER NOT NULL);",
        kind: MigrationType::ReversibleUp,
    }]);
    let migrator = Migrator::new(migrations.clone()).await?;
    migrator.run(&pool).await?;

    let count_res = sqlx::query("SELECT COUNT(*) FROM event_log;")
        .fetch_one(&pool)
        .await?;
    tracing::info!(
        "DB Connection initialized.\n \
         \tEvent log entries:\t{:?}",
        count_res.get::<i64, usize>(0)
    );

    Ok(pool)
}
