use std::collections::HashSet;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tandem_core::query::evaluate;
use tandem_core::{
    Batch, CausalClock, Change, ConflictRecord, DataStore, Item, ItemSerializer,
    JsonItemSerializer, Operation, Query, QueryId, QueryTracking, StoreError, SyncError,
    SyncSession, TrackedQuery, Version,
};
use uuid::Uuid;

use super::{init_db, DbError};

/// A provider whose items and sync metadata live in a SQLite file.
pub struct SqliteStore {
    provider_id: String,
    pool: SqlitePool,
    serializer: Box<dyn ItemSerializer>,
    transaction: tokio::sync::Mutex<()>,
}

// Row types for database queries
#[derive(sqlx::FromRow)]
struct ChangeRow {
    id: String,
    created_at: Option<i64>,
    operation: String,
    item_id: String,
    authoring_provider_id: String,
    authoring_timestamp: i64,
    origin_provider_id: String,
    origin_timestamp: i64,
    payload: String,
    should_ignore: bool,
    is_applied: bool,
    vector_clock: String,
}

#[derive(sqlx::FromRow)]
struct VersionRow {
    item_id: String,
    change_id: String,
    created_at: i64,
}

#[derive(sqlx::FromRow)]
struct ConflictRow {
    id: String,
    created_at: i64,
    resolved_at: Option<i64>,
    loser_id: String,
    winner_id: Option<String>,
    status: String,
    conflict_type: String,
    description: Option<String>,
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: String,
    started_at: i64,
    ended_at: Option<i64>,
    status: String,
    source_provider_id: String,
    target_provider_id: String,
}

#[derive(sqlx::FromRow)]
struct TrackedQueryRow {
    query: String,
    vector_clock: String,
}

impl ChangeRow {
    fn into_change(self) -> Result<Change, StoreError> {
        Ok(Change {
            id: parse_id(&self.id)?,
            created_at: self.created_at.map(from_micros).transpose()?,
            operation: self.operation.parse().map_err(StoreError::Backend)?,
            item_id: self.item_id,
            authoring_provider_id: self.authoring_provider_id,
            authoring_timestamp: from_micros(self.authoring_timestamp)?,
            origin_provider_id: self.origin_provider_id,
            origin_timestamp: from_micros(self.origin_timestamp)?,
            payload: self.payload,
            should_ignore: self.should_ignore,
            is_applied: self.is_applied,
            vector_clock: serde_json::from_str(&self.vector_clock)?,
        })
    }
}

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn parse_id(id: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(id).map_err(|e| StoreError::Backend(format!("Invalid id '{}': {}", id, e)))
}

fn from_micros(micros: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| StoreError::Backend(format!("Invalid timestamp: {}", micros)))
}

fn changes_from(rows: Vec<ChangeRow>) -> Result<Vec<Change>, StoreError> {
    rows.into_iter().map(ChangeRow::into_change).collect()
}

/// Restricts `c` to changes whose authoring entry is later than `since`.
fn push_frontier(builder: &mut QueryBuilder<'_, Sqlite>, since: &CausalClock) {
    let known: Vec<_> = since.entries().collect();
    if known.is_empty() {
        builder.push("1 = 1");
        return;
    }
    for entry in &known {
        builder
            .push("(c.authoring_provider_id = ")
            .push_bind(entry.provider_id.clone())
            .push(" AND c.authoring_timestamp > ")
            .push_bind(entry.timestamp.timestamp_micros())
            .push(") OR ");
    }
    builder.push("c.authoring_provider_id NOT IN (");
    let mut separated = builder.separated(", ");
    for entry in known {
        separated.push_bind(entry.provider_id);
    }
    separated.push_unseparated(")");
}

impl SqliteStore {
    pub fn new(provider_id: impl Into<String>, pool: SqlitePool) -> Self {
        Self {
            provider_id: provider_id.into(),
            pool,
            serializer: Box::new(JsonItemSerializer),
            transaction: tokio::sync::Mutex::new(()),
        }
    }

    /// Opens (creating and migrating if needed) the database at `path`.
    pub async fn open(provider_id: impl Into<String>, path: &Path) -> Result<Self, DbError> {
        let pool = init_db(path).await?;
        Ok(Self::new(provider_id, pool))
    }

    pub fn with_serializer(mut self, serializer: impl ItemSerializer + 'static) -> Self {
        self.serializer = Box::new(serializer);
        self
    }

    async fn select(
        &self,
        base: &str,
        since: &CausalClock,
        limit: usize,
        query: Option<&Query>,
    ) -> Result<Batch, StoreError> {
        let scope = match query {
            Some(query) => Some(self.item_ids_for_query(query, since).await?),
            None => None,
        };
        if scope.as_ref().is_some_and(HashSet::is_empty) {
            return Ok(Batch::new(Vec::new(), true));
        }

        let mut builder = QueryBuilder::<Sqlite>::new(base);
        builder.push("(");
        push_frontier(&mut builder, since);
        builder.push(")");
        if let Some(item_ids) = scope {
            builder.push(" AND c.item_id IN (");
            let mut separated = builder.separated(", ");
            for item_id in item_ids {
                separated.push_bind(item_id);
            }
            separated.push_unseparated(")");
        }
        // One extra row tells whether this is the last page.
        builder
            .push(" ORDER BY c.seq LIMIT ")
            .push_bind(limit as i64 + 1);

        let rows: Vec<ChangeRow> = builder
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        let is_last = rows.len() <= limit;
        let changes = changes_from(rows.into_iter().take(limit).collect())?;
        Ok(Batch::new(changes, is_last))
    }

    async fn hydrate_conflict(&self, row: ConflictRow) -> Result<ConflictRecord, StoreError> {
        let loser = self.get_change(parse_id(&row.loser_id)?).await?;
        let winner = match row.winner_id {
            Some(winner_id) => Some(self.get_change(parse_id(&winner_id)?).await?),
            None => None,
        };
        Ok(ConflictRecord {
            id: parse_id(&row.id)?,
            created_at: from_micros(row.created_at)?,
            resolved_at: row.resolved_at.map(from_micros).transpose()?,
            loser,
            winner,
            status: row.status.parse().map_err(StoreError::Backend)?,
            conflict_type: row.conflict_type.parse().map_err(StoreError::Backend)?,
            description: row.description,
        })
    }

    async fn hydrate_session(&self, row: SessionRow) -> Result<SyncSession, StoreError> {
        let rows: Vec<ChangeRow> = sqlx::query_as(
            r#"
            SELECT c.* FROM sync_session_changes s
            JOIN changes c ON c.id = s.change_id
            WHERE s.session_id = ?
            ORDER BY s.position
            "#,
        )
        .bind(&row.id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        Ok(SyncSession {
            id: parse_id(&row.id)?,
            started_at: from_micros(row.started_at)?,
            ended_at: row.ended_at.map(from_micros).transpose()?,
            status: row.status.parse().map_err(StoreError::Backend)?,
            source_provider_id: row.source_provider_id,
            target_provider_id: row.target_provider_id,
            changes: changes_from(rows)?,
        })
    }

    async fn hydrate_version(&self, row: VersionRow) -> Result<Version, StoreError> {
        let change = self.get_change(parse_id(&row.change_id)?).await?;
        if change.item_id != row.item_id {
            return Err(StoreError::Backend(format!(
                "Version of {} points at a change of {}",
                row.item_id, change.item_id
            )));
        }
        Ok(Version::for_change(change, from_micros(row.created_at)?))
    }
}

#[async_trait]
impl DataStore for SqliteStore {
    fn local_provider_id(&self) -> &str {
        &self.provider_id
    }

    fn serializer(&self) -> &dyn ItemSerializer {
        self.serializer.as_ref()
    }

    async fn get_local_clock(&self, query: Option<&Query>) -> Result<CausalClock, StoreError> {
        if let Some(query) = query {
            return Ok(self
                .get_tracked_query(&query.id())
                .await?
                .map(|tracked| tracked.vector_clock)
                .unwrap_or_default());
        }

        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT authoring_provider_id, MAX(authoring_timestamp) AS authoring_timestamp
            FROM changes
            GROUP BY authoring_provider_id
            ORDER BY MIN(seq)
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        let mut clock = CausalClock::empty();
        for (provider_id, timestamp) in rows {
            clock.update(&provider_id, from_micros(timestamp)?);
        }
        Ok(clock)
    }

    async fn get_version(&self, item_id: &str) -> Result<Option<Version>, StoreError> {
        let row: Option<VersionRow> = sqlx::query_as("SELECT * FROM versions WHERE item_id = ?")
            .bind(item_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

        match row {
            Some(row) => self.hydrate_version(row).await.map(Some),
            None => Ok(None),
        }
    }

    async fn get_change(&self, id: Uuid) -> Result<Change, StoreError> {
        let row: Option<ChangeRow> = sqlx::query_as("SELECT * FROM changes WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

        row.ok_or_else(|| StoreError::not_found("Change", id))?
            .into_change()
    }

    async fn select_changes(
        &self,
        since: &CausalClock,
        limit: usize,
        query: Option<&Query>,
    ) -> Result<Batch, StoreError> {
        self.select("SELECT c.* FROM changes c WHERE ", since, limit, query)
            .await
    }

    async fn select_deferred_changes(
        &self,
        since: &CausalClock,
        limit: usize,
        query: Option<&Query>,
    ) -> Result<Batch, StoreError> {
        self.select(
            "SELECT c.* FROM changes c WHERE c.id IN (SELECT loser_id FROM conflicts WHERE status = 'deferred') AND ",
            since,
            limit,
            query,
        )
        .await
    }

    async fn save_change(&self, change: &Change) -> Result<(), StoreError> {
        // Only the status flags of a stored change may move.
        sqlx::query(
            r#"
            INSERT INTO changes (id, created_at, operation, item_id, authoring_provider_id, authoring_timestamp, origin_provider_id, origin_timestamp, payload, should_ignore, is_applied, vector_clock)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                should_ignore = excluded.should_ignore,
                is_applied = excluded.is_applied
            "#,
        )
        .bind(change.id.to_string())
        .bind(change.created_at.map(|t| t.timestamp_micros()))
        .bind(change.operation.as_str())
        .bind(&change.item_id)
        .bind(&change.authoring_provider_id)
        .bind(change.authoring_timestamp.timestamp_micros())
        .bind(&change.origin_provider_id)
        .bind(change.origin_timestamp.timestamp_micros())
        .bind(&change.payload)
        .bind(change.should_ignore)
        .bind(change.is_applied)
        .bind(serde_json::to_string(&change.vector_clock)?)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(())
    }

    async fn save_version(&self, version: &Version) -> Result<(), StoreError> {
        let change = version.current_change().ok_or_else(|| {
            StoreError::Backend(format!(
                "Can't persist placeholder version of {}",
                version.item_id()
            ))
        })?;

        sqlx::query(
            r#"
            INSERT INTO versions (item_id, change_id, created_at)
            VALUES (?, ?, ?)
            ON CONFLICT(item_id) DO UPDATE SET change_id = excluded.change_id
            "#,
        )
        .bind(version.item_id())
        .bind(change.id.to_string())
        .bind(version.created_at().timestamp_micros())
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(())
    }

    async fn save_conflict(&self, record: &ConflictRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO conflicts (id, created_at, resolved_at, loser_id, winner_id, status, conflict_type, description)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                resolved_at = excluded.resolved_at,
                winner_id = excluded.winner_id,
                status = excluded.status,
                description = excluded.description
            "#,
        )
        .bind(record.id.to_string())
        .bind(record.created_at.timestamp_micros())
        .bind(record.resolved_at.map(|t| t.timestamp_micros()))
        .bind(record.loser.id.to_string())
        .bind(record.winner.as_ref().map(|winner| winner.id.to_string()))
        .bind(record.status.as_str())
        .bind(record.conflict_type.as_str())
        .bind(&record.description)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(())
    }

    async fn save_session(&self, session: &SyncSession) -> Result<(), StoreError> {
        let id = session.id.to_string();

        sqlx::query(
            r#"
            INSERT INTO sync_sessions (id, started_at, ended_at, status, source_provider_id, target_provider_id)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                ended_at = excluded.ended_at,
                status = excluded.status
            "#,
        )
        .bind(&id)
        .bind(session.started_at.timestamp_micros())
        .bind(session.ended_at.map(|t| t.timestamp_micros()))
        .bind(session.status.as_str())
        .bind(&session.source_provider_id)
        .bind(&session.target_provider_id)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        // Replace the recorded changes
        sqlx::query("DELETE FROM sync_session_changes WHERE session_id = ?")
            .bind(&id)
            .execute(&self.pool)
            .await
            .map_err(backend)?;

        for (position, change) in session.changes.iter().enumerate() {
            sqlx::query(
                "INSERT INTO sync_session_changes (session_id, position, change_id) VALUES (?, ?, ?)",
            )
            .bind(&id)
            .bind(position as i64)
            .bind(change.id.to_string())
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        }

        Ok(())
    }

    async fn get_deferred_conflicts(
        &self,
        loser_id: Uuid,
    ) -> Result<Vec<ConflictRecord>, StoreError> {
        let rows: Vec<ConflictRow> = sqlx::query_as(
            "SELECT * FROM conflicts WHERE loser_id = ? AND status = 'deferred' ORDER BY seq",
        )
        .bind(loser_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            records.push(self.hydrate_conflict(row).await?);
        }
        Ok(records)
    }

    async fn run_in_transaction<'a>(
        &'a self,
        item_id: &'a str,
        work: BoxFuture<'a, Result<(), SyncError>>,
    ) -> Result<(), SyncError> {
        let _gate = self.transaction.lock().await;
        sqlx::query("BEGIN IMMEDIATE")
            .execute(&self.pool)
            .await
            .map_err(backend)?;

        match work.await {
            Ok(()) => {
                sqlx::query("COMMIT")
                    .execute(&self.pool)
                    .await
                    .map_err(backend)?;
                Ok(())
            }
            Err(e) => {
                if let Err(rollback) = sqlx::query("ROLLBACK").execute(&self.pool).await {
                    tracing::error!(item_id, error = %rollback, "Failed to roll back transaction");
                }
                Err(e)
            }
        }
    }

    async fn execute(&self, change: &Change) -> Result<(), StoreError> {
        match change.operation {
            Operation::Insert | Operation::Update => {
                let item = self.serializer.deserialize(&change.payload)?;
                sqlx::query(
                    r#"
                    INSERT INTO items (id, entity_name, payload)
                    VALUES (?, ?, ?)
                    ON CONFLICT(id) DO UPDATE SET
                        entity_name = excluded.entity_name,
                        payload = excluded.payload
                    "#,
                )
                .bind(&change.item_id)
                .bind(&item.entity_name)
                .bind(&change.payload)
                .execute(&self.pool)
                .await
                .map_err(backend)?;
            }
            Operation::Delete => {
                sqlx::query("DELETE FROM items WHERE id = ?")
                    .bind(&change.item_id)
                    .execute(&self.pool)
                    .await
                    .map_err(backend)?;
            }
        }
        Ok(())
    }

    async fn list_changes(&self) -> Result<Vec<Change>, StoreError> {
        let rows: Vec<ChangeRow> = sqlx::query_as("SELECT * FROM changes ORDER BY seq")
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        changes_from(rows)
    }

    async fn list_versions(&self) -> Result<Vec<Version>, StoreError> {
        let rows: Vec<VersionRow> = sqlx::query_as("SELECT * FROM versions ORDER BY item_id")
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;

        let mut versions = Vec::with_capacity(rows.len());
        for row in rows {
            versions.push(self.hydrate_version(row).await?);
        }
        Ok(versions)
    }

    async fn list_conflicts(&self) -> Result<Vec<ConflictRecord>, StoreError> {
        let rows: Vec<ConflictRow> = sqlx::query_as("SELECT * FROM conflicts ORDER BY seq")
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            records.push(self.hydrate_conflict(row).await?);
        }
        Ok(records)
    }

    async fn list_sessions(&self) -> Result<Vec<SyncSession>, StoreError> {
        let rows: Vec<SessionRow> =
            sqlx::query_as("SELECT * FROM sync_sessions ORDER BY started_at")
                .fetch_all(&self.pool)
                .await
                .map_err(backend)?;

        let mut sessions = Vec::with_capacity(rows.len());
        for row in rows {
            sessions.push(self.hydrate_session(row).await?);
        }
        Ok(sessions)
    }

    async fn list_items(&self) -> Result<Vec<Item>, StoreError> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT payload FROM items ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;

        rows.iter()
            .map(|(payload,)| self.serializer.deserialize(payload))
            .collect()
    }

    async fn get_item(&self, item_id: &str) -> Result<Option<Item>, StoreError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT payload FROM items WHERE id = ?")
            .bind(item_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

        row.map(|(payload,)| self.serializer.deserialize(&payload))
            .transpose()
    }

    fn supports_queries(&self) -> bool {
        true
    }

    async fn query_items(
        &self,
        query: &Query,
        as_of: Option<&CausalClock>,
    ) -> Result<Vec<Item>, StoreError> {
        let sql = match as_of {
            Some(_) => "SELECT c.* FROM changes c ORDER BY c.seq DESC",
            None => "SELECT c.* FROM versions v JOIN changes c ON c.id = v.change_id ORDER BY c.seq DESC",
        };
        let rows: Vec<ChangeRow> = sqlx::query_as(sql)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        let candidates = changes_from(rows)?;

        evaluate(query, candidates.iter(), as_of, self.serializer())
    }

    async fn save_tracked_query(&self, tracked: &TrackedQuery) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO tracked_queries (id, query, vector_clock)
            VALUES (?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET vector_clock = excluded.vector_clock
            "#,
        )
        .bind(tracked.id().as_str())
        .bind(serde_json::to_string(&tracked.query)?)
        .bind(serde_json::to_string(&tracked.vector_clock)?)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(())
    }

    async fn get_tracked_query(
        &self,
        query_id: &QueryId,
    ) -> Result<Option<TrackedQuery>, StoreError> {
        let row: Option<TrackedQueryRow> =
            sqlx::query_as("SELECT query, vector_clock FROM tracked_queries WHERE id = ?")
                .bind(query_id.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(backend)?;

        row.map(|row| {
            Ok(TrackedQuery {
                query: serde_json::from_str(&row.query)?,
                vector_clock: serde_json::from_str(&row.vector_clock)?,
            })
        })
        .transpose()
    }

    async fn list_tracked_queries(&self) -> Result<Vec<TrackedQuery>, StoreError> {
        let rows: Vec<TrackedQueryRow> =
            sqlx::query_as("SELECT query, vector_clock FROM tracked_queries ORDER BY id")
                .fetch_all(&self.pool)
                .await
                .map_err(backend)?;

        rows.into_iter()
            .map(|row| {
                Ok(TrackedQuery {
                    query: serde_json::from_str(&row.query)?,
                    vector_clock: serde_json::from_str(&row.vector_clock)?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tandem_core::{
        Comparator, DataStoreExt, Filter, MemoryStore, StoreSnapshot, SyncOrchestrator,
        SyncProvider,
    };
    use tempfile::{tempdir, TempDir};

    async fn setup(provider_id: &str) -> (SqliteStore, TempDir) {
        let temp_dir = tempdir().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let store = SqliteStore::open(provider_id, &db_path).await.unwrap();
        (store, temp_dir)
    }

    fn todo(id: &str, title: &str, done: bool) -> Item {
        Item::new(id, "todo")
            .with_field("title", title)
            .with_field("done", done)
    }

    #[tokio::test]
    async fn test_commit_persists_item_change_and_version() {
        let (store, _temp) = setup("a").await;

        let change = store
            .commit_item_change(Operation::Insert, &todo("x", "Buy milk", false))
            .await
            .unwrap();

        assert_eq!(
            store.get_item("x").await.unwrap(),
            Some(todo("x", "Buy milk", false))
        );
        let stored = store.get_change(change.id).await.unwrap();
        assert_eq!(stored, change);
        let version = store.get_version("x").await.unwrap().unwrap();
        assert_eq!(version.current_change().map(|c| c.id), Some(change.id));
        assert_eq!(
            store.get_local_clock(None).await.unwrap().timestamp("a"),
            change.authoring_timestamp
        );
    }

    #[tokio::test]
    async fn test_get_unknown_change_is_not_found() {
        let (store, _temp) = setup("a").await;

        let result = store.get_change(Uuid::new_v4()).await;

        assert!(matches!(result, Err(e) if e.is_not_found()));
    }

    #[tokio::test]
    async fn test_delete_removes_item() {
        let (store, _temp) = setup("a").await;
        let item = todo("x", "Buy milk", false);

        store.commit_item_change(Operation::Insert, &item).await.unwrap();
        store.commit_item_change(Operation::Delete, &item).await.unwrap();

        assert_eq!(store.get_item("x").await.unwrap(), None);
        assert_eq!(store.list_changes().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_transaction_rolls_back() {
        let (store, _temp) = setup("a").await;
        let change = Change::new(
            Operation::Insert,
            "x",
            tandem_core::ClockEntry::new("b", tandem_core::now_utc()),
            tandem_core::ClockEntry::new("b", tandem_core::now_utc()),
            JsonItemSerializer
                .serialize(&todo("x", "Buy milk", false))
                .unwrap(),
            CausalClock::empty(),
        );

        let store_ref = &store;
        let change_ref = &change;
        let result = store
            .run_in_transaction(
                "x",
                Box::pin(async move {
                    store_ref.execute(change_ref).await?;
                    store_ref.save_change(change_ref).await?;
                    Err::<(), SyncError>(SyncError::Escalated("boom".to_string()))
                }),
            )
            .await;

        assert!(result.is_err());
        assert_eq!(store.get_item("x").await.unwrap(), None);
        assert!(store.find_change(change.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_select_changes_paginates_in_creation_order() {
        let (store, _temp) = setup("a").await;
        for i in 0..5 {
            store
                .commit_item_change(Operation::Insert, &todo(&format!("t{}", i), "x", false))
                .await
                .unwrap();
        }

        let first = store
            .select_changes(&CausalClock::empty(), 2, None)
            .await
            .unwrap();
        assert_eq!(first.len(), 2);
        assert!(!first.is_last);
        assert_eq!(first.changes[0].item_id, "t0");

        let rest = store
            .select_changes(&first.clock_after(&CausalClock::empty()), 10, None)
            .await
            .unwrap();
        let ids: Vec<&str> = rest.changes.iter().map(|c| c.item_id.as_str()).collect();
        assert_eq!(ids, vec!["t2", "t3", "t4"]);
        assert!(rest.is_last);

        let nothing = store
            .select_changes(&store.get_local_clock(None).await.unwrap(), 10, None)
            .await
            .unwrap();
        assert!(nothing.is_empty());
        assert!(nothing.is_last);
    }

    #[tokio::test]
    async fn test_conflicts_are_hydrated() {
        let (store, _temp) = setup("a").await;
        let change = store
            .commit_item_change(Operation::Insert, &todo("x", "Buy milk", false))
            .await
            .unwrap();

        let record = ConflictRecord::deferred_exception(
            change.clone(),
            "disk full",
            tandem_core::now_utc(),
        );
        store.save_conflict(&record).await.unwrap();

        let deferred = store.get_deferred_conflicts(change.id).await.unwrap();
        assert_eq!(deferred.len(), 1);
        assert_eq!(deferred[0].loser.id, change.id);
        assert!(deferred[0].winner.is_none());

        let selected = store
            .select_deferred_changes(&CausalClock::empty(), 10, None)
            .await
            .unwrap();
        assert_eq!(selected.len(), 1);

        let mut resolved = deferred[0].clone();
        resolved.resolve(tandem_core::now_utc());
        store.save_conflict(&resolved).await.unwrap();
        assert!(store.get_deferred_conflicts(change.id).await.unwrap().is_empty());
        assert!(store.list_conflicts().await.unwrap()[0].resolved_at.is_some());
    }

    #[tokio::test]
    async fn test_tracked_query_round_trip() {
        let (store, _temp) = setup("a").await;
        let query = Query::filtered("todo", Filter::compare("done", Comparator::Eq, false));

        store.start_tracking_query(&query).await.unwrap();
        store
            .commit_item_change(Operation::Insert, &todo("x", "Buy milk", false))
            .await
            .unwrap();

        let tracked = store.get_tracked_query(&query.id()).await.unwrap().unwrap();
        assert_eq!(tracked.query, query);
        assert!(!tracked.vector_clock.is_empty());
        assert_eq!(store.list_tracked_queries().await.unwrap().len(), 1);
        assert_eq!(store.query_items(&query, None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sync_with_memory_store_converges() {
        let (sqlite, _temp) = setup("disk").await;
        let sqlite: Arc<SqliteStore> = Arc::new(sqlite);
        let memory = Arc::new(MemoryStore::new("memory"));

        sqlite
            .commit_item_change(Operation::Insert, &todo("a", "From disk", false))
            .await
            .unwrap();
        memory
            .commit_item_change(Operation::Insert, &todo("b", "From memory", true))
            .await
            .unwrap();

        let orchestrator = SyncOrchestrator::new(
            Arc::new(tandem_core::ProcessSyncLock::default()),
            vec![
                SyncProvider::with_session_events(sqlite.clone(), 2),
                SyncProvider::with_session_events(memory.clone(), 2),
            ],
            Duration::from_secs(60),
        );
        orchestrator.run("disk").await.unwrap();

        let left = StoreSnapshot::capture(sqlite.as_ref()).await.unwrap();
        let right = StoreSnapshot::capture(memory.as_ref()).await.unwrap();
        assert_eq!(left, right);
        assert_eq!(left.items.len(), 2);

        let sessions = sqlite.list_sessions().await.unwrap();
        assert_eq!(sessions.len(), 2);
        assert!(sessions.iter().all(|s| !s.is_in_progress()));
    }
}
