//! The storage contract every provider backend implements.
//!
//! [`DataStore`] is deliberately narrow: row-level reads and writes plus a
//! transaction scope. The protocol-level operations built on top of it
//! (idempotent change materialization, local authoring) live in
//! [`DataStoreExt`] and are shared by every backend.

use async_trait::async_trait;
use chrono::Duration;
use futures::future::BoxFuture;
use futures::FutureExt;
use thiserror::Error;
use uuid::Uuid;

use crate::clock::{now_utc, CausalClock, ClockEntry};
use crate::item::{Item, ItemSerializer};
use crate::models::{Batch, Change, ConflictRecord, Operation, SyncSession, Version};
use crate::query::{Query, QueryId, QueryTracking, TrackedQuery};
use crate::sync::SyncError;

/// Errors raised by data store backends.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("This data store does not support queries")]
    QueriesUnsupported,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Write rejected for item {item_id}")]
    WriteRejected { item_id: String },
}

impl StoreError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        StoreError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// Persistence for items and replication metadata of one provider.
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Id of the provider this store belongs to.
    fn local_provider_id(&self) -> &str;

    fn serializer(&self) -> &dyn ItemSerializer;

    /// The provider-global clock, or the clock of a tracked query (empty if
    /// the query is not tracked).
    async fn get_local_clock(&self, query: Option<&Query>) -> Result<CausalClock, StoreError>;

    async fn get_version(&self, item_id: &str) -> Result<Option<Version>, StoreError>;

    /// Fails with [`StoreError::NotFound`] if the change is unknown.
    async fn get_change(&self, id: Uuid) -> Result<Change, StoreError>;

    /// Changes whose authoring entry is later than `since`, in creation order.
    async fn select_changes(
        &self,
        since: &CausalClock,
        limit: usize,
        query: Option<&Query>,
    ) -> Result<Batch, StoreError>;

    /// Losers of deferred conflict records whose authoring entry is later
    /// than `since`, in creation order.
    async fn select_deferred_changes(
        &self,
        since: &CausalClock,
        limit: usize,
        query: Option<&Query>,
    ) -> Result<Batch, StoreError>;

    async fn save_change(&self, change: &Change) -> Result<(), StoreError>;

    async fn save_version(&self, version: &Version) -> Result<(), StoreError>;

    async fn save_conflict(&self, record: &ConflictRecord) -> Result<(), StoreError>;

    async fn save_session(&self, session: &SyncSession) -> Result<(), StoreError>;

    /// Deferred conflict records whose loser is `loser_id`.
    async fn get_deferred_conflicts(&self, loser_id: Uuid)
        -> Result<Vec<ConflictRecord>, StoreError>;

    /// Runs `work` atomically with respect to `item_id`. If `work` fails,
    /// nothing it wrote is kept.
    async fn run_in_transaction<'a>(
        &'a self,
        item_id: &'a str,
        work: BoxFuture<'a, Result<(), SyncError>>,
    ) -> Result<(), SyncError>;

    /// Performs the change's mutation on the stored items.
    async fn execute(&self, change: &Change) -> Result<(), StoreError>;

    async fn list_changes(&self) -> Result<Vec<Change>, StoreError>;

    async fn list_versions(&self) -> Result<Vec<Version>, StoreError>;

    async fn list_conflicts(&self) -> Result<Vec<ConflictRecord>, StoreError>;

    async fn list_sessions(&self) -> Result<Vec<SyncSession>, StoreError>;

    async fn list_items(&self) -> Result<Vec<Item>, StoreError>;

    async fn get_item(&self, item_id: &str) -> Result<Option<Item>, StoreError>;

    fn supports_queries(&self) -> bool {
        false
    }

    /// Items matching `query`, either now or as they were when the store had
    /// seen exactly `as_of`.
    async fn query_items(
        &self,
        _query: &Query,
        _as_of: Option<&CausalClock>,
    ) -> Result<Vec<Item>, StoreError> {
        Err(StoreError::QueriesUnsupported)
    }

    async fn save_tracked_query(&self, _tracked: &TrackedQuery) -> Result<(), StoreError> {
        Err(StoreError::QueriesUnsupported)
    }

    async fn get_tracked_query(
        &self,
        _query_id: &QueryId,
    ) -> Result<Option<TrackedQuery>, StoreError> {
        Err(StoreError::QueriesUnsupported)
    }

    async fn list_tracked_queries(&self) -> Result<Vec<TrackedQuery>, StoreError> {
        Err(StoreError::QueriesUnsupported)
    }
}

/// Protocol operations shared by every [`DataStore`].
#[async_trait]
pub trait DataStoreExt: DataStore {
    /// The item's version, or a placeholder if this store never saw it.
    async fn get_local_version(&self, item_id: &str) -> Result<Version, StoreError> {
        Ok(self
            .get_version(item_id)
            .await?
            .unwrap_or_else(|| Version::placeholder(item_id, now_utc())))
    }

    async fn find_change(&self, id: Uuid) -> Result<Option<Change>, StoreError> {
        match self.get_change(id).await {
            Ok(change) => Ok(Some(change)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Returns the stored copy of `change`, persisting it unapplied first if
    /// this store has never seen its id. The flag tells whether it was
    /// created.
    async fn get_or_create_change(&self, change: &Change) -> Result<(Change, bool), StoreError> {
        if let Some(existing) = self.find_change(change.id).await? {
            return Ok((existing, false));
        }
        let mut created = change.clone();
        created.created_at = Some(now_utc());
        created.is_applied = false;
        created.should_ignore = false;
        self.save_change(&created).await?;
        Ok((created, true))
    }

    /// Authors a change on this provider and applies it immediately.
    async fn commit_item_change(
        &self,
        operation: Operation,
        item: &Item,
    ) -> Result<Change, SyncError> {
        let version = self.get_local_version(&item.id).await?;
        let local_provider_id = self.local_provider_id().to_string();

        // Authoring timestamps of one provider must be strictly increasing,
        // otherwise a frontier could land between two equal entries.
        let last = self.get_local_clock(None).await?.timestamp(&local_provider_id);
        let mut now = now_utc();
        if now <= last {
            now = last + Duration::microseconds(1);
        }

        let mut vector_clock = version.vector_clock().clone();
        vector_clock.update(&local_provider_id, now);

        let previous = version.current_change().cloned();
        let origin = previous
            .as_ref()
            .map(Change::origin_entry)
            .unwrap_or_else(|| ClockEntry::new(local_provider_id.clone(), now));

        let payload = self.serializer().serialize(item)?;
        let mut change = Change::new(
            operation,
            item.id.clone(),
            ClockEntry::new(local_provider_id, now),
            origin,
            payload,
            vector_clock,
        );
        change.created_at = Some(now);
        change.mark_applied();

        let new_version = Version::for_change(change.clone(), version.created_at());
        let committed = &change;
        self.run_in_transaction(
            &item.id,
            async move {
                self.execute(committed).await?;
                self.save_change(committed).await?;
                self.save_version(&new_version).await?;
                Ok::<(), SyncError>(())
            }
            .boxed(),
        )
        .await?;

        tracing::debug!(
            change_id = %change.id,
            item_id = %change.item_id,
            operation = %change.operation,
            "Committed local change"
        );

        if self.supports_queries() {
            self.refresh_tracked_queries(&change, previous.as_ref())
                .await?;
        }

        Ok(change)
    }
}

impl<T: DataStore + ?Sized> DataStoreExt for T {}
