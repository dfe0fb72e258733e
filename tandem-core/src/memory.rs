//! In-memory data store.
//!
//! The reference backend: complete, query-capable, and instrumented with
//! fault injection so the protocol's failure paths can be exercised.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use indexmap::IndexMap;
use uuid::Uuid;

use crate::clock::CausalClock;
use crate::item::{Item, ItemSerializer, JsonItemSerializer};
use crate::models::{Batch, Change, ConflictRecord, ConflictStatus, Operation, SyncSession, Version};
use crate::query::{evaluate, Query, QueryId, QueryTracking, TrackedQuery};
use crate::store::{DataStore, StoreError};
use crate::sync::SyncError;

#[derive(Debug, Clone, Default)]
struct State {
    items: IndexMap<String, Item>,
    /// Change log in creation order.
    changes: IndexMap<Uuid, Change>,
    versions: IndexMap<String, Version>,
    conflicts: IndexMap<Uuid, ConflictRecord>,
    sessions: IndexMap<Uuid, SyncSession>,
    tracked_queries: IndexMap<QueryId, TrackedQuery>,
}

impl State {
    /// Conflict records carry the current state of their changes.
    fn hydrate(&self, record: &ConflictRecord) -> ConflictRecord {
        let mut record = record.clone();
        if let Some(loser) = self.changes.get(&record.loser.id) {
            record.loser = loser.clone();
        }
        if let Some(winner) = record.winner.as_mut() {
            if let Some(current) = self.changes.get(&winner.id) {
                *winner = current.clone();
            }
        }
        record
    }
}

pub struct MemoryStore {
    provider_id: String,
    serializer: Box<dyn ItemSerializer>,
    state: Mutex<State>,
    transaction: tokio::sync::Mutex<()>,
    failing_items: Mutex<HashSet<String>>,
    write_delay: Option<Duration>,
}

impl MemoryStore {
    pub fn new(provider_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            serializer: Box::new(JsonItemSerializer),
            state: Mutex::new(State::default()),
            transaction: tokio::sync::Mutex::new(()),
            failing_items: Mutex::new(HashSet::new()),
            write_delay: None,
        }
    }

    pub fn with_serializer(mut self, serializer: impl ItemSerializer + 'static) -> Self {
        self.serializer = Box::new(serializer);
        self
    }

    /// Makes every executed change take `delay`.
    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = Some(delay);
        self
    }

    /// Rejects every write to `item_id` until cleared.
    pub fn fail_writes_for(&self, item_id: impl Into<String>) {
        lock(&self.failing_items).insert(item_id.into());
    }

    pub fn clear_write_failures(&self) {
        lock(&self.failing_items).clear();
    }

    fn state(&self) -> MutexGuard<'_, State> {
        lock(&self.state)
    }

    /// Item ids a query-scoped selection may return, or `None` when
    /// unscoped.
    async fn scope(
        &self,
        since: &CausalClock,
        query: Option<&Query>,
    ) -> Result<Option<HashSet<String>>, StoreError> {
        match query {
            Some(query) => Ok(Some(self.item_ids_for_query(query, since).await?)),
            None => Ok(None),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn is_new(change: &Change, since: &CausalClock, scope: Option<&HashSet<String>>) -> bool {
    change.authoring_timestamp > since.timestamp(&change.authoring_provider_id)
        && scope.map_or(true, |ids| ids.contains(&change.item_id))
}

#[async_trait]
impl DataStore for MemoryStore {
    fn local_provider_id(&self) -> &str {
        &self.provider_id
    }

    fn serializer(&self) -> &dyn ItemSerializer {
        self.serializer.as_ref()
    }

    async fn get_local_clock(&self, query: Option<&Query>) -> Result<CausalClock, StoreError> {
        let state = self.state();
        if let Some(query) = query {
            return Ok(state
                .tracked_queries
                .get(&query.id())
                .map(|tracked| tracked.vector_clock.clone())
                .unwrap_or_default());
        }
        let mut clock = CausalClock::empty();
        for change in state.changes.values() {
            clock.update(&change.authoring_provider_id, change.authoring_timestamp);
        }
        Ok(clock)
    }

    async fn get_version(&self, item_id: &str) -> Result<Option<Version>, StoreError> {
        Ok(self.state().versions.get(item_id).cloned())
    }

    async fn get_change(&self, id: Uuid) -> Result<Change, StoreError> {
        self.state()
            .changes
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("Change", id))
    }

    async fn select_changes(
        &self,
        since: &CausalClock,
        limit: usize,
        query: Option<&Query>,
    ) -> Result<Batch, StoreError> {
        let scope = self.scope(since, query).await?;
        let state = self.state();
        let selected = state
            .changes
            .values()
            .filter(|change| is_new(change, since, scope.as_ref()))
            .cloned()
            .collect();
        Ok(Batch::paginate(selected, limit))
    }

    async fn select_deferred_changes(
        &self,
        since: &CausalClock,
        limit: usize,
        query: Option<&Query>,
    ) -> Result<Batch, StoreError> {
        let scope = self.scope(since, query).await?;
        let state = self.state();
        let deferred: HashSet<Uuid> = state
            .conflicts
            .values()
            .filter(|record| record.status == ConflictStatus::Deferred)
            .map(|record| record.loser.id)
            .collect();
        let selected = state
            .changes
            .values()
            .filter(|change| deferred.contains(&change.id))
            .filter(|change| is_new(change, since, scope.as_ref()))
            .cloned()
            .collect();
        Ok(Batch::paginate(selected, limit))
    }

    async fn save_change(&self, change: &Change) -> Result<(), StoreError> {
        self.state().changes.insert(change.id, change.clone());
        Ok(())
    }

    async fn save_version(&self, version: &Version) -> Result<(), StoreError> {
        self.state()
            .versions
            .insert(version.item_id().to_string(), version.clone());
        Ok(())
    }

    async fn save_conflict(&self, record: &ConflictRecord) -> Result<(), StoreError> {
        self.state().conflicts.insert(record.id, record.clone());
        Ok(())
    }

    async fn save_session(&self, session: &SyncSession) -> Result<(), StoreError> {
        self.state().sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn get_deferred_conflicts(
        &self,
        loser_id: Uuid,
    ) -> Result<Vec<ConflictRecord>, StoreError> {
        let state = self.state();
        Ok(state
            .conflicts
            .values()
            .filter(|record| record.is_deferred() && record.loser.id == loser_id)
            .map(|record| state.hydrate(record))
            .collect())
    }

    async fn run_in_transaction<'a>(
        &'a self,
        _item_id: &'a str,
        work: BoxFuture<'a, Result<(), SyncError>>,
    ) -> Result<(), SyncError> {
        let _gate = self.transaction.lock().await;
        let snapshot = self.state().clone();
        let result = work.await;
        if result.is_err() {
            *self.state() = snapshot;
        }
        result
    }

    async fn execute(&self, change: &Change) -> Result<(), StoreError> {
        if let Some(delay) = self.write_delay {
            tokio::time::sleep(delay).await;
        }
        if lock(&self.failing_items).contains(&change.item_id) {
            return Err(StoreError::WriteRejected {
                item_id: change.item_id.clone(),
            });
        }
        match change.operation {
            Operation::Insert | Operation::Update => {
                let item = self.serializer.deserialize(&change.payload)?;
                self.state().items.insert(change.item_id.clone(), item);
            }
            Operation::Delete => {
                self.state().items.shift_remove(&change.item_id);
            }
        }
        Ok(())
    }

    async fn list_changes(&self) -> Result<Vec<Change>, StoreError> {
        Ok(self.state().changes.values().cloned().collect())
    }

    async fn list_versions(&self) -> Result<Vec<Version>, StoreError> {
        Ok(self.state().versions.values().cloned().collect())
    }

    async fn list_conflicts(&self) -> Result<Vec<ConflictRecord>, StoreError> {
        let state = self.state();
        Ok(state
            .conflicts
            .values()
            .map(|record| state.hydrate(record))
            .collect())
    }

    async fn list_sessions(&self) -> Result<Vec<SyncSession>, StoreError> {
        Ok(self.state().sessions.values().cloned().collect())
    }

    async fn list_items(&self) -> Result<Vec<Item>, StoreError> {
        Ok(self.state().items.values().cloned().collect())
    }

    async fn get_item(&self, item_id: &str) -> Result<Option<Item>, StoreError> {
        Ok(self.state().items.get(item_id).cloned())
    }

    fn supports_queries(&self) -> bool {
        true
    }

    async fn query_items(
        &self,
        query: &Query,
        as_of: Option<&CausalClock>,
    ) -> Result<Vec<Item>, StoreError> {
        let state = self.state();
        match as_of {
            Some(clock) => evaluate(
                query,
                state.changes.values().rev(),
                Some(clock),
                self.serializer(),
            ),
            None => evaluate(
                query,
                state.versions.values().filter_map(Version::current_change),
                None,
                self.serializer(),
            ),
        }
    }

    async fn save_tracked_query(&self, tracked: &TrackedQuery) -> Result<(), StoreError> {
        self.state()
            .tracked_queries
            .insert(tracked.id(), tracked.clone());
        Ok(())
    }

    async fn get_tracked_query(
        &self,
        query_id: &QueryId,
    ) -> Result<Option<TrackedQuery>, StoreError> {
        Ok(self.state().tracked_queries.get(query_id).cloned())
    }

    async fn list_tracked_queries(&self) -> Result<Vec<TrackedQuery>, StoreError> {
        Ok(self.state().tracked_queries.values().cloned().collect())
    }
}

/// Replicated state of a store, for convergence checks.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreSnapshot {
    pub items: BTreeMap<String, Item>,
    pub change_ids: BTreeSet<Uuid>,
}

impl StoreSnapshot {
    pub async fn capture(store: &dyn DataStore) -> Result<Self, StoreError> {
        let items = store
            .list_items()
            .await?
            .into_iter()
            .map(|item| (item.id.clone(), item))
            .collect();
        let change_ids = store
            .list_changes()
            .await?
            .into_iter()
            .map(|change| change.id)
            .collect();
        Ok(Self { items, change_ids })
    }
}
