use std::sync::Arc;

use super::{ChangeExecutor, SyncError};
use crate::clock::CausalClock;
use crate::events::{EventsManager, SessionEventsManager};
use crate::models::{Batch, SyncSession};
use crate::query::Query;
use crate::store::DataStore;

/// One endpoint of synchronization: a store, its events manager and the
/// executor applying inbound changes to it.
pub struct SyncProvider {
    id: String,
    store: Arc<dyn DataStore>,
    events: Arc<dyn EventsManager>,
    executor: ChangeExecutor,
    page_size: usize,
}

impl SyncProvider {
    pub fn new(
        store: Arc<dyn DataStore>,
        events: Arc<dyn EventsManager>,
        page_size: usize,
    ) -> Self {
        Self {
            id: store.local_provider_id().to_string(),
            executor: ChangeExecutor::new(store.clone(), events.clone()),
            store,
            events,
            page_size: page_size.max(1),
        }
    }

    /// Provider whose sessions are persisted by a [`SessionEventsManager`].
    pub fn with_session_events(store: Arc<dyn DataStore>, page_size: usize) -> Self {
        let events = Arc::new(SessionEventsManager::new(store.clone()));
        Self::new(store, events, page_size)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn store(&self) -> &Arc<dyn DataStore> {
        &self.store
    }

    pub fn events(&self) -> &dyn EventsManager {
        self.events.as_ref()
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub async fn get_clock(&self, query: Option<&Query>) -> Result<CausalClock, SyncError> {
        Ok(self.store.get_local_clock(query).await?)
    }

    /// Next page of local changes newer than `since`, stripped of local
    /// status.
    pub async fn download_changes(
        &self,
        since: &CausalClock,
        query: Option<&Query>,
    ) -> Result<Batch, SyncError> {
        let mut batch = self
            .store
            .select_changes(since, self.page_size, query)
            .await?;
        batch.reset_status();
        Ok(batch)
    }

    /// Applies a page of remote changes.
    pub async fn upload_changes(
        &self,
        session: &mut SyncSession,
        batch: &Batch,
        query: Option<&Query>,
    ) -> Result<(), SyncError> {
        self.executor.run(session, &batch.changes, query).await
    }

    /// Next page of changes received earlier that still wait on a deferred
    /// conflict.
    pub async fn get_deferred_changes(
        &self,
        since: &CausalClock,
        query: Option<&Query>,
    ) -> Result<Batch, SyncError> {
        Ok(self
            .store
            .select_deferred_changes(since, self.page_size, query)
            .await?)
    }
}

impl std::fmt::Debug for SyncProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncProvider")
            .field("id", &self.id)
            .field("page_size", &self.page_size)
            .finish()
    }
}
