use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::json;
use tandem_core::{
    now_utc, Batch, CausalClock, Change, ChangeExecutor, Comparator, ConflictRecord,
    ConflictStatus, ConflictType, DataStore, DataStoreExt, Filter, Item, ItemSerializer,
    MemoryStore, Operation, ProcessSyncLock, Query, RunOutcome, SessionEventsManager,
    StoreError, StoreSnapshot, SyncError, SyncOrchestrator, SyncProvider, SyncSession,
    SyncSessionStatus, Version,
};
use uuid::Uuid;

fn todo(id: &str, title: &str) -> Item {
    Item::new(id, "todo")
        .with_field("title", title)
        .with_field("done", false)
}

fn orchestrator(stores: &[Arc<MemoryStore>], page_size: usize) -> SyncOrchestrator {
    let providers = stores
        .iter()
        .map(|store| SyncProvider::with_session_events(store.clone(), page_size))
        .collect();
    SyncOrchestrator::new(
        Arc::new(ProcessSyncLock::new()),
        providers,
        Duration::from_secs(60),
    )
}

async fn snapshot(store: &MemoryStore) -> StoreSnapshot {
    StoreSnapshot::capture(store).await.unwrap()
}

async fn title(store: &MemoryStore, id: &str) -> Option<serde_json::Value> {
    store
        .get_item(id)
        .await
        .unwrap()
        .and_then(|item| item.field("title"))
}

/// Keeps authoring timestamps of different providers apart.
async fn tick() {
    tokio::time::sleep(Duration::from_millis(2)).await;
}

#[tokio::test]
async fn test_two_passes_converge() {
    let a = Arc::new(MemoryStore::new("a"));
    let b = Arc::new(MemoryStore::new("b"));
    a.commit_item_change(Operation::Insert, &todo("x", "milk"))
        .await
        .unwrap();
    a.commit_item_change(Operation::Insert, &todo("y", "eggs"))
        .await
        .unwrap();
    b.commit_item_change(Operation::Insert, &todo("z", "bread"))
        .await
        .unwrap();

    let outcome = orchestrator(&[a.clone(), b.clone()], 100)
        .run("a")
        .await
        .unwrap();

    assert_eq!(outcome, RunOutcome::Completed);
    let left = snapshot(&a).await;
    assert_eq!(left, snapshot(&b).await);
    assert_eq!(left.items.len(), 3);
    assert_eq!(left.change_ids.len(), 3);
    assert!(a.list_conflicts().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_page_size_does_not_change_result() {
    let mut results = Vec::new();
    for page_size in [1, 2, 100] {
        let a = Arc::new(MemoryStore::new("a"));
        let b = Arc::new(MemoryStore::new("b"));
        for (id, title) in [("x", "milk"), ("y", "eggs"), ("z", "bread")] {
            a.commit_item_change(Operation::Insert, &todo(id, title))
                .await
                .unwrap();
        }
        a.commit_item_change(Operation::Update, &todo("y", "more eggs"))
            .await
            .unwrap();
        a.commit_item_change(Operation::Delete, &todo("z", "bread"))
            .await
            .unwrap();

        orchestrator(&[a.clone(), b.clone()], page_size)
            .run("a")
            .await
            .unwrap();

        assert_eq!(snapshot(&a).await, snapshot(&b).await);
        results.push(snapshot(&b).await.items);
    }
    assert!(results.windows(2).all(|pair| pair[0] == pair[1]));
    assert_eq!(results[0].len(), 2);
}

#[tokio::test]
async fn test_update_update_conflict_resolves_to_latest() {
    let a = Arc::new(MemoryStore::new("a"));
    let b = Arc::new(MemoryStore::new("b"));
    let sync = orchestrator(&[a.clone(), b.clone()], 100);

    a.commit_item_change(Operation::Insert, &todo("x", "v1"))
        .await
        .unwrap();
    sync.run("a").await.unwrap();

    a.commit_item_change(Operation::Update, &todo("x", "v2"))
        .await
        .unwrap();
    tick().await;
    let v3 = b
        .commit_item_change(Operation::Update, &todo("x", "v3"))
        .await
        .unwrap();

    sync.run("a").await.unwrap();

    assert_eq!(title(&a, "x").await, Some(json!("v3")));
    assert_eq!(title(&b, "x").await, Some(json!("v3")));
    assert_eq!(snapshot(&a).await, snapshot(&b).await);

    for store in [&a, &b] {
        let conflicts = store.list_conflicts().await.unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].status, ConflictStatus::Resolved);
        assert_eq!(conflicts[0].conflict_type, ConflictType::UpdateUpdate);
        assert_eq!(conflicts[0].winner.as_ref().map(|c| c.id), Some(v3.id));
        assert!(conflicts[0].loser.should_ignore);
        assert!(conflicts[0].resolved_at.is_some());
    }
}

#[tokio::test]
async fn test_deletion_wins_over_later_update() {
    let a = Arc::new(MemoryStore::new("a"));
    let b = Arc::new(MemoryStore::new("b"));
    let sync = orchestrator(&[a.clone(), b.clone()], 100);

    a.commit_item_change(Operation::Insert, &todo("y", "v1"))
        .await
        .unwrap();
    sync.run("a").await.unwrap();

    a.commit_item_change(Operation::Delete, &todo("y", "v1"))
        .await
        .unwrap();
    tick().await;
    b.commit_item_change(Operation::Update, &todo("y", "v2"))
        .await
        .unwrap();

    sync.run("a").await.unwrap();

    assert_eq!(a.get_item("y").await.unwrap(), None);
    assert_eq!(b.get_item("y").await.unwrap(), None);

    let on_b = b.list_conflicts().await.unwrap();
    assert_eq!(on_b.len(), 1);
    assert_eq!(on_b[0].conflict_type, ConflictType::UpdateDelete);
    assert_eq!(
        on_b[0].winner.as_ref().map(|c| c.operation),
        Some(Operation::Delete)
    );

    let on_a = a.list_conflicts().await.unwrap();
    assert_eq!(on_a.len(), 1);
    assert_eq!(on_a[0].conflict_type, ConflictType::DeleteUpdate);
    assert_eq!(
        on_a[0].winner.as_ref().map(|c| c.operation),
        Some(Operation::Delete)
    );
}

#[tokio::test]
async fn test_processing_twice_is_idempotent() {
    let a = MemoryStore::new("a");
    let mut change = a
        .commit_item_change(Operation::Insert, &todo("x", "milk"))
        .await
        .unwrap();
    change.reset_status();

    let b: Arc<MemoryStore> = Arc::new(MemoryStore::new("b"));
    let executor = ChangeExecutor::new(b.clone(), Arc::new(SessionEventsManager::new(b.clone())));
    let mut session = SyncSession::start("a", "b", tandem_core::now_utc());

    executor.process(&mut session, &change, None).await.unwrap();
    let once = snapshot(&b).await;
    let versions_once = b.list_versions().await.unwrap();

    executor.process(&mut session, &change, None).await.unwrap();

    assert_eq!(snapshot(&b).await, once);
    assert_eq!(b.list_versions().await.unwrap(), versions_once);
    assert_eq!(once.change_ids.len(), 1);
    assert_eq!(session.changes.len(), 2);
}

#[tokio::test]
async fn test_failed_change_is_deferred_and_retried() {
    let a = Arc::new(MemoryStore::new("a"));
    let b = Arc::new(MemoryStore::new("b"));
    let sync = orchestrator(&[a.clone(), b.clone()], 100);

    a.commit_item_change(Operation::Insert, &todo("x", "milk"))
        .await
        .unwrap();
    a.commit_item_change(Operation::Insert, &todo("y", "eggs"))
        .await
        .unwrap();
    b.fail_writes_for("x");

    sync.run("a").await.unwrap();
    sync.run("a").await.unwrap();

    assert_eq!(b.get_item("x").await.unwrap(), None);
    assert!(b.get_item("y").await.unwrap().is_some());
    let conflicts = b.list_conflicts().await.unwrap();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].status, ConflictStatus::Deferred);
    assert_eq!(conflicts[0].conflict_type, ConflictType::ExceptionOccurred);
    assert!(conflicts[0].winner.is_none());
    assert!(conflicts[0]
        .description
        .as_deref()
        .unwrap_or_default()
        .contains("Write rejected"));
    let sessions = b.list_sessions().await.unwrap();
    assert!(sessions
        .iter()
        .all(|s| s.status == SyncSessionStatus::Finished));

    b.clear_write_failures();
    sync.run("a").await.unwrap();

    assert_eq!(title(&b, "x").await, Some(json!("milk")));
    let conflicts = b.list_conflicts().await.unwrap();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].status, ConflictStatus::Resolved);
    assert!(conflicts[0].resolved_at.is_some());
    assert!(conflicts[0].loser.is_applied);
    assert_eq!(snapshot(&a).await, snapshot(&b).await);
}

#[tokio::test]
async fn test_escalating_events_manager_surfaces_failures() {
    let a = Arc::new(MemoryStore::new("a"));
    let b = Arc::new(MemoryStore::new("b"));
    let providers = vec![
        SyncProvider::with_session_events(a.clone(), 100),
        SyncProvider::new(
            b.clone(),
            Arc::new(SessionEventsManager::escalating(b.clone())),
            100,
        ),
    ];
    let sync = SyncOrchestrator::new(
        Arc::new(ProcessSyncLock::new()),
        providers,
        Duration::from_secs(60),
    );

    a.commit_item_change(Operation::Insert, &todo("x", "milk"))
        .await
        .unwrap();
    b.fail_writes_for("x");

    let result = sync.synchronize_providers("a", "b", None).await;

    assert!(matches!(result, Err(SyncError::Escalated(_))));
    let sessions = b.list_sessions().await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].status, SyncSessionStatus::Failed);
    assert_eq!(b.list_conflicts().await.unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_keeps_applied_changes() {
    let a = Arc::new(MemoryStore::new("a"));
    let b = Arc::new(MemoryStore::new("b").with_write_delay(Duration::from_secs(10)));
    for (id, title) in [
        ("p", "one"),
        ("q", "two"),
        ("r", "three"),
        ("s", "four"),
        ("t", "five"),
    ] {
        a.commit_item_change(Operation::Insert, &todo(id, title))
            .await
            .unwrap();
    }
    let providers = vec![
        SyncProvider::with_session_events(a.clone(), 1),
        SyncProvider::with_session_events(b.clone(), 1),
    ];
    let sync = SyncOrchestrator::new(
        Arc::new(ProcessSyncLock::new()),
        providers,
        Duration::from_secs(25),
    );

    let status = sync.synchronize_providers("a", "b", None).await.unwrap();

    assert_eq!(status, SyncSessionStatus::Failed);
    assert_eq!(b.list_items().await.unwrap().len(), 3);
    for store in [&a, &b] {
        let sessions = store.list_sessions().await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].status, SyncSessionStatus::Failed);
        assert!(sessions[0].ended_at.is_some());
    }

    let status = sync.synchronize_providers("a", "b", None).await.unwrap();

    assert_eq!(status, SyncSessionStatus::Finished);
    assert_eq!(b.list_items().await.unwrap().len(), 5);
    assert_eq!(snapshot(&a).await, snapshot(&b).await);
}

#[tokio::test]
async fn test_three_providers_converge() {
    let stores: Vec<Arc<MemoryStore>> = ["a", "b", "c"]
        .iter()
        .map(|id| Arc::new(MemoryStore::new(*id)))
        .collect();
    for (store, id) in stores.iter().zip(["x", "y", "z"]) {
        store
            .commit_item_change(Operation::Insert, &todo(id, id))
            .await
            .unwrap();
    }

    orchestrator(&stores, 100).run("b").await.unwrap();

    let first = snapshot(&stores[0]).await;
    assert_eq!(first.items.len(), 3);
    for store in &stores[1..] {
        assert_eq!(snapshot(store).await, first);
    }
}

#[tokio::test]
async fn test_query_scoped_sync_delivers_departures() {
    let a = Arc::new(MemoryStore::new("a"));
    let b = Arc::new(MemoryStore::new("b"));
    let sync = orchestrator(&[a.clone(), b.clone()], 100);
    let open = Query::filtered("todo", Filter::compare("done", Comparator::Eq, false));

    a.commit_item_change(Operation::Insert, &todo("x", "milk"))
        .await
        .unwrap();
    a.commit_item_change(
        Operation::Insert,
        &todo("y", "eggs").with_field("done", true),
    )
    .await
    .unwrap();

    sync.run_with_query("a", Some(&open)).await.unwrap();

    assert!(b.get_item("x").await.unwrap().is_some());
    assert_eq!(b.get_item("y").await.unwrap(), None);

    a.commit_item_change(
        Operation::Update,
        &todo("x", "milk").with_field("done", true),
    )
    .await
    .unwrap();

    sync.run_with_query("a", Some(&open)).await.unwrap();

    let x = b.get_item("x").await.unwrap().unwrap();
    assert_eq!(x.field("done"), Some(json!(true)));
    assert_eq!(b.get_item("y").await.unwrap(), None);
}

/// A backend without query support. Everything else is delegated to an
/// in-memory store.
struct PlainStore {
    inner: MemoryStore,
    /// Reports every execution as unsupported.
    unsupported_writes: bool,
}

impl PlainStore {
    fn new(provider_id: &str) -> Self {
        Self {
            inner: MemoryStore::new(provider_id),
            unsupported_writes: false,
        }
    }
}

#[async_trait]
impl DataStore for PlainStore {
    fn local_provider_id(&self) -> &str {
        self.inner.local_provider_id()
    }

    fn serializer(&self) -> &dyn ItemSerializer {
        self.inner.serializer()
    }

    async fn get_local_clock(&self, query: Option<&Query>) -> Result<CausalClock, StoreError> {
        if query.is_some() {
            return Err(StoreError::QueriesUnsupported);
        }
        self.inner.get_local_clock(None).await
    }

    async fn get_version(&self, item_id: &str) -> Result<Option<Version>, StoreError> {
        self.inner.get_version(item_id).await
    }

    async fn get_change(&self, id: Uuid) -> Result<Change, StoreError> {
        self.inner.get_change(id).await
    }

    async fn select_changes(
        &self,
        since: &CausalClock,
        limit: usize,
        query: Option<&Query>,
    ) -> Result<Batch, StoreError> {
        if query.is_some() {
            return Err(StoreError::QueriesUnsupported);
        }
        self.inner.select_changes(since, limit, None).await
    }

    async fn select_deferred_changes(
        &self,
        since: &CausalClock,
        limit: usize,
        query: Option<&Query>,
    ) -> Result<Batch, StoreError> {
        if query.is_some() {
            return Err(StoreError::QueriesUnsupported);
        }
        self.inner.select_deferred_changes(since, limit, None).await
    }

    async fn save_change(&self, change: &Change) -> Result<(), StoreError> {
        self.inner.save_change(change).await
    }

    async fn save_version(&self, version: &Version) -> Result<(), StoreError> {
        self.inner.save_version(version).await
    }

    async fn save_conflict(&self, record: &ConflictRecord) -> Result<(), StoreError> {
        self.inner.save_conflict(record).await
    }

    async fn save_session(&self, session: &SyncSession) -> Result<(), StoreError> {
        self.inner.save_session(session).await
    }

    async fn get_deferred_conflicts(
        &self,
        loser_id: Uuid,
    ) -> Result<Vec<ConflictRecord>, StoreError> {
        self.inner.get_deferred_conflicts(loser_id).await
    }

    async fn run_in_transaction<'a>(
        &'a self,
        item_id: &'a str,
        work: BoxFuture<'a, Result<(), SyncError>>,
    ) -> Result<(), SyncError> {
        self.inner.run_in_transaction(item_id, work).await
    }

    async fn execute(&self, change: &Change) -> Result<(), StoreError> {
        if self.unsupported_writes {
            return Err(StoreError::QueriesUnsupported);
        }
        self.inner.execute(change).await
    }

    async fn list_changes(&self) -> Result<Vec<Change>, StoreError> {
        self.inner.list_changes().await
    }

    async fn list_versions(&self) -> Result<Vec<Version>, StoreError> {
        self.inner.list_versions().await
    }

    async fn list_conflicts(&self) -> Result<Vec<ConflictRecord>, StoreError> {
        self.inner.list_conflicts().await
    }

    async fn list_sessions(&self) -> Result<Vec<SyncSession>, StoreError> {
        self.inner.list_sessions().await
    }

    async fn list_items(&self) -> Result<Vec<Item>, StoreError> {
        self.inner.list_items().await
    }

    async fn get_item(&self, item_id: &str) -> Result<Option<Item>, StoreError> {
        self.inner.get_item(item_id).await
    }
}

fn executor(store: Arc<dyn DataStore>) -> ChangeExecutor {
    ChangeExecutor::new(store.clone(), Arc::new(SessionEventsManager::new(store)))
}

/// The change as it travels between providers.
fn in_transit(change: &Change) -> Change {
    let mut change = change.clone();
    change.reset_status();
    change
}

#[tokio::test]
async fn test_ignored_change_is_marked_applied_without_execution() {
    let a = MemoryStore::new("a");
    let b = Arc::new(MemoryStore::new("b"));
    let change = a
        .commit_item_change(Operation::Insert, &todo("x", "milk"))
        .await
        .unwrap();

    // Lost a conflict earlier but was never marked applied.
    let mut stored = in_transit(&change);
    stored.created_at = Some(now_utc());
    stored.should_ignore = true;
    b.save_change(&stored).await.unwrap();
    // Executing would fail and leave a deferred record behind.
    b.fail_writes_for("x");

    let mut session = SyncSession::start("a", "b", now_utc());
    executor(b.clone())
        .process(&mut session, &in_transit(&change), None)
        .await
        .unwrap();

    let after = b.get_change(change.id).await.unwrap();
    assert!(after.is_applied);
    assert!(after.should_ignore);
    assert_eq!(b.get_item("x").await.unwrap(), None);
    assert_eq!(b.get_version("x").await.unwrap(), None);
    assert!(b.list_conflicts().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_query_scoped_sync_requires_query_support() {
    let a = Arc::new(MemoryStore::new("a"));
    let b = Arc::new(PlainStore::new("b"));
    a.commit_item_change(Operation::Insert, &todo("x", "milk"))
        .await
        .unwrap();
    let query = Query::filtered("todo", Filter::all());

    let orchestrator = SyncOrchestrator::new(
        Arc::new(ProcessSyncLock::new()),
        vec![
            SyncProvider::with_session_events(a.clone(), 10),
            SyncProvider::with_session_events(b.clone(), 10),
        ],
        Duration::from_secs(60),
    );

    let result = orchestrator
        .synchronize_providers("a", "b", Some(&query))
        .await;
    assert!(matches!(
        result,
        Err(SyncError::Store(StoreError::QueriesUnsupported))
    ));

    let result = orchestrator.run_with_query("b", Some(&query)).await;
    assert!(matches!(
        result,
        Err(SyncError::Store(StoreError::QueriesUnsupported))
    ));

    assert!(a.list_sessions().await.unwrap().is_empty());
    assert!(b.list_sessions().await.unwrap().is_empty());
    assert_eq!(b.get_item("x").await.unwrap(), None);
}

#[tokio::test]
async fn test_executor_propagates_protocol_misuse() {
    let a = MemoryStore::new("a");
    let change = a
        .commit_item_change(Operation::Insert, &todo("x", "milk"))
        .await
        .unwrap();

    // Misuse raised while applying inside the item transaction.
    let b = Arc::new(PlainStore {
        inner: MemoryStore::new("b"),
        unsupported_writes: true,
    });
    let mut session = SyncSession::start("a", "b", now_utc());
    let result = executor(b.clone())
        .process(&mut session, &in_transit(&change), None)
        .await;

    assert!(matches!(
        result,
        Err(SyncError::Store(StoreError::QueriesUnsupported))
    ));
    assert!(b.list_conflicts().await.unwrap().is_empty());
    assert!(!b.get_change(change.id).await.unwrap().is_applied);
    assert_eq!(b.get_item("x").await.unwrap(), None);

    // Misuse raised by a query-scoped upload to a store without queries.
    let c = Arc::new(PlainStore::new("c"));
    let query = Query::filtered("todo", Filter::all());
    let mut session = SyncSession::start("a", "c", now_utc());
    let result = executor(c.clone())
        .process(&mut session, &in_transit(&change), Some(&query))
        .await;

    assert!(matches!(
        result,
        Err(SyncError::Store(StoreError::QueriesUnsupported))
    ));
    assert!(c.list_conflicts().await.unwrap().is_empty());
    assert_eq!(c.get_item("x").await.unwrap(), None);
}
