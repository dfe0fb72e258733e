//! Tandem Core Library
//!
//! Causal-clock replication of items between two storage providers:
//! conflict detection and resolution, deferred retries, time-bounded sync
//! sessions and query-scoped tracking.

pub mod clock;
pub mod events;
pub mod item;
pub mod memory;
pub mod models;
pub mod query;
pub mod store;
pub mod sync;

pub use clock::{now_utc, CausalClock, ClockEntry, ClockError};
pub use events::{EventsManager, SessionEventsManager};
pub use item::{Item, ItemSerializer, JsonItemSerializer};
pub use memory::{MemoryStore, StoreSnapshot};
pub use models::{
    Batch, Change, ConflictRecord, ConflictStatus, ConflictType, Operation, SyncSession,
    SyncSessionStatus, Version,
};
pub use query::{Comparator, Filter, Query, QueryId, QueryTracking, SortOrder, TrackedQuery};
pub use store::{DataStore, DataStoreExt, StoreError};
pub use sync::{
    ChangeExecutor, ConflictResolver, ProcessSyncLock, RunOutcome, SyncError, SyncLock,
    SyncLockGuard, SyncOrchestrator, SyncProvider, SyncTimer,
};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
