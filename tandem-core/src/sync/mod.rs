//! The replication protocol: conflict resolution, change execution and the
//! orchestration of sync sessions between providers.

mod error;
mod executor;
mod lock;
mod orchestrator;
mod provider;
mod resolver;
mod timer;

pub use error::SyncError;
pub use executor::ChangeExecutor;
pub use lock::{ProcessSyncLock, SyncLock, SyncLockGuard};
pub use orchestrator::{RunOutcome, SyncOrchestrator};
pub use provider::SyncProvider;
pub use resolver::ConflictResolver;
pub use timer::SyncTimer;
