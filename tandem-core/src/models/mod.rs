//! Replication metadata: the records that flow between providers.

mod batch;
mod change;
mod conflict;
mod session;
mod version;

pub use batch::Batch;
pub use change::{Change, Operation};
pub use conflict::{ConflictRecord, ConflictStatus, ConflictType};
pub use session::{SyncSession, SyncSessionStatus};
pub use version::Version;
