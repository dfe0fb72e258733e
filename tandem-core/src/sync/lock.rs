use std::sync::atomic::{AtomicBool, Ordering};

use super::SyncError;

/// Held for the duration of a sync run; dropping it releases the lock.
pub type SyncLockGuard<'a> = Box<dyn Send + 'a>;

/// Mutual exclusion between sync runs.
pub trait SyncLock: Send + Sync {
    fn is_running(&self) -> bool;

    /// Takes the lock without waiting. Fails with [`SyncError::LockHeld`] if
    /// another run holds it.
    fn lock(&self) -> Result<SyncLockGuard<'_>, SyncError>;
}

/// In-process lock backed by an atomic flag.
#[derive(Debug, Default)]
pub struct ProcessSyncLock {
    running: AtomicBool,
}

impl ProcessSyncLock {
    pub fn new() -> Self {
        Self::default()
    }
}

struct ProcessSyncGuard<'a> {
    running: &'a AtomicBool,
}

impl Drop for ProcessSyncGuard<'_> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

impl SyncLock for ProcessSyncLock {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn lock(&self) -> Result<SyncLockGuard<'_>, SyncError> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| SyncError::LockHeld)?;
        Ok(Box::new(ProcessSyncGuard {
            running: &self.running,
        }))
    }
}
