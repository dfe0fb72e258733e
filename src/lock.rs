//! Sync lock shared by every `tandem` process working on the same databases.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tandem_core::{StoreError, SyncError, SyncLock, SyncLockGuard};

const LOCK_SUFFIX: &str = ".sync-lock";

/// Advisory file locks, one next to each provider database.
///
/// Two runs exclude each other as soon as they share one database.
#[derive(Debug, Clone)]
pub struct FileSyncLock {
    paths: Vec<PathBuf>,
}

impl FileSyncLock {
    pub fn for_databases<'a>(databases: impl IntoIterator<Item = &'a Path>) -> Self {
        let mut paths: Vec<PathBuf> = databases.into_iter().map(lock_path).collect();
        // Overlapping runs take their locks in the same order.
        paths.sort();
        paths.dedup();
        Self { paths }
    }
}

fn lock_path(database: &Path) -> PathBuf {
    let mut name = database.as_os_str().to_owned();
    name.push(LOCK_SUFFIX);
    PathBuf::from(name)
}

fn open_lock_file(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
}

fn is_contended(error: &io::Error) -> bool {
    error.kind() == fs2::lock_contended_error().kind()
}

fn backend_error(path: &Path, error: io::Error) -> SyncError {
    SyncError::Store(StoreError::Backend(format!(
        "Failed to lock {}: {}",
        path.display(),
        error
    )))
}

struct FileSyncGuard {
    files: Vec<File>,
}

impl Drop for FileSyncGuard {
    fn drop(&mut self) {
        for file in &self.files {
            let _ = FileExt::unlock(file);
        }
    }
}

impl SyncLock for FileSyncLock {
    fn is_running(&self) -> bool {
        self.paths.iter().any(|path| {
            let Ok(file) = open_lock_file(path) else {
                return false;
            };
            match FileExt::try_lock_shared(&file) {
                Ok(()) => {
                    let _ = FileExt::unlock(&file);
                    false
                }
                Err(e) => is_contended(&e),
            }
        })
    }

    fn lock(&self) -> Result<SyncLockGuard<'_>, SyncError> {
        let mut guard = FileSyncGuard {
            files: Vec::with_capacity(self.paths.len()),
        };
        for path in &self.paths {
            let file = open_lock_file(path).map_err(|e| backend_error(path, e))?;
            match FileExt::try_lock_exclusive(&file) {
                Ok(()) => guard.files.push(file),
                Err(e) if is_contended(&e) => {
                    tracing::debug!(path = %path.display(), "Sync lock held elsewhere");
                    return Err(SyncError::LockHeld);
                }
                Err(e) => return Err(backend_error(path, e)),
            }
        }
        Ok(Box::new(guard))
    }
}
