use crate::error::ErrorCode;
use fs2::FileExt;
use std::{
    fs::{self, File, OpenOptions},
    io,
    path::{Path, PathBuf},
    thread,
    time::{Duration, Instant},
};

/// Advisory lock errors for the ingestion consumer lock file.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("{}: consumer lock timed out after {waited:?} at {}", ErrorCode::LockContention.code(), path.display())]
    Timeout { path: PathBuf, waited: Duration },

    #[error("{}: {0}", ErrorCode::StoreUnavailable.code())]
    Io(#[from] io::Error),
}

impl LockError {
    /// Machine-readable code associated with this lock error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Timeout { .. } => ErrorCode::LockContention,
            Self::Io(_) => ErrorCode::StoreUnavailable,
        }
    }

    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }
}

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Lock file path guarding the store at `store_path`: `<store>.lock`.
#[must_use]
pub fn lock_path_for(store_path: &Path) -> PathBuf {
    let mut name = store_path.as_os_str().to_os_string();
    name.push(".lock");
    PathBuf::from(name)
}

/// RAII guard held by the single ingestion consumer of a store.
///
/// Report readers never take it. Backfill jobs do not take it either and
/// race live ingestion on `highest_promoted_branch` if run concurrently.
#[derive(Debug)]
pub struct ConsumerLock {
    file: File,
    path: PathBuf,
}

impl ConsumerLock {
    /// Acquire the exclusive consumer lock for `store_path`, polling until
    /// `timeout` elapses.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Timeout`] when another consumer keeps the lock,
    /// or [`LockError::Io`] when the lock file cannot be opened.
    pub fn acquire(store_path: &Path, timeout: Duration) -> Result<Self, LockError> {
        let path = lock_path_for(store_path);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;

        let deadline = Instant::now() + timeout;
        let started = Instant::now();
        while file.try_lock_exclusive().is_err() {
            if Instant::now() >= deadline {
                return Err(LockError::Timeout {
                    path,
                    waited: started.elapsed(),
                });
            }
            thread::sleep(POLL_INTERVAL);
        }
        Ok(Self { file, path })
    }

    /// Explicitly release the lock. Release also happens on drop.
    pub fn release(self) {
        drop(self);
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ConsumerLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}
