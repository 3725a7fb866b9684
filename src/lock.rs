//! File-based advisory locks guarding the global metadata index and
//! per-repo sync sessions.
//!
//! Lock directory structure under the data path:
//!
//! ```text
//! locks/
//!   global.lock                  # protects repoyard_meta.json
//!   repos/<index_name>/sync.lock # protects one repo's sync session
//! ```

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use fs2::FileExt;

use crate::consts;
use crate::error::{Error, Result};

/// Holds an acquired lock; dropping it releases the lock. The lock file is
/// left in place for reuse (the stale reaper cleans up abandoned ones).
#[derive(Debug)]
pub struct LockGuard {
    file: File,
    path: PathBuf,
}

impl LockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

/// Holds several repo locks; released in reverse acquisition order.
#[derive(Debug)]
pub struct MultiGuard {
    guards: Vec<LockGuard>,
}

impl Drop for MultiGuard {
    fn drop(&mut self) {
        while let Some(guard) = self.guards.pop() {
            drop(guard);
        }
    }
}

#[derive(Debug, Clone)]
pub struct LockManager {
    locks_path: PathBuf,
}

impl LockManager {
    pub fn new(data_path: &Path) -> LockManager {
        LockManager {
            locks_path: data_path.join(consts::LOCKS_DIR),
        }
    }

    pub fn global_lock_path(&self) -> PathBuf {
        self.locks_path.join("global.lock")
    }

    pub fn repo_sync_lock_path(&self, index_name: &str) -> PathBuf {
        self.locks_path.join("repos").join(index_name).join("sync.lock")
    }

    /// Acquire the global lock, blocking up to the default timeout. Take
    /// this around any mutation of the global metadata index.
    pub fn global_lock(&self) -> Result<LockGuard> {
        acquire_blocking(
            &self.global_lock_path(),
            "global",
            consts::GLOBAL_LOCK_TIMEOUT,
        )
    }

    /// Acquire a per-repo sync lock, blocking up to the default timeout.
    /// Take this around sync, include, exclude, delete, rename, and
    /// force-push on that repo.
    pub fn repo_sync_lock(&self, index_name: &str) -> Result<LockGuard> {
        acquire_blocking(
            &self.repo_sync_lock_path(index_name),
            &format!("repo sync ({index_name})"),
            consts::REPO_SYNC_LOCK_TIMEOUT,
        )
    }

    /// Acquire several repo locks in sorted order to avoid deadlocks.
    pub fn multiple_repo_sync_locks(
        &self,
        index_names: &[String],
        timeout: Duration,
    ) -> Result<MultiGuard> {
        let mut sorted: Vec<&String> = index_names.iter().collect();
        sorted.sort();
        sorted.dedup();
        let mut guards = Vec::with_capacity(sorted.len());
        for name in sorted {
            guards.push(acquire_blocking(
                &self.repo_sync_lock_path(name),
                &format!("repo sync ({name})"),
                timeout,
            )?);
        }
        Ok(MultiGuard { guards })
    }

    /// Cancellation-safe async acquisition of the global lock.
    pub async fn global_lock_async(&self) -> Result<LockGuard> {
        acquire_polling(
            &self.global_lock_path(),
            "global",
            consts::GLOBAL_LOCK_TIMEOUT,
        )
        .await
    }

    /// Cancellation-safe async acquisition of a per-repo sync lock: the lock
    /// is polled with short non-blocking attempts, so cancelling the future
    /// between attempts never leaves a lock held.
    pub async fn repo_sync_lock_async(&self, index_name: &str) -> Result<LockGuard> {
        acquire_polling(
            &self.repo_sync_lock_path(index_name),
            &format!("repo sync ({index_name})"),
            consts::REPO_SYNC_LOCK_TIMEOUT,
        )
        .await
    }

    /// Remove lock files older than `max_age` that are not currently held.
    /// A zero-timeout acquire proves there is no live holder, so long
    /// legitimate operations are never disturbed. Returns the removed paths.
    pub fn cleanup_stale_locks(&self, max_age: Duration) -> Vec<PathBuf> {
        let mut removed = Vec::new();
        let mut stack = vec![self.locks_path.clone()];
        while let Some(dir) = stack.pop() {
            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(_) => continue,
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                    continue;
                }
                if path.extension().map_or(true, |ext| ext != "lock") {
                    continue;
                }
                let age = entry
                    .metadata()
                    .and_then(|m| m.modified())
                    .ok()
                    .and_then(|mtime| SystemTime::now().duration_since(mtime).ok());
                if age.map_or(false, |age| age > max_age) {
                    if let Ok(Some(guard)) = try_acquire(&path) {
                        drop(guard);
                        if fs::remove_file(&path).is_ok() {
                            removed.push(path);
                        }
                    }
                }
            }
        }
        removed
    }
}

/// One non-blocking acquisition attempt. `Ok(None)` means the lock is held
/// elsewhere.
fn try_acquire(path: &Path) -> Result<Option<LockGuard>> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .open(path)?;
    match file.try_lock_exclusive() {
        Ok(()) => Ok(Some(LockGuard {
            file,
            path: path.to_path_buf(),
        })),
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn held_err(kind: &str, path: &Path, timeout: Duration) -> Error {
    Error::LockHeld {
        kind: kind.to_string(),
        lock_path: path.to_path_buf(),
        timeout,
    }
}

fn acquire_blocking(path: &Path, kind: &str, timeout: Duration) -> Result<LockGuard> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(guard) = try_acquire(path)? {
            return Ok(guard);
        }
        if Instant::now() >= deadline {
            return Err(held_err(kind, path, timeout));
        }
        std::thread::sleep(consts::LOCK_POLL_INTERVAL);
    }
}

async fn acquire_polling(path: &Path, kind: &str, timeout: Duration) -> Result<LockGuard> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(guard) = try_acquire(path)? {
            return Ok(guard);
        }
        if Instant::now() >= deadline {
            return Err(held_err(kind, path, timeout));
        }
        tokio::time::sleep(consts::LOCK_POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_lock_acquire_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let manager = LockManager::new(dir.path());
        {
            let guard = manager.global_lock().unwrap();
            assert!(guard.path().exists());
            // A second non-blocking attempt fails while held.
            assert!(try_acquire(&manager.global_lock_path()).unwrap().is_none());
        }
        // Released on drop.
        assert!(try_acquire(&manager.global_lock_path()).unwrap().is_some());
    }

    #[test]
    fn repo_lock_times_out_when_held() {
        let dir = tempfile::tempdir().unwrap();
        let manager = LockManager::new(dir.path());
        let _guard = manager.repo_sync_lock("20240101_aaaaa__x").unwrap();
        let err = acquire_blocking(
            &manager.repo_sync_lock_path("20240101_aaaaa__x"),
            "repo sync",
            Duration::from_millis(250),
        )
        .unwrap_err();
        match err {
            Error::LockHeld { lock_path, .. } => {
                assert!(lock_path.ends_with("repos/20240101_aaaaa__x/sync.lock"))
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn multiple_locks_acquire_sorted_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let manager = LockManager::new(dir.path());
        let names = vec!["z__r".to_string(), "a__r".to_string(), "m__r".to_string()];
        {
            let _guards = manager
                .multiple_repo_sync_locks(&names, Duration::from_secs(1))
                .unwrap();
            for name in &names {
                assert!(try_acquire(&manager.repo_sync_lock_path(name))
                    .unwrap()
                    .is_none());
            }
        }
        for name in &names {
            assert!(try_acquire(&manager.repo_sync_lock_path(name))
                .unwrap()
                .is_some());
        }
    }

    #[test]
    fn stale_reaper_skips_held_locks() {
        let dir = tempfile::tempdir().unwrap();
        let manager = LockManager::new(dir.path());
        let held = manager.repo_sync_lock("20240101_aaaaa__held").unwrap();

        // An abandoned lock file, not held by anyone.
        let stale_path = manager.repo_sync_lock_path("20240101_bbbbb__stale");
        fs::create_dir_all(stale_path.parent().unwrap()).unwrap();
        fs::write(&stale_path, "").unwrap();

        let removed = manager.cleanup_stale_locks(Duration::ZERO);
        assert!(removed.contains(&stale_path));
        assert!(!stale_path.exists());
        assert!(held.path().exists());
        drop(held);
    }

    #[tokio::test]
    async fn async_acquire_waits_for_release() {
        let dir = tempfile::tempdir().unwrap();
        let manager = LockManager::new(dir.path());
        let guard = manager.repo_sync_lock("20240101_ccccc__y").unwrap();
        let manager2 = manager.clone();
        let waiter = tokio::spawn(async move {
            acquire_polling(
                &manager2.repo_sync_lock_path("20240101_ccccc__y"),
                "repo sync",
                Duration::from_secs(5),
            )
            .await
        });
        tokio::time::sleep(Duration::from_millis(200)).await;
        drop(guard);
        let acquired = waiter.await.unwrap();
        assert!(acquired.is_ok());
    }
}
