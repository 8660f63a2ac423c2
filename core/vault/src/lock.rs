//! Per-document write locks.
//!
//! A name is held for the duration of a single write or removal and
//! released when the returned guard is dropped, on every exit path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::debug;

use reevault_common::{Error, Result};

/// Set of document names currently being written.
#[derive(Debug, Default)]
pub struct LockTable {
    held: Mutex<HashMap<String, u64>>,
    next_token: AtomicU64,
}

impl LockTable {
    /// Create an empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock for `name`.
    ///
    /// # Errors
    /// Returns [`Error::FileBusy`] if the name is already held.
    pub fn acquire(&self, name: &str) -> Result<LockGuard<'_>> {
        let mut held = self.held.lock();
        if held.contains_key(name) {
            return Err(Error::FileBusy(name.to_string()));
        }
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        held.insert(name.to_string(), token);
        debug!(name, "Lock acquired");

        Ok(LockGuard {
            table: self,
            name: name.to_string(),
            token,
        })
    }

    /// Whether `name` is held.
    pub fn is_locked(&self, name: &str) -> bool {
        self.held.lock().contains_key(name)
    }

    /// Whether any name is held.
    pub fn any_locked(&self) -> bool {
        !self.held.lock().is_empty()
    }

    /// Release `name` unconditionally.
    ///
    /// Guards from before the release no longer own the name.
    pub fn release(&self, name: &str) {
        if self.held.lock().remove(name).is_some() {
            debug!(name, "Lock released");
        }
    }

    fn release_owned(&self, name: &str, token: u64) {
        let mut held = self.held.lock();
        if held.get(name) == Some(&token) {
            held.remove(name);
            debug!(name, "Lock released");
        }
    }
}

/// Releases its document lock on drop.
#[must_use = "the lock is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct LockGuard<'a> {
    table: &'a LockTable,
    name: String,
    token: u64,
}

impl LockGuard<'_> {
    /// Name being held.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.table.release_owned(&self.name, self.token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_and_release() {
        let table = LockTable::new();

        let guard = table.acquire("doc").unwrap();
        assert_eq!(guard.name(), "doc");
        assert!(table.is_locked("doc"));
        assert!(table.any_locked());

        drop(guard);
        assert!(!table.is_locked("doc"));
        assert!(!table.any_locked());
    }

    #[test]
    fn test_double_acquire_is_busy() {
        let table = LockTable::new();
        let _guard = table.acquire("doc").unwrap();

        assert!(matches!(table.acquire("doc"), Err(Error::FileBusy(name)) if name == "doc"));
        assert!(table.acquire("other").is_ok());
    }

    #[test]
    fn test_forced_release() {
        let table = LockTable::new();
        let stale = table.acquire("doc").unwrap();

        table.release("doc");
        assert!(!table.is_locked("doc"));

        let current = table.acquire("doc").unwrap();
        drop(stale);
        assert!(table.is_locked("doc"));
        assert!(matches!(table.acquire("doc"), Err(Error::FileBusy(_))));

        drop(current);
        assert!(!table.is_locked("doc"));
    }

    #[test]
    fn test_released_on_early_return() {
        fn failing(table: &LockTable) -> Result<()> {
            let _guard = table.acquire("doc")?;
            Err(Error::InvalidInput("boom".to_string()))
        }

        let table = LockTable::new();
        assert!(failing(&table).is_err());
        assert!(!table.is_locked("doc"));
    }

    #[test]
    fn test_concurrent_acquire_single_winner() {
        use std::sync::Arc;
        use std::sync::Barrier;

        let table = Arc::new(LockTable::new());
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let table = Arc::clone(&table);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    match table.acquire("doc") {
                        Ok(guard) => {
                            // Hold until every thread has tried.
                            barrier.wait();
                            drop(guard);
                            true
                        }
                        Err(_) => {
                            barrier.wait();
                            false
                        }
                    }
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();

        assert_eq!(winners, 1);
        assert!(!table.any_locked());
    }
}
