// File: ./src/sync/lock.rs
//! Per-source mutual exclusion. Acquisition never waits: a held lock is a
//! refusal, reported as `SyncError::Busy`.
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Held for the duration of one cycle; dropping it releases the source.
#[derive(Debug)]
pub struct LockToken {
    source: String,
    _guard: OwnedMutexGuard<()>,
}

impl LockToken {
    pub fn source(&self) -> &str {
        &self.source
    }
}

impl Drop for LockToken {
    fn drop(&mut self) {
        log::debug!("Released sync lock for '{}'", self.source);
    }
}

#[derive(Debug, Default, Clone)]
pub struct LockManager {
    locks: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, source: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(source.to_lowercase())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// `None` when a cycle for `source` is already in flight.
    pub fn try_acquire(&self, source: &str) -> Option<LockToken> {
        let guard = self.slot(source).try_lock_owned().ok()?;
        log::debug!("Acquired sync lock for '{}'", source);
        Some(LockToken {
            source: source.to_string(),
            _guard: guard,
        })
    }

    pub fn is_held(&self, source: &str) -> bool {
        let slot = self.slot(source);
        let held = slot.try_lock().is_err();
        held
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_is_refused_until_release() {
        let locks = LockManager::new();
        let token = locks.try_acquire("foo").unwrap();
        assert_eq!(token.source(), "foo");
        assert!(locks.try_acquire("FOO").is_none());
        assert!(locks.is_held("foo"));
        assert!(locks.try_acquire("bar").is_some());

        drop(token);
        assert!(!locks.is_held("foo"));
        assert!(locks.try_acquire("foo").is_some());
    }

    #[test]
    fn test_clones_share_state() {
        let a = LockManager::new();
        let b = a.clone();
        let _t = a.try_acquire("x").unwrap();
        assert!(b.try_acquire("x").is_none());
    }
}
