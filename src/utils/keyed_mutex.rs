use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// A mutex that allows locking based on a key (e.g., upload ID).
/// This prevents global locking when only per-upload synchronization is needed.
#[derive(Debug, Clone)]
pub struct KeyedMutex {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedMutex {
    pub fn new() -> Self {
        Self {
            locks: Arc::new(DashMap::new()),
        }
    }

    /// Attempts to take the lock for `key` without waiting.
    /// Returns `None` when another holder has it. The lock is released when
    /// the returned guard is dropped, on every exit path.
    pub fn try_lock(&self, key: &str) -> Option<OwnedMutexGuard<()>> {
        let mutex = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();

        mutex.try_lock_owned().ok()
    }

    /// Removes locks that are not currently held by any task.
    /// This should be called periodically to prevent memory growth.
    pub fn cleanup(&self) {
        self.locks.retain(|_, mutex| Arc::strong_count(mutex) > 1);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl Default for KeyedMutex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_try_lock_fails_while_held() {
        let locks = KeyedMutex::new();
        let guard = locks.try_lock("upload-1").expect("first lock");
        assert!(locks.try_lock("upload-1").is_none());

        // Other keys are independent
        assert!(locks.try_lock("upload-2").is_some());

        drop(guard);
        assert!(locks.try_lock("upload-1").is_some());
    }

    #[test]
    fn test_cleanup_keeps_held_locks() {
        let locks = KeyedMutex::new();
        let held = locks.try_lock("held").unwrap();
        drop(locks.try_lock("idle").unwrap());
        assert_eq!(locks.len(), 2);

        locks.cleanup();
        assert_eq!(locks.len(), 1);
        assert!(locks.try_lock("held").is_none());

        drop(held);
        locks.cleanup();
        assert!(locks.is_empty());
    }
}
