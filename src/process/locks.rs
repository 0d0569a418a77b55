//! Per-key exclusive sections
//!
//! Entries are created on first use and dropped when the last holder or
//! waiter releases them.

use crate::protection::PubKey;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Table = Arc<Mutex<HashMap<PubKey, Arc<AsyncMutex<()>>>>>;

#[derive(Default)]
pub struct KeyLocks {
    table: Table,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to a key
    pub async fn lock(&self, key: PubKey) -> KeyGuard {
        let entry = {
            let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
            table.entry(key).or_default().clone()
        };
        let guard = entry.lock_owned().await;
        KeyGuard {
            key,
            guard: Some(guard),
            table: self.table.clone(),
        }
    }

    /// Lock a set of keys in ascending byte order, so that overlapping sets
    /// requested concurrently cannot deadlock.
    pub async fn lock_all(&self, keys: &BTreeSet<PubKey>) -> Vec<KeyGuard> {
        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            guards.push(self.lock(*key).await);
        }
        guards
    }

    /// Number of keys with a live entry
    pub fn len(&self) -> usize {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exclusive access to one key, released on drop
pub struct KeyGuard {
    key: PubKey,
    guard: Option<OwnedMutexGuard<()>>,
    table: Table,
}

impl KeyGuard {
    pub fn key(&self) -> &PubKey {
        &self.key
    }
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        let Some(guard) = self.guard.take() else {
            return;
        };
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = OwnedMutexGuard::mutex(&guard).clone();
        drop(guard);
        // Only the table and our local clone remain: nobody holds or waits.
        if Arc::strong_count(&entry) == 2 {
            table.remove(&self.key);
        }
    }
}
