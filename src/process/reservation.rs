//! Reservation tracking for a single request
//!
//! Every key a request may have reserved is resolved exactly once: committed
//! after a successful signature, or rolled back. Whatever is still open when
//! the guard drops is rolled back, which covers early returns and cancelled
//! futures alike.

use crate::errors::Result;
use crate::protection::{PubKey, SlashingProtectionStore};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::error;

pub struct ReservationGuard {
    store: Arc<dyn SlashingProtectionStore>,
    open: BTreeSet<PubKey>,
}

impl ReservationGuard {
    pub fn new(store: Arc<dyn SlashingProtectionStore>, keys: impl IntoIterator<Item = PubKey>) -> Self {
        Self {
            store,
            open: keys.into_iter().collect(),
        }
    }

    pub fn commit(&mut self, key: &PubKey) -> Result<()> {
        if self.open.remove(key) {
            self.store.commit(key)?;
        }
        Ok(())
    }

    pub fn rollback(&mut self, key: &PubKey) -> Result<()> {
        if self.open.remove(key) {
            self.store.rollback(key)?;
        }
        Ok(())
    }

    pub fn is_open(&self, key: &PubKey) -> bool {
        self.open.contains(key)
    }
}

impl Drop for ReservationGuard {
    fn drop(&mut self) {
        for key in std::mem::take(&mut self.open) {
            if let Err(e) = self.store.rollback(&key) {
                error!("Failed to roll back reservation for {}: {}", key, e);
            }
        }
    }
}
