//! Slashing protection store
//!
//! Records are reserved at decision time, then either committed once the
//! signature exists or rolled back to the prior value.

use crate::errors::{Result, SlashGuardError};
use crate::protection::record::{
    merge_maps, Conflict, ProtectionMap, PubKey, SlashingProtection,
};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// Outcome of a reservation attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reservation {
    /// The candidate is now visible for the key, pending commit or rollback
    Reserved,
    /// The candidate would break the protection invariant; nothing changed
    Conflict(Conflict),
}

/// Persistence interface for slashing protection data
pub trait SlashingProtectionStore: Send + Sync {
    /// Current record for a key, including any outstanding reservation
    fn get(&self, key: &PubKey) -> Result<Option<SlashingProtection>>;

    /// Check `candidate` against the current record and, if it is safe,
    /// make it visible as a reservation.
    fn reserve(&self, key: &PubKey, candidate: &SlashingProtection) -> Result<Reservation>;

    /// Make the outstanding reservation for a key permanent. No-op without one.
    fn commit(&self, key: &PubKey) -> Result<()>;

    /// Restore the value from before the outstanding reservation. No-op without one.
    fn rollback(&self, key: &PubKey) -> Result<()>;

    /// Whether the key has an outstanding reservation
    fn is_reserved(&self, key: &PubKey) -> Result<bool>;

    /// Committed records for every key
    fn export_all(&self) -> Result<ProtectionMap>;

    /// Merge records by maximum. Rejects the whole mapping if any record is
    /// invalid.
    fn import_all(&self, records: &ProtectionMap) -> Result<()>;
}

#[derive(Default)]
struct State {
    /// Visible records, reservations included
    records: HashMap<PubKey, SlashingProtection>,
    /// Prior committed value of every key with an outstanding reservation
    pending: HashMap<PubKey, Option<SlashingProtection>>,
}

impl State {
    fn committed(&self) -> ProtectionMap {
        let mut map: ProtectionMap = self
            .records
            .iter()
            .filter(|(key, _)| !self.pending.contains_key(key))
            .map(|(key, record)| (*key, *record))
            .collect();
        for (key, prior) in &self.pending {
            if let Some(record) = prior {
                map.insert(*key, *record);
            }
        }
        map
    }
}

/// In-memory store with optional JSON file durability
pub struct ProtectionStore {
    state: Mutex<State>,
    path: Option<PathBuf>,
}

impl ProtectionStore {
    /// Create a store that keeps records in memory only
    pub fn in_memory() -> Self {
        Self {
            state: Mutex::new(State::default()),
            path: None,
        }
    }

    /// Open a file-backed store, loading any records already persisted
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut state = State::default();

        if path.exists() {
            let json = fs::read_to_string(&path)?;
            let records: ProtectionMap = serde_json::from_str(&json)?;
            for (key, record) in &records {
                record.validate().map_err(|e| {
                    SlashGuardError::StorageError(format!("Invalid record for {}: {}", key, e))
                })?;
            }
            info!(
                "Loaded slashing protection for {} keys from {:?}",
                records.len(),
                path
            );
            state.records = records.into_iter().collect();
        } else if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        Ok(Self {
            state: Mutex::new(state),
            path: Some(path),
        })
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|e| SlashGuardError::StorageError(format!("lock poisoned: {}", e)))
    }

    /// Replace the records file. Callers hold the state lock.
    fn persist(&self, records: &ProtectionMap) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let mut file = NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut file, records)?;
        file.as_file().sync_all()?;
        file.persist(path).map_err(|e| {
            SlashGuardError::StorageError(format!("Failed to replace {:?}: {}", path, e.error))
        })?;
        Ok(())
    }

    /// Number of keys with outstanding reservations
    pub fn pending_count(&self) -> usize {
        self.lock_state().map(|s| s.pending.len()).unwrap_or(0)
    }
}

impl SlashingProtectionStore for ProtectionStore {
    fn get(&self, key: &PubKey) -> Result<Option<SlashingProtection>> {
        let state = self.lock_state()?;
        Ok(state.records.get(key).copied())
    }

    fn reserve(&self, key: &PubKey, candidate: &SlashingProtection) -> Result<Reservation> {
        let mut state = self.lock_state()?;
        let current = state.records.get(key).copied();

        if let Err(conflict) = current.unwrap_or_default().check(candidate) {
            debug!("Reservation refused for {}: {}", key, conflict);
            return Ok(Reservation::Conflict(conflict));
        }

        state.pending.entry(*key).or_insert(current);
        let updated = current.unwrap_or_default().merge_max(candidate);
        state.records.insert(*key, updated);
        debug!("Reserved {:?} for {}", updated, key);
        Ok(Reservation::Reserved)
    }

    fn commit(&self, key: &PubKey) -> Result<()> {
        let mut state = self.lock_state()?;
        if state.pending.remove(key).is_none() {
            return Ok(());
        }
        debug!("Committed reservation for {}", key);
        // Written under the state lock so no older snapshot lands after a newer one.
        self.persist(&state.committed())
    }

    fn is_reserved(&self, key: &PubKey) -> Result<bool> {
        let state = self.lock_state()?;
        Ok(state.pending.contains_key(key))
    }

    fn rollback(&self, key: &PubKey) -> Result<()> {
        let mut state = self.lock_state()?;
        match state.pending.remove(key) {
            Some(Some(prior)) => {
                state.records.insert(*key, prior);
            }
            Some(None) => {
                state.records.remove(key);
            }
            None => return Ok(()),
        }
        debug!("Rolled back reservation for {}", key);
        Ok(())
    }

    fn export_all(&self) -> Result<ProtectionMap> {
        let state = self.lock_state()?;
        Ok(state.committed())
    }

    fn import_all(&self, records: &ProtectionMap) -> Result<()> {
        for (key, record) in records {
            record
                .validate()
                .map_err(|e| SlashGuardError::ImportFault(format!("{}: {}", key, e)))?;
        }

        let mut state = self.lock_state()?;
        let mut committed = state.committed();
        merge_maps(&mut committed, records);
        // Persist before touching memory so a failed write leaves nothing behind.
        self.persist(&committed)
            .map_err(|e| SlashGuardError::ImportFault(format!("persist failed: {}", e)))?;

        for (key, incoming) in records {
            let visible = state
                .records
                .get(key)
                .map_or(*incoming, |existing| existing.merge_max(incoming));
            state.records.insert(*key, visible);
            if let Some(prior) = state.pending.get_mut(key) {
                *prior = Some(prior.map_or(*incoming, |p| p.merge_max(incoming)));
            }
        }

        info!("Imported slashing protection for {} keys", records.len());
        Ok(())
    }
}
