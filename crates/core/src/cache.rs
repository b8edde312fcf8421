//! Process-local flag cache.
//!
//! The cache is the synchronous, zero-I/O read path used by every guarded
//! call site. It mirrors the flag store as a copy-on-write snapshot:
//! `refresh` and the local-commit hooks build a new map and swap the whole
//! `Arc`, so readers never observe a partially updated view and never block
//! on a write in progress.
//!
//! A failed refresh keeps the previous snapshot; within one process lifetime
//! the cache never regresses to an older value than the ones this process
//! committed or observed.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use shoebox_domain::constants::default_enabled;
use shoebox_domain::{FeatureFlag, PersistedFlagState};
use tracing::{debug, warn};

use crate::store::FlagStore;

type Snapshot = Arc<HashMap<String, bool>>;

/// Synchronous in-memory mirror of the flag store.
pub struct FlagCache {
    store: Arc<FlagStore>,
    snapshot: RwLock<Snapshot>,
}

impl FlagCache {
    /// Create an empty cache over the given store. Call [`refresh`] (or rely
    /// on [`apply_local_commit`]) to populate it.
    ///
    /// [`refresh`]: FlagCache::refresh
    /// [`apply_local_commit`]: FlagCache::apply_local_commit
    pub fn new(store: Arc<FlagStore>) -> Self {
        Self { store, snapshot: RwLock::new(Arc::new(HashMap::new())) }
    }

    /// Current value of a flag. Never suspends.
    ///
    /// Unknown flags resolve to their default-registry value (disabled for
    /// unregistered names).
    pub fn get(&self, name: &str) -> bool {
        self.read().get(name).copied().unwrap_or_else(|| default_enabled(name))
    }

    /// Point-in-time snapshot of all cached flags. Never suspends.
    pub fn get_all(&self) -> HashMap<String, bool> {
        self.read().as_ref().clone()
    }

    /// Reload from the flag store and atomically swap the snapshot.
    ///
    /// On a storage error the previous snapshot stays in place; the caller
    /// keeps operating on the last known values.
    pub async fn refresh(&self) {
        match self.store.load().await {
            Ok(state) => {
                self.swap(flag_values(&state));
                debug!("flag cache refreshed");
            }
            Err(error) => {
                warn!(%error, "flag cache refresh failed, keeping last known values");
            }
        }
    }

    /// Record a locally committed flag immediately (read-your-writes),
    /// without waiting for the next refresh.
    pub fn apply_local_commit(&self, flag: &FeatureFlag) {
        self.apply_local_value(&flag.name, flag.enabled);
    }

    /// Force one cached value. Used for local commits and for the breaker's
    /// degraded path when an auto-disable could not be persisted.
    pub fn apply_local_value(&self, name: &str, enabled: bool) {
        let mut next = self.read().as_ref().clone();
        next.insert(name.to_string(), enabled);
        self.swap(next);
    }

    fn read(&self) -> Snapshot {
        match self.snapshot.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => {
                warn!("flag cache snapshot lock poisoned");
                Arc::clone(&poisoned.into_inner())
            }
        }
    }

    fn swap(&self, next: HashMap<String, bool>) {
        match self.snapshot.write() {
            Ok(mut guard) => *guard = Arc::new(next),
            Err(poisoned) => {
                warn!("flag cache snapshot lock poisoned");
                *poisoned.into_inner() = Arc::new(next);
            }
        }
    }
}

fn flag_values(state: &PersistedFlagState) -> HashMap<String, bool> {
    state.flags.values().map(|f| (f.name.clone(), f.enabled)).collect()
}
