//! Durable flag store.
//!
//! [`FlagStore`] is the sole source of truth for flag values and their audit
//! trail. It wraps a [`FlagPersistence`] port with:
//!
//! - seed-on-empty semantics (first `load` persists the default registry)
//! - versioned commits that write the new flag value and exactly one audit
//!   entry in the same document put
//! - a commit-wide lock: all flags share one document, so every
//!   load-modify-put cycle in this process is serialized, including commits
//!   to different flags
//! - bounded timeouts on every persistence call (a timeout degrades exactly
//!   like an unreachable medium)
//! - a last-known in-memory mirror for degraded reads while storage is down
//!
//! Cross-process races are not locked: a commit re-reads the durable
//! document first (last-write-observed) and the next `load` reconciles via
//! version comparison, which is enough for idempotent boolean toggles.

use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use shoebox_domain::constants::{default_enabled, default_for, SEED_VERSION, STORAGE_TIMEOUT};
use shoebox_domain::{
    AuditEntry, ChangeReason, FeatureFlag, FlagError, PersistedFlagState, Result, DEFAULT_FLAGS,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::ports::FlagPersistence;

/// Configuration for the flag store.
#[derive(Debug, Clone)]
pub struct FlagStoreConfig {
    /// Upper bound for any single persistence operation
    pub storage_timeout: Duration,
}

impl Default for FlagStoreConfig {
    fn default() -> Self {
        Self { storage_timeout: STORAGE_TIMEOUT }
    }
}

/// Durable source of truth for flags and audit entries.
pub struct FlagStore {
    persistence: Arc<dyn FlagPersistence>,
    config: FlagStoreConfig,
    /// Last state observed from (or written to) the persistence medium.
    mirror: StdMutex<PersistedFlagState>,
    /// Serializes every commit's load-modify-put cycle. The lock is
    /// document-wide, not per flag: concurrent commits to different flags
    /// would otherwise load the same snapshot and the second put would erase
    /// the first commit.
    commit_lock: Mutex<()>,
}

impl FlagStore {
    /// Create a store over the given persistence port.
    pub fn new(persistence: Arc<dyn FlagPersistence>, config: FlagStoreConfig) -> Self {
        Self {
            persistence,
            config,
            mirror: StdMutex::new(PersistedFlagState::default()),
            commit_lock: Mutex::new(()),
        }
    }

    /// Load the persisted state.
    ///
    /// If nothing has been persisted yet, seeds the default registry and
    /// persists the seed before returning, so every instance starts from the
    /// same durable document.
    pub async fn load(&self) -> Result<PersistedFlagState> {
        let loaded = self.with_timeout(self.persistence.load()).await?;

        let state = match loaded {
            Some(state) => state,
            None => {
                let seed = seed_state(chrono::Utc::now().timestamp());
                self.with_timeout(self.persistence.put(&seed)).await?;
                info!(flags = seed.flags.len(), "seeded flag store from default registry");
                seed
            }
        };

        self.set_mirror(state.clone());
        Ok(state)
    }

    /// Commit a new value for a flag.
    ///
    /// Increments the version by exactly one (even when the value did not
    /// change), appends one audit entry, and writes both in a single
    /// document put. A flag with no persisted row is created on first
    /// commit, treating its registry default as the previous value.
    ///
    /// # Errors
    ///
    /// Returns [`FlagError::Storage`] when the medium is unreachable or the
    /// operation times out; the durable document is then unchanged.
    pub async fn commit(
        &self,
        name: &str,
        new_value: bool,
        reason: ChangeReason,
        actor: Option<&str>,
    ) -> Result<FeatureFlag> {
        let _guard = self.commit_lock.lock().await;

        // Last-write-observed: re-read durable state so a concurrent commit
        // from another instance is not silently overwritten with stale data.
        let mut state = match self.with_timeout(self.persistence.load()).await? {
            Some(state) => state,
            None => seed_state(chrono::Utc::now().timestamp()),
        };

        let now = chrono::Utc::now().timestamp();
        let (previous_value, previous_version, description) = match state.flags.get(name) {
            Some(flag) => (flag.enabled, flag.version, flag.description.clone()),
            None => (
                default_enabled(name),
                0,
                default_for(name).map(|d| d.description.to_string()),
            ),
        };

        let flag = FeatureFlag {
            name: name.to_string(),
            enabled: new_value,
            version: previous_version + 1,
            description,
            updated_at: now,
        };
        state.flags.insert(name.to_string(), flag.clone());
        state.audit.push(AuditEntry {
            flag_name: name.to_string(),
            previous_value,
            new_value,
            timestamp: now,
            reason,
            actor: actor.map(str::to_string),
        });

        self.with_timeout(self.persistence.put(&state)).await?;
        self.set_mirror(state);

        debug!(
            flag = name,
            enabled = new_value,
            version = flag.version,
            reason = %reason,
            "flag committed"
        );
        Ok(flag)
    }

    /// Snapshot of the last state this process observed from storage.
    /// Used for degraded reads while the medium is unreachable.
    pub fn last_known(&self) -> PersistedFlagState {
        match self.mirror.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => {
                warn!("flag store mirror lock poisoned");
                poisoned.into_inner().clone()
            }
        }
    }

    /// The most recent `limit` audit entries for one flag, newest first,
    /// taken from the last known state.
    pub fn audit_for(&self, name: &str, limit: usize) -> Vec<AuditEntry> {
        let state = self.last_known();
        let mut entries: Vec<AuditEntry> =
            state.audit.into_iter().filter(|e| e.flag_name == name).collect();
        entries.reverse();
        entries.truncate(limit);
        entries
    }

    fn set_mirror(&self, state: PersistedFlagState) {
        match self.mirror.lock() {
            Ok(mut guard) => *guard = state,
            Err(poisoned) => {
                warn!("flag store mirror lock poisoned");
                *poisoned.into_inner() = state;
            }
        }
    }

    async fn with_timeout<T>(&self, operation: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.config.storage_timeout, operation).await {
            Ok(result) => result,
            Err(_) => Err(FlagError::Storage(format!(
                "operation timed out after {:?}",
                self.config.storage_timeout
            ))),
        }
    }
}

/// Build the initial document from the static default registry.
fn seed_state(now: i64) -> PersistedFlagState {
    let flags = DEFAULT_FLAGS
        .iter()
        .map(|d| {
            (
                d.name.to_string(),
                FeatureFlag {
                    name: d.name.to_string(),
                    enabled: d.enabled,
                    version: SEED_VERSION,
                    description: Some(d.description.to_string()),
                    updated_at: now,
                },
            )
        })
        .collect();
    PersistedFlagState { flags, audit: Vec::new() }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    use async_trait::async_trait;

    use super::*;

    /// In-memory persistence double with an availability switch.
    #[derive(Default)]
    struct MockPersistence {
        state: Mutex<Option<PersistedFlagState>>,
        unavailable: AtomicBool,
        puts: AtomicU32,
    }

    impl MockPersistence {
        fn set_available(&self, available: bool) {
            self.unavailable.store(!available, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl FlagPersistence for MockPersistence {
        async fn load(&self) -> Result<Option<PersistedFlagState>> {
            if self.unavailable.load(Ordering::SeqCst) {
                return Err(FlagError::Storage("medium unreachable".into()));
            }
            Ok(self.state.lock().await.clone())
        }

        async fn put(&self, state: &PersistedFlagState) -> Result<()> {
            if self.unavailable.load(Ordering::SeqCst) {
                return Err(FlagError::Storage("medium unreachable".into()));
            }
            self.puts.fetch_add(1, Ordering::SeqCst);
            *self.state.lock().await = Some(state.clone());
            Ok(())
        }
    }

    fn store() -> (FlagStore, Arc<MockPersistence>) {
        let persistence = Arc::new(MockPersistence::default());
        (FlagStore::new(Arc::clone(&persistence) as _, FlagStoreConfig::default()), persistence)
    }

    #[tokio::test]
    async fn test_load_seeds_default_registry_and_persists() {
        let (store, persistence) = store();

        let state = store.load().await.expect("load succeeds");
        assert_eq!(state.flags.len(), DEFAULT_FLAGS.len());
        assert!(state.flags["sync_mode"].enabled);
        assert_eq!(state.flags["sync_mode"].version, SEED_VERSION);
        assert!(state.audit.is_empty());

        // The seed was persisted before load returned.
        assert_eq!(persistence.puts.load(Ordering::SeqCst), 1);
        let persisted = persistence.load().await.expect("load succeeds").expect("state exists");
        assert_eq!(persisted, state);
    }

    #[tokio::test]
    async fn test_second_load_does_not_reseed() {
        let (store, persistence) = store();

        store.load().await.expect("first load");
        store.load().await.expect("second load");

        assert_eq!(persistence.puts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_commit_increments_version_and_appends_audit() {
        let (store, _persistence) = store();
        store.load().await.expect("load succeeds");

        let flag = store
            .commit("sync_mode", false, ChangeReason::Manual, Some("ops@shoebox"))
            .await
            .expect("commit succeeds");
        assert!(!flag.enabled);
        assert_eq!(flag.version, SEED_VERSION + 1);

        let state = store.load().await.expect("load succeeds");
        assert_eq!(state.audit.len(), 1);
        let entry = &state.audit[0];
        assert_eq!(entry.flag_name, "sync_mode");
        assert!(entry.previous_value);
        assert!(!entry.new_value);
        assert_eq!(entry.reason, ChangeReason::Manual);
        assert_eq!(entry.actor.as_deref(), Some("ops@shoebox"));
    }

    #[tokio::test]
    async fn test_version_increments_even_when_value_unchanged() {
        let (store, _persistence) = store();
        store.load().await.expect("load succeeds");

        let before = store.load().await.expect("load").flags["sync_mode"].version;
        for _ in 0..3 {
            store.commit("sync_mode", true, ChangeReason::Manual, None).await.expect("commit");
        }
        let after = store.load().await.expect("load").flags["sync_mode"].version;
        assert_eq!(after, before + 3);
    }

    #[tokio::test]
    async fn test_commit_creates_unregistered_flag() {
        let (store, _persistence) = store();
        store.load().await.expect("load succeeds");

        let flag = store
            .commit("experimental_export", true, ChangeReason::Manual, None)
            .await
            .expect("commit succeeds");
        assert_eq!(flag.version, 1);
        assert!(flag.description.is_none());

        let state = store.load().await.expect("load succeeds");
        // Unregistered flags default to disabled, so that is the audited
        // previous value.
        assert!(!state.audit[0].previous_value);
    }

    #[tokio::test]
    async fn test_concurrent_commits_to_different_flags_both_survive() {
        let (store, _persistence) = store();
        store.load().await.expect("load succeeds");
        let store = Arc::new(store);

        let first = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                store.commit("sync_mode", false, ChangeReason::Manual, None).await
            })
        };
        let second = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                store.commit("blob_image_upload", false, ChangeReason::Manual, None).await
            })
        };
        first.await.expect("task completes").expect("commit succeeds");
        second.await.expect("task completes").expect("commit succeeds");

        // Neither write may erase the other.
        let state = store.load().await.expect("load succeeds");
        assert!(!state.flags["sync_mode"].enabled, "sync_mode commit lost");
        assert!(!state.flags["blob_image_upload"].enabled, "blob_image_upload commit lost");
        assert_eq!(state.audit.len(), 2);
        assert_eq!(state.flags["sync_mode"].version, SEED_VERSION + 1);
        assert_eq!(state.flags["blob_image_upload"].version, SEED_VERSION + 1);
    }

    #[tokio::test]
    async fn test_commit_fails_when_storage_unavailable() {
        let (store, persistence) = store();
        store.load().await.expect("load succeeds");

        persistence.set_available(false);
        let result = store.commit("sync_mode", false, ChangeReason::Manual, None).await;
        assert!(matches!(result, Err(FlagError::Storage(_))));

        // The mirror still serves the last known state.
        assert!(store.last_known().flags["sync_mode"].enabled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_storage_times_out_as_storage_error() {
        struct SlowPersistence;

        #[async_trait]
        impl FlagPersistence for SlowPersistence {
            async fn load(&self) -> Result<Option<PersistedFlagState>> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(None)
            }
            async fn put(&self, _state: &PersistedFlagState) -> Result<()> {
                Ok(())
            }
        }

        let store = FlagStore::new(
            Arc::new(SlowPersistence),
            FlagStoreConfig { storage_timeout: Duration::from_millis(50) },
        );
        let result = store.load().await;
        assert!(matches!(result, Err(FlagError::Storage(_))));
    }

    #[tokio::test]
    async fn test_audit_for_returns_newest_first_capped() {
        let (store, _persistence) = store();
        store.load().await.expect("load succeeds");

        store.commit("sync_mode", false, ChangeReason::Manual, None).await.expect("commit");
        store.commit("sync_mode", true, ChangeReason::Manual, None).await.expect("commit");
        store.commit("blob_image_upload", false, ChangeReason::Manual, None).await.expect("commit");

        let entries = store.audit_for("sync_mode", 1);
        assert_eq!(entries.len(), 1);
        assert!(entries[0].new_value, "newest sync_mode entry re-enabled the flag");

        let entries = store.audit_for("sync_mode", 10);
        assert_eq!(entries.len(), 2);
    }
}
