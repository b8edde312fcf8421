//! Flag service facade.
//!
//! Wires the store, cache, breaker, and executor together over the injected
//! ports and exposes the thin administrative surface: list flags, set a
//! flag, read the recent audit trail. One [`FlagService`] per application
//! instance; independent instances coordinate only through the shared
//! persistence medium and the change bus.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use shoebox_core::{ChangeBus, FlagPersistence, FlagService, FlagServiceConfig};
//!
//! # async fn example(
//! #     persistence: Arc<dyn FlagPersistence>,
//! #     bus: Arc<dyn ChangeBus>,
//! # ) -> anyhow::Result<()> {
//! let service = FlagService::new(persistence, bus, FlagServiceConfig::default()).await?;
//! service.start_periodic_refresh(Duration::from_secs(30));
//!
//! let receipt = service
//!     .execute(
//!         "cloud_receipt_store",
//!         || async { save_to_cloud().await },
//!         || async { queue_locally().await },
//!     )
//!     .await?;
//! # let _ = receipt;
//! service.shutdown();
//! # Ok(())
//! # }
//! # async fn save_to_cloud() -> Result<u64, std::io::Error> { Ok(1) }
//! # async fn queue_locally() -> Result<u64, std::io::Error> { Ok(1) }
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use shoebox_domain::constants::STORAGE_TIMEOUT;
use shoebox_domain::{AuditEntry, ChangeReason, FeatureFlag, Result};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::breaker::{BreakerState, CircuitBreaker};
use crate::cache::FlagCache;
use crate::executor::{GuardedError, GuardedExecutor, GuardedOutcome};
use crate::ports::{ChangeBus, FlagPersistence};
use crate::store::{FlagStore, FlagStoreConfig};

/// Configuration for the flag service.
#[derive(Debug, Clone)]
pub struct FlagServiceConfig {
    /// Upper bound for any single persistence operation
    pub storage_timeout: Duration,
}

impl Default for FlagServiceConfig {
    fn default() -> Self {
        Self { storage_timeout: STORAGE_TIMEOUT }
    }
}

/// Per-instance facade over the flag resilience layer.
pub struct FlagService {
    store: Arc<FlagStore>,
    cache: Arc<FlagCache>,
    bus: Arc<dyn ChangeBus>,
    breaker: Arc<CircuitBreaker>,
    executor: GuardedExecutor,
    cancel: CancellationToken,
    refresh_task: StdMutex<Option<JoinHandle<()>>>,
}

impl FlagService {
    /// Construct and initialize a service instance.
    ///
    /// Performs the initial load (seeding the default registry into an empty
    /// medium), primes the cache, and subscribes a handler that refreshes
    /// the cache whenever another instance publishes a change signal.
    ///
    /// # Errors
    ///
    /// Fails when the initial load cannot reach the persistence medium or
    /// the change bus rejects the subscription; there is no last known state
    /// to degrade to at startup.
    pub async fn new(
        persistence: Arc<dyn FlagPersistence>,
        bus: Arc<dyn ChangeBus>,
        config: FlagServiceConfig,
    ) -> Result<Arc<Self>> {
        let store = Arc::new(FlagStore::new(
            persistence,
            FlagStoreConfig { storage_timeout: config.storage_timeout },
        ));
        store.load().await?;

        let cache = Arc::new(FlagCache::new(Arc::clone(&store)));
        cache.refresh().await;

        let breaker =
            Arc::new(CircuitBreaker::new(Arc::clone(&store), Arc::clone(&cache), Arc::clone(&bus)));
        let executor = GuardedExecutor::new(Arc::clone(&cache), Arc::clone(&breaker));

        let service = Arc::new(Self {
            store,
            cache,
            bus,
            breaker,
            executor,
            cancel: CancellationToken::new(),
            refresh_task: StdMutex::new(None),
        });

        let cache_for_signals = Arc::clone(&service.cache);
        let handler: crate::ports::ChangeHandler = Arc::new(move || {
            let cache = Arc::clone(&cache_for_signals);
            Box::pin(async move {
                cache.refresh().await;
            })
        });
        service.bus.subscribe(handler)?;

        info!(flags = service.cache.get_all().len(), "flag service initialized");
        Ok(service)
    }

    /// Current value of a flag from the local cache. Never suspends.
    pub fn is_enabled(&self, name: &str) -> bool {
        self.cache.get(name)
    }

    /// Point-in-time snapshot of all cached flag values.
    pub fn flags_snapshot(&self) -> HashMap<String, bool> {
        self.cache.get_all()
    }

    /// Execute a flag-gated primary/fallback operation pair.
    /// See [`GuardedExecutor::execute`] for the full contract.
    pub async fn execute<T, E, P, PFut, F, FFut>(
        &self,
        flag_name: &str,
        primary: P,
        fallback: F,
    ) -> std::result::Result<GuardedOutcome<T, E>, GuardedError<E>>
    where
        P: FnOnce() -> PFut,
        PFut: Future<Output = std::result::Result<T, E>>,
        F: FnOnce() -> FFut,
        FFut: Future<Output = std::result::Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.executor.execute(flag_name, primary, fallback).await
    }

    /// Manually set a flag (administrative surface).
    ///
    /// Commits durably, applies the value to the local cache immediately
    /// (read-your-writes), resets the breaker when re-enabling, and signals
    /// the other instances. Publish failures are logged and swallowed.
    #[instrument(skip(self), fields(flag = %name))]
    pub async fn set_flag(
        &self,
        name: &str,
        enabled: bool,
        actor: Option<&str>,
    ) -> Result<FeatureFlag> {
        let flag = self.store.commit(name, enabled, ChangeReason::Manual, actor).await?;
        self.cache.apply_local_commit(&flag);

        if enabled {
            self.breaker.note_manual_enable(name);
        }

        if let Err(error) = self.bus.publish().await {
            warn!(%error, flag = name, "change signal dropped after manual toggle");
        }

        info!(flag = name, enabled, version = flag.version, "flag set manually");
        Ok(flag)
    }

    /// All flags with their current durable value and description, ordered
    /// by name. Falls back to the last known state when storage is down.
    pub async fn list_flags(&self) -> Vec<FeatureFlag> {
        let state = match self.store.load().await {
            Ok(state) => state,
            Err(error) => {
                warn!(%error, "listing flags from last known state");
                self.store.last_known()
            }
        };
        let mut flags: Vec<FeatureFlag> = state.flags.into_values().collect();
        flags.sort_by(|a, b| a.name.cmp(&b.name));
        flags
    }

    /// The most recent `limit` audit entries for one flag, newest first.
    /// Falls back to the last known state when storage is down.
    pub async fn recent_audit(&self, name: &str, limit: usize) -> Vec<AuditEntry> {
        if let Err(error) = self.store.load().await {
            warn!(%error, flag = name, "reading audit from last known state");
        }
        self.store.audit_for(name, limit)
    }

    /// Reload the cache from the store (no-op on storage failure).
    pub async fn refresh(&self) {
        self.cache.refresh().await;
    }

    /// Breaker bookkeeping for one flag (monitoring/inspection).
    pub fn breaker_snapshot(&self, name: &str) -> BreakerState {
        self.breaker.snapshot(name)
    }

    /// Spawn a background task refreshing the cache on an interval.
    ///
    /// This is the self-healing path for missed change signals. Restarting
    /// an existing task replaces it.
    pub fn start_periodic_refresh(self: &Arc<Self>, interval: Duration) {
        let cache = Arc::clone(&self.cache);
        let cancel = self.cancel.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately; skip it, the cache was
            // primed during construction.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => cache.refresh().await,
                }
            }
        });

        let mut slot = match self.refresh_task.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(previous) = slot.replace(handle) {
            previous.abort();
        }
    }

    /// Tear down background work. Subscriptions owned by the change bus are
    /// released when the bus itself is dropped.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        let mut slot = match self.refresh_task.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(handle) = slot.take() {
            handle.abort();
        }
        info!("flag service shut down");
    }
}

impl Drop for FlagService {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
