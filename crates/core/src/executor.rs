//! Guarded execution of primary/fallback operation pairs.
//!
//! [`GuardedExecutor`] is the single call-site contract for flag-gated data
//! operations. Callers hand it a flag name plus two async callables and get
//! back a tagged outcome; all flag branching and breaker bookkeeping lives
//! here instead of being repeated at every call site.
//!
//! While a flag is enabled the executor runs primary-then-fallback on every
//! call (not primary-XOR-fallback from stale cached state): a single
//! transient failure never loses the caller's operation, while evidence
//! accumulates toward disabling the flag for subsequent calls.

use std::future::Future;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::breaker::CircuitBreaker;
use crate::cache::FlagCache;

/// Successful outcome of a guarded call.
#[derive(Debug)]
pub enum GuardedOutcome<T, E> {
    /// The primary path ran and succeeded.
    Primary(T),
    /// The fallback path produced the value, either because the flag was
    /// disabled (`primary_error: None`) or because the primary failed first
    /// (the original error is attached for diagnostics).
    Fallback { value: T, primary_error: Option<E> },
}

impl<T, E> GuardedOutcome<T, E> {
    /// The produced value, regardless of which path ran.
    pub fn value(&self) -> &T {
        match self {
            GuardedOutcome::Primary(value) => value,
            GuardedOutcome::Fallback { value, .. } => value,
        }
    }

    /// Consume the outcome, keeping only the value.
    pub fn into_value(self) -> T {
        match self {
            GuardedOutcome::Primary(value) => value,
            GuardedOutcome::Fallback { value, .. } => value,
        }
    }

    pub fn is_primary(&self) -> bool {
        matches!(self, GuardedOutcome::Primary(_))
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, GuardedOutcome::Fallback { .. })
    }
}

/// The only error class a guarded call surfaces to its caller.
///
/// Generic over the caller's operation error type so the underlying errors
/// are preserved, mirroring how the operations themselves are caller-typed.
#[derive(Debug, Error)]
pub enum GuardedError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// The flag was disabled and the fallback path failed.
    #[error("Fallback operation failed")]
    Fallback {
        #[source]
        source: E,
    },

    /// Both the primary and the fallback path failed. Terminal for the
    /// caller; carries both underlying errors.
    #[error("Primary and fallback operations both failed")]
    Composite {
        primary: E,
        #[source]
        fallback: E,
    },
}

/// Runs flag-gated operations and reports outcomes to the breaker.
pub struct GuardedExecutor {
    cache: Arc<FlagCache>,
    breaker: Arc<CircuitBreaker>,
}

impl GuardedExecutor {
    pub fn new(cache: Arc<FlagCache>, breaker: Arc<CircuitBreaker>) -> Self {
        Self { cache, breaker }
    }

    /// Execute a flag-gated operation.
    ///
    /// - Flag disabled: run `fallback` only; the breaker is not touched (the
    ///   fallback path is never penalized).
    /// - Flag enabled: run `primary`. On success the breaker records a
    ///   success. On failure the breaker records a failure (which may
    ///   auto-disable the flag for *future* calls) and `fallback` still runs
    ///   for *this* call.
    ///
    /// # Errors
    ///
    /// [`GuardedError::Fallback`] when the flag was disabled and the
    /// fallback failed; [`GuardedError::Composite`] when both paths failed.
    pub async fn execute<T, E, P, PFut, F, FFut>(
        &self,
        flag_name: &str,
        primary: P,
        fallback: F,
    ) -> Result<GuardedOutcome<T, E>, GuardedError<E>>
    where
        P: FnOnce() -> PFut,
        PFut: Future<Output = Result<T, E>>,
        F: FnOnce() -> FFut,
        FFut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        if !self.cache.get(flag_name) {
            debug!(flag = flag_name, "flag disabled, using fallback path");
            return match fallback().await {
                Ok(value) => Ok(GuardedOutcome::Fallback { value, primary_error: None }),
                Err(source) => Err(GuardedError::Fallback { source }),
            };
        }

        match primary().await {
            Ok(value) => {
                self.breaker.record_success(flag_name);
                Ok(GuardedOutcome::Primary(value))
            }
            Err(primary_error) => {
                warn!(
                    flag = flag_name,
                    error = %primary_error,
                    "primary path failed, attempting fallback"
                );
                self.breaker.record_failure(flag_name).await;

                match fallback().await {
                    Ok(value) => {
                        Ok(GuardedOutcome::Fallback { value, primary_error: Some(primary_error) })
                    }
                    Err(fallback_error) => Err(GuardedError::Composite {
                        primary: primary_error,
                        fallback: fallback_error,
                    }),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use shoebox_domain::{PersistedFlagState, Result as DomainResult};
    use tokio::sync::Mutex;

    use super::*;
    use crate::ports::{ChangeBus, ChangeHandler, FlagPersistence};
    use crate::store::{FlagStore, FlagStoreConfig};

    #[derive(Default)]
    struct MockPersistence {
        state: Mutex<Option<PersistedFlagState>>,
    }

    #[async_trait]
    impl FlagPersistence for MockPersistence {
        async fn load(&self) -> DomainResult<Option<PersistedFlagState>> {
            Ok(self.state.lock().await.clone())
        }

        async fn put(&self, state: &PersistedFlagState) -> DomainResult<()> {
            *self.state.lock().await = Some(state.clone());
            Ok(())
        }
    }

    struct NullBus;

    #[async_trait]
    impl ChangeBus for NullBus {
        async fn publish(&self) -> DomainResult<()> {
            Ok(())
        }
        fn subscribe(&self, _handler: ChangeHandler) -> DomainResult<()> {
            Ok(())
        }
    }

    async fn executor() -> (GuardedExecutor, Arc<FlagCache>, Arc<CircuitBreaker>) {
        let store = Arc::new(FlagStore::new(
            Arc::new(MockPersistence::default()) as _,
            FlagStoreConfig::default(),
        ));
        store.load().await.expect("seed load");
        let cache = Arc::new(FlagCache::new(Arc::clone(&store)));
        cache.refresh().await;
        let breaker = Arc::new(CircuitBreaker::new(store, Arc::clone(&cache), Arc::new(NullBus)));
        (GuardedExecutor::new(Arc::clone(&cache), Arc::clone(&breaker)), cache, breaker)
    }

    fn io_err(msg: &str) -> std::io::Error {
        std::io::Error::other(msg.to_string())
    }

    #[tokio::test]
    async fn test_disabled_flag_never_invokes_primary() {
        let (executor, cache, _breaker) = executor().await;
        cache.apply_local_value("sync_mode", false);

        let primary_calls = AtomicU32::new(0);
        let outcome = executor
            .execute(
                "sync_mode",
                || async {
                    primary_calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, std::io::Error>(1)
                },
                || async { Ok::<_, std::io::Error>(2) },
            )
            .await
            .expect("fallback succeeds");

        assert_eq!(primary_calls.load(Ordering::SeqCst), 0);
        assert!(outcome.is_fallback());
        assert_eq!(*outcome.value(), 2);
        match outcome {
            GuardedOutcome::Fallback { primary_error, .. } => assert!(primary_error.is_none()),
            GuardedOutcome::Primary(_) => panic!("expected fallback outcome"),
        }
    }

    #[tokio::test]
    async fn test_enabled_flag_with_successful_primary_skips_fallback() {
        let (executor, _cache, breaker) = executor().await;

        let fallback_calls = AtomicU32::new(0);
        let outcome = executor
            .execute(
                "sync_mode",
                || async { Ok::<_, std::io::Error>(42) },
                || async {
                    fallback_calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, std::io::Error>(0)
                },
            )
            .await
            .expect("primary succeeds");

        assert!(outcome.is_primary());
        assert_eq!(outcome.into_value(), 42);
        assert_eq!(fallback_calls.load(Ordering::SeqCst), 0);
        assert_eq!(breaker.snapshot("sync_mode").consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_primary_failure_falls_back_and_records_one_failure() {
        let (executor, _cache, breaker) = executor().await;

        let outcome = executor
            .execute(
                "sync_mode",
                || async { Err::<u32, _>(io_err("primary down")) },
                || async { Ok::<_, std::io::Error>(7) },
            )
            .await
            .expect("fallback succeeds");

        match outcome {
            GuardedOutcome::Fallback { value, primary_error } => {
                assert_eq!(value, 7);
                let err = primary_error.expect("primary error attached");
                assert!(err.to_string().contains("primary down"));
            }
            GuardedOutcome::Primary(_) => panic!("expected fallback outcome"),
        }
        assert_eq!(breaker.snapshot("sync_mode").consecutive_failures, 1);
    }

    #[tokio::test]
    async fn test_both_paths_failing_yields_composite_error() {
        let (executor, _cache, _breaker) = executor().await;

        let result = executor
            .execute(
                "sync_mode",
                || async { Err::<u32, _>(io_err("primary down")) },
                || async { Err::<u32, _>(io_err("fallback down")) },
            )
            .await;

        match result {
            Err(GuardedError::Composite { primary, fallback }) => {
                assert!(primary.to_string().contains("primary down"));
                assert!(fallback.to_string().contains("fallback down"));
            }
            _ => panic!("expected composite error"),
        }
    }

    #[tokio::test]
    async fn test_disabled_flag_with_failing_fallback_is_terminal() {
        let (executor, cache, breaker) = executor().await;
        cache.apply_local_value("sync_mode", false);

        let result = executor
            .execute(
                "sync_mode",
                || async { Ok::<u32, std::io::Error>(1) },
                || async { Err::<u32, _>(io_err("fallback down")) },
            )
            .await;

        assert!(matches!(result, Err(GuardedError::Fallback { .. })));
        // The fallback path is never penalized.
        assert_eq!(breaker.snapshot("sync_mode").consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_current_call_falls_back_even_when_trip_fires() {
        let (executor, cache, _breaker) = executor().await;

        // Drive the breaker to its threshold; every call still completes
        // via the fallback.
        for _ in 0..3 {
            let outcome = executor
                .execute(
                    "sync_mode",
                    || async { Err::<u32, _>(io_err("primary down")) },
                    || async { Ok::<_, std::io::Error>(9) },
                )
                .await
                .expect("fallback succeeds");
            assert!(outcome.is_fallback());
        }

        assert!(!cache.get("sync_mode"), "third failure auto-disabled the flag");
    }
}
