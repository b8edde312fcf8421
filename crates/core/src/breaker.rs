//! Per-flag circuit breaker.
//!
//! Tracks consecutive primary-path failures per flag and force-disables the
//! flag once a threshold is reached: one durable commit with
//! `reason=auto-disable`, an immediate local cache update, and a change
//! signal to the other instances.
//!
//! Counters are per process on purpose. The condition being detected is
//! "this instance is observing persistent trouble", not a globally
//! synchronized count. Recovery is manual re-enable only; there is no
//! half-open re-probe.
//!
//! A trip whose durable commit fails (storage outage) leaves the breaker
//! Open with the disable pending: the flag is forced off in the local cache
//! and the commit is retried on the next recorded failure, so the durable
//! document eventually carries the auto-disable even when a refresh briefly
//! reloads the stale enabled value in between.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use shoebox_domain::constants::threshold_for;
use shoebox_domain::ChangeReason;
use tracing::warn;

use crate::cache::FlagCache;
use crate::ports::ChangeBus;
use crate::store::FlagStore;

/// Breaker status for one flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerStatus {
    /// Failures are being counted; the flag may be enabled.
    Closed,
    /// The flag has been force-disabled; only a manual re-enable resets it.
    Open,
}

/// Per-flag failure bookkeeping. Not persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerState {
    pub consecutive_failures: u32,
    pub threshold: u32,
    pub status: BreakerStatus,
    /// The breaker is Open but the durable auto-disable commit has not
    /// landed yet; the next recorded failure retries it.
    pub pending_disable: bool,
}

impl BreakerState {
    fn new(threshold: u32) -> Self {
        Self {
            consecutive_failures: 0,
            threshold,
            status: BreakerStatus::Closed,
            pending_disable: false,
        }
    }
}

/// Consecutive-failure counter with auto-disable.
pub struct CircuitBreaker {
    store: Arc<FlagStore>,
    cache: Arc<FlagCache>,
    bus: Arc<dyn ChangeBus>,
    states: StdMutex<HashMap<String, BreakerState>>,
}

impl CircuitBreaker {
    pub fn new(store: Arc<FlagStore>, cache: Arc<FlagCache>, bus: Arc<dyn ChangeBus>) -> Self {
        Self { store, cache, bus, states: StdMutex::new(HashMap::new()) }
    }

    /// Record a successful primary call: the consecutive-failure counter
    /// resets to zero. The status is left unchanged.
    pub fn record_success(&self, name: &str) {
        let mut states = self.lock_states();
        states
            .entry(name.to_string())
            .or_insert_with(|| BreakerState::new(threshold_for(name)))
            .consecutive_failures = 0;
    }

    /// Record a failed primary call.
    ///
    /// When the flag is currently enabled and the counter reaches the
    /// threshold while the breaker is Closed, exactly one caller trips it:
    /// status goes Open, the counter resets to zero, and the flag is
    /// disabled durably (commit + cache + publish). If that commit failed
    /// earlier, the disable is pending and the next recorded failure retries
    /// it, so an Open breaker always converges on a persisted `false`.
    pub async fn record_failure(&self, name: &str) {
        let attempt = {
            let mut states = self.lock_states();
            let state = states
                .entry(name.to_string())
                .or_insert_with(|| BreakerState::new(threshold_for(name)));
            state.consecutive_failures += 1;

            match state.status {
                BreakerStatus::Closed
                    if self.cache.get(name)
                        && state.consecutive_failures >= state.threshold =>
                {
                    // Decide inside the lock so concurrent failures trip once.
                    state.status = BreakerStatus::Open;
                    state.consecutive_failures = 0;
                    true
                }
                // Taken inside the lock so concurrent retries commit once.
                BreakerStatus::Open if state.pending_disable => {
                    state.pending_disable = false;
                    true
                }
                _ => false,
            }
        };

        if attempt {
            self.auto_disable(name).await;
        }
    }

    /// Called when an operator manually re-enables a flag: counting restarts
    /// from zero and the breaker closes again.
    pub fn note_manual_enable(&self, name: &str) {
        let mut states = self.lock_states();
        states.insert(name.to_string(), BreakerState::new(threshold_for(name)));
    }

    /// Snapshot of the breaker state for one flag.
    pub fn snapshot(&self, name: &str) -> BreakerState {
        let states = self.lock_states();
        states.get(name).copied().unwrap_or_else(|| BreakerState::new(threshold_for(name)))
    }

    async fn auto_disable(&self, name: &str) {
        warn!(flag = name, "failure threshold reached, auto-disabling flag");

        match self.store.commit(name, false, ChangeReason::AutoDisable, None).await {
            Ok(flag) => {
                self.cache.apply_local_commit(&flag);
                if let Err(error) = self.bus.publish().await {
                    warn!(%error, flag = name, "change signal dropped after auto-disable");
                }
            }
            Err(error) => {
                // Storage is down. The breaker still protects this instance:
                // force the cached value off, mark the disable pending, and
                // retry the commit on the next recorded failure.
                warn!(
                    %error,
                    flag = name,
                    "auto-disable commit failed, forcing local disable and retrying later"
                );
                self.cache.apply_local_value(name, false);
                self.mark_pending(name);
            }
        }
    }

    fn mark_pending(&self, name: &str) {
        let mut states = self.lock_states();
        states
            .entry(name.to_string())
            .or_insert_with(|| BreakerState::new(threshold_for(name)))
            .pending_disable = true;
    }

    fn lock_states(&self) -> std::sync::MutexGuard<'_, HashMap<String, BreakerState>> {
        match self.states.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("breaker state lock poisoned");
                poisoned.into_inner()
            }
        }
    }
}
