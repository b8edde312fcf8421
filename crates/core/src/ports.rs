//! Ports for persistence and cross-instance signaling.
//!
//! The core never touches a concrete storage medium or transport. Host
//! applications supply an adapter for each port (see `shoebox-infra` for the
//! bundled ones) and the core stays testable with in-memory doubles.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use shoebox_domain::{PersistedFlagState, Result};

/// Port for the durable flag document.
///
/// `load` and `put` operate on the whole [`PersistedFlagState`] document.
/// A `put` must be atomic at the document level: a reader never observes a
/// flag write without its matching audit entry.
#[async_trait]
pub trait FlagPersistence: Send + Sync {
    /// Load the persisted state. `Ok(None)` means nothing has been
    /// persisted yet and the caller should seed from the default registry.
    async fn load(&self) -> Result<Option<PersistedFlagState>>;

    /// Replace the persisted state.
    async fn put(&self, state: &PersistedFlagState) -> Result<()>;
}

/// Callback invoked when another instance signals a flag change.
///
/// Handlers are expected to refresh the local cache; the signal carries no
/// payload on purpose, so a stale message can never install a stale value.
pub type ChangeHandler = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Port for the best-effort cross-instance change signal.
///
/// Delivery is unordered and may drop messages; a missed signal self-heals
/// at the next explicit or periodic refresh. The publishing instance is
/// excluded from its own deliveries.
#[async_trait]
pub trait ChangeBus: Send + Sync {
    /// Broadcast "something changed" to the other instances. Fire-and-forget.
    async fn publish(&self) -> Result<()>;

    /// Register a handler invoked when another instance publishes.
    /// Subscriptions are long-lived and torn down at instance shutdown.
    fn subscribe(&self, handler: ChangeHandler) -> Result<()>;
}
