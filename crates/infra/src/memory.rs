//! In-memory persistence adapter.
//!
//! Volatile implementation of [`FlagPersistence`] for tests and short-lived
//! tooling. Multiple service instances sharing one `Arc<InMemoryPersistence>`
//! behave like independent processes over one storage medium, which is what
//! the cross-instance tests rely on.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use shoebox_core::FlagPersistence;
use shoebox_domain::{FlagError, PersistedFlagState, Result};
use tokio::sync::Mutex;

/// Volatile, process-local flag document store.
#[derive(Default)]
pub struct InMemoryPersistence {
    state: Mutex<Option<PersistedFlagState>>,
    unavailable: AtomicBool,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the medium going away (or coming back). While unavailable,
    /// `load` and `put` fail with [`FlagError::Storage`].
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(FlagError::Storage("in-memory medium marked unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl FlagPersistence for InMemoryPersistence {
    async fn load(&self) -> Result<Option<PersistedFlagState>> {
        self.check_available()?;
        Ok(self.state.lock().await.clone())
    }

    async fn put(&self, state: &PersistedFlagState) -> Result<()> {
        self.check_available()?;
        *self.state.lock().await = Some(state.clone());
        Ok(())
    }
}
