//! JSON-file persistence adapter.
//!
//! Stores the whole [`PersistedFlagState`] as one JSON document. All file
//! I/O runs in `spawn_blocking` to avoid blocking the async runtime. Writes
//! go through a temp file followed by a rename, so a crash mid-write never
//! leaves a torn document; a reader sees either the old state or the new
//! one, which is what makes flag + audit a single logical commit.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use shoebox_core::FlagPersistence;
use shoebox_domain::{FlagError, PersistedFlagState, Result};
use tokio::sync::Mutex;
use tokio::task;
use tracing::debug;

/// Single-document JSON file store.
pub struct JsonFilePersistence {
    path: Arc<PathBuf>,
    /// Serializes writers within this process; cross-process ordering is
    /// last-write-observed, as for any shared medium.
    write_lock: Mutex<()>,
}

impl JsonFilePersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: Arc::new(path.into()), write_lock: Mutex::new(()) }
    }

    /// Path of the backing document.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl FlagPersistence for JsonFilePersistence {
    async fn load(&self) -> Result<Option<PersistedFlagState>> {
        let path = Arc::clone(&self.path);

        task::spawn_blocking(move || -> Result<Option<PersistedFlagState>> {
            let bytes = match std::fs::read(path.as_ref()) {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
                Err(e) => return Err(FlagError::Storage(format!("read {}: {e}", path.display()))),
            };
            let state = serde_json::from_slice(&bytes)
                .map_err(|e| FlagError::Storage(format!("parse {}: {e}", path.display())))?;
            Ok(Some(state))
        })
        .await
        .map_err(map_join_error)?
    }

    async fn put(&self, state: &PersistedFlagState) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let path = Arc::clone(&self.path);
        let state = state.clone();

        task::spawn_blocking(move || -> Result<()> {
            let json = serde_json::to_vec_pretty(&state)
                .map_err(|e| FlagError::Storage(format!("serialize flag state: {e}")))?;

            // Temp file + rename keeps the document whole under a crash.
            let tmp = path.with_extension("json.tmp");
            std::fs::write(&tmp, &json)
                .map_err(|e| FlagError::Storage(format!("write {}: {e}", tmp.display())))?;
            std::fs::rename(&tmp, path.as_ref())
                .map_err(|e| FlagError::Storage(format!("rename {}: {e}", path.display())))?;

            debug!(path = %path.display(), bytes = json.len(), "flag state written");
            Ok(())
        })
        .await
        .map_err(map_join_error)?
    }
}

/// Map JoinError from spawn_blocking to FlagError.
fn map_join_error(err: task::JoinError) -> FlagError {
    if err.is_cancelled() {
        FlagError::Internal("blocking task cancelled".into())
    } else {
        FlagError::Internal(format!("blocking task failed: {err}"))
    }
}
