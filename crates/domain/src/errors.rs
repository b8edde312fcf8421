//! Error types used throughout the flag core

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for flag storage and signaling.
///
/// `Storage` and `Signaling` never cross the boundary of the guarded
/// execution path: storage failures degrade to the last known cached state
/// and signaling failures are logged and swallowed. They are surfaced only
/// from the administrative operations (`set_flag`, `list_flags`) where the
/// caller explicitly asked for durable state.
#[derive(Error, Debug, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum FlagError {
    /// The persistence medium is unreachable or timed out.
    #[error("Storage error: {0}")]
    Storage(String),

    /// The change bus failed to publish or subscribe.
    #[error("Signaling error: {0}")]
    Signaling(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for flag operations
pub type Result<T> = std::result::Result<T, FlagError>;
