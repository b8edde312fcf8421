//! Flag and audit data types.
//!
//! A [`FeatureFlag`] is a named boolean switch selecting which implementation
//! path a data operation uses (direct vs fallback). Every committed write
//! bumps `version` by exactly one and appends one [`AuditEntry`], so the
//! persisted document is always internally consistent.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A persisted feature flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlag {
    /// Unique flag identifier (e.g., "cloud_receipt_store")
    pub name: String,
    /// Whether the flag is currently enabled
    pub enabled: bool,
    /// Monotonic write counter; +1 on every committed write, even when the
    /// value did not change
    pub version: u64,
    /// Human-readable description of the flag's purpose
    pub description: Option<String>,
    /// Timestamp of the last committed write (Unix epoch seconds)
    pub updated_at: i64,
}

/// Why a flag value changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChangeReason {
    /// An operator toggled the flag through the administrative surface.
    Manual,
    /// The circuit breaker force-disabled the flag after repeated failures.
    AutoDisable,
}

impl std::fmt::Display for ChangeReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeReason::Manual => write!(f, "manual"),
            ChangeReason::AutoDisable => write!(f, "auto-disable"),
        }
    }
}

/// One immutable record of a flag value change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// The flag that changed
    pub flag_name: String,
    /// Value before the write
    pub previous_value: bool,
    /// Value after the write
    pub new_value: bool,
    /// When the write was committed (Unix epoch seconds)
    pub timestamp: i64,
    /// Manual toggle or breaker auto-disable
    pub reason: ChangeReason,
    /// Optional operator identity; `None` for system-initiated changes
    pub actor: Option<String>,
}

/// The unit of durable state: all flags plus their append-only audit trail.
///
/// Persistence adapters load and store this document atomically, which is
/// what makes "flag write + audit append" a single logical commit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedFlagState {
    pub flags: HashMap<String, FeatureFlag>,
    pub audit: Vec<AuditEntry>,
}
