//! # Shoebox Domain
//!
//! Shared types for the feature-flag resilience layer.
//!
//! This crate contains:
//! - Flag and audit data types
//! - The error taxonomy
//! - The static default flag registry and tuning constants
//!
//! Pure data, no I/O. Everything here is serde-serializable so the
//! persistence adapters can store state as a single document.

pub mod constants;
pub mod errors;
pub mod types;

pub use constants::{default_enabled, default_for, threshold_for, FlagDefault, DEFAULT_FLAGS};
pub use errors::{FlagError, Result};
pub use types::{AuditEntry, ChangeReason, FeatureFlag, PersistedFlagState};
