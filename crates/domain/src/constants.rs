//! Static default flag registry and tuning constants.
//!
//! Flags are created on first reference from this registry; they are never
//! hard-deleted, only toggled. Adding a gated operation to the application
//! means adding one row here.

use std::time::Duration;

/// Consecutive primary-path failures before the breaker force-disables a
/// flag, unless the registry overrides it per flag.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// Upper bound on any single persistence operation. A timeout is treated
/// exactly like an unreachable medium: degrade to the last known state.
pub const STORAGE_TIMEOUT: Duration = Duration::from_secs(5);

/// Version assigned to registry-seeded flags on first persistence.
pub const SEED_VERSION: u64 = 1;

/// A compile-time default for one flag.
#[derive(Debug, Clone, Copy)]
pub struct FlagDefault {
    pub name: &'static str,
    pub enabled: bool,
    pub description: &'static str,
    pub failure_threshold: u32,
}

/// The gated operations of the Shoebox data layer.
pub const DEFAULT_FLAGS: &[FlagDefault] = &[
    FlagDefault {
        name: "cloud_receipt_store",
        enabled: true,
        description: "Write receipts to the cloud document store instead of the local queue",
        failure_threshold: DEFAULT_FAILURE_THRESHOLD,
    },
    FlagDefault {
        name: "blob_image_upload",
        enabled: true,
        description: "Upload receipt images to blob storage instead of inline encoding",
        failure_threshold: DEFAULT_FAILURE_THRESHOLD,
    },
    FlagDefault {
        name: "sync_mode",
        enabled: true,
        description: "Cross-device sync of receipts and categories",
        failure_threshold: DEFAULT_FAILURE_THRESHOLD,
    },
    FlagDefault {
        name: "ocr_extraction",
        enabled: false,
        description: "Server-side OCR extraction of receipt totals",
        failure_threshold: 5,
    },
];

/// Look up the registry row for a flag, if it has one.
pub fn default_for(name: &str) -> Option<&'static FlagDefault> {
    DEFAULT_FLAGS.iter().find(|d| d.name == name)
}

/// Default value for a flag with no persisted state. Unregistered flags
/// default to disabled.
pub fn default_enabled(name: &str) -> bool {
    default_for(name).map(|d| d.enabled).unwrap_or(false)
}

/// Breaker threshold for a flag (registry override or the global default).
pub fn threshold_for(name: &str) -> u32 {
    default_for(name).map(|d| d.failure_threshold).unwrap_or(DEFAULT_FAILURE_THRESHOLD)
}
