//! # Shoebox Core
//!
//! The feature-flag-governed resilience layer.
//!
//! This crate contains:
//! - Port interfaces (traits) for persistence and cross-instance signaling
//! - The flag store, cache, circuit breaker, and guarded executor
//! - The [`FlagService`] facade wiring them together
//!
//! ## Architecture Principles
//! - Only depends on `shoebox-domain`
//! - No concrete storage or transport code; all I/O via injected ports
//! - `FlagCache` reads are synchronous and never suspend; everything that
//!   touches the persistence medium is async with bounded timeouts

pub mod breaker;
pub mod cache;
pub mod executor;
pub mod ports;
pub mod service;
pub mod store;

// Re-export specific items to avoid ambiguity
pub use breaker::{BreakerState, BreakerStatus, CircuitBreaker};
pub use cache::FlagCache;
pub use executor::{GuardedError, GuardedExecutor, GuardedOutcome};
pub use ports::{ChangeBus, ChangeHandler, FlagPersistence};
pub use service::{FlagService, FlagServiceConfig};
pub use store::{FlagStore, FlagStoreConfig};
