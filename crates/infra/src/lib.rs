//! # Shoebox Infrastructure
//!
//! Adapter implementations of the core ports.
//!
//! This crate contains:
//! - [`InMemoryPersistence`]: volatile store for tests and single-run tools
//! - [`JsonFilePersistence`]: single-document JSON file store
//! - [`BroadcastChannel`]/[`BroadcastChangeBus`]: in-process broadcast
//!   change signal (one endpoint per application instance)
//!
//! ## Architecture
//! - Implements traits defined in `shoebox-core`
//! - Contains all "impure" code (file I/O, channels)

pub mod broadcast_bus;
pub mod json_store;
pub mod memory;

// Re-export commonly used items
pub use broadcast_bus::{BroadcastChangeBus, BroadcastChannel};
pub use json_store::JsonFilePersistence;
pub use memory::InMemoryPersistence;
