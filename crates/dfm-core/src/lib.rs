//! DFM Core - fleet rules for the Drone Fleet Medication service.
//!
//! This crate implements:
//! - Drone, medication and association types
//! - Field validation of incoming payloads
//! - The fleet consistency engine (battery gate, load assignment, cascades)
//! - Storage abstraction with in-memory and SQLite backends
//! - The periodic battery audit

#![forbid(unsafe_code)]

// Domain
pub mod types;
pub mod validation;
pub mod fleet;

// Infrastructure
pub mod store;
pub mod audit;

// Supporting modules
pub mod errors;

// Optional storage implementations
#[cfg(feature = "sqlite")]
pub mod sqlite_store;

pub use audit::{AuditRecord, BatteryAudit, BatteryAuditHandle};
pub use errors::{Entity, FieldErrors, FleetError};
pub use fleet::{FleetService, LoadOutcome};
pub use store::{FleetStore, MemoryStore, StoreError};
pub use types::*;

#[cfg(feature = "sqlite")]
pub use sqlite_store::SqliteStore;
