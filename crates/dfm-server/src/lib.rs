//! dfm-server: HTTP front end for the Drone Fleet Medication service
//!
//! Serves the drone, medication, loading and service-query resources over
//! the fleet rules in `dfm-core`, and runs the periodic battery audit for as
//! long as the server is up.

pub mod api;
pub mod config;
pub mod server;

pub use api::{create_router, ApiError, ApiState};
pub use config::{ConfigError, ServerConfig, StorageBackend};
pub use server::DfmServer;
