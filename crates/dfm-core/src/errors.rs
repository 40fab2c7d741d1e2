//! Error types for DFM Core.
//!
//! Every domain error is synchronous and leaves the store untouched; only
//! [`FleetError::Store`] signals an infrastructure failure.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::store::StoreError;
use crate::types::LOADING_BATTERY_THRESHOLD;

/// Field name to the list of reasons the field was rejected.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<String, Vec<String>>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: impl Into<String>, reason: impl Into<String>) {
        self.0.entry(field.into()).or_default().push(reason.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// `Ok(value)` when nothing was recorded, otherwise `Err(self)`.
    pub fn into_result<T>(self, value: T) -> Result<T, FieldErrors> {
        if self.is_empty() {
            Ok(value)
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, reasons) in &self.0 {
            if !first {
                f.write_str("; ")?;
            }
            first = false;
            write!(f, "{}: {}", field, reasons.join(" "))?;
        }
        Ok(())
    }
}

/// Fleet rule violations and storage failures.
#[derive(Debug, Error)]
pub enum FleetError {
    /// Malformed or out-of-range fields
    #[error("validation error: {0}")]
    Validation(FieldErrors),

    /// Identity already taken
    #[error("{entity} already exists: {key}")]
    Conflict { entity: Entity, key: String },

    /// Referenced identity does not exist
    #[error("{entity} not found: {key}")]
    NotFound { entity: Entity, key: String },

    /// Some medication codes of a load request do not exist
    #[error("medication codes do not exist: {}", .0.join(", "))]
    MedicationsNotFound(Vec<String>),

    /// LOADING requested while the battery is at or above the threshold
    #[error("drone cannot enter LOADING with battery at or above {}%", LOADING_BATTERY_THRESHOLD)]
    BatteryGate,

    /// Medications (by name) already loaded on the drone
    #[error("medications already associated with the drone: {}", .0.join(", "))]
    AlreadyAssociated(Vec<String>),

    /// Loading would take the drone over its weight limit
    #[error("total weight {total} exceeds drone limit {limit}")]
    CapacityExceeded { total: f64, limit: f64 },

    /// Storage layer failure
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl From<FieldErrors> for FleetError {
    fn from(errors: FieldErrors) -> Self {
        FleetError::Validation(errors)
    }
}

impl FleetError {
    pub(crate) fn drone_not_found(serial_number: &str) -> Self {
        FleetError::NotFound {
            entity: Entity::Drone,
            key: serial_number.to_string(),
        }
    }

    pub(crate) fn medication_not_found(code: &str) -> Self {
        FleetError::NotFound {
            entity: Entity::Medication,
            key: code.to_string(),
        }
    }
}

/// Entity kind named in `Conflict` / `NotFound`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Entity {
    Drone,
    Medication,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entity::Drone => f.write_str("drone"),
            Entity::Medication => f.write_str("medication"),
        }
    }
}
