//! Fleet domain types shared by the store, the rules engine and the API.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Drones at or above this charge may not enter `LOADING`.
pub const LOADING_BATTERY_THRESHOLD: f64 = 25.0;

/// Upper bound for `weight_limit`.
pub const MAX_WEIGHT_LIMIT: f64 = 500.0;

/// Upper bound for `battery_capacity`.
pub const MAX_BATTERY_CAPACITY: f64 = 100.0;

/// Maximum length of a drone serial number.
pub const MAX_SERIAL_LEN: usize = 100;

/// Drone weight class.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DroneModel {
    Lightweight,
    Middleweight,
    Cruiserweight,
    Heavyweight,
}

impl DroneModel {
    pub const ALL: [DroneModel; 4] = [
        DroneModel::Lightweight,
        DroneModel::Middleweight,
        DroneModel::Cruiserweight,
        DroneModel::Heavyweight,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DroneModel::Lightweight => "Lightweight",
            DroneModel::Middleweight => "Middleweight",
            DroneModel::Cruiserweight => "Cruiserweight",
            DroneModel::Heavyweight => "Heavyweight",
        }
    }
}

impl FromStr for DroneModel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL.into_iter().find(|m| m.as_str() == s).ok_or(())
    }
}

impl fmt::Display for DroneModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operational state of a drone.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DroneState {
    Idle,
    Loading,
    Loaded,
    Delivering,
    Delivered,
    Returning,
}

impl DroneState {
    pub const ALL: [DroneState; 6] = [
        DroneState::Idle,
        DroneState::Loading,
        DroneState::Loaded,
        DroneState::Delivering,
        DroneState::Delivered,
        DroneState::Returning,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DroneState::Idle => "IDLE",
            DroneState::Loading => "LOADING",
            DroneState::Loaded => "LOADED",
            DroneState::Delivering => "DELIVERING",
            DroneState::Delivered => "DELIVERED",
            DroneState::Returning => "RETURNING",
        }
    }
}

impl FromStr for DroneState {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL.into_iter().find(|st| st.as_str() == s).ok_or(())
    }
}

impl fmt::Display for DroneState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fleet unit, keyed by its serial number.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Drone {
    pub serial_number: String,
    pub model: DroneModel,
    pub weight_limit: f64,
    pub battery_capacity: f64,
    pub state: DroneState,
}

impl Drone {
    /// Apply the supplied fields of a patch, leaving the rest untouched.
    pub fn apply(&mut self, patch: &DronePatch) {
        if let Some(model) = patch.model {
            self.model = model;
        }
        if let Some(weight_limit) = patch.weight_limit {
            self.weight_limit = weight_limit;
        }
        if let Some(battery_capacity) = patch.battery_capacity {
            self.battery_capacity = battery_capacity;
        }
        if let Some(state) = patch.state {
            self.state = state;
        }
    }
}

/// Partial drone update. `None` means "leave as is".
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DronePatch {
    pub model: Option<DroneModel>,
    pub weight_limit: Option<f64>,
    pub battery_capacity: Option<f64>,
    pub state: Option<DroneState>,
}

/// A payload item, keyed by its code.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Medication {
    pub name: String,
    pub weight: f64,
    pub code: String,
    pub image: String,
}

impl Medication {
    pub fn apply(&mut self, patch: &MedicationPatch) {
        if let Some(name) = &patch.name {
            self.name = name.clone();
        }
        if let Some(weight) = patch.weight {
            self.weight = weight;
        }
        if let Some(image) = &patch.image {
            self.image = image.clone();
        }
    }
}

/// Partial medication update.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MedicationPatch {
    pub name: Option<String>,
    pub weight: Option<f64>,
    pub image: Option<String>,
}

/// Request to load a set of medications onto one drone.
#[derive(Clone, Debug, PartialEq)]
pub struct LoadRequest {
    pub serial_number: String,
    /// Requested codes, deduplicated in first-seen order.
    pub medication_codes: Vec<String>,
}

/// Battery reading for a single drone.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BatteryLevel {
    pub serial_number: String,
    pub battery_capacity: f64,
}

impl From<&Drone> for BatteryLevel {
    fn from(drone: &Drone) -> Self {
        Self {
            serial_number: drone.serial_number.clone(),
            battery_capacity: drone.battery_capacity,
        }
    }
}
