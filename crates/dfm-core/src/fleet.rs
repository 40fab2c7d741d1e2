//! Fleet consistency engine.
//!
//! `FleetService` is the only way the fleet is mutated. Each mutating
//! operation runs its checks and its store write while holding the write
//! gate, so concurrent requests can never interleave between a check and the
//! write it guards. Reads never take the gate.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::errors::{Entity, FleetError};
use crate::store::{FleetStore, StoreError};
use crate::types::{
    BatteryLevel, Drone, DronePatch, DroneState, LoadRequest, Medication, MedicationPatch,
    LOADING_BATTERY_THRESHOLD,
};

/// Outcome of a successful load.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadOutcome {
    pub serial_number: String,
    /// Codes associated by this call.
    pub loaded: Vec<String>,
    /// Weight on the drone after the load.
    pub total_weight: f64,
}

/// Service context shared by every request handler.
pub struct FleetService {
    store: Arc<dyn FleetStore>,
    write_gate: Mutex<()>,
}

impl FleetService {
    pub fn new(store: Arc<dyn FleetStore>) -> Self {
        Self {
            store,
            write_gate: Mutex::new(()),
        }
    }

    /// Shared handle to the underlying store, for readers such as the audit.
    /// Writes made through it skip the write gate and the fleet checks.
    pub fn store(&self) -> Arc<dyn FleetStore> {
        self.store.clone()
    }

    // -------------------------------------------------------------------------
    // Drones
    // -------------------------------------------------------------------------

    pub async fn list_drones(&self) -> Result<Vec<Drone>, FleetError> {
        Ok(self.store.list_drones().await?)
    }

    pub async fn get_drone(&self, serial_number: &str) -> Result<Drone, FleetError> {
        self.store
            .get_drone(serial_number)
            .await?
            .ok_or_else(|| FleetError::drone_not_found(serial_number))
    }

    /// Register a new drone.
    ///
    /// Fails with `Conflict` if the serial number is taken, then with
    /// `BatteryGate` if the drone would start out `LOADING` at or above the
    /// battery threshold.
    pub async fn create_drone(&self, drone: Drone) -> Result<(), FleetError> {
        let _gate = self.write_gate.lock().await;

        if self.store.get_drone(&drone.serial_number).await?.is_some() {
            return Err(FleetError::Conflict {
                entity: Entity::Drone,
                key: drone.serial_number,
            });
        }

        if drone.state == DroneState::Loading {
            check_battery_gate(drone.battery_capacity)?;
        }

        let serial_number = drone.serial_number.clone();
        self.store.insert_drone(drone).await.map_err(|e| match e {
            StoreError::Duplicate(key) => FleetError::Conflict {
                entity: Entity::Drone,
                key,
            },
            other => other.into(),
        })?;

        info!(serial_number = %serial_number, "drone created");
        Ok(())
    }

    /// Apply a partial update.
    ///
    /// A move into `LOADING` is judged against the battery level already
    /// stored, not one supplied in the same patch. A new weight limit may not
    /// fall below the weight already loaded.
    pub async fn update_drone(&self, serial_number: &str, patch: DronePatch) -> Result<Drone, FleetError> {
        let _gate = self.write_gate.lock().await;

        let mut drone = self
            .store
            .get_drone(serial_number)
            .await?
            .ok_or_else(|| FleetError::drone_not_found(serial_number))?;

        if patch.state == Some(DroneState::Loading) {
            check_battery_gate(drone.battery_capacity)?;
        }

        if let Some(limit) = patch.weight_limit {
            let loaded = self.loaded_weight(serial_number, None).await?;
            if loaded > limit {
                debug!(
                    serial_number = %serial_number,
                    loaded,
                    limit,
                    "weight limit update rejected below loaded weight"
                );
                return Err(FleetError::CapacityExceeded { total: loaded, limit });
            }
        }

        drone.apply(&patch);
        self.store.update_drone(drone.clone()).await?;

        info!(serial_number = %serial_number, state = %drone.state, "drone updated");
        Ok(drone)
    }

    /// Remove a drone together with all of its associations.
    pub async fn delete_drone(&self, serial_number: &str) -> Result<(), FleetError> {
        let _gate = self.write_gate.lock().await;

        if !self.store.delete_drone(serial_number).await? {
            return Err(FleetError::drone_not_found(serial_number));
        }

        info!(serial_number = %serial_number, "drone deleted");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Medications
    // -------------------------------------------------------------------------

    pub async fn list_medications(&self) -> Result<Vec<Medication>, FleetError> {
        Ok(self.store.list_medications().await?)
    }

    pub async fn get_medication(&self, code: &str) -> Result<Medication, FleetError> {
        self.store
            .get_medication(code)
            .await?
            .ok_or_else(|| FleetError::medication_not_found(code))
    }

    pub async fn create_medication(&self, medication: Medication) -> Result<(), FleetError> {
        let _gate = self.write_gate.lock().await;

        if self.store.get_medication(&medication.code).await?.is_some() {
            return Err(FleetError::Conflict {
                entity: Entity::Medication,
                key: medication.code,
            });
        }

        let code = medication.code.clone();
        self.store.insert_medication(medication).await.map_err(|e| match e {
            StoreError::Duplicate(key) => FleetError::Conflict {
                entity: Entity::Medication,
                key,
            },
            other => other.into(),
        })?;

        info!(code = %code, "medication created");
        Ok(())
    }

    /// Apply a partial update. A new weight may not take any drone the
    /// medication is loaded onto over its weight limit.
    pub async fn update_medication(
        &self,
        code: &str,
        patch: MedicationPatch,
    ) -> Result<Medication, FleetError> {
        let _gate = self.write_gate.lock().await;

        let mut medication = self
            .store
            .get_medication(code)
            .await?
            .ok_or_else(|| FleetError::medication_not_found(code))?;

        if let Some(weight) = patch.weight {
            for drone in self.store.drones_carrying(code).await? {
                let total = self
                    .loaded_weight(&drone.serial_number, Some((code, weight)))
                    .await?;
                if total > drone.weight_limit {
                    debug!(
                        code = %code,
                        serial_number = %drone.serial_number,
                        total,
                        limit = drone.weight_limit,
                        "medication weight update rejected over drone limit"
                    );
                    return Err(FleetError::CapacityExceeded {
                        total,
                        limit: drone.weight_limit,
                    });
                }
            }
        }

        medication.apply(&patch);
        self.store.update_medication(medication.clone()).await?;

        info!(code = %code, "medication updated");
        Ok(medication)
    }

    pub async fn delete_medication(&self, code: &str) -> Result<(), FleetError> {
        let _gate = self.write_gate.lock().await;

        if !self.store.delete_medication(code).await? {
            return Err(FleetError::medication_not_found(code));
        }

        info!(code = %code, "medication deleted");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Load assignment
    // -------------------------------------------------------------------------

    /// Load a set of medications onto a drone, all or nothing.
    ///
    /// Checks run in order: the drone exists, every code exists, none of the
    /// medications is already on the drone, and the combined weight of what
    /// is already loaded plus what is requested fits the weight limit.
    pub async fn load_medications(&self, mut request: LoadRequest) -> Result<LoadOutcome, FleetError> {
        let mut seen = std::collections::HashSet::new();
        request.medication_codes.retain(|code| seen.insert(code.clone()));

        let _gate = self.write_gate.lock().await;

        let drone = self
            .store
            .get_drone(&request.serial_number)
            .await?
            .ok_or_else(|| FleetError::drone_not_found(&request.serial_number))?;

        let requested = self.store.get_medications(&request.medication_codes).await?;
        if requested.len() != request.medication_codes.len() {
            let missing: Vec<String> = request
                .medication_codes
                .iter()
                .filter(|code| !requested.iter().any(|m| &m.code == *code))
                .cloned()
                .collect();
            return Err(FleetError::MedicationsNotFound(missing));
        }

        let mut already_loaded = Vec::new();
        for medication in &requested {
            if self
                .store
                .is_associated(&drone.serial_number, &medication.code)
                .await?
            {
                already_loaded.push(medication.name.clone());
            }
        }
        if !already_loaded.is_empty() {
            return Err(FleetError::AlreadyAssociated(already_loaded));
        }

        let current = self.loaded_weight(&drone.serial_number, None).await?;
        let total = current + requested.iter().map(|m| m.weight).sum::<f64>();
        if total > drone.weight_limit {
            debug!(
                serial_number = %drone.serial_number,
                total,
                limit = drone.weight_limit,
                "load rejected over weight limit"
            );
            return Err(FleetError::CapacityExceeded {
                total,
                limit: drone.weight_limit,
            });
        }

        self.store
            .associate(&drone.serial_number, &request.medication_codes)
            .await?;

        info!(
            serial_number = %drone.serial_number,
            count = request.medication_codes.len(),
            total_weight = total,
            "medications loaded"
        );
        Ok(LoadOutcome {
            serial_number: drone.serial_number,
            loaded: request.medication_codes,
            total_weight: total,
        })
    }

    // -------------------------------------------------------------------------
    // Fleet queries
    // -------------------------------------------------------------------------

    /// Drones in `IDLE`.
    pub async fn available_drones(&self) -> Result<Vec<Drone>, FleetError> {
        Ok(self.store.list_drones_in_state(DroneState::Idle).await?)
    }

    pub async fn loaded_medications(&self, serial_number: &str) -> Result<Vec<Medication>, FleetError> {
        if self.store.get_drone(serial_number).await?.is_none() {
            return Err(FleetError::drone_not_found(serial_number));
        }
        Ok(self.store.loaded_medications(serial_number).await?)
    }

    pub async fn battery_level(&self, serial_number: &str) -> Result<BatteryLevel, FleetError> {
        let drone = self.get_drone(serial_number).await?;
        Ok(BatteryLevel::from(&drone))
    }

    /// Weight currently loaded on a drone, optionally with one medication's
    /// weight replaced.
    async fn loaded_weight(
        &self,
        serial_number: &str,
        replaced: Option<(&str, f64)>,
    ) -> Result<f64, FleetError> {
        let loaded = self.store.loaded_medications(serial_number).await?;
        Ok(loaded
            .iter()
            .map(|m| match replaced {
                Some((code, weight)) if m.code == code => weight,
                _ => m.weight,
            })
            .sum())
    }
}

fn check_battery_gate(battery_capacity: f64) -> Result<(), FleetError> {
    if battery_capacity >= LOADING_BATTERY_THRESHOLD {
        return Err(FleetError::BatteryGate);
    }
    Ok(())
}
