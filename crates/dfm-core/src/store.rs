//! Storage abstraction for drones, medications and their associations.
//!
//! This module defines the `FleetStore` trait and provides an in-memory
//! implementation for tests and ephemeral deployments. The durable backend
//! lives in [`crate::sqlite_store`].

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::types::{Drone, DroneState, Medication};

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during store operations.
#[derive(Debug, Error, Clone)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("record already exists: {0}")]
    Duplicate(String),

    #[error("storage operation failed: {0}")]
    OperationFailed(String),

    #[error("data corruption detected: {0}")]
    DataCorruption(String),
}

// ============================================================================
// Store Trait
// ============================================================================

/// Keyed storage for the fleet.
///
/// Every mutating method is atomic: it either applies completely or leaves
/// the store as it was. Deleting a drone or medication removes its
/// associations in the same unit of work.
#[async_trait]
pub trait FleetStore: Send + Sync {
    async fn get_drone(&self, serial_number: &str) -> Result<Option<Drone>, StoreError>;

    /// All drones ordered by serial number.
    async fn list_drones(&self) -> Result<Vec<Drone>, StoreError>;

    async fn list_drones_in_state(&self, state: DroneState) -> Result<Vec<Drone>, StoreError>;

    /// Fails with `Duplicate` if the serial number is taken.
    async fn insert_drone(&self, drone: Drone) -> Result<(), StoreError>;

    /// Replace the stored drone with the same serial number.
    async fn update_drone(&self, drone: Drone) -> Result<(), StoreError>;

    /// Returns `false` if there was nothing to delete.
    async fn delete_drone(&self, serial_number: &str) -> Result<bool, StoreError>;

    async fn get_medication(&self, code: &str) -> Result<Option<Medication>, StoreError>;

    /// The subset of `codes` that exist, in no particular order.
    async fn get_medications(&self, codes: &[String]) -> Result<Vec<Medication>, StoreError>;

    /// All medications ordered by code.
    async fn list_medications(&self) -> Result<Vec<Medication>, StoreError>;

    async fn insert_medication(&self, medication: Medication) -> Result<(), StoreError>;

    async fn update_medication(&self, medication: Medication) -> Result<(), StoreError>;

    async fn delete_medication(&self, code: &str) -> Result<bool, StoreError>;

    async fn is_associated(&self, serial_number: &str, code: &str) -> Result<bool, StoreError>;

    /// Medications currently associated with the drone, ordered by code.
    async fn loaded_medications(&self, serial_number: &str) -> Result<Vec<Medication>, StoreError>;

    /// Drones the medication is loaded onto, ordered by serial number.
    async fn drones_carrying(&self, code: &str) -> Result<Vec<Drone>, StoreError>;

    /// Associate every code with the drone, all or nothing.
    async fn associate(&self, serial_number: &str, codes: &[String]) -> Result<(), StoreError>;

    /// Every `(serial_number, code)` pair.
    async fn list_associations(&self) -> Result<Vec<(String, String)>, StoreError>;
}

// ============================================================================
// Association Index
// ============================================================================

/// Two-way index between drones and the medications loaded onto them.
#[derive(Debug, Default, Clone)]
pub struct AssociationIndex {
    by_drone: HashMap<String, BTreeSet<String>>,
    by_medication: HashMap<String, BTreeSet<String>>,
}

impl AssociationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, serial_number: &str, code: &str) -> bool {
        self.by_drone
            .get(serial_number)
            .is_some_and(|codes| codes.contains(code))
    }

    /// Returns `false` if the pair was already present.
    pub fn insert(&mut self, serial_number: &str, code: &str) -> bool {
        let added = self
            .by_drone
            .entry(serial_number.to_string())
            .or_default()
            .insert(code.to_string());
        self.by_medication
            .entry(code.to_string())
            .or_default()
            .insert(serial_number.to_string());
        added
    }

    pub fn medications_of(&self, serial_number: &str) -> impl Iterator<Item = &str> {
        self.by_drone
            .get(serial_number)
            .into_iter()
            .flat_map(|codes| codes.iter().map(String::as_str))
    }

    pub fn drones_of(&self, code: &str) -> impl Iterator<Item = &str> {
        self.by_medication
            .get(code)
            .into_iter()
            .flat_map(|serials| serials.iter().map(String::as_str))
    }

    /// Drop every association of a drone. Returns how many were removed.
    pub fn remove_drone(&mut self, serial_number: &str) -> usize {
        let Some(codes) = self.by_drone.remove(serial_number) else {
            return 0;
        };
        for code in &codes {
            if let Some(serials) = self.by_medication.get_mut(code) {
                serials.remove(serial_number);
                if serials.is_empty() {
                    self.by_medication.remove(code);
                }
            }
        }
        codes.len()
    }

    /// Drop every association of a medication. Returns how many were removed.
    pub fn remove_medication(&mut self, code: &str) -> usize {
        let Some(serials) = self.by_medication.remove(code) else {
            return 0;
        };
        for serial in &serials {
            if let Some(codes) = self.by_drone.get_mut(serial) {
                codes.remove(code);
                if codes.is_empty() {
                    self.by_drone.remove(serial);
                }
            }
        }
        serials.len()
    }

    pub fn len(&self) -> usize {
        self.by_drone.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_drone.is_empty()
    }

    pub fn pairs(&self) -> Vec<(String, String)> {
        let mut pairs: Vec<(String, String)> = self
            .by_drone
            .iter()
            .flat_map(|(serial, codes)| codes.iter().map(move |code| (serial.clone(), code.clone())))
            .collect();
        pairs.sort();
        pairs
    }
}

// ============================================================================
// In-Memory Store Implementation
// ============================================================================

#[derive(Default)]
struct FleetTables {
    drones: BTreeMap<String, Drone>,
    medications: BTreeMap<String, Medication>,
    associations: AssociationIndex,
}

/// Thread-safe in-memory store.
///
/// All three tables sit behind one `RwLock`, so a cascade or a batch
/// association is applied under a single write guard.
#[derive(Default, Clone)]
pub struct MemoryStore {
    tables: Arc<RwLock<FleetTables>>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new in-memory store wrapped in an Arc for sharing.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl FleetStore for MemoryStore {
    // -------------------------------------------------------------------------
    // Drone Operations
    // -------------------------------------------------------------------------

    async fn get_drone(&self, serial_number: &str) -> Result<Option<Drone>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.drones.get(serial_number).cloned())
    }

    async fn list_drones(&self) -> Result<Vec<Drone>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.drones.values().cloned().collect())
    }

    async fn list_drones_in_state(&self, state: DroneState) -> Result<Vec<Drone>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .drones
            .values()
            .filter(|drone| drone.state == state)
            .cloned()
            .collect())
    }

    async fn insert_drone(&self, drone: Drone) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if tables.drones.contains_key(&drone.serial_number) {
            return Err(StoreError::Duplicate(drone.serial_number));
        }
        tables.drones.insert(drone.serial_number.clone(), drone);
        Ok(())
    }

    async fn update_drone(&self, drone: Drone) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        match tables.drones.get_mut(&drone.serial_number) {
            Some(stored) => {
                *stored = drone;
                Ok(())
            }
            None => Err(StoreError::NotFound(drone.serial_number)),
        }
    }

    async fn delete_drone(&self, serial_number: &str) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.drones.contains_key(serial_number) {
            return Ok(false);
        }
        tables.associations.remove_drone(serial_number);
        tables.drones.remove(serial_number);
        Ok(true)
    }

    // -------------------------------------------------------------------------
    // Medication Operations
    // -------------------------------------------------------------------------

    async fn get_medication(&self, code: &str) -> Result<Option<Medication>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.medications.get(code).cloned())
    }

    async fn get_medications(&self, codes: &[String]) -> Result<Vec<Medication>, StoreError> {
        let tables = self.tables.read().await;
        Ok(codes
            .iter()
            .filter_map(|code| tables.medications.get(code).cloned())
            .collect())
    }

    async fn list_medications(&self) -> Result<Vec<Medication>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.medications.values().cloned().collect())
    }

    async fn insert_medication(&self, medication: Medication) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if tables.medications.contains_key(&medication.code) {
            return Err(StoreError::Duplicate(medication.code));
        }
        tables.medications.insert(medication.code.clone(), medication);
        Ok(())
    }

    async fn update_medication(&self, medication: Medication) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        match tables.medications.get_mut(&medication.code) {
            Some(stored) => {
                *stored = medication;
                Ok(())
            }
            None => Err(StoreError::NotFound(medication.code)),
        }
    }

    async fn delete_medication(&self, code: &str) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.medications.contains_key(code) {
            return Ok(false);
        }
        tables.associations.remove_medication(code);
        tables.medications.remove(code);
        Ok(true)
    }

    // -------------------------------------------------------------------------
    // Association Operations
    // -------------------------------------------------------------------------

    async fn is_associated(&self, serial_number: &str, code: &str) -> Result<bool, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.associations.contains(serial_number, code))
    }

    async fn loaded_medications(&self, serial_number: &str) -> Result<Vec<Medication>, StoreError> {
        let tables = self.tables.read().await;
        tables
            .associations
            .medications_of(serial_number)
            .map(|code| {
                tables.medications.get(code).cloned().ok_or_else(|| {
                    StoreError::DataCorruption(format!(
                        "association {} -> {} has no medication",
                        serial_number, code
                    ))
                })
            })
            .collect()
    }

    async fn drones_carrying(&self, code: &str) -> Result<Vec<Drone>, StoreError> {
        let tables = self.tables.read().await;
        let mut drones = tables
            .associations
            .drones_of(code)
            .map(|serial| {
                tables.drones.get(serial).cloned().ok_or_else(|| {
                    StoreError::DataCorruption(format!(
                        "association {} -> {} has no drone",
                        serial, code
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        drones.sort_by(|a, b| a.serial_number.cmp(&b.serial_number));
        Ok(drones)
    }

    async fn associate(&self, serial_number: &str, codes: &[String]) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;

        // Check everything before touching the index.
        if !tables.drones.contains_key(serial_number) {
            return Err(StoreError::NotFound(serial_number.to_string()));
        }
        for code in codes {
            if !tables.medications.contains_key(code) {
                return Err(StoreError::NotFound(code.clone()));
            }
            if tables.associations.contains(serial_number, code) {
                return Err(StoreError::Duplicate(format!("{}/{}", serial_number, code)));
            }
        }

        for code in codes {
            tables.associations.insert(serial_number, code);
        }
        Ok(())
    }

    async fn list_associations(&self) -> Result<Vec<(String, String)>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.associations.pairs())
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DroneModel;

    fn make_drone(serial: &str) -> Drone {
        Drone {
            serial_number: serial.to_string(),
            model: DroneModel::Lightweight,
            weight_limit: 10.0,
            battery_capacity: 80.0,
            state: DroneState::Idle,
        }
    }

    fn make_medication(code: &str, weight: f64) -> Medication {
        Medication {
            name: format!("Medication{}", code),
            weight,
            code: code.to_string(),
            image: "example_image.jpg".to_string(),
        }
    }

    // -------------------------------------------------------------------------
    // Association Index Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_index_two_way() {
        let mut index = AssociationIndex::new();
        assert!(index.insert("SN1", "MED1"));
        assert!(index.insert("SN2", "MED1"));
        assert!(index.insert("SN1", "MED2"));
        assert!(!index.insert("SN1", "MED1"));

        assert_eq!(index.len(), 3);
        assert_eq!(index.medications_of("SN1").collect::<Vec<_>>(), vec!["MED1", "MED2"]);
        assert_eq!(index.drones_of("MED1").collect::<Vec<_>>(), vec!["SN1", "SN2"]);
    }

    #[test]
    fn test_index_remove_drone_cleans_reverse_side() {
        let mut index = AssociationIndex::new();
        index.insert("SN1", "MED1");
        index.insert("SN1", "MED2");
        index.insert("SN2", "MED2");

        assert_eq!(index.remove_drone("SN1"), 2);
        assert_eq!(index.drones_of("MED1").count(), 0);
        assert_eq!(index.drones_of("MED2").collect::<Vec<_>>(), vec!["SN2"]);
        assert_eq!(index.remove_drone("SN1"), 0);
    }

    #[test]
    fn test_index_remove_medication_cleans_forward_side() {
        let mut index = AssociationIndex::new();
        index.insert("SN1", "MED1");
        index.insert("SN2", "MED1");

        assert_eq!(index.remove_medication("MED1"), 2);
        assert!(index.is_empty());
        assert!(index.pairs().is_empty());
    }

    // -------------------------------------------------------------------------
    // Memory Store Tests
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_memory_drone_crud() {
        let store = MemoryStore::new();
        store.insert_drone(make_drone("SN1")).await.unwrap();

        let err = store.insert_drone(make_drone("SN1")).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));

        let mut drone = store.get_drone("SN1").await.unwrap().unwrap();
        drone.state = DroneState::Returning;
        store.update_drone(drone).await.unwrap();
        assert_eq!(
            store.get_drone("SN1").await.unwrap().unwrap().state,
            DroneState::Returning
        );

        assert!(store.delete_drone("SN1").await.unwrap());
        assert!(!store.delete_drone("SN1").await.unwrap());
        assert!(store.get_drone("SN1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_associate_is_all_or_nothing() {
        let store = MemoryStore::new();
        store.insert_drone(make_drone("SN1")).await.unwrap();
        store.insert_medication(make_medication("MED1", 1.0)).await.unwrap();

        let codes = vec!["MED1".to_string(), "MED9".to_string()];
        assert!(store.associate("SN1", &codes).await.is_err());
        assert!(store.list_associations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_memory_delete_cascades() {
        let store = MemoryStore::new();
        store.insert_drone(make_drone("SN1")).await.unwrap();
        store.insert_drone(make_drone("SN2")).await.unwrap();
        store.insert_medication(make_medication("MED1", 1.0)).await.unwrap();
        store.insert_medication(make_medication("MED2", 1.0)).await.unwrap();
        store
            .associate("SN1", &["MED1".to_string(), "MED2".to_string()])
            .await
            .unwrap();
        store.associate("SN2", &["MED1".to_string()]).await.unwrap();

        store.delete_drone("SN1").await.unwrap();
        assert_eq!(
            store.list_associations().await.unwrap(),
            vec![("SN2".to_string(), "MED1".to_string())]
        );

        store.delete_medication("MED1").await.unwrap();
        assert!(store.list_associations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_memory_drones_carrying() {
        let store = MemoryStore::new();
        for serial in ["SN3", "SN1", "SN2"] {
            store.insert_drone(make_drone(serial)).await.unwrap();
        }
        store.insert_medication(make_medication("MED1", 1.0)).await.unwrap();
        store.associate("SN3", &["MED1".to_string()]).await.unwrap();
        store.associate("SN1", &["MED1".to_string()]).await.unwrap();

        let serials: Vec<String> = store
            .drones_carrying("MED1")
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.serial_number)
            .collect();
        assert_eq!(serials, vec!["SN1", "SN3"]);
        assert!(store.drones_carrying("MED9").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_memory_list_drones_in_state() {
        let store = MemoryStore::new();
        store.insert_drone(make_drone("SN1")).await.unwrap();
        let mut busy = make_drone("SN2");
        busy.state = DroneState::Delivering;
        store.insert_drone(busy).await.unwrap();

        let idle = store.list_drones_in_state(DroneState::Idle).await.unwrap();
        assert_eq!(idle.len(), 1);
        assert_eq!(idle[0].serial_number, "SN1");
    }
}
