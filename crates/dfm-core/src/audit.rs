//! Periodic battery audit.
//!
//! The audit reads the fleet on a fixed interval and writes one line per
//! drone to the `dfm::audit` tracing target. It only ever uses the store's
//! read methods.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::store::{FleetStore, StoreError};

/// Tracing target used for audit lines.
pub const AUDIT_TARGET: &str = "dfm::audit";

/// Default period between audit ticks.
pub const DEFAULT_AUDIT_INTERVAL: Duration = Duration::from_secs(300);

/// One audit line.
#[derive(Debug, Clone, PartialEq)]
pub enum AuditRecord {
    Battery {
        serial_number: String,
        battery_capacity: f64,
    },
    EmptyFleet,
}

impl std::fmt::Display for AuditRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuditRecord::Battery {
                serial_number,
                battery_capacity,
            } => write!(f, "The Drone {} has {:?}% of battery", serial_number, battery_capacity),
            AuditRecord::EmptyFleet => f.write_str("No drones found in the database."),
        }
    }
}

/// Battery audit over a fleet store.
#[derive(Clone)]
pub struct BatteryAudit {
    store: Arc<dyn FleetStore>,
    interval: Duration,
}

impl BatteryAudit {
    pub fn new(store: Arc<dyn FleetStore>, interval: Duration) -> Self {
        Self { store, interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run a single tick and return what was logged.
    pub async fn run_once(&self) -> Result<Vec<AuditRecord>, StoreError> {
        let drones = self.store.list_drones().await?;

        info!(target: AUDIT_TARGET, "Audit Log:");

        let records: Vec<AuditRecord> = if drones.is_empty() {
            vec![AuditRecord::EmptyFleet]
        } else {
            drones
                .into_iter()
                .map(|drone| AuditRecord::Battery {
                    serial_number: drone.serial_number,
                    battery_capacity: drone.battery_capacity,
                })
                .collect()
        };

        for record in &records {
            info!(target: AUDIT_TARGET, "{}", record);
        }
        Ok(records)
    }

    /// Spawn the periodic task. The first tick fires one full interval after
    /// start.
    pub fn start(self) -> BatteryAuditHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(shutdown_rx));
        BatteryAuditHandle { shutdown_tx, task }
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let start = tokio::time::Instant::now() + self.interval;
        let mut interval = tokio::time::interval_at(start, self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            target: AUDIT_TARGET,
            interval_secs = self.interval.as_secs(),
            "battery audit started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.run_once().await {
                        warn!(target: AUDIT_TARGET, "battery audit failed: {}", e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(target: AUDIT_TARGET, "battery audit stopped");
    }
}

/// Handle to a running audit task.
pub struct BatteryAuditHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl BatteryAuditHandle {
    /// Signal the task to stop and wait for it to finish.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            warn!(target: AUDIT_TARGET, "battery audit task ended abnormally: {}", e);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::store::MemoryStore;
    use crate::types::{Drone, DroneModel, DroneState, Medication};

    /// Memory store that counts fleet listings, one per audit tick.
    #[derive(Default)]
    struct CountingStore {
        inner: MemoryStore,
        listings: AtomicUsize,
    }

    impl CountingStore {
        fn listings(&self) -> usize {
            self.listings.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl FleetStore for CountingStore {
        async fn get_drone(&self, serial_number: &str) -> Result<Option<Drone>, StoreError> {
            self.inner.get_drone(serial_number).await
        }
        async fn list_drones(&self) -> Result<Vec<Drone>, StoreError> {
            self.listings.fetch_add(1, Ordering::SeqCst);
            self.inner.list_drones().await
        }
        async fn list_drones_in_state(&self, state: DroneState) -> Result<Vec<Drone>, StoreError> {
            self.inner.list_drones_in_state(state).await
        }
        async fn insert_drone(&self, drone: Drone) -> Result<(), StoreError> {
            self.inner.insert_drone(drone).await
        }
        async fn update_drone(&self, drone: Drone) -> Result<(), StoreError> {
            self.inner.update_drone(drone).await
        }
        async fn delete_drone(&self, serial_number: &str) -> Result<bool, StoreError> {
            self.inner.delete_drone(serial_number).await
        }
        async fn get_medication(&self, code: &str) -> Result<Option<Medication>, StoreError> {
            self.inner.get_medication(code).await
        }
        async fn get_medications(&self, codes: &[String]) -> Result<Vec<Medication>, StoreError> {
            self.inner.get_medications(codes).await
        }
        async fn list_medications(&self) -> Result<Vec<Medication>, StoreError> {
            self.inner.list_medications().await
        }
        async fn insert_medication(&self, medication: Medication) -> Result<(), StoreError> {
            self.inner.insert_medication(medication).await
        }
        async fn update_medication(&self, medication: Medication) -> Result<(), StoreError> {
            self.inner.update_medication(medication).await
        }
        async fn delete_medication(&self, code: &str) -> Result<bool, StoreError> {
            self.inner.delete_medication(code).await
        }
        async fn is_associated(&self, serial_number: &str, code: &str) -> Result<bool, StoreError> {
            self.inner.is_associated(serial_number, code).await
        }
        async fn loaded_medications(&self, serial_number: &str) -> Result<Vec<Medication>, StoreError> {
            self.inner.loaded_medications(serial_number).await
        }
        async fn drones_carrying(&self, code: &str) -> Result<Vec<Drone>, StoreError> {
            self.inner.drones_carrying(code).await
        }
        async fn associate(&self, serial_number: &str, codes: &[String]) -> Result<(), StoreError> {
            self.inner.associate(serial_number, codes).await
        }
        async fn list_associations(&self) -> Result<Vec<(String, String)>, StoreError> {
            self.inner.list_associations().await
        }
    }

    fn drone(serial: &str, battery: f64) -> Drone {
        Drone {
            serial_number: serial.to_string(),
            model: DroneModel::Heavyweight,
            weight_limit: 500.0,
            battery_capacity: battery,
            state: DroneState::Idle,
        }
    }

    #[tokio::test]
    async fn test_empty_fleet_single_line() {
        let audit = BatteryAudit::new(MemoryStore::new_shared(), DEFAULT_AUDIT_INTERVAL);
        let records = audit.run_once().await.unwrap();
        assert_eq!(records, vec![AuditRecord::EmptyFleet]);
        assert_eq!(records[0].to_string(), "No drones found in the database.");
    }

    #[tokio::test]
    async fn test_one_line_per_drone() {
        let store = MemoryStore::new_shared();
        store.insert_drone(drone("SN1", 80.0)).await.unwrap();
        store.insert_drone(drone("SN2", 12.5)).await.unwrap();

        let audit = BatteryAudit::new(store.clone(), DEFAULT_AUDIT_INTERVAL);
        let lines: Vec<String> = audit
            .run_once()
            .await
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(
            lines,
            vec![
                "The Drone SN1 has 80.0% of battery",
                "The Drone SN2 has 12.5% of battery",
            ]
        );

        // Read-only: the fleet is unchanged.
        assert_eq!(store.list_drones().await.unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_once_per_interval_until_stopped() {
        let interval = Duration::from_secs(300);
        let store = Arc::new(CountingStore::default());
        store.insert_drone(drone("SN1", 50.0)).await.unwrap();

        let handle = BatteryAudit::new(store.clone(), interval).start();

        // Nothing runs before the first full interval.
        tokio::time::sleep(interval - Duration::from_secs(1)).await;
        assert_eq!(store.listings(), 0);

        tokio::time::sleep(interval * 2 + Duration::from_secs(2)).await;
        assert_eq!(store.listings(), 3);
        assert!(!handle.is_finished());

        handle.stop().await;
        tokio::time::sleep(interval * 3).await;
        assert_eq!(store.listings(), 3);
    }
}
