//! Property tests for the fleet invariants.

use std::sync::Arc;

use dfm_core::{
    Drone, DroneModel, DronePatch, DroneState, FleetError, FleetService, FleetStore,
    LoadRequest, Medication, MemoryStore,
};
use proptest::prelude::*;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn medication(i: usize, weight: f64) -> Medication {
    Medication {
        name: format!("Medication{}", i),
        weight,
        code: format!("MED{}", i),
        image: "example_image.jpg".to_string(),
    }
}

proptest! {
    // Capacity: whatever sequence of loads is attempted, the loaded weight
    // never exceeds the limit and a rejected load changes nothing.
    #[test]
    fn prop_capacity_never_exceeded(
        weight_limit in 0.0f64..=500.0,
        weights in prop::collection::vec(0.0f64..200.0, 1..12),
        batches in prop::collection::vec(prop::collection::vec(0usize..12, 1..4), 1..10),
    ) {
        let rt = runtime();
        rt.block_on(async {
            let store = MemoryStore::new_shared();
            let svc = FleetService::new(store.clone());
            svc.create_drone(Drone {
                serial_number: "SN1".to_string(),
                model: DroneModel::Heavyweight,
                weight_limit,
                battery_capacity: 50.0,
                state: DroneState::Idle,
            }).await.unwrap();
            for (i, w) in weights.iter().enumerate() {
                svc.create_medication(medication(i, *w)).await.unwrap();
            }

            for batch in &batches {
                let before = store.list_associations().await.unwrap();
                let codes: Vec<String> = batch
                    .iter()
                    .map(|i| format!("MED{}", i % weights.len()))
                    .collect();
                let result = svc.load_medications(LoadRequest {
                    serial_number: "SN1".to_string(),
                    medication_codes: codes,
                }).await;

                if result.is_err() {
                    prop_assert_eq!(store.list_associations().await.unwrap(), before);
                }

                let total: f64 = store
                    .loaded_medications("SN1")
                    .await
                    .unwrap()
                    .iter()
                    .map(|m| m.weight)
                    .sum();
                prop_assert!(total <= weight_limit);
            }
            Ok(())
        })?;
    }

    // Battery gate: LOADING is accepted iff the stored battery is below 25.
    #[test]
    fn prop_battery_gate_iff_below_threshold(battery in 0.0f64..=100.0) {
        let rt = runtime();
        rt.block_on(async {
            let store: Arc<dyn FleetStore> = MemoryStore::new_shared();
            let svc = FleetService::new(store);
            svc.create_drone(Drone {
                serial_number: "SN1".to_string(),
                model: DroneModel::Lightweight,
                weight_limit: 10.0,
                battery_capacity: battery,
                state: DroneState::Idle,
            }).await.unwrap();

            let result = svc.update_drone("SN1", DronePatch {
                state: Some(DroneState::Loading),
                ..Default::default()
            }).await;

            if battery < 25.0 {
                prop_assert!(result.is_ok());
            } else {
                prop_assert!(matches!(result, Err(FleetError::BatteryGate)));
                let stored = svc.get_drone("SN1").await.unwrap();
                prop_assert_eq!(stored.state, DroneState::Idle);
            }
            Ok(())
        })?;
    }

    // Deleting any drone or medication leaves no association pointing at it.
    #[test]
    fn prop_no_orphans_after_delete(
        pairs in prop::collection::vec((0usize..4, 0usize..6), 0..20),
        delete_drone in 0usize..4,
        delete_med in 0usize..6,
    ) {
        let rt = runtime();
        rt.block_on(async {
            let store = MemoryStore::new_shared();
            let svc = FleetService::new(store.clone());
            for d in 0..4 {
                svc.create_drone(Drone {
                    serial_number: format!("SN{}", d),
                    model: DroneModel::Cruiserweight,
                    weight_limit: 500.0,
                    battery_capacity: 90.0,
                    state: DroneState::Idle,
                }).await.unwrap();
            }
            for m in 0..6 {
                svc.create_medication(medication(m, 1.0)).await.unwrap();
            }
            for (d, m) in &pairs {
                let _ = svc.load_medications(LoadRequest {
                    serial_number: format!("SN{}", d),
                    medication_codes: vec![format!("MED{}", m)],
                }).await;
            }

            let doomed_drone = format!("SN{}", delete_drone);
            let doomed_med = format!("MED{}", delete_med);
            svc.delete_drone(&doomed_drone).await.unwrap();
            svc.delete_medication(&doomed_med).await.unwrap();

            for (serial, code) in store.list_associations().await.unwrap() {
                prop_assert_ne!(&serial, &doomed_drone);
                prop_assert_ne!(&code, &doomed_med);
            }
            Ok(())
        })?;
    }
}
