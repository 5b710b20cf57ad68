//! Barrido de consistencia Rider ↔ Vehículo
//!
//! Repara lo que el motor no pudo compensar: vehículos reclamados por un rider
//! que nunca llegó a persistirse, riders que apuntan a vehículos borrados o
//! ajenos y riders con campos de asignación incoherentes. Todas las
//! reparaciones son escrituras condicionales, así que un cambio concurrente
//! siempre gana sobre el barrido.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::database::{ConditionalUpdate, StoreResult};
use crate::models::rider::{AssignmentStatus, Rider};
use crate::models::vehicle::Vehicle;
use crate::repositories::rider_repository::RiderRepository;
use crate::repositories::vehicle_repository::VehicleRepository;

const SWEEP_ACTOR: &str = "system:reconcile";
const BATCH_SIZE: usize = 100;

/// Un vehículo reclamado hace menos que esto puede tener la escritura del
/// rider todavía en curso; se deja para el siguiente barrido.
const DEFAULT_GRACE_SECS: i64 = 30;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub vehicles_scanned: u64,
    pub riders_scanned: u64,
    pub vehicles_released: u64,
    pub riders_cleared: u64,
}

#[derive(Clone)]
pub struct ConsistencySweep {
    riders: RiderRepository,
    vehicles: VehicleRepository,
    grace: chrono::Duration,
}

impl ConsistencySweep {
    pub fn new(riders: RiderRepository, vehicles: VehicleRepository) -> Self {
        Self {
            riders,
            vehicles,
            grace: chrono::Duration::seconds(DEFAULT_GRACE_SECS),
        }
    }

    pub fn with_grace(mut self, grace: chrono::Duration) -> Self {
        self.grace = grace;
        self
    }

    pub async fn run(&self) -> StoreResult<ReconcileReport> {
        let mut report = ReconcileReport::default();

        let mut offset = 0;
        loop {
            let batch = self.vehicles.scan(offset, BATCH_SIZE).await?;
            if batch.is_empty() {
                break;
            }
            offset += batch.len();
            for vehicle in &batch {
                report.vehicles_scanned += 1;
                if self.reconcile_vehicle(vehicle).await? {
                    report.vehicles_released += 1;
                }
            }
        }

        let mut offset = 0;
        loop {
            let batch = self.riders.scan(offset, BATCH_SIZE).await?;
            if batch.is_empty() {
                break;
            }
            offset += batch.len();
            for rider in &batch {
                report.riders_scanned += 1;
                if self.reconcile_rider(rider).await? {
                    report.riders_cleared += 1;
                }
            }
        }

        info!(
            "🧹 Barrido de consistencia: {} vehículos ({} liberados), {} riders ({} corregidos)",
            report.vehicles_scanned,
            report.vehicles_released,
            report.riders_scanned,
            report.riders_cleared
        );
        Ok(report)
    }

    /// Libera el vehículo si su rider no existe o no apunta de vuelta
    async fn reconcile_vehicle(&self, vehicle: &Vehicle) -> StoreResult<bool> {
        let Some(holder) = vehicle.assigned_to.as_deref() else {
            return Ok(false);
        };

        if let Some(assigned_at) = vehicle.assigned_at {
            if Utc::now() - assigned_at < self.grace {
                debug!("Vehículo {} reclamado recientemente, se omite", vehicle.id);
                return Ok(false);
            }
        }

        let points_back = self
            .riders
            .find_by_id(holder)
            .await?
            .map(|rider| rider.current_vehicle() == Some(vehicle.id.as_str()))
            .unwrap_or(false);
        if points_back {
            return Ok(false);
        }

        let released = self
            .vehicles
            .release(&vehicle.id, holder, SWEEP_ACTOR, Utc::now())
            .await?
            .is_applied();
        if released {
            info!("🔓 Vehículo {} liberado: rider {} no lo tiene asignado", vehicle.id, holder);
        }
        Ok(released)
    }

    /// Deja sin asignar al rider si su vehículo no existe o pertenece a otro,
    /// o si sus campos de asignación son incoherentes
    async fn reconcile_rider(&self, rider: &Rider) -> StoreResult<bool> {
        let needs_clear = match (rider.assignment_status, rider.assigned_vehicle_id.as_deref()) {
            (AssignmentStatus::Unassigned, None) => false,
            (AssignmentStatus::Unassigned, Some(_)) | (AssignmentStatus::Assigned, None) => true,
            (AssignmentStatus::Assigned, Some(vehicle_id)) => !self
                .vehicles
                .find_by_id(vehicle_id)
                .await?
                .map(|vehicle| vehicle.assigned_to.as_deref() == Some(rider.id.as_str()))
                .unwrap_or(false),
        };
        if !needs_clear {
            return Ok(false);
        }

        match self.riders.clear_assignment_if_unchanged(rider, SWEEP_ACTOR).await? {
            ConditionalUpdate::Applied(_) => {
                info!(
                    "🔓 Rider {} normalizado a unassigned (tenía {:?} / {:?})",
                    rider.id,
                    rider.assignment_status,
                    rider.assigned_vehicle_id
                );
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Ejecuta el barrido periódicamente en segundo plano
    pub fn spawn_periodic(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // El primer tick es inmediato
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = self.run().await {
                    error!("❌ Error en el barrido de consistencia: {}", e);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{document_store::fields, Collection, DocumentStore, MemoryDocumentStore};
    use serde_json::{json, Value};

    async fn seeded() -> (MemoryDocumentStore, ConsistencySweep) {
        let store = MemoryDocumentStore::new();
        let now = json!(Utc::now() - chrono::Duration::minutes(10));
        let rider = |status: &str, vehicle: Value| {
            fields([
                ("firstName", json!("Dana")),
                ("lastName", json!("Cohen")),
                ("idNumber", json!("123456789")),
                ("phone", json!("050-1234567")),
                ("email", Value::Null),
                ("riderStatus", json!("active")),
                ("assignmentStatus", json!(status)),
                ("assignedVehicleId", vehicle),
                ("createdAt", now.clone()),
                ("updatedAt", now.clone()),
                ("createdBy", Value::Null),
                ("updatedBy", Value::Null),
            ])
        };
        let vehicle = |holder: Value| {
            fields([
                ("licensePlate", json!("1234567")),
                ("internalNumber", Value::Null),
                ("manufacturer", json!("Honda")),
                ("model", json!("PCX")),
                ("year", json!(2023)),
                ("type", json!("scooter")),
                ("status", json!("active")),
                ("assignedTo", holder.clone()),
                ("assignedAt", if holder.is_null() { Value::Null } else { now.clone() }),
                ("currentKilometers", json!(0.0)),
                ("createdAt", now.clone()),
                ("updatedAt", now.clone()),
                ("createdBy", Value::Null),
                ("updatedBy", Value::Null),
            ])
        };

        // Pareja consistente
        store.insert_with_id(Collection::Riders, "r-ok", rider("assigned", json!("v-ok"))).await;
        store.insert_with_id(Collection::Vehicles, "v-ok", vehicle(json!("r-ok"))).await;
        // Vehículo reclamado por un rider que no existe
        store.insert_with_id(Collection::Vehicles, "v-orphan", vehicle(json!("r-ghost"))).await;
        // Rider apuntando a un vehículo borrado
        store.insert_with_id(Collection::Riders, "r-dangling", rider("assigned", json!("v-gone"))).await;
        // Rider incoherente
        store.insert_with_id(Collection::Riders, "r-phantom", rider("unassigned", json!("v-ok"))).await;

        let shared: Arc<dyn DocumentStore> = Arc::new(store.clone());
        let sweep = ConsistencySweep::new(
            RiderRepository::new(shared.clone()),
            VehicleRepository::new(shared),
        );
        (store, sweep)
    }

    #[tokio::test]
    async fn test_sweep_repairs_broken_links() {
        let (store, sweep) = seeded().await;

        let report = sweep.run().await.unwrap();
        assert_eq!(
            report,
            ReconcileReport {
                vehicles_scanned: 2,
                riders_scanned: 3,
                vehicles_released: 1,
                riders_cleared: 2,
            }
        );

        let orphan = store.get(Collection::Vehicles, "v-orphan").await.unwrap().unwrap();
        assert_eq!(orphan["assignedTo"], Value::Null);
        let ok = store.get(Collection::Vehicles, "v-ok").await.unwrap().unwrap();
        assert_eq!(ok["assignedTo"], "r-ok");
        let dangling = store.get(Collection::Riders, "r-dangling").await.unwrap().unwrap();
        assert_eq!(dangling["assignmentStatus"], "unassigned");
        assert_eq!(dangling["assignedVehicleId"], Value::Null);
    }

    #[tokio::test]
    async fn test_second_sweep_is_noop() {
        let (_store, sweep) = seeded().await;
        sweep.run().await.unwrap();

        let report = sweep.run().await.unwrap();
        assert_eq!(report.vehicles_released, 0);
        assert_eq!(report.riders_cleared, 0);
    }

    #[tokio::test]
    async fn test_recent_claims_are_skipped() {
        let store = MemoryDocumentStore::new();
        store
            .insert_with_id(
                Collection::Vehicles,
                "v-1",
                fields([
                    ("licensePlate", json!("7654321")),
                    ("internalNumber", Value::Null),
                    ("manufacturer", json!("Honda")),
                    ("model", json!("PCX")),
                    ("year", Value::Null),
                    ("type", json!("scooter")),
                    ("status", json!("active")),
                    ("assignedTo", json!("r-pending")),
                    ("assignedAt", json!(Utc::now())),
                    ("currentKilometers", json!(0.0)),
                    ("createdAt", json!(Utc::now())),
                    ("updatedAt", json!(Utc::now())),
                    ("createdBy", Value::Null),
                    ("updatedBy", Value::Null),
                ]),
            )
            .await;

        let shared: Arc<dyn DocumentStore> = Arc::new(store);
        let sweep = ConsistencySweep::new(
            RiderRepository::new(shared.clone()),
            VehicleRepository::new(shared),
        );
        assert_eq!(sweep.run().await.unwrap().vehicles_released, 0);

        let report = sweep.with_grace(chrono::Duration::zero()).run().await.unwrap();
        assert_eq!(report.vehicles_released, 1);
    }
}
