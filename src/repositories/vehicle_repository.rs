use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};

use crate::database::{
    document_store::fields, Collection, ConditionalUpdate, Document, DocumentStore, FindQuery,
    SortOrder, StoreError, StoreResult,
};
use crate::models::vehicle::{Vehicle, VehicleStatus, VehicleType, ASSIGNED_AT, ASSIGNED_TO, LICENSE_PLATE};

/// Vehículo todavía sin id
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewVehicle {
    pub license_plate: String,
    pub internal_number: Option<String>,
    pub manufacturer: String,
    pub model: String,
    pub year: Option<i32>,
    #[serde(rename = "type")]
    pub vehicle_type: VehicleType,
    pub status: VehicleStatus,
    pub assigned_to: Option<String>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub current_kilometers: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: Option<String>,
    pub updated_by: Option<String>,
}

#[derive(Clone)]
pub struct VehicleRepository {
    store: Arc<dyn DocumentStore>,
}

impl VehicleRepository {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub async fn create(&self, vehicle: &NewVehicle) -> StoreResult<Vehicle> {
        let document = match serde_json::to_value(vehicle)? {
            Value::Object(map) => map,
            _ => return Err(StoreError::Serialization("vehicle is not a JSON object".to_string())),
        };
        let stored = self.store.insert(Collection::Vehicles, document).await?;
        Vehicle::from_document(stored)
    }

    pub async fn find_by_id(&self, id: &str) -> StoreResult<Option<Vehicle>> {
        self.store
            .get(Collection::Vehicles, id)
            .await?
            .map(Vehicle::from_document)
            .transpose()
    }

    pub async fn find_by_license_plate(&self, license_plate: &str) -> StoreResult<Option<Vehicle>> {
        let query = FindQuery::new().filter(LICENSE_PLATE, license_plate).limit(1);
        self.store
            .find(Collection::Vehicles, &query)
            .await?
            .into_iter()
            .next()
            .map(Vehicle::from_document)
            .transpose()
    }

    /// Actualización de campos propios del vehículo. Los campos de
    /// asignación se descartan aquí aunque el llamador los incluya.
    pub async fn update_fields(&self, id: &str, mut changes: Document) -> StoreResult<Option<Vehicle>> {
        changes.remove(ASSIGNED_TO);
        changes.remove(ASSIGNED_AT);
        self.store
            .update(Collection::Vehicles, id, changes)
            .await?
            .map(Vehicle::from_document)
            .transpose()
    }

    /// CAS: asigna el vehículo a `rider_id` sólo si `assignedTo` sigue
    /// valiendo `expected_holder`
    pub async fn claim(
        &self,
        vehicle_id: &str,
        rider_id: &str,
        expected_holder: Option<&str>,
        actor_id: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<ConditionalUpdate> {
        let expected = fields([(ASSIGNED_TO, json!(expected_holder))]);
        let changes = fields([
            (ASSIGNED_TO, json!(rider_id)),
            (ASSIGNED_AT, json!(now)),
            ("updatedAt", json!(now)),
            ("updatedBy", json!(actor_id)),
        ]);
        self.store
            .update_if(Collection::Vehicles, vehicle_id, &expected, changes)
            .await
    }

    /// CAS: libera el vehículo sólo si todavía pertenece a `rider_id`
    pub async fn release(
        &self,
        vehicle_id: &str,
        rider_id: &str,
        actor_id: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<ConditionalUpdate> {
        let expected = fields([(ASSIGNED_TO, json!(rider_id))]);
        let changes = fields([
            (ASSIGNED_TO, Value::Null),
            (ASSIGNED_AT, Value::Null),
            ("updatedAt", json!(now)),
            ("updatedBy", json!(actor_id)),
        ]);
        self.store
            .update_if(Collection::Vehicles, vehicle_id, &expected, changes)
            .await
    }

    /// Borra el vehículo sólo si `assignedTo` sigue valiendo `expected_holder`
    pub async fn delete_if_held_by(
        &self,
        vehicle_id: &str,
        expected_holder: Option<&str>,
    ) -> StoreResult<ConditionalUpdate> {
        let expected = fields([(ASSIGNED_TO, json!(expected_holder))]);
        self.store
            .delete_if(Collection::Vehicles, vehicle_id, &expected)
            .await
    }

    pub async fn list(
        &self,
        filters: Vec<(String, Value)>,
        offset: usize,
        limit: usize,
    ) -> StoreResult<(Vec<Vehicle>, u64)> {
        let total = self.store.count(Collection::Vehicles, &filters).await?;
        let query = FindQuery {
            filters,
            order_by: Some(("createdAt".to_string(), SortOrder::Desc)),
            offset,
            limit: Some(limit),
        };
        let vehicles = self
            .store
            .find(Collection::Vehicles, &query)
            .await?
            .into_iter()
            .map(Vehicle::from_document)
            .collect::<StoreResult<Vec<_>>>()?;
        Ok((vehicles, total))
    }

    pub async fn scan(&self, offset: usize, limit: usize) -> StoreResult<Vec<Vehicle>> {
        let query = FindQuery::new()
            .order_by("id", SortOrder::Asc)
            .offset(offset)
            .limit(limit);
        self.store
            .find(Collection::Vehicles, &query)
            .await?
            .into_iter()
            .map(Vehicle::from_document)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MemoryDocumentStore;

    fn new_vehicle(plate: &str) -> NewVehicle {
        let now = Utc::now();
        NewVehicle {
            license_plate: plate.to_string(),
            internal_number: None,
            manufacturer: "Yamaha".to_string(),
            model: "NMAX".to_string(),
            year: Some(2022),
            vehicle_type: VehicleType::Scooter,
            status: VehicleStatus::WaitingForRider,
            assigned_to: None,
            assigned_at: None,
            current_kilometers: 0.0,
            created_at: now,
            updated_at: now,
            created_by: None,
            updated_by: None,
        }
    }

    #[tokio::test]
    async fn test_claim_then_release() {
        let repo = VehicleRepository::new(Arc::new(MemoryDocumentStore::new()));
        let vehicle = repo.create(&new_vehicle("1234567")).await.unwrap();
        let now = Utc::now();

        assert!(repo.claim(&vehicle.id, "r-1", None, "admin", now).await.unwrap().is_applied());
        // Un segundo claim esperando `null` ya no aplica
        assert!(!repo.claim(&vehicle.id, "r-2", None, "admin", now).await.unwrap().is_applied());
        // Liberar en nombre de otro rider no toca nada
        assert!(!repo.release(&vehicle.id, "r-2", "admin", now).await.unwrap().is_applied());

        assert!(repo.release(&vehicle.id, "r-1", "admin", now).await.unwrap().is_applied());
        let reloaded = repo.find_by_id(&vehicle.id).await.unwrap().unwrap();
        assert_eq!(reloaded.assigned_to, None);
        assert_eq!(reloaded.assigned_at, None);
    }

    #[tokio::test]
    async fn test_update_fields_strips_assignment() {
        let repo = VehicleRepository::new(Arc::new(MemoryDocumentStore::new()));
        let vehicle = repo.create(&new_vehicle("1234567")).await.unwrap();

        let changes = fields([
            ("model", json!("XMAX")),
            (ASSIGNED_TO, json!("r-9")),
            (ASSIGNED_AT, json!(Utc::now())),
        ]);
        let updated = repo.update_fields(&vehicle.id, changes).await.unwrap().unwrap();
        assert_eq!(updated.model, "XMAX");
        assert_eq!(updated.assigned_to, None);
    }
}
