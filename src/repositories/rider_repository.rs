use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};

use crate::database::{
    document_store::fields, Collection, ConditionalUpdate, Document, DocumentStore, FindQuery,
    SortOrder, StoreError, StoreResult,
};
use crate::models::rider::{
    AssignmentStatus, Rider, RiderStatus, ASSIGNED_VEHICLE_ID, ASSIGNMENT_STATUS, ID_NUMBER,
};

/// Rider todavía sin id; el store lo asigna al insertar
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRider {
    pub first_name: String,
    pub last_name: String,
    pub id_number: String,
    pub phone: String,
    pub email: Option<String>,
    pub rider_status: RiderStatus,
    pub assignment_status: AssignmentStatus,
    pub assigned_vehicle_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: Option<String>,
    pub updated_by: Option<String>,
}

#[derive(Clone)]
pub struct RiderRepository {
    store: Arc<dyn DocumentStore>,
}

impl RiderRepository {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub async fn create(&self, rider: &NewRider) -> StoreResult<Rider> {
        let document = match serde_json::to_value(rider)? {
            Value::Object(map) => map,
            _ => return Err(StoreError::Serialization("rider is not a JSON object".to_string())),
        };
        let stored = self.store.insert(Collection::Riders, document).await?;
        Rider::from_document(stored)
    }

    pub async fn find_by_id(&self, id: &str) -> StoreResult<Option<Rider>> {
        self.store
            .get(Collection::Riders, id)
            .await?
            .map(Rider::from_document)
            .transpose()
    }

    pub async fn find_by_id_number(&self, id_number: &str) -> StoreResult<Option<Rider>> {
        let query = FindQuery::new().filter(ID_NUMBER, id_number).limit(1);
        self.store
            .find(Collection::Riders, &query)
            .await?
            .into_iter()
            .next()
            .map(Rider::from_document)
            .transpose()
    }

    /// Deja al rider sin vehículo sólo si todavía apunta a `vehicle_id`
    pub async fn clear_assignment_if_points_to(
        &self,
        rider_id: &str,
        vehicle_id: &str,
        actor_id: &str,
    ) -> StoreResult<ConditionalUpdate> {
        let expected = fields([(ASSIGNED_VEHICLE_ID, json!(vehicle_id))]);
        self.store
            .update_if(
                Collection::Riders,
                rider_id,
                &expected,
                unassigned_changes(actor_id, Utc::now()),
            )
            .await
    }

    /// Fusiona campos sólo si la asignación del rider sigue siendo la de
    /// `snapshot`
    pub async fn update_fields_if_unchanged(
        &self,
        snapshot: &Rider,
        changes: Document,
    ) -> StoreResult<ConditionalUpdate> {
        self.store
            .update_if(
                Collection::Riders,
                &snapshot.id,
                &assignment_snapshot(snapshot),
                changes,
            )
            .await
    }

    /// Normaliza a `unassigned`/`null` un rider cuyos campos de asignación
    /// no han cambiado desde que se leyeron
    pub async fn clear_assignment_if_unchanged(
        &self,
        rider: &Rider,
        actor_id: &str,
    ) -> StoreResult<ConditionalUpdate> {
        self.update_fields_if_unchanged(rider, unassigned_changes(actor_id, Utc::now()))
            .await
    }

    /// Riders cuyo `assignedVehicleId` apunta a `vehicle_id`
    pub async fn find_pointing_to(&self, vehicle_id: &str) -> StoreResult<Vec<Rider>> {
        let query = FindQuery::new().filter(ASSIGNED_VEHICLE_ID, vehicle_id);
        self.store
            .find(Collection::Riders, &query)
            .await?
            .into_iter()
            .map(Rider::from_document)
            .collect()
    }

    pub async fn delete(&self, id: &str) -> StoreResult<bool> {
        self.store.delete(Collection::Riders, id).await
    }

    /// Página de riders ordenada por `createdAt` descendente, más el total
    pub async fn list(
        &self,
        filters: Vec<(String, Value)>,
        offset: usize,
        limit: usize,
    ) -> StoreResult<(Vec<Rider>, u64)> {
        let total = self.store.count(Collection::Riders, &filters).await?;
        let query = FindQuery {
            filters,
            order_by: Some(("createdAt".to_string(), SortOrder::Desc)),
            offset,
            limit: Some(limit),
        };
        let riders = self
            .store
            .find(Collection::Riders, &query)
            .await?
            .into_iter()
            .map(Rider::from_document)
            .collect::<StoreResult<Vec<_>>>()?;
        Ok((riders, total))
    }

    /// Lote de riders en orden de id, para barridos completos
    pub async fn scan(&self, offset: usize, limit: usize) -> StoreResult<Vec<Rider>> {
        let query = FindQuery::new()
            .order_by("id", SortOrder::Asc)
            .offset(offset)
            .limit(limit);
        self.store
            .find(Collection::Riders, &query)
            .await?
            .into_iter()
            .map(Rider::from_document)
            .collect()
    }
}

/// Precondición de CAS: la asignación tal como se leyó
fn assignment_snapshot(rider: &Rider) -> Document {
    fields([
        (ASSIGNMENT_STATUS, json!(rider.assignment_status.as_str())),
        (ASSIGNED_VEHICLE_ID, json!(rider.assigned_vehicle_id)),
    ])
}

/// Cambios que dejan a un rider en `unassigned` con referencia nula
pub fn unassigned_changes(actor_id: &str, now: DateTime<Utc>) -> Document {
    fields([
        (ASSIGNMENT_STATUS, json!(AssignmentStatus::Unassigned.as_str())),
        (ASSIGNED_VEHICLE_ID, Value::Null),
        ("updatedAt", json!(now)),
        ("updatedBy", json!(actor_id)),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MemoryDocumentStore;

    fn new_rider(id_number: &str) -> NewRider {
        let now = Utc::now();
        NewRider {
            first_name: "Dana".to_string(),
            last_name: "Cohen".to_string(),
            id_number: id_number.to_string(),
            phone: "050-1234567".to_string(),
            email: None,
            rider_status: RiderStatus::Active,
            assignment_status: AssignmentStatus::Unassigned,
            assigned_vehicle_id: None,
            created_at: now,
            updated_at: now,
            created_by: Some("admin".to_string()),
            updated_by: Some("admin".to_string()),
        }
    }

    #[tokio::test]
    async fn test_create_and_find_by_id_number() {
        let repo = RiderRepository::new(Arc::new(MemoryDocumentStore::new()));
        let created = repo.create(&new_rider("123456789")).await.unwrap();
        assert!(!created.id.is_empty());

        let found = repo.find_by_id_number("123456789").await.unwrap().unwrap();
        assert_eq!(found.id, created.id);
        assert!(repo.find_by_id_number("987654321").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_clear_assignment_only_when_pointing_to_vehicle() {
        let repo = RiderRepository::new(Arc::new(MemoryDocumentStore::new()));
        let mut rider = new_rider("123456789");
        rider.assignment_status = AssignmentStatus::Assigned;
        rider.assigned_vehicle_id = Some("veh-1".to_string());
        let created = repo.create(&rider).await.unwrap();

        let miss = repo
            .clear_assignment_if_points_to(&created.id, "veh-2", "admin")
            .await
            .unwrap();
        assert!(!miss.is_applied());

        let hit = repo
            .clear_assignment_if_points_to(&created.id, "veh-1", "admin")
            .await
            .unwrap();
        assert!(hit.is_applied());

        let reloaded = repo.find_by_id(&created.id).await.unwrap().unwrap();
        assert_eq!(reloaded.assignment_status, AssignmentStatus::Unassigned);
        assert_eq!(reloaded.assigned_vehicle_id, None);
    }

    #[tokio::test]
    async fn test_update_if_unchanged_rejects_stale_snapshot() {
        let repo = RiderRepository::new(Arc::new(MemoryDocumentStore::new()));
        let snapshot = repo.create(&new_rider("123456789")).await.unwrap();

        let first = repo
            .update_fields_if_unchanged(
                &snapshot,
                fields([
                    (ASSIGNMENT_STATUS, json!("assigned")),
                    (ASSIGNED_VEHICLE_ID, json!("veh-1")),
                ]),
            )
            .await
            .unwrap();
        assert!(first.is_applied());

        let second = repo
            .update_fields_if_unchanged(&snapshot, fields([("firstName", json!("Dina"))]))
            .await
            .unwrap();
        assert!(!second.is_applied());

        let reloaded = repo.find_by_id(&snapshot.id).await.unwrap().unwrap();
        assert_eq!(reloaded.first_name, "Dana");
        assert_eq!(reloaded.assigned_vehicle_id.as_deref(), Some("veh-1"));

        let pointing = repo.find_pointing_to("veh-1").await.unwrap();
        assert_eq!(pointing.len(), 1);
        assert!(repo.find_pointing_to("veh-2").await.unwrap().is_empty());
    }
}
