//! Motor de consistencia de asignaciones Rider ↔ Vehículo
//!
//! La asignación se guarda dos veces: en el rider (`assignmentStatus`,
//! `assignedVehicleId`) y en el vehículo (`assignedTo`, `assignedAt`). No hay
//! transacciones entre documentos, así que cada cambio se ejecuta como una
//! secuencia ordenada de fases:
//!
//! 0. Preflight: se lee el vehículo pedido y se valida antes de escribir nada.
//! 1. Release: se libera el vehículo anterior (CAS sobre `assignedTo = rider`).
//! 2. Claim: se reclama el nuevo (CAS sobre el `assignedTo` observado).
//! 3. Persist: se escribe el rider con la asignación efectiva.
//!
//! Cada estado intermedio es válido por sí mismo salvo "vehículo reclamado
//! cuyo rider no llegó a persistirse", que se compensa aquí y que el barrido
//! de consistencia repara si la compensación también falla.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::database::{ConditionalUpdate, Document, StoreError};
use crate::models::rider::{AssignmentStatus, Rider, ASSIGNED_VEHICLE_ID, ASSIGNMENT_STATUS};
use crate::models::vehicle::{Vehicle, ASSIGNED_TO};
use crate::repositories::rider_repository::RiderRepository;
use crate::repositories::vehicle_repository::VehicleRepository;

#[derive(Debug, Error)]
pub enum AssignmentError {
    #[error("rider '{0}' not found")]
    RiderNotFound(String),

    #[error("vehicle '{0}' not found")]
    VehicleNotFound(String),

    #[error("vehicle '{vehicle_id}' is already assigned to rider '{holder_id}'")]
    VehicleAlreadyAssigned { vehicle_id: String, holder_id: String },

    #[error("{entity} '{id}' was modified concurrently")]
    ConcurrentUpdate { entity: &'static str, id: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Reintentos del borrado condicional de un vehículo
const DELETE_ATTEMPTS: usize = 3;

/// Qué hacer cuando el vehículo pedido no se puede reclamar
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimPolicy {
    /// Falla la operación completa sin escribir nada (actualización)
    Reject,
    /// Continúa con el rider sin asignar y deja un aviso (creación)
    Degrade,
}

/// Resultado visible de la asignación pedida
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentOutcome {
    /// No hubo cambio de asignación
    Unchanged,
    /// La asignación pedida quedó aplicada
    Honored,
    /// Se pidió un vehículo pero el rider quedó sin asignar
    Degraded,
    /// El rider quedó sin vehículo a petición del cliente
    Released,
}

/// Asignación deseada, ya normalizada
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredAssignment {
    pub status: AssignmentStatus,
    pub vehicle_id: Option<String>,
}

impl DesiredAssignment {
    /// Un id vacío, ausente o acompañado de `unassigned` se convierte en `None`;
    /// `assigned` sin id efectivo pasa a ser `unassigned`.
    pub fn normalize(status: AssignmentStatus, vehicle_id: Option<&str>) -> Self {
        let vehicle_id = match status {
            AssignmentStatus::Unassigned => None,
            AssignmentStatus::Assigned => vehicle_id
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(String::from),
        };
        let status = if vehicle_id.is_some() {
            AssignmentStatus::Assigned
        } else {
            AssignmentStatus::Unassigned
        };
        Self { status, vehicle_id }
    }

    /// La asignación que el rider ya tiene, tal cual está guardada
    pub fn keep(current: &Rider) -> Self {
        Self {
            status: current.assignment_status,
            vehicle_id: current.assigned_vehicle_id.clone(),
        }
    }

    pub fn unassigned() -> Self {
        Self {
            status: AssignmentStatus::Unassigned,
            vehicle_id: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AssignmentResult {
    pub rider: Rider,
    pub outcome: AssignmentOutcome,
    pub warnings: Vec<String>,
}

/// Vehículo validado en preflight, con el `assignedTo` observado para el CAS
struct ClaimTarget {
    vehicle_id: String,
    observed_holder: Option<String>,
}

#[derive(Clone)]
pub struct AssignmentEngine {
    riders: RiderRepository,
    vehicles: VehicleRepository,
}

impl AssignmentEngine {
    pub fn new(riders: RiderRepository, vehicles: VehicleRepository) -> Self {
        Self { riders, vehicles }
    }

    /// Lleva al rider `current` a la asignación `desired` y persiste además
    /// `rider_changes` (campos propios del rider) en la fase final.
    pub async fn apply(
        &self,
        current: &Rider,
        desired: DesiredAssignment,
        rider_changes: Document,
        actor_id: &str,
        policy: ClaimPolicy,
    ) -> Result<AssignmentResult, AssignmentError> {
        let rider_id = current.id.as_str();
        let now = Utc::now();

        let changed = current.assigned_vehicle_id != desired.vehicle_id
            || current.assignment_status != desired.status;

        if !changed {
            let rider = self.persist(current, &desired, rider_changes, actor_id, now).await?;
            return Ok(AssignmentResult {
                rider,
                outcome: AssignmentOutcome::Unchanged,
                warnings: Vec::new(),
            });
        }

        let mut effective = desired.clone();
        let mut warnings = Vec::new();

        // Fase 0: preflight
        let mut target = None;
        if let Some(vehicle_id) = desired.vehicle_id.as_deref() {
            match self.check_claimable(rider_id, vehicle_id).await {
                Ok(t) => target = Some(t),
                Err(rejection) => match policy {
                    ClaimPolicy::Reject => return Err(rejection),
                    ClaimPolicy::Degrade => {
                        warnings.push(degrade_warning(&rejection));
                        effective = DesiredAssignment::unassigned();
                    }
                },
            }
        }

        // Fase 1: release
        let old_vehicle = current.current_vehicle().map(String::from);
        let mut released = None;
        if let Some(old) = old_vehicle.as_deref() {
            if effective.vehicle_id.as_deref() != Some(old) {
                if self.release(old, rider_id, actor_id, now).await? {
                    released = Some(old.to_string());
                }
            } else {
                // Mismo vehículo: ya es nuestro, no hay nada que reclamar
                target = None;
            }
        }

        // Fase 2: claim
        let mut claimed = None;
        if let Some(target) = target {
            match self.claim(&target, rider_id, actor_id, now).await {
                Ok(()) => claimed = Some(target.vehicle_id),
                Err(AssignmentError::Store(e)) => {
                    self.restore_previous(released.as_deref(), rider_id, actor_id).await;
                    return Err(AssignmentError::Store(e));
                }
                Err(rejection) => match policy {
                    ClaimPolicy::Reject => {
                        self.restore_previous(released.as_deref(), rider_id, actor_id).await;
                        return Err(rejection);
                    }
                    ClaimPolicy::Degrade => {
                        warnings.push(degrade_warning(&rejection));
                        effective = DesiredAssignment::unassigned();
                    }
                },
            }
        }

        // Fase 3: persist
        let persisted = self.persist(current, &effective, rider_changes, actor_id, now).await;
        let mut rider = match persisted {
            Ok(rider) => rider,
            Err(err) => {
                if let Some(vehicle_id) = claimed.as_deref() {
                    self.undo_claim(vehicle_id, rider_id, actor_id).await;
                }
                match &err {
                    // Si el rider desapareció no hay a quién devolver el vehículo anterior
                    AssignmentError::RiderNotFound(_) => {}
                    // Otra escritura movió al rider: sólo se devuelve si aún apunta a él
                    AssignmentError::ConcurrentUpdate { .. } => {
                        if let Some(old) = released.as_deref() {
                            if self.rider_points_to(rider_id, old).await {
                                self.restore_previous(Some(old), rider_id, actor_id).await;
                            }
                        }
                    }
                    _ => self.restore_previous(released.as_deref(), rider_id, actor_id).await,
                }
                return Err(err);
            }
        };

        // El vehículo pudo borrarse entre el claim y el persist
        if let Some(vehicle_id) = claimed.as_deref() {
            if let Some(rejection) = self.lost_claim(vehicle_id, rider_id).await? {
                warn!("⚠️ Rider {} perdió el vehículo {} tras persistir: {}", rider_id, vehicle_id, rejection);
                rider = self.clear_lost_claim(&rider, vehicle_id, actor_id).await?;
                match policy {
                    ClaimPolicy::Reject => return Err(rejection),
                    ClaimPolicy::Degrade => {
                        warnings.push(degrade_warning(&rejection));
                        effective = DesiredAssignment::unassigned();
                    }
                }
            }
        }

        let outcome = if effective.vehicle_id.is_some() {
            AssignmentOutcome::Honored
        } else if desired.vehicle_id.is_some() {
            AssignmentOutcome::Degraded
        } else {
            AssignmentOutcome::Released
        };

        info!(
            "🔗 Rider {} asignación {:?} → {:?} ({:?})",
            rider_id, current.assigned_vehicle_id, rider.assigned_vehicle_id, outcome
        );

        Ok(AssignmentResult {
            rider,
            outcome,
            warnings,
        })
    }

    /// Antes de borrar un rider: libera su vehículo si todavía le pertenece
    pub async fn detach_rider(&self, rider: &Rider, actor_id: &str) -> Result<(), AssignmentError> {
        if let Some(vehicle_id) = rider.current_vehicle() {
            self.release(vehicle_id, &rider.id, actor_id, Utc::now()).await?;
        }
        Ok(())
    }

    /// Borra un vehículo dejando sin asignar al rider que lo tenga. El borrado
    /// es condicional al `assignedTo` leído; si alguien lo reclama entre
    /// medias se vuelve a leer y a desasignar.
    pub async fn delete_vehicle(&self, vehicle_id: &str, actor_id: &str) -> Result<Vehicle, AssignmentError> {
        for attempt in 1..=DELETE_ATTEMPTS {
            let vehicle = self
                .vehicles
                .find_by_id(vehicle_id)
                .await?
                .ok_or_else(|| AssignmentError::VehicleNotFound(vehicle_id.to_string()))?;

            self.detach_vehicle(&vehicle, actor_id).await?;

            match self
                .vehicles
                .delete_if_held_by(vehicle_id, vehicle.assigned_to.as_deref())
                .await?
            {
                ConditionalUpdate::Applied(_) => {
                    self.clear_riders_pointing_to(vehicle_id, actor_id).await?;
                    return Ok(vehicle);
                }
                ConditionalUpdate::PreconditionFailed(_) => warn!(
                    "⚠️ Vehículo {} reasignado durante el borrado (intento {}/{})",
                    vehicle_id, attempt, DELETE_ATTEMPTS
                ),
                ConditionalUpdate::Missing => {
                    return Err(AssignmentError::VehicleNotFound(vehicle_id.to_string()))
                }
            }
        }

        Err(AssignmentError::ConcurrentUpdate {
            entity: "vehicle",
            id: vehicle_id.to_string(),
        })
    }

    /// Deja sin asignar al rider que tenga el vehículo
    async fn detach_vehicle(&self, vehicle: &Vehicle, actor_id: &str) -> Result<(), AssignmentError> {
        let Some(rider_id) = vehicle.assigned_to.as_deref() else {
            return Ok(());
        };

        match self
            .riders
            .clear_assignment_if_points_to(rider_id, &vehicle.id, actor_id)
            .await?
        {
            ConditionalUpdate::Applied(_) => {
                info!("🔓 Rider {} liberado del vehículo {} antes de borrarlo", rider_id, vehicle.id)
            }
            ConditionalUpdate::PreconditionFailed(_) | ConditionalUpdate::Missing => {
                debug!("Rider {} ya no apuntaba al vehículo {}", rider_id, vehicle.id)
            }
        }
        Ok(())
    }

    /// Riders que apunten a un vehículo ya borrado (su persist llegó tarde)
    async fn clear_riders_pointing_to(&self, vehicle_id: &str, actor_id: &str) -> Result<(), AssignmentError> {
        for rider in self.riders.find_pointing_to(vehicle_id).await? {
            let cleared = self
                .riders
                .clear_assignment_if_points_to(&rider.id, vehicle_id, actor_id)
                .await?;
            if cleared.is_applied() {
                warn!("⚠️ Rider {} apuntaba al vehículo borrado {}: queda sin asignar", rider.id, vehicle_id);
            }
        }
        Ok(())
    }

    async fn check_claimable(&self, rider_id: &str, vehicle_id: &str) -> Result<ClaimTarget, AssignmentError> {
        let vehicle = self
            .vehicles
            .find_by_id(vehicle_id)
            .await?
            .ok_or_else(|| AssignmentError::VehicleNotFound(vehicle_id.to_string()))?;

        match vehicle.assigned_to {
            Some(holder) if holder != rider_id => Err(AssignmentError::VehicleAlreadyAssigned {
                vehicle_id: vehicle_id.to_string(),
                holder_id: holder,
            }),
            observed_holder => Ok(ClaimTarget {
                vehicle_id: vehicle_id.to_string(),
                observed_holder,
            }),
        }
    }

    /// Devuelve `true` si el vehículo estaba asignado al rider y se liberó.
    /// Un vehículo inexistente o que ya no es del rider es un no-op.
    async fn release(
        &self,
        vehicle_id: &str,
        rider_id: &str,
        actor_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, AssignmentError> {
        match self.vehicles.release(vehicle_id, rider_id, actor_id, now).await? {
            ConditionalUpdate::Applied(_) => {
                debug!("🔓 Vehículo {} liberado del rider {}", vehicle_id, rider_id);
                Ok(true)
            }
            ConditionalUpdate::PreconditionFailed(doc) => {
                let holder = doc.get(ASSIGNED_TO).cloned().unwrap_or_default();
                debug!(
                    "Vehículo {} no pertenece al rider {} (assignedTo = {}), nada que liberar",
                    vehicle_id, rider_id, holder
                );
                Ok(false)
            }
            ConditionalUpdate::Missing => {
                debug!("Vehículo {} ya no existe, nada que liberar", vehicle_id);
                Ok(false)
            }
        }
    }

    async fn claim(
        &self,
        target: &ClaimTarget,
        rider_id: &str,
        actor_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), AssignmentError> {
        let result = self
            .vehicles
            .claim(
                &target.vehicle_id,
                rider_id,
                target.observed_holder.as_deref(),
                actor_id,
                now,
            )
            .await?;

        match result {
            ConditionalUpdate::Applied(_) => {
                debug!("🔒 Vehículo {} reclamado por rider {}", target.vehicle_id, rider_id);
                Ok(())
            }
            ConditionalUpdate::PreconditionFailed(doc) => {
                let holder_id = doc
                    .get(ASSIGNED_TO)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                warn!(
                    "⚠️ Carrera al reclamar vehículo {}: ahora pertenece a '{}'",
                    target.vehicle_id, holder_id
                );
                Err(AssignmentError::VehicleAlreadyAssigned {
                    vehicle_id: target.vehicle_id.clone(),
                    holder_id,
                })
            }
            ConditionalUpdate::Missing => {
                warn!("⚠️ Vehículo {} borrado durante la asignación", target.vehicle_id);
                Err(AssignmentError::VehicleNotFound(target.vehicle_id.clone()))
            }
        }
    }

    /// Escribe el rider sólo si su asignación sigue siendo la de `current`
    async fn persist(
        &self,
        current: &Rider,
        assignment: &DesiredAssignment,
        mut changes: Document,
        actor_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Rider, AssignmentError> {
        changes.insert(ASSIGNMENT_STATUS.to_string(), json!(assignment.status.as_str()));
        changes.insert(ASSIGNED_VEHICLE_ID.to_string(), json!(assignment.vehicle_id));
        changes.insert("updatedAt".to_string(), json!(now));
        changes.insert("updatedBy".to_string(), json!(actor_id));

        match self.riders.update_fields_if_unchanged(current, changes).await? {
            ConditionalUpdate::Applied(doc) => Ok(Rider::from_document(doc)?),
            ConditionalUpdate::PreconditionFailed(doc) => {
                warn!(
                    "⚠️ Rider {} cambió de asignación durante la operación (ahora {:?})",
                    current.id,
                    doc.get(ASSIGNED_VEHICLE_ID).and_then(serde_json::Value::as_str)
                );
                Err(AssignmentError::ConcurrentUpdate {
                    entity: "rider",
                    id: current.id.clone(),
                })
            }
            ConditionalUpdate::Missing => Err(AssignmentError::RiderNotFound(current.id.clone())),
        }
    }

    /// `Some` si el vehículo reclamado ya no pertenece al rider
    async fn lost_claim(&self, vehicle_id: &str, rider_id: &str) -> Result<Option<AssignmentError>, AssignmentError> {
        let lost = match self.vehicles.find_by_id(vehicle_id).await? {
            None => Some(AssignmentError::VehicleNotFound(vehicle_id.to_string())),
            Some(vehicle) => match vehicle.assigned_to {
                Some(holder) if holder == rider_id => None,
                holder => Some(AssignmentError::VehicleAlreadyAssigned {
                    vehicle_id: vehicle_id.to_string(),
                    holder_id: holder.unwrap_or_default(),
                }),
            },
        };
        Ok(lost)
    }

    /// Deja al rider sin asignar si todavía apunta al vehículo perdido
    async fn clear_lost_claim(&self, rider: &Rider, vehicle_id: &str, actor_id: &str) -> Result<Rider, AssignmentError> {
        match self
            .riders
            .clear_assignment_if_points_to(&rider.id, vehicle_id, actor_id)
            .await?
        {
            ConditionalUpdate::Applied(doc) | ConditionalUpdate::PreconditionFailed(doc) => {
                Ok(Rider::from_document(doc)?)
            }
            ConditionalUpdate::Missing => Err(AssignmentError::RiderNotFound(rider.id.clone())),
        }
    }

    async fn rider_points_to(&self, rider_id: &str, vehicle_id: &str) -> bool {
        match self.riders.find_by_id(rider_id).await {
            Ok(Some(rider)) => rider.current_vehicle() == Some(vehicle_id),
            Ok(None) => false,
            Err(e) => {
                error!("❌ No se pudo releer el rider {}: {}", rider_id, e);
                false
            }
        }
    }

    /// Compensación: devuelve el vehículo anterior al rider tras liberarlo
    async fn restore_previous(&self, released: Option<&str>, rider_id: &str, actor_id: &str) {
        let Some(vehicle_id) = released else {
            return;
        };
        match self.vehicles.claim(vehicle_id, rider_id, None, actor_id, Utc::now()).await {
            Ok(ConditionalUpdate::Applied(_)) => {
                info!("↩️ Vehículo {} devuelto al rider {}", vehicle_id, rider_id)
            }
            Ok(_) => error!(
                "❌ No se pudo devolver el vehículo {} al rider {}: fue reclamado o borrado",
                vehicle_id, rider_id
            ),
            Err(e) => error!(
                "❌ Error devolviendo el vehículo {} al rider {}: {}",
                vehicle_id, rider_id, e
            ),
        }
    }

    /// Compensación: suelta el vehículo recién reclamado
    async fn undo_claim(&self, vehicle_id: &str, rider_id: &str, actor_id: &str) {
        match self.vehicles.release(vehicle_id, rider_id, actor_id, Utc::now()).await {
            Ok(ConditionalUpdate::Applied(_)) => {
                info!("↩️ Claim del vehículo {} deshecho para rider {}", vehicle_id, rider_id)
            }
            Ok(_) => debug!("Vehículo {} ya no pertenecía al rider {}", vehicle_id, rider_id),
            Err(e) => error!(
                "❌ Error deshaciendo el claim del vehículo {} (rider {}): {}",
                vehicle_id, rider_id, e
            ),
        }
    }
}

fn degrade_warning(rejection: &AssignmentError) -> String {
    match rejection {
        AssignmentError::VehicleNotFound(id) => format!(
            "Vehículo '{}' no encontrado: el rider quedó sin asignar",
            id
        ),
        AssignmentError::VehicleAlreadyAssigned { vehicle_id, .. } => format!(
            "El vehículo '{}' ya está asignado a otro rider: el rider quedó sin asignar",
            vehicle_id
        ),
        other => format!("No se pudo asignar el vehículo: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use crate::database::{
        document_store::fields, Collection, DocumentStore, FindQuery, MemoryDocumentStore,
        StoreResult,
    };
    use crate::models::rider::RiderStatus;
    use crate::models::vehicle::{VehicleStatus, VehicleType};
    use crate::repositories::rider_repository::NewRider;
    use crate::repositories::vehicle_repository::NewVehicle;

    /// Store que puede fallar las escrituras sobre riders a demanda e
    /// intercalar escrituras ajenas justo antes de ciertas operaciones
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryDocumentStore,
        fail_rider_updates: AtomicBool,
        /// Rider que se queda el vehículo justo antes del próximo claim
        steal_before_claim: Mutex<Option<String>>,
        /// Rider que reclama el vehículo justo antes del próximo borrado
        claim_before_delete: Mutex<Option<String>>,
        /// Vehículo que se borra justo antes de la próxima escritura de rider
        delete_before_persist: Mutex<Option<String>>,
    }

    impl FlakyStore {
        fn take(slot: &Mutex<Option<String>>) -> Option<String> {
            slot.lock().unwrap().take()
        }
    }

    #[async_trait]
    impl DocumentStore for FlakyStore {
        async fn insert(&self, collection: Collection, document: Document) -> StoreResult<Document> {
            self.inner.insert(collection, document).await
        }

        async fn get(&self, collection: Collection, id: &str) -> StoreResult<Option<Document>> {
            self.inner.get(collection, id).await
        }

        async fn update(&self, collection: Collection, id: &str, changes: Document) -> StoreResult<Option<Document>> {
            if collection == Collection::Riders && self.fail_rider_updates.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("connection reset".to_string()));
            }
            self.inner.update(collection, id, changes).await
        }

        async fn update_if(
            &self,
            collection: Collection,
            id: &str,
            expected: &Document,
            changes: Document,
        ) -> StoreResult<ConditionalUpdate> {
            match collection {
                Collection::Riders => {
                    if self.fail_rider_updates.load(Ordering::SeqCst) {
                        return Err(StoreError::Unavailable("connection reset".to_string()));
                    }
                    if let Some(vehicle_id) = Self::take(&self.delete_before_persist) {
                        self.inner.delete(Collection::Vehicles, &vehicle_id).await?;
                    }
                }
                Collection::Vehicles => {
                    let is_claim = changes.get(ASSIGNED_TO).map_or(false, Value::is_string);
                    if is_claim {
                        if let Some(thief) = Self::take(&self.steal_before_claim) {
                            self.inner
                                .update(Collection::Vehicles, id, fields([(ASSIGNED_TO, json!(thief))]))
                                .await?;
                        }
                    }
                }
            }
            self.inner.update_if(collection, id, expected, changes).await
        }

        async fn delete(&self, collection: Collection, id: &str) -> StoreResult<bool> {
            self.inner.delete(collection, id).await
        }

        async fn delete_if(
            &self,
            collection: Collection,
            id: &str,
            expected: &Document,
        ) -> StoreResult<ConditionalUpdate> {
            if collection == Collection::Vehicles {
                if let Some(rider_id) = Self::take(&self.claim_before_delete) {
                    self.inner
                        .update(Collection::Vehicles, id, fields([(ASSIGNED_TO, json!(rider_id))]))
                        .await?;
                    self.inner
                        .update(
                            Collection::Riders,
                            &rider_id,
                            fields([(ASSIGNMENT_STATUS, json!("assigned")), (ASSIGNED_VEHICLE_ID, json!(id))]),
                        )
                        .await?;
                }
            }
            self.inner.delete_if(collection, id, expected).await
        }

        async fn find(&self, collection: Collection, query: &FindQuery) -> StoreResult<Vec<Document>> {
            self.inner.find(collection, query).await
        }

        async fn count(&self, collection: Collection, filters: &[(String, Value)]) -> StoreResult<u64> {
            self.inner.count(collection, filters).await
        }

        async fn health_check(&self) -> StoreResult<()> {
            Ok(())
        }
    }

    struct Fixture {
        store: Arc<FlakyStore>,
        riders: RiderRepository,
        vehicles: VehicleRepository,
        engine: AssignmentEngine,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(FlakyStore::default());
        let dyn_store: Arc<dyn DocumentStore> = store.clone();
        let riders = RiderRepository::new(dyn_store.clone());
        let vehicles = VehicleRepository::new(dyn_store);
        let engine = AssignmentEngine::new(riders.clone(), vehicles.clone());
        Fixture {
            store,
            riders,
            vehicles,
            engine,
        }
    }

    impl Fixture {
        async fn rider(&self, id_number: &str) -> Rider {
            let now = Utc::now();
            self.riders
                .create(&NewRider {
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
                    created_by: None,
                    updated_by: None,
                })
                .await
                .unwrap()
        }

        async fn vehicle(&self, plate: &str) -> Vehicle {
            let now = Utc::now();
            self.vehicles
                .create(&NewVehicle {
                    license_plate: plate.to_string(),
                    internal_number: None,
                    manufacturer: "Honda".to_string(),
                    model: "PCX".to_string(),
                    year: Some(2023),
                    vehicle_type: VehicleType::Scooter,
                    status: VehicleStatus::WaitingForRider,
                    assigned_to: None,
                    assigned_at: None,
                    current_kilometers: 0.0,
                    created_at: now,
                    updated_at: now,
                    created_by: None,
                    updated_by: None,
                })
                .await
                .unwrap()
        }

        async fn assign(&self, rider: &Rider, vehicle_id: &str, policy: ClaimPolicy) -> Result<AssignmentResult, AssignmentError> {
            self.engine
                .apply(
                    rider,
                    DesiredAssignment::normalize(AssignmentStatus::Assigned, Some(vehicle_id)),
                    Document::new(),
                    "admin",
                    policy,
                )
                .await
        }

        async fn reload_rider(&self, id: &str) -> Rider {
            self.riders.find_by_id(id).await.unwrap().unwrap()
        }

        async fn reload_vehicle(&self, id: &str) -> Vehicle {
            self.vehicles.find_by_id(id).await.unwrap().unwrap()
        }
    }

    #[test]
    fn test_normalize_unassigned_drops_vehicle_id() {
        for id in [None, Some(""), Some("   "), Some("veh-1")] {
            let desired = DesiredAssignment::normalize(AssignmentStatus::Unassigned, id);
            assert_eq!(desired, DesiredAssignment::unassigned());
        }
    }

    #[test]
    fn test_normalize_assigned_without_id_becomes_unassigned() {
        assert_eq!(
            DesiredAssignment::normalize(AssignmentStatus::Assigned, Some("")),
            DesiredAssignment::unassigned()
        );
        assert_eq!(
            DesiredAssignment::normalize(AssignmentStatus::Assigned, Some(" veh-1 ")).vehicle_id,
            Some("veh-1".to_string())
        );
    }

    #[tokio::test]
    async fn test_assign_then_unassign_round_trip() {
        let f = fixture();
        let rider = f.rider("123456789").await;
        let vehicle = f.vehicle("1234567").await;

        let assigned = f.assign(&rider, &vehicle.id, ClaimPolicy::Reject).await.unwrap();
        assert_eq!(assigned.outcome, AssignmentOutcome::Honored);
        assert_eq!(assigned.rider.assigned_vehicle_id.as_deref(), Some(vehicle.id.as_str()));
        let claimed = f.reload_vehicle(&vehicle.id).await;
        assert_eq!(claimed.assigned_to.as_deref(), Some(rider.id.as_str()));
        assert!(claimed.assigned_at.is_some());

        let released = f
            .engine
            .apply(&assigned.rider, DesiredAssignment::unassigned(), Document::new(), "admin", ClaimPolicy::Reject)
            .await
            .unwrap();
        assert_eq!(released.outcome, AssignmentOutcome::Released);
        assert_eq!(released.rider.assignment_status, AssignmentStatus::Unassigned);
        assert_eq!(released.rider.assigned_vehicle_id, None);

        let vehicle = f.reload_vehicle(&vehicle.id).await;
        assert_eq!(vehicle.assigned_to, None);
        assert_eq!(vehicle.assigned_at, None);
    }

    #[tokio::test]
    async fn test_reassign_releases_previous_vehicle() {
        let f = fixture();
        let rider = f.rider("123456789").await;
        let veh1 = f.vehicle("1111111").await;
        let veh2 = f.vehicle("2222222").await;

        let first = f.assign(&rider, &veh1.id, ClaimPolicy::Reject).await.unwrap();
        let second = f.assign(&first.rider, &veh2.id, ClaimPolicy::Reject).await.unwrap();

        assert_eq!(second.rider.assigned_vehicle_id.as_deref(), Some(veh2.id.as_str()));
        assert_eq!(f.reload_vehicle(&veh1.id).await.assigned_to, None);
        assert_eq!(f.reload_vehicle(&veh2.id).await.assigned_to.as_deref(), Some(rider.id.as_str()));
    }

    #[tokio::test]
    async fn test_unchanged_assignment_skips_vehicle_writes() {
        let f = fixture();
        let rider = f.rider("123456789").await;
        let vehicle = f.vehicle("1234567").await;
        let assigned = f.assign(&rider, &vehicle.id, ClaimPolicy::Reject).await.unwrap();
        let assigned_at = f.reload_vehicle(&vehicle.id).await.assigned_at;

        let again = f
            .engine
            .apply(
                &assigned.rider,
                DesiredAssignment::normalize(AssignmentStatus::Assigned, Some(&vehicle.id)),
                fields([("phone", json!("052-7654321"))]),
                "admin",
                ClaimPolicy::Reject,
            )
            .await
            .unwrap();

        assert_eq!(again.outcome, AssignmentOutcome::Unchanged);
        assert_eq!(again.rider.phone, "052-7654321");
        assert_eq!(f.reload_vehicle(&vehicle.id).await.assigned_at, assigned_at);
    }

    #[tokio::test]
    async fn test_missing_vehicle_rejected_without_writes() {
        let f = fixture();
        let rider = f.rider("123456789").await;
        let veh1 = f.vehicle("1111111").await;
        let assigned = f.assign(&rider, &veh1.id, ClaimPolicy::Reject).await.unwrap();

        let err = f.assign(&assigned.rider, "veh-404", ClaimPolicy::Reject).await.unwrap_err();
        assert!(matches!(err, AssignmentError::VehicleNotFound(id) if id == "veh-404"));

        // El vehículo anterior no se liberó
        assert_eq!(f.reload_vehicle(&veh1.id).await.assigned_to.as_deref(), Some(rider.id.as_str()));
        assert_eq!(f.reload_rider(&rider.id).await.assigned_vehicle_id.as_deref(), Some(veh1.id.as_str()));
    }

    #[tokio::test]
    async fn test_missing_vehicle_degrades_with_warning() {
        let f = fixture();
        let rider = f.rider("123456789").await;

        let result = f.assign(&rider, "veh-42", ClaimPolicy::Degrade).await.unwrap();
        assert_eq!(result.outcome, AssignmentOutcome::Degraded);
        assert_eq!(result.rider.assignment_status, AssignmentStatus::Unassigned);
        assert_eq!(result.rider.assigned_vehicle_id, None);
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("veh-42"));
    }

    #[tokio::test]
    async fn test_conflict_leaves_holder_untouched() {
        let f = fixture();
        let holder = f.rider("111111111").await;
        let other = f.rider("222222222").await;
        let vehicle = f.vehicle("1234567").await;
        let held = f.assign(&holder, &vehicle.id, ClaimPolicy::Reject).await.unwrap();

        let err = f.assign(&other, &vehicle.id, ClaimPolicy::Reject).await.unwrap_err();
        assert!(matches!(err, AssignmentError::VehicleAlreadyAssigned { ref holder_id, .. } if *holder_id == holder.id));

        assert_eq!(f.reload_vehicle(&vehicle.id).await.assigned_to.as_deref(), Some(holder.id.as_str()));
        assert_eq!(f.reload_rider(&holder.id).await, held.rider);
        assert_eq!(f.reload_rider(&other.id).await.assignment_status, AssignmentStatus::Unassigned);
    }

    #[tokio::test]
    async fn test_concurrent_claims_have_single_winner() {
        let f = fixture();
        let a = f.rider("111111111").await;
        let b = f.rider("222222222").await;
        let vehicle = f.vehicle("1234567").await;

        let (ra, rb) = tokio::join!(
            f.assign(&a, &vehicle.id, ClaimPolicy::Reject),
            f.assign(&b, &vehicle.id, ClaimPolicy::Reject)
        );
        assert_eq!(ra.is_ok() as u8 + rb.is_ok() as u8, 1);

        let winner = if ra.is_ok() { &a } else { &b };
        let loser = if ra.is_ok() { &b } else { &a };
        assert_eq!(f.reload_vehicle(&vehicle.id).await.assigned_to.as_deref(), Some(winner.id.as_str()));
        assert_eq!(f.reload_rider(&loser.id).await.assigned_vehicle_id, None);
    }

    #[tokio::test]
    async fn test_release_of_unowned_vehicle_is_noop() {
        let f = fixture();
        let rider = f.rider("123456789").await;
        let vehicle = f.vehicle("1234567").await;

        let released = f.engine.release(&vehicle.id, &rider.id, "admin", Utc::now()).await.unwrap();
        assert!(!released);
        let released = f.engine.release("veh-404", &rider.id, "admin", Utc::now()).await.unwrap();
        assert!(!released);
        assert_eq!(f.reload_vehicle(&vehicle.id).await.assigned_to, None);
    }

    #[tokio::test]
    async fn test_persist_failure_compensates_both_vehicles() {
        let f = fixture();
        let rider = f.rider("123456789").await;
        let veh1 = f.vehicle("1111111").await;
        let veh2 = f.vehicle("2222222").await;
        let assigned = f.assign(&rider, &veh1.id, ClaimPolicy::Reject).await.unwrap();

        f.store.fail_rider_updates.store(true, Ordering::SeqCst);
        let err = f.assign(&assigned.rider, &veh2.id, ClaimPolicy::Reject).await.unwrap_err();
        assert!(matches!(err, AssignmentError::Store(_)));

        // Vuelta al estado previo en ambos vehículos
        assert_eq!(f.reload_vehicle(&veh1.id).await.assigned_to.as_deref(), Some(rider.id.as_str()));
        assert_eq!(f.reload_vehicle(&veh2.id).await.assigned_to, None);
        assert_eq!(f.reload_rider(&rider.id).await.assigned_vehicle_id.as_deref(), Some(veh1.id.as_str()));
    }

    #[tokio::test]
    async fn test_deleted_rider_does_not_keep_claim() {
        let f = fixture();
        let rider = f.rider("123456789").await;
        let vehicle = f.vehicle("1234567").await;
        f.riders.delete(&rider.id).await.unwrap();

        let err = f.assign(&rider, &vehicle.id, ClaimPolicy::Reject).await.unwrap_err();
        assert!(matches!(err, AssignmentError::RiderNotFound(_)));
        assert_eq!(f.reload_vehicle(&vehicle.id).await.assigned_to, None);
    }

    #[tokio::test]
    async fn test_delete_vehicle_clears_rider() {
        let f = fixture();
        let rider = f.rider("123456789").await;
        let vehicle = f.vehicle("1234567").await;
        f.assign(&rider, &vehicle.id, ClaimPolicy::Reject).await.unwrap();

        let deleted = f.engine.delete_vehicle(&vehicle.id, "admin").await.unwrap();
        assert_eq!(deleted.assigned_to.as_deref(), Some(rider.id.as_str()));
        assert!(f.vehicles.find_by_id(&vehicle.id).await.unwrap().is_none());

        let rider = f.reload_rider(&rider.id).await;
        assert_eq!(rider.assignment_status, AssignmentStatus::Unassigned);
        assert_eq!(rider.assigned_vehicle_id, None);

        let err = f.engine.delete_vehicle(&vehicle.id, "admin").await.unwrap_err();
        assert!(matches!(err, AssignmentError::VehicleNotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_vehicle_retries_after_claim_between_read_and_delete() {
        let f = fixture();
        let rider = f.rider("123456789").await;
        let vehicle = f.vehicle("1234567").await;

        *f.store.claim_before_delete.lock().unwrap() = Some(rider.id.clone());
        f.engine.delete_vehicle(&vehicle.id, "admin").await.unwrap();

        assert!(f.vehicles.find_by_id(&vehicle.id).await.unwrap().is_none());
        let rider = f.reload_rider(&rider.id).await;
        assert_eq!(rider.assignment_status, AssignmentStatus::Unassigned);
        assert_eq!(rider.assigned_vehicle_id, None);
    }

    #[tokio::test]
    async fn test_stale_snapshot_cannot_claim_a_second_vehicle() {
        let f = fixture();
        let snapshot = f.rider("123456789").await;
        let veh2 = f.vehicle("2222222").await;
        let veh3 = f.vehicle("3333333").await;

        let first = f.assign(&snapshot, &veh2.id, ClaimPolicy::Reject).await.unwrap();
        assert_eq!(first.outcome, AssignmentOutcome::Honored);

        let err = f.assign(&snapshot, &veh3.id, ClaimPolicy::Reject).await.unwrap_err();
        assert!(matches!(err, AssignmentError::ConcurrentUpdate { entity: "rider", .. }));

        assert_eq!(f.reload_vehicle(&veh2.id).await.assigned_to.as_deref(), Some(snapshot.id.as_str()));
        assert_eq!(f.reload_vehicle(&veh3.id).await.assigned_to, None);
        assert_eq!(f.reload_rider(&snapshot.id).await.assigned_vehicle_id.as_deref(), Some(veh2.id.as_str()));
    }

    #[tokio::test]
    async fn test_stale_snapshot_does_not_restore_vehicle_rider_moved_away_from() {
        let f = fixture();
        let rider = f.rider("123456789").await;
        let veh1 = f.vehicle("1111111").await;
        let veh2 = f.vehicle("2222222").await;
        let veh3 = f.vehicle("3333333").await;
        let snapshot = f.assign(&rider, &veh1.id, ClaimPolicy::Reject).await.unwrap().rider;

        // Otra petición mueve al rider a veh2 con el mismo snapshot
        f.assign(&snapshot, &veh2.id, ClaimPolicy::Reject).await.unwrap();

        let err = f.assign(&snapshot, &veh3.id, ClaimPolicy::Reject).await.unwrap_err();
        assert!(matches!(err, AssignmentError::ConcurrentUpdate { .. }));

        assert_eq!(f.reload_vehicle(&veh1.id).await.assigned_to, None);
        assert_eq!(f.reload_vehicle(&veh2.id).await.assigned_to.as_deref(), Some(rider.id.as_str()));
        assert_eq!(f.reload_vehicle(&veh3.id).await.assigned_to, None);
    }

    #[tokio::test]
    async fn test_stale_snapshot_on_unchanged_assignment_conflicts() {
        let f = fixture();
        let snapshot = f.rider("123456789").await;
        let vehicle = f.vehicle("1234567").await;
        f.assign(&snapshot, &vehicle.id, ClaimPolicy::Reject).await.unwrap();

        let err = f
            .engine
            .apply(
                &snapshot,
                DesiredAssignment::keep(&snapshot),
                fields([("phone", json!("052-7654321"))]),
                "admin",
                ClaimPolicy::Reject,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AssignmentError::ConcurrentUpdate { .. }));

        let reloaded = f.reload_rider(&snapshot.id).await;
        assert_eq!(reloaded.phone, "050-1234567");
        assert_eq!(reloaded.assigned_vehicle_id.as_deref(), Some(vehicle.id.as_str()));
    }

    #[tokio::test]
    async fn test_lost_claim_race_under_reject_restores_previous_vehicle() {
        let f = fixture();
        let rider = f.rider("123456789").await;
        let veh1 = f.vehicle("1111111").await;
        let veh2 = f.vehicle("2222222").await;
        let assigned = f.assign(&rider, &veh1.id, ClaimPolicy::Reject).await.unwrap();

        *f.store.steal_before_claim.lock().unwrap() = Some("r-thief".to_string());
        let err = f.assign(&assigned.rider, &veh2.id, ClaimPolicy::Reject).await.unwrap_err();
        assert!(matches!(err, AssignmentError::VehicleAlreadyAssigned { ref holder_id, .. } if holder_id == "r-thief"));

        assert_eq!(f.reload_vehicle(&veh1.id).await.assigned_to.as_deref(), Some(rider.id.as_str()));
        assert_eq!(f.reload_vehicle(&veh2.id).await.assigned_to.as_deref(), Some("r-thief"));
        assert_eq!(f.reload_rider(&rider.id).await.assigned_vehicle_id.as_deref(), Some(veh1.id.as_str()));
    }

    #[tokio::test]
    async fn test_lost_claim_race_under_degrade_leaves_rider_unassigned() {
        let f = fixture();
        let rider = f.rider("123456789").await;
        let veh1 = f.vehicle("1111111").await;
        let veh2 = f.vehicle("2222222").await;
        let assigned = f.assign(&rider, &veh1.id, ClaimPolicy::Reject).await.unwrap();

        *f.store.steal_before_claim.lock().unwrap() = Some("r-thief".to_string());
        let result = f.assign(&assigned.rider, &veh2.id, ClaimPolicy::Degrade).await.unwrap();

        assert_eq!(result.outcome, AssignmentOutcome::Degraded);
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.rider.assignment_status, AssignmentStatus::Unassigned);
        assert_eq!(result.rider.assigned_vehicle_id, None);
        // El anterior queda libre: el rider ya no apunta a él
        assert_eq!(f.reload_vehicle(&veh1.id).await.assigned_to, None);
        assert_eq!(f.reload_vehicle(&veh2.id).await.assigned_to.as_deref(), Some("r-thief"));
    }

    #[tokio::test]
    async fn test_vehicle_deleted_before_persist_is_not_kept() {
        let f = fixture();
        let rider = f.rider("123456789").await;
        let vehicle = f.vehicle("1234567").await;

        *f.store.delete_before_persist.lock().unwrap() = Some(vehicle.id.clone());
        let err = f.assign(&rider, &vehicle.id, ClaimPolicy::Reject).await.unwrap_err();
        assert!(matches!(err, AssignmentError::VehicleNotFound(_)));

        let reloaded = f.reload_rider(&rider.id).await;
        assert_eq!(reloaded.assignment_status, AssignmentStatus::Unassigned);
        assert_eq!(reloaded.assigned_vehicle_id, None);
    }

    #[tokio::test]
    async fn test_detach_rider_releases_vehicle() {
        let f = fixture();
        let rider = f.rider("123456789").await;
        let vehicle = f.vehicle("1234567").await;
        let assigned = f.assign(&rider, &vehicle.id, ClaimPolicy::Reject).await.unwrap();

        f.engine.detach_rider(&assigned.rider, "admin").await.unwrap();
        assert_eq!(f.reload_vehicle(&vehicle.id).await.assigned_to, None);
    }
}
