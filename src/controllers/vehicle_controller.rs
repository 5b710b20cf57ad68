use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};
use validator::Validate;

use crate::dto::common_dto::{ApiResponse, PaginatedResponse, Pagination};
use crate::dto::vehicle_dto::{CreateVehicleRequest, UpdateVehicleRequest, VehicleListQuery};
use crate::models::auth::{Principal, ANY_ROLE, STAFF_ROLES, SUPER_ADMIN_ONLY};
use crate::models::vehicle::{Vehicle, STATUS, TYPE};
use crate::repositories::rider_repository::RiderRepository;
use crate::repositories::vehicle_repository::{NewVehicle, VehicleRepository};
use crate::services::assignment_engine::AssignmentEngine;
use crate::services::authorization_service::AuthorizationService;
use crate::state::AppState;
use crate::utils::errors::{conflict_error, forbidden_error, not_found_error, AppError};
use crate::utils::validation::normalize_license_plate;

const IGNORED_ASSIGNMENT_WARNING: &str =
    "assignedTo/assignedAt se ignoran: la asignación se gestiona desde el rider";

pub struct VehicleController {
    repository: VehicleRepository,
    riders: RiderRepository,
    engine: AssignmentEngine,
}

impl VehicleController {
    pub fn new(state: &AppState) -> Self {
        Self {
            repository: state.vehicles(),
            riders: state.riders(),
            engine: state.assignment_engine(),
        }
    }

    pub async fn list(
        &self,
        principal: &Principal,
        query: VehicleListQuery,
    ) -> Result<PaginatedResponse<Vehicle>, AppError> {
        AuthorizationService::assert_any_role(principal, ANY_ROLE)?;
        let pagination = Pagination::new(query.page, query.limit);

        if principal.is_rider_only() {
            let items: Vec<Vehicle> = self
                .own_vehicle(principal)
                .await?
                .into_iter()
                .filter(|v| query.status.map_or(true, |s| v.status == s))
                .filter(|v| query.vehicle_type.map_or(true, |t| v.vehicle_type == t))
                .collect();
            let total = items.len() as u64;
            let items = if pagination.offset() == 0 { items } else { Vec::new() };
            return Ok(PaginatedResponse::new(items, total, pagination));
        }

        let mut filters = Vec::new();
        if let Some(status) = query.status {
            filters.push((STATUS.to_string(), json!(status.as_str())));
        }
        if let Some(vehicle_type) = query.vehicle_type {
            filters.push((TYPE.to_string(), json!(vehicle_type.as_str())));
        }

        let (items, total) = self
            .repository
            .list(filters, pagination.offset(), pagination.limit as usize)
            .await?;
        Ok(PaginatedResponse::new(items, total, pagination))
    }

    /// Vehículo asignado al rider vinculado al principal, si lo hay
    async fn own_vehicle(&self, principal: &Principal) -> Result<Option<Vehicle>, AppError> {
        let Some(rider_id) = principal.rider_id.as_deref() else {
            return Ok(None);
        };
        let Some(rider) = self.riders.find_by_id(rider_id).await? else {
            return Ok(None);
        };
        let Some(vehicle_id) = rider.current_vehicle() else {
            return Ok(None);
        };

        let vehicle = self.repository.find_by_id(vehicle_id).await?;
        Ok(vehicle.filter(|v| AuthorizationService::can_access_vehicle(principal, v)))
    }

    pub async fn get_by_id(&self, principal: &Principal, id: &str) -> Result<Vehicle, AppError> {
        AuthorizationService::assert_any_role(principal, ANY_ROLE)?;

        let vehicle = self
            .repository
            .find_by_id(id)
            .await?
            .ok_or_else(|| not_found_error("Vehicle", id))?;

        if !AuthorizationService::can_access_vehicle(principal, &vehicle) {
            return Err(forbidden_error("view vehicle", "riders can only view their assigned vehicle"));
        }
        Ok(vehicle)
    }

    pub async fn create(
        &self,
        principal: &Principal,
        request: CreateVehicleRequest,
    ) -> Result<ApiResponse<Vehicle>, AppError> {
        AuthorizationService::assert_any_role(principal, STAFF_ROLES)?;
        request.validate()?;

        let mut warnings = Vec::new();
        if request.submitted_assignment() {
            warn!("⚠️ assignedTo/assignedAt ignorados al crear vehículo (usuario {})", principal.user_id);
            warnings.push(IGNORED_ASSIGNMENT_WARNING.to_string());
        }

        let license_plate = normalize_license_plate(&request.license_plate);
        if self.repository.find_by_license_plate(&license_plate).await?.is_some() {
            return Err(conflict_error("Vehicle", "licensePlate", &license_plate));
        }

        let now = Utc::now();
        let actor = Some(principal.user_id.clone());
        let vehicle = self
            .repository
            .create(&NewVehicle {
                license_plate,
                internal_number: request
                    .internal_number
                    .as_deref()
                    .map(str::trim)
                    .filter(|n| !n.is_empty())
                    .map(String::from),
                manufacturer: request.manufacturer.trim().to_string(),
                model: request.model.trim().to_string(),
                year: request.year,
                vehicle_type: request.vehicle_type,
                status: request.status.unwrap_or_default(),
                assigned_to: None,
                assigned_at: None,
                current_kilometers: request.current_kilometers.unwrap_or(0.0),
                created_at: now,
                updated_at: now,
                created_by: actor.clone(),
                updated_by: actor,
            })
            .await?;
        info!("🛵 Vehículo {} ({}) creado por {}", vehicle.id, vehicle.license_plate, principal.user_id);

        let mut response = ApiResponse::success_with_message(vehicle, "Vehículo creado exitosamente".to_string());
        response.warnings = warnings;
        Ok(response)
    }

    pub async fn update(
        &self,
        principal: &Principal,
        id: &str,
        request: UpdateVehicleRequest,
    ) -> Result<ApiResponse<Vehicle>, AppError> {
        AuthorizationService::assert_any_role(principal, STAFF_ROLES)?;
        request.validate()?;

        let mut warnings = Vec::new();
        if request.submitted_assignment() {
            warn!("⚠️ assignedTo/assignedAt ignorados al actualizar vehículo {} (usuario {})", id, principal.user_id);
            warnings.push(IGNORED_ASSIGNMENT_WARNING.to_string());
        }

        let current = self
            .repository
            .find_by_id(id)
            .await?
            .ok_or_else(|| not_found_error("Vehicle", id))?;

        let mut changes = request.vehicle_changes();
        if let Some(plate) = changes.get("licensePlate").and_then(|v| v.as_str()) {
            if plate != current.license_plate {
                if let Some(other) = self.repository.find_by_license_plate(plate).await? {
                    if other.id != current.id {
                        return Err(conflict_error("Vehicle", "licensePlate", plate));
                    }
                }
            }
        }

        changes.insert("updatedAt".to_string(), json!(Utc::now()));
        changes.insert("updatedBy".to_string(), json!(principal.user_id));

        let vehicle = self
            .repository
            .update_fields(id, changes)
            .await?
            .ok_or_else(|| not_found_error("Vehicle", id))?;

        let mut response = ApiResponse::success_with_message(vehicle, "Vehículo actualizado exitosamente".to_string());
        response.warnings = warnings;
        Ok(response)
    }

    /// Deja sin asignar al rider que tenga el vehículo y luego lo borra
    pub async fn delete(&self, principal: &Principal, id: &str) -> Result<ApiResponse<()>, AppError> {
        AuthorizationService::assert_any_role(principal, SUPER_ADMIN_ONLY)?;

        let vehicle = self.engine.delete_vehicle(id, &principal.user_id).await?;

        info!("🗑️ Vehículo {} ({}) eliminado por {}", id, vehicle.license_plate, principal.user_id);
        Ok(ApiResponse::message("Vehículo eliminado exitosamente".to_string()))
    }
}
