use chrono::Utc;
use serde_json::json;
use tracing::{error, info, warn};
use validator::Validate;

use crate::database::Document;
use crate::dto::common_dto::{ApiResponse, PaginatedResponse, Pagination};
use crate::dto::rider_dto::{CreateRiderRequest, RiderListQuery, UpdateRiderRequest};
use crate::models::auth::{Principal, ANY_ROLE, STAFF_ROLES, SUPER_ADMIN_ONLY};
use crate::models::rider::{AssignmentStatus, Rider, RiderStatus, ASSIGNMENT_STATUS, RIDER_STATUS};
use crate::repositories::rider_repository::{NewRider, RiderRepository};
use crate::services::assignment_engine::{AssignmentEngine, AssignmentOutcome, ClaimPolicy};
use crate::services::authorization_service::AuthorizationService;
use crate::state::AppState;
use crate::utils::errors::{conflict_error, forbidden_error, not_found_error, AppError};

pub struct RiderController {
    repository: RiderRepository,
    engine: AssignmentEngine,
}

impl RiderController {
    pub fn new(state: &AppState) -> Self {
        Self {
            repository: state.riders(),
            engine: state.assignment_engine(),
        }
    }

    pub async fn list(
        &self,
        principal: &Principal,
        query: RiderListQuery,
    ) -> Result<PaginatedResponse<Rider>, AppError> {
        AuthorizationService::assert_any_role(principal, ANY_ROLE)?;
        let pagination = Pagination::new(query.page, query.limit);

        if principal.is_rider_only() {
            // Un rider sólo se ve a sí mismo
            let own = match principal.rider_id.as_deref() {
                Some(rider_id) => self.repository.find_by_id(rider_id).await?,
                None => None,
            };
            let items: Vec<Rider> = own
                .into_iter()
                .filter(|rider| query.rider_status.map_or(true, |s| rider.rider_status == s))
                .filter(|rider| query.assignment_status.map_or(true, |s| rider.assignment_status == s))
                .collect();
            let total = items.len() as u64;
            let items = if pagination.offset() == 0 { items } else { Vec::new() };
            return Ok(PaginatedResponse::new(items, total, pagination));
        }

        let mut filters = Vec::new();
        if let Some(status) = query.rider_status {
            filters.push((RIDER_STATUS.to_string(), json!(status.as_str())));
        }
        if let Some(status) = query.assignment_status {
            filters.push((ASSIGNMENT_STATUS.to_string(), json!(status.as_str())));
        }

        let (items, total) = self
            .repository
            .list(filters, pagination.offset(), pagination.limit as usize)
            .await?;
        Ok(PaginatedResponse::new(items, total, pagination))
    }

    pub async fn get_by_id(&self, principal: &Principal, id: &str) -> Result<Rider, AppError> {
        AuthorizationService::assert_any_role(principal, ANY_ROLE)?;
        if !AuthorizationService::can_access_rider(principal, id) {
            return Err(forbidden_error("view rider", "riders can only view their own record"));
        }

        self.repository
            .find_by_id(id)
            .await?
            .ok_or_else(|| not_found_error("Rider", id))
    }

    pub async fn create(
        &self,
        principal: &Principal,
        request: CreateRiderRequest,
    ) -> Result<ApiResponse<Rider>, AppError> {
        AuthorizationService::assert_any_role(principal, STAFF_ROLES)?;
        request.validate()?;

        let id_number = request.id_number.trim().to_string();
        if self.repository.find_by_id_number(&id_number).await?.is_some() {
            return Err(conflict_error("Rider", "idNumber", &id_number));
        }

        // Siempre se inserta sin asignar; la asignación pedida la aplica el motor
        let now = Utc::now();
        let actor = principal.user_id.as_str();
        let rider = self
            .repository
            .create(&NewRider {
                first_name: request.first_name.trim().to_string(),
                last_name: request.last_name.trim().to_string(),
                id_number,
                phone: request.phone.trim().to_string(),
                email: request
                    .email
                    .as_deref()
                    .map(str::trim)
                    .filter(|e| !e.is_empty())
                    .map(String::from),
                rider_status: request.rider_status.unwrap_or(RiderStatus::Active),
                assignment_status: AssignmentStatus::Unassigned,
                assigned_vehicle_id: None,
                created_at: now,
                updated_at: now,
                created_by: Some(actor.to_string()),
                updated_by: Some(actor.to_string()),
            })
            .await?;
        info!("👤 Rider {} creado por {}", rider.id, actor);

        let desired = request.desired_assignment();
        if desired.vehicle_id.is_none() {
            return Ok(ApiResponse::success_with_message(rider, "Rider creado exitosamente".to_string())
                .with_assignment(AssignmentOutcome::Unchanged, Vec::new()));
        }

        let result = match self
            .engine
            .apply(&rider, desired, Document::new(), actor, ClaimPolicy::Degrade)
            .await
        {
            Ok(result) => result,
            Err(err) => {
                // No dejar un rider a medio crear
                if let Err(e) = self.repository.delete(&rider.id).await {
                    error!("❌ No se pudo borrar el rider {} tras fallar la asignación: {}", rider.id, e);
                }
                return Err(err.into());
            }
        };

        let message = match result.outcome {
            AssignmentOutcome::Degraded => "Rider creado sin vehículo asignado",
            _ => "Rider creado exitosamente",
        };
        Ok(ApiResponse::success_with_message(result.rider, message.to_string())
            .with_assignment(result.outcome, result.warnings))
    }

    pub async fn update(
        &self,
        principal: &Principal,
        id: &str,
        request: UpdateRiderRequest,
    ) -> Result<ApiResponse<Rider>, AppError> {
        AuthorizationService::assert_any_role(principal, STAFF_ROLES)?;
        request.validate()?;

        let current = self
            .repository
            .find_by_id(id)
            .await?
            .ok_or_else(|| not_found_error("Rider", id))?;

        if let Some(id_number) = request.id_number.as_deref().map(str::trim) {
            if id_number != current.id_number {
                if let Some(other) = self.repository.find_by_id_number(id_number).await? {
                    if other.id != current.id {
                        return Err(conflict_error("Rider", "idNumber", id_number));
                    }
                }
            }
        }

        let desired = request.desired_assignment(&current);
        let result = self
            .engine
            .apply(
                &current,
                desired,
                request.rider_changes(),
                &principal.user_id,
                ClaimPolicy::Reject,
            )
            .await?;

        Ok(
            ApiResponse::success_with_message(result.rider, "Rider actualizado exitosamente".to_string())
                .with_assignment(result.outcome, result.warnings),
        )
    }

    /// Libera el vehículo del rider y luego lo borra
    pub async fn delete(&self, principal: &Principal, id: &str) -> Result<ApiResponse<()>, AppError> {
        AuthorizationService::assert_any_role(principal, SUPER_ADMIN_ONLY)?;

        let rider = self
            .repository
            .find_by_id(id)
            .await?
            .ok_or_else(|| not_found_error("Rider", id))?;

        self.engine.detach_rider(&rider, &principal.user_id).await?;

        if !self.repository.delete(id).await? {
            warn!("⚠️ Rider {} desapareció antes de borrarlo", id);
            return Err(not_found_error("Rider", id));
        }

        info!("🗑️ Rider {} eliminado por {}", id, principal.user_id);
        Ok(ApiResponse::message("Rider eliminado exitosamente".to_string()))
    }
}
