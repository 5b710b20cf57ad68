use crate::dto::common_dto::ApiResponse;
use crate::models::auth::{Principal, SUPER_ADMIN_ONLY};
use crate::services::authorization_service::AuthorizationService;
use crate::services::consistency_sweep::{ConsistencySweep, ReconcileReport};
use crate::state::AppState;
use crate::utils::errors::AppError;

pub struct MaintenanceController {
    sweep: ConsistencySweep,
}

impl MaintenanceController {
    pub fn new(state: &AppState) -> Self {
        Self {
            sweep: state.consistency_sweep(),
        }
    }

    /// Barrido de consistencia bajo demanda
    pub async fn reconcile(&self, principal: &Principal) -> Result<ApiResponse<ReconcileReport>, AppError> {
        AuthorizationService::assert_any_role(principal, SUPER_ADMIN_ONLY)?;

        let report = self.sweep.run().await?;
        Ok(ApiResponse::success_with_message(
            report,
            "Barrido de consistencia completado".to_string(),
        ))
    }
}
