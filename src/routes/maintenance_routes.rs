use axum::{extract::State, routing::post, Json, Router};

use crate::controllers::maintenance_controller::MaintenanceController;
use crate::dto::common_dto::ApiResponse;
use crate::middleware::auth::AuthenticatedUser;
use crate::services::consistency_sweep::ReconcileReport;
use crate::state::AppState;
use crate::utils::errors::AppError;

pub fn create_maintenance_router() -> Router<AppState> {
    Router::new().route("/reconcile", post(reconcile))
}

async fn reconcile(
    State(state): State<AppState>,
    AuthenticatedUser(principal): AuthenticatedUser,
) -> Result<Json<ApiResponse<ReconcileReport>>, AppError> {
    let controller = MaintenanceController::new(&state);
    let response = controller.reconcile(&principal).await?;
    Ok(Json(response))
}
