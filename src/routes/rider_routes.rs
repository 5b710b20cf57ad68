use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};

use crate::controllers::rider_controller::RiderController;
use crate::dto::common_dto::{ApiResponse, PaginatedResponse};
use crate::dto::rider_dto::{CreateRiderRequest, RiderListQuery, UpdateRiderRequest};
use crate::middleware::auth::AuthenticatedUser;
use crate::models::rider::Rider;
use crate::state::AppState;
use crate::utils::errors::AppError;

pub fn create_rider_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_riders).post(create_rider))
        .route("/:id", get(get_rider).put(update_rider).delete(delete_rider))
}

async fn list_riders(
    State(state): State<AppState>,
    AuthenticatedUser(principal): AuthenticatedUser,
    Query(query): Query<RiderListQuery>,
) -> Result<Json<PaginatedResponse<Rider>>, AppError> {
    let controller = RiderController::new(&state);
    let response = controller.list(&principal, query).await?;
    Ok(Json(response))
}

async fn get_rider(
    State(state): State<AppState>,
    AuthenticatedUser(principal): AuthenticatedUser,
    Path(id): Path<String>,
) -> Result<Json<Rider>, AppError> {
    let controller = RiderController::new(&state);
    let response = controller.get_by_id(&principal, &id).await?;
    Ok(Json(response))
}

async fn create_rider(
    State(state): State<AppState>,
    AuthenticatedUser(principal): AuthenticatedUser,
    Json(request): Json<CreateRiderRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Rider>>), AppError> {
    let controller = RiderController::new(&state);
    let response = controller.create(&principal, request).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

async fn update_rider(
    State(state): State<AppState>,
    AuthenticatedUser(principal): AuthenticatedUser,
    Path(id): Path<String>,
    Json(request): Json<UpdateRiderRequest>,
) -> Result<Json<ApiResponse<Rider>>, AppError> {
    let controller = RiderController::new(&state);
    let response = controller.update(&principal, &id, request).await?;
    Ok(Json(response))
}

async fn delete_rider(
    State(state): State<AppState>,
    AuthenticatedUser(principal): AuthenticatedUser,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<()>>, AppError> {
    let controller = RiderController::new(&state);
    let response = controller.delete(&principal, &id).await?;
    Ok(Json(response))
}
