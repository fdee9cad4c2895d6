use axum::{
    extract::{Json, Path, Query, State},
    response::IntoResponse,
    routing::{get, post, put},
    Router,
};
use uuid::Uuid;

use crate::handlers::common::{
    created_response, map_service_error, success_response, validate_input, AdminUser,
    CurrentUser, MaybeUser, PaginatedResponse, PaginationParams,
};
use crate::services::inventory::{StockDirection, StockLine};
use crate::services::orders::{CreateOrderInput, UpdateOrderStatusInput};
use crate::{errors::ApiError, AppState};
use serde::Deserialize;

/// Creates the router for order endpoints
pub fn orders_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_order).get(list_orders))
        .route("/:id", get(get_order))
        .route("/:id/cancel", post(cancel_order))
        .route("/:id/status", put(update_order_status))
}

/// Creates the router for administrative stock adjustments
pub fn inventory_routes() -> Router<AppState> {
    Router::new().route("/adjust", post(adjust_stock))
}

/// Place an order from the caller's cart or from guest lines.
///
/// Cash on delivery orders come back pending with stock already taken;
/// gateway orders carry the `redirect_url` the buyer must follow to pay.
async fn create_order(
    State(state): State<AppState>,
    user: MaybeUser,
    Json(payload): Json<CreateOrderInput>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;

    let placed = state
        .services
        .orders
        .create_order(user.user_id(), payload)
        .await
        .map_err(map_service_error)?;

    Ok(created_response(placed))
}

/// The caller's orders, newest first
async fn list_orders(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(params): Query<PaginationParams>,
) -> Result<impl IntoResponse, ApiError> {
    let (page, per_page) = params.normalized();

    let (orders, total) = state
        .services
        .orders
        .list_orders(user.user_id, page, per_page)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(PaginatedResponse::new(
        orders, page, per_page, total,
    )))
}

async fn get_order(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state
        .services
        .orders
        .get_order(user.into(), id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(order))
}

async fn cancel_order(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state
        .services
        .orders
        .cancel_order(user.into(), id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(order))
}

async fn update_order_status(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateOrderStatusInput>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state
        .services
        .orders
        .update_status(id, payload)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(order))
}

#[derive(Debug, Deserialize)]
pub struct AdjustStockRequest {
    pub direction: StockDirection,
    pub items: Vec<StockLine>,
}

async fn adjust_stock(
    State(state): State<AppState>,
    _admin: AdminUser,
    Json(payload): Json<AdjustStockRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if payload.items.iter().any(|line| line.quantity < 1) {
        return Err(ApiError::ValidationError(
            "quantity must be at least 1".to_string(),
        ));
    }

    let changes = state
        .services
        .inventory
        .adjust_stock(&payload.items, payload.direction)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(changes))
}
