use crate::handlers::common::{
    created_response, map_service_error, success_response, validate_input, AdminUser,
    CurrentUser, PaginatedResponse, PaginationParams,
};
use crate::{errors::ApiError, services::commerce::CreateCouponInput, AppState};
use axum::{
    extract::{Json, Path, Query, State},
    response::IntoResponse,
    routing::post,
    Router,
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

/// Creates the router for coupon endpoints
pub fn coupons_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_coupon).get(list_coupons))
        .route("/validate", post(validate_coupon))
        .route("/:id/deactivate", post(deactivate_coupon))
}

async fn create_coupon(
    State(state): State<AppState>,
    _admin: AdminUser,
    Json(payload): Json<CreateCouponInput>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;

    let coupon = state
        .services
        .coupons
        .create_coupon(payload)
        .await
        .map_err(map_service_error)?;

    Ok(created_response(coupon))
}

async fn list_coupons(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(params): Query<PaginationParams>,
) -> Result<impl IntoResponse, ApiError> {
    let (page, per_page) = params.normalized();

    let (coupons, total) = state
        .services
        .coupons
        .list_coupons(page, per_page)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(PaginatedResponse::new(
        coupons, page, per_page, total,
    )))
}

async fn deactivate_coupon(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let coupon = state
        .services
        .coupons
        .deactivate_coupon(id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(coupon))
}

/// Evaluates a code against the caller's cart. A rejected coupon is a 200
/// with `applied: false` and a message.
async fn validate_coupon(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(payload): Json<ValidateCouponRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;

    let evaluation = state
        .services
        .checkout
        .validate_coupon(user.user_id, &payload.code)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(evaluation))
}

#[derive(Debug, Deserialize, Validate)]
pub struct ValidateCouponRequest {
    #[validate(length(min = 1, max = 64))]
    pub code: String,
}
