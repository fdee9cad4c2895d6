use crate::handlers::common::{map_service_error, success_response, validate_input, MaybeUser};
use crate::{errors::ApiError, services::commerce::CheckoutRequest, AppState};
use axum::{
    extract::{Json, State},
    response::IntoResponse,
    routing::post,
    Router,
};

/// Creates the router for checkout endpoints
pub fn checkout_routes() -> Router<AppState> {
    Router::new().route("/calculate", post(calculate))
}

/// Price breakdown for the caller's cart or for guest lines.
///
/// Coupon rejections and an incomplete address come back inside the
/// breakdown with a 200; unknown destinations and variants are 400s.
async fn calculate(
    State(state): State<AppState>,
    user: MaybeUser,
    Json(payload): Json<CheckoutRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;

    let breakdown = state
        .services
        .checkout
        .calculate(user.user_id(), payload)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(breakdown))
}
