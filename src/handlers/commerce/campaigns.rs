use crate::handlers::common::{created_response, map_service_error, success_response, validate_input, AdminUser};
use crate::{errors::ApiError, services::commerce::CreateCampaignInput, AppState};
use axum::{
    extract::{Json, State},
    response::IntoResponse,
    routing::post,
    Router,
};

/// Creates the router for campaign endpoints
pub fn campaigns_routes() -> Router<AppState> {
    Router::new().route("/", post(create_campaign).get(list_active_campaigns))
}

async fn create_campaign(
    State(state): State<AppState>,
    _admin: AdminUser,
    Json(payload): Json<CreateCampaignInput>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;

    let campaign = state
        .services
        .campaigns
        .create_campaign(payload)
        .await
        .map_err(map_service_error)?;

    Ok(created_response(campaign))
}

/// Campaigns running right now
async fn list_active_campaigns(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> Result<impl IntoResponse, ApiError> {
    let campaigns = state
        .services
        .campaigns
        .list_active()
        .await
        .map_err(map_service_error)?;

    Ok(success_response(campaigns))
}
