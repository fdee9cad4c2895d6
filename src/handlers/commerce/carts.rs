use crate::handlers::common::{
    map_service_error, no_content_response, success_response, validate_input, CurrentUser,
};
use crate::{errors::ApiError, services::commerce::cart_service::AddToCartInput, AppState};
use axum::{
    extract::{Json, Path, State},
    response::IntoResponse,
    routing::{get, post, put},
    Router,
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

/// Creates the router for the caller's cart
pub fn carts_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(get_cart).delete(clear_cart))
        .route("/items", post(add_to_cart))
        .route("/items/:item_id", put(update_cart_item).delete(remove_cart_item))
}

/// Get the caller's cart, reconciled against the catalog
async fn get_cart(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let cart = state
        .services
        .cart
        .get_cart(user.user_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(cart))
}

/// Add item to cart
async fn add_to_cart(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(input): Json<AddToCartInput>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&input)?;

    let cart = state
        .services
        .cart
        .add_item(user.user_id, input)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(cart))
}

/// Update cart item quantity
async fn update_cart_item(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(item_id): Path<Uuid>,
    Json(payload): Json<UpdateItemRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;

    let cart = state
        .services
        .cart
        .update_item_quantity(user.user_id, item_id, payload.quantity)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(cart))
}

/// Remove item from cart
async fn remove_cart_item(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(item_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let cart = state
        .services
        .cart
        .remove_item(user.user_id, item_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(cart))
}

/// Clear all items from cart
async fn clear_cart(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    state
        .services
        .cart
        .clear_cart(user.user_id)
        .await
        .map_err(map_service_error)?;

    Ok(no_content_response())
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateItemRequest {
    #[validate(range(min = 1))]
    pub quantity: i32,
}
