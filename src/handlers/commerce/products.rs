use crate::handlers::common::{
    created_response, map_service_error, success_response, validate_input, AdminUser,
    PaginatedResponse, PaginationParams,
};
use crate::{errors::ApiError, services::commerce::CreateProductInput, AppState};
use axum::{
    extract::{Json, Path, Query, State},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use tracing::info;
use uuid::Uuid;

/// Creates the router for product endpoints
pub fn products_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_product))
        .route("/:id", get(get_product))
}

/// Creates the router for category browsing
pub fn categories_routes() -> Router<AppState> {
    Router::new().route("/:id/products", get(list_category_products))
}

/// Create a product, optionally generating variants from option axes
async fn create_product(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Json(payload): Json<CreateProductInput>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;

    let product = state
        .services
        .catalog
        .create_product(payload)
        .await
        .map_err(map_service_error)?;

    info!(product_id = %product.product.id, admin_id = %admin.user_id, "Product created");
    Ok(created_response(product))
}

/// Get product with its variants
async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let product = state
        .services
        .catalog
        .get_product(id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(product))
}

/// Active products in a category and all of its subcategories
async fn list_category_products(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<PaginationParams>,
) -> Result<impl IntoResponse, ApiError> {
    let (page, per_page) = params.normalized();

    let (products, total) = state
        .services
        .catalog
        .list_category_products(id, page, per_page)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(PaginatedResponse::new(
        products, page, per_page, total,
    )))
}
