//! Storefront API Library
//!
//! Catalog pricing, carts, checkout, promotions, orders and payment gateway
//! callbacks for a single-store e-commerce backend.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod middleware_helpers;
pub mod migrator;
pub mod notifications;
pub mod services;
pub mod tracing;

use axum::{extract::State, response::Json, routing::get, Router};
use http::HeaderValue;
use sea_orm::DatabaseConnection;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<config::AppConfig>,
    pub event_sender: Arc<events::EventSender>,
    pub services: handlers::AppServices,
}

impl AppState {
    /// Builds the state and every service from shared infrastructure
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: Arc<config::AppConfig>,
        event_sender: Arc<events::EventSender>,
        gateway: Arc<dyn services::payment_gateway::PaymentGateway>,
        notifier: Arc<dyn notifications::Notifier>,
    ) -> Self {
        let services = handlers::AppServices::new(
            db.clone(),
            event_sender.clone(),
            config.clone(),
            gateway,
            notifier,
        );
        Self {
            db,
            config,
            event_sender,
            services,
        }
    }
}

/// Routes mounted under `/api/v1`
pub fn api_v1_routes() -> Router<AppState> {
    Router::new()
        // Status and health endpoints
        .route("/status", get(api_status))
        .route("/health", get(health_check))
        // Catalog
        .nest("/products", handlers::commerce::products_routes())
        .nest("/categories", handlers::commerce::categories_routes())
        // Cart and checkout (caller identity from x-user-id)
        .nest("/cart", handlers::commerce::carts_routes())
        .nest("/checkout", handlers::commerce::checkout_routes())
        // Promotions
        .nest("/coupons", handlers::commerce::coupons_routes())
        .nest("/campaigns", handlers::commerce::campaigns_routes())
        // Orders and stock
        .nest("/orders", handlers::orders::orders_routes())
        .nest("/inventory", handlers::orders::inventory_routes())
        // Gateway callbacks (no caller identity)
        .nest("/payments", handlers::payments::payment_routes())
}

/// Full application router with request ids, HTTP tracing and CORS
pub fn build_router(state: AppState) -> Router {
    let cors_layer = cors_layer(&state.config);

    Router::new()
        .route("/", get(|| async { "storefront-api up" }))
        .nest("/api/v1", api_v1_routes())
        // HTTP tracing layer for consistent request/response telemetry
        .layer(tracing::configure_http_tracing())
        .layer(cors_layer)
        // Ensure every request carries a request id for traceability
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id_middleware,
        ))
        .with_state(state)
}

fn cors_layer(cfg: &config::AppConfig) -> CorsLayer {
    let configured_origins: Option<Vec<HeaderValue>> = cfg
        .cors_allowed_origins
        .as_ref()
        .map(|raw| {
            raw.split(',')
                .filter_map(|origin| {
                    let trimmed = origin.trim();
                    if trimmed.is_empty() {
                        None
                    } else {
                        HeaderValue::from_str(trimmed).ok()
                    }
                })
                .collect::<Vec<_>>()
        })
        .filter(|origins| !origins.is_empty());

    match configured_origins {
        Some(origins) => CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any),
        None if cfg.is_development() => CorsLayer::permissive(),
        None => {
            ::tracing::warn!("No CORS origins configured; cross-origin requests will be rejected");
            CorsLayer::new()
        }
    }
}

async fn api_status() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "storefront-api",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn health_check(State(state): State<AppState>) -> Json<Value> {
    let db_status = match db::check_connection(&state.db).await {
        Ok(()) => "healthy",
        Err(_) => "unhealthy",
    };

    Json(json!({
        "status": db_status,
        "checks": { "database": db_status },
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}
