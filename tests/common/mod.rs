#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{Method, Request},
    response::Response,
    Router,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use serde_json::Value;
use storefront_api::{
    config::AppConfig,
    db,
    entities::commerce::{category, coupon::CouponDiscountType, CouponModel, ProductVariant},
    entities::product,
    errors::ServiceError,
    events::{self, EventSender},
    handlers::common::{USER_ID_HEADER, USER_ROLE_HEADER},
    notifications::{NotificationError, NotificationTemplate, Notifier},
    services::commerce::{
        catalog_service::{CreateProductInput, OptionDefinition},
        CreateCouponInput, ProductWithVariants,
    },
    services::payment_gateway::{
        PaymentGateway, PaymentInitRequest, PaymentSession, PaymentVerification,
    },
    AppState,
};
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

/// Gateway double whose answers are scripted per test
#[derive(Default)]
pub struct FakeGateway {
    pub fail_init: AtomicBool,
    pub reject_verification: AtomicBool,
    pub init_requests: Mutex<Vec<PaymentInitRequest>>,
    pub verify_calls: AtomicUsize,
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn initialize_payment(
        &self,
        request: PaymentInitRequest,
    ) -> Result<PaymentSession, ServiceError> {
        if self.fail_init.load(Ordering::SeqCst) {
            return Err(ServiceError::PaymentFailed("Store credential error".into()));
        }
        let session = PaymentSession {
            session_key: format!("session-{}", request.transaction_id),
            redirect_url: format!("https://gateway.test/pay/{}", request.transaction_id),
        };
        self.init_requests.lock().unwrap().push(request);
        Ok(session)
    }

    async fn verify_payment(
        &self,
        validation_id: &str,
        _transaction_id: &str,
        _expected_amount: Decimal,
    ) -> Result<PaymentVerification, ServiceError> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        if self.reject_verification.load(Ordering::SeqCst) {
            Ok(PaymentVerification::invalid("Gateway status INVALID_TRANSACTION"))
        } else {
            Ok(PaymentVerification::valid(format!("bank-{}", validation_id)))
        }
    }
}

/// Notifier double that keeps every message it is asked to send
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<(String, NotificationTemplate)>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(
        &self,
        to: &str,
        template: NotificationTemplate,
        _data: Value,
    ) -> Result<(), NotificationError> {
        self.sent.lock().unwrap().push((to.to_string(), template));
        Ok(())
    }
}

impl RecordingNotifier {
    /// Waits for background dispatches to land
    pub async fn wait_for(&self, count: usize) -> Vec<(String, NotificationTemplate)> {
        for _ in 0..50 {
            if self.sent.lock().unwrap().len() >= count {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.sent.lock().unwrap().clone()
    }
}

/// Application state and router over a fresh in-memory SQLite database
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub gateway: Arc<FakeGateway>,
    pub notifier: Arc<RecordingNotifier>,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Construct a test application after adjusting the default configuration
    pub async fn with_config(adjust: impl FnOnce(&mut AppConfig)) -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        // One connection so every query sees the same in-memory database
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.frontend_base_url = "https://shop.test".to_string();
        adjust(&mut cfg);

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let gateway = Arc::new(FakeGateway::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let state = AppState::new(
            Arc::new(pool),
            Arc::new(cfg),
            Arc::new(EventSender::new(event_tx)),
            gateway.clone(),
            notifier.clone(),
        );
        let router = storefront_api::build_router(state.clone());

        Self {
            router,
            state,
            gateway,
            notifier,
            _event_task: event_task,
        }
    }

    /// Send a JSON request, optionally as a signed-in user
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        user: Option<Uuid>,
        admin: bool,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user_id) = user {
            builder = builder.header(USER_ID_HEADER, user_id.to_string());
        }
        if admin {
            builder = builder.header(USER_ROLE_HEADER, "admin");
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// POST a form-encoded body, as the payment gateway does
    pub async fn post_form(&self, uri: &str, fields: &[(&str, &str)]) -> Response {
        let encoded = fields
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");
        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("content-type", "application/x-www-form-urlencoded")
            .body(Body::from(encoded))
            .expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    pub async fn seed_category(&self, slug: &str, parent_id: Option<Uuid>) -> Uuid {
        let id = Uuid::new_v4();
        category::ActiveModel {
            id: Set(id),
            name: Set(slug.to_string()),
            slug: Set(slug.to_string()),
            parent_id: Set(parent_id),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed category");
        id
    }

    /// Product without variants
    pub async fn seed_product(
        &self,
        slug: &str,
        base_price: Decimal,
        discount_percentage: Decimal,
        stock: i32,
    ) -> ProductWithVariants {
        self.state
            .services
            .catalog
            .create_product(product_input(slug, base_price, discount_percentage, stock))
            .await
            .expect("seed product")
    }

    /// Product with one variant per combination of the given axes
    pub async fn seed_variant_product(
        &self,
        slug: &str,
        base_price: Decimal,
        axes: &[(&str, &[&str])],
        variant_stock: i32,
    ) -> ProductWithVariants {
        let mut input = product_input(slug, base_price, Decimal::ZERO, 0);
        input.options = axes
            .iter()
            .map(|(name, values)| OptionDefinition {
                name: name.to_string(),
                values: values.iter().map(|v| v.to_string()).collect(),
            })
            .collect();
        input.variant_stock = variant_stock;
        self.state
            .services
            .catalog
            .create_product(input)
            .await
            .expect("seed variant product")
    }

    pub async fn seed_coupon(
        &self,
        code: &str,
        discount_type: CouponDiscountType,
        value: Decimal,
        min_order_amount: Decimal,
        max_usage: Option<i32>,
    ) -> CouponModel {
        let now = Utc::now();
        self.state
            .services
            .coupons
            .create_coupon(CreateCouponInput {
                code: code.to_string(),
                discount_type,
                value,
                min_order_amount,
                max_discount_amount: None,
                start_date: now - chrono::Duration::days(1),
                expiry_date: now + chrono::Duration::days(30),
                max_usage,
                product_ids: Vec::new(),
                category_ids: Vec::new(),
            })
            .await
            .expect("seed coupon")
    }

    pub async fn product_stock(&self, product_id: Uuid) -> i32 {
        product::Entity::find_by_id(product_id)
            .one(&*self.state.db)
            .await
            .expect("load product")
            .expect("product exists")
            .stock
    }

    pub async fn variant_stock(&self, variant_id: Uuid) -> i32 {
        ProductVariant::find_by_id(variant_id)
            .one(&*self.state.db)
            .await
            .expect("load variant")
            .expect("variant exists")
            .stock
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

pub fn product_input(
    slug: &str,
    base_price: Decimal,
    discount_percentage: Decimal,
    stock: i32,
) -> CreateProductInput {
    CreateProductInput {
        name: format!("Product {}", slug),
        slug: slug.to_string(),
        description: None,
        category_id: None,
        base_price,
        discount_percentage,
        discount_start: None,
        discount_end: None,
        stock,
        images: vec![format!("https://cdn.test/{}.jpg", slug)],
        variants: Vec::new(),
        options: Vec::new(),
        variant_stock: 0,
    }
}

/// Shipping address inside the `dhaka_city` zone
pub fn dhaka_address(email: Option<&str>) -> Value {
    serde_json::json!({
        "full_name": "Rahim Uddin",
        "phone": "01700000000",
        "email": email,
        "address_line": "House 1, Road 2",
        "district": "Dhaka",
        "upazila": "Dhanmondi",
        "postal_code": "1205"
    })
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

pub async fn response_text(response: Response) -> String {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    String::from_utf8(bytes.to_vec()).expect("utf-8 response")
}

/// Monetary amount from a JSON response; decimals serialize as strings
pub fn money(value: &Value) -> Decimal {
    let raw = value
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| value.to_string());
    raw.parse().unwrap_or_else(|_| panic!("not a decimal: {}", value))
}
