use config::{Config, ConfigError, Environment, File};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_GATEWAY_BASE_URL: &str = "https://sandbox.sslcommerz.com";

/// Delivery fee schedule.
///
/// Thresholds are compared against the post-discount subtotal. Zone rates
/// must be ordered `dhaka_city < dhaka_outside < other_district`.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ShippingConfig {
    /// Subtotal at or above which delivery is free
    #[serde(default = "default_free_shipping_threshold")]
    pub free_threshold: Decimal,

    /// Subtotal at or above which the reduced flat rate applies
    #[serde(default = "default_reduced_shipping_threshold")]
    pub reduced_threshold: Decimal,

    #[serde(default = "default_reduced_shipping_rate")]
    pub reduced_rate: Decimal,

    #[serde(default = "default_dhaka_city_rate")]
    pub dhaka_city_rate: Decimal,

    #[serde(default = "default_dhaka_outside_rate")]
    pub dhaka_outside_rate: Decimal,

    #[serde(default = "default_other_district_rate")]
    pub other_district_rate: Decimal,
}

impl Default for ShippingConfig {
    fn default() -> Self {
        Self {
            free_threshold: default_free_shipping_threshold(),
            reduced_threshold: default_reduced_shipping_threshold(),
            reduced_rate: default_reduced_shipping_rate(),
            dhaka_city_rate: default_dhaka_city_rate(),
            dhaka_outside_rate: default_dhaka_outside_rate(),
            other_district_rate: default_other_district_rate(),
        }
    }
}

/// Hosted payment gateway credentials and endpoints
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct PaymentGatewayConfig {
    /// Base URL of the gateway (sandbox or live)
    #[serde(default = "default_gateway_base_url")]
    #[validate(url)]
    pub base_url: String,

    /// Merchant store id; gateway payments are rejected when unset
    #[serde(default)]
    pub store_id: Option<String>,

    /// Merchant store password
    #[serde(default)]
    pub store_password: Option<String>,

    /// HTTP timeout for gateway calls (seconds)
    #[serde(default = "default_gateway_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for PaymentGatewayConfig {
    fn default() -> Self {
        Self {
            base_url: default_gateway_base_url(),
            store_id: None,
            store_password: None,
            timeout_secs: default_gateway_timeout_secs(),
        }
    }
}

impl PaymentGatewayConfig {
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.store_id.as_deref(), self.store_password.as_deref()) {
            (Some(id), Some(password)) if !id.is_empty() && !password.is_empty() => {
                Some((id, password))
            }
            _ => None,
        }
    }
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// CORS: comma-separated list of allowed origins
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Tax rate applied to the discounted subtotal (e.g., 0.05 for 5%)
    #[serde(default = "default_tax_rate")]
    #[validate(custom = "validate_tax_rate")]
    pub tax_rate: f64,

    /// Settlement currency
    #[serde(default = "default_currency")]
    pub currency: String,

    /// Capacity of the in-process event channel
    #[serde(default = "default_event_channel_capacity")]
    #[validate(custom = "validate_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// Storefront URL that payment redirects land on
    #[serde(default = "default_frontend_base_url")]
    pub frontend_base_url: String,

    /// Public URL of this API, used to build gateway callback URLs
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,

    #[serde(default)]
    #[validate]
    pub shipping: ShippingConfig,

    #[serde(default)]
    #[validate]
    pub payment: PaymentGatewayConfig,
}

impl AppConfig {
    /// Creates a configuration with defaults for everything but the
    /// connection and listener settings.
    pub fn new(database_url: String, host: String, port: u16, environment: String) -> Self {
        Self {
            database_url,
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            cors_allowed_origins: None,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            tax_rate: default_tax_rate(),
            currency: default_currency(),
            event_channel_capacity: default_event_channel_capacity(),
            frontend_base_url: default_frontend_base_url(),
            public_base_url: default_public_base_url(),
            shipping: ShippingConfig::default(),
            payment: PaymentGatewayConfig::default(),
        }
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    /// Tax rate as a decimal multiplier
    pub fn tax_rate(&self) -> Decimal {
        Decimal::from_f64(self.tax_rate)
            .map(|rate| rate.round_dp(6))
            .unwrap_or(Decimal::ZERO)
    }

    /// Absolute URL of a callback route served by this API
    pub fn callback_url(&self, path: &str) -> String {
        format!("{}{}", self.public_base_url.trim_end_matches('/'), path)
    }

    /// Absolute storefront URL for a browser redirect
    pub fn frontend_url(&self, path: &str) -> String {
        format!("{}{}", self.frontend_base_url.trim_end_matches('/'), path)
    }

    fn validate_shipping_schedule(&self) -> Result<(), validator::ValidationErrors> {
        let s = &self.shipping;
        let ordered = s.dhaka_city_rate < s.dhaka_outside_rate
            && s.dhaka_outside_rate < s.other_district_rate
            && s.reduced_threshold < s.free_threshold;
        if ordered {
            return Ok(());
        }
        let mut errors = validator::ValidationErrors::new();
        let mut err = ValidationError::new("shipping");
        err.message = Some(
            "zone rates must increase from dhaka_city to other_district and reduced_threshold must be below free_threshold"
                .into(),
        );
        errors.add("shipping", err);
        Err(errors)
    }
}

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_db_max_connections() -> u32 {
    16
}
fn default_db_min_connections() -> u32 {
    2
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_idle_timeout_secs() -> u64 {
    600
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}

fn default_tax_rate() -> f64 {
    0.0
}

fn default_currency() -> String {
    "BDT".to_string()
}

fn default_event_channel_capacity() -> usize {
    1024
}

fn default_frontend_base_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_public_base_url() -> String {
    format!("http://localhost:{}", DEFAULT_PORT)
}

fn default_gateway_base_url() -> String {
    DEFAULT_GATEWAY_BASE_URL.to_string()
}

fn default_gateway_timeout_secs() -> u64 {
    30
}

fn default_free_shipping_threshold() -> Decimal {
    Decimal::from(8000)
}
fn default_reduced_shipping_threshold() -> Decimal {
    Decimal::from(4000)
}
fn default_reduced_shipping_rate() -> Decimal {
    Decimal::from(30)
}
fn default_dhaka_city_rate() -> Decimal {
    Decimal::from(50)
}
fn default_dhaka_outside_rate() -> Decimal {
    Decimal::from(100)
}
fn default_other_district_rate() -> Decimal {
    Decimal::from(150)
}

/// Validates log level values
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

fn validate_tax_rate(rate: f64) -> Result<(), ValidationError> {
    if !rate.is_finite() || rate < 0.0 || rate > 1.0 {
        let mut err = ValidationError::new("tax_rate");
        err.message = Some("tax_rate must be a finite value between 0.0 and 1.0".into());
        return Err(err);
    }
    Ok(())
}

fn validate_event_channel_capacity(capacity: usize) -> Result<(), ValidationError> {
    if capacity == 0 {
        let mut err = ValidationError::new("event_channel_capacity");
        err.message = Some("event_channel_capacity must be greater than 0".into());
        return Err(err);
    }
    Ok(())
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("storefront_api={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    let filter = EnvFilter::new(filter_directive);
    if json {
        let _ = fmt().with_env_filter(filter).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter).try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    let config = Config::builder()
        .set_default("database_url", "sqlite://storefront.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_shipping_schedule().map_err(|e| {
        error!("Shipping schedule validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    if app_config.payment.credentials().is_none() {
        info!("Payment gateway credentials not configured; gateway checkout disabled");
    }

    info!("Configuration loaded successfully");
    Ok(app_config)
}
