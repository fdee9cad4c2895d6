//! Hosted payment gateway client.

use crate::{config::AppConfig, errors::ServiceError};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

const INIT_PATH: &str = "/gwprocess/v4/api.php";
const VALIDATION_PATH: &str = "/validator/api/validationserverAPI.php";

/// Buyer details forwarded to the gateway
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PaymentCustomer {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub address: String,
    pub city: String,
    pub postcode: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentInitRequest {
    pub order_id: Uuid,
    /// Sent as the gateway transaction id
    pub transaction_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub product_name: String,
    pub item_count: i32,
    pub customer: PaymentCustomer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSession {
    pub session_key: String,
    pub redirect_url: String,
}

/// Gateway's answer to a validation query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentVerification {
    pub valid: bool,
    pub transaction_ref: Option<String>,
    pub reason: Option<String>,
}

impl PaymentVerification {
    pub fn valid(transaction_ref: impl Into<String>) -> Self {
        Self {
            valid: true,
            transaction_ref: Some(transaction_ref.into()),
            reason: None,
        }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            transaction_ref: None,
            reason: Some(reason.into()),
        }
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn initialize_payment(
        &self,
        request: PaymentInitRequest,
    ) -> Result<PaymentSession, ServiceError>;

    /// Confirms that `validation_id` belongs to `transaction_id` and covers
    /// `expected_amount`.
    async fn verify_payment(
        &self,
        validation_id: &str,
        transaction_id: &str,
        expected_amount: Decimal,
    ) -> Result<PaymentVerification, ServiceError>;
}

#[derive(Debug, Deserialize)]
struct InitResponse {
    status: String,
    #[serde(default, rename = "GatewayPageURL")]
    gateway_page_url: Option<String>,
    #[serde(default, rename = "sessionkey")]
    session_key: Option<String>,
    #[serde(default, rename = "failedreason")]
    failed_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ValidationResponse {
    status: String,
    #[serde(default)]
    tran_id: Option<String>,
    #[serde(default)]
    amount: Option<String>,
    #[serde(default)]
    bank_tran_id: Option<String>,
    #[serde(default)]
    val_id: Option<String>,
}

#[derive(Debug, Clone)]
struct CallbackUrls {
    success: String,
    fail: String,
    cancel: String,
    ipn: String,
}

/// SSLCommerz client over reqwest
#[derive(Debug, Clone)]
pub struct SslCommerzGateway {
    client: reqwest::Client,
    base_url: String,
    credentials: Option<(String, String)>,
    callbacks: CallbackUrls,
}

impl SslCommerzGateway {
    pub fn from_config(config: &AppConfig) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.payment.timeout_secs))
            .build()
            .map_err(|e| ServiceError::InternalError(format!("HTTP client: {}", e)))?;

        let credentials = config
            .payment
            .credentials()
            .map(|(id, password)| (id.to_string(), password.to_string()));
        if credentials.is_none() {
            warn!("Payment gateway credentials are not configured");
        }

        Ok(Self {
            client,
            base_url: config.payment.base_url.trim_end_matches('/').to_string(),
            credentials,
            callbacks: CallbackUrls {
                success: config.callback_url("/api/v1/payments/success"),
                fail: config.callback_url("/api/v1/payments/fail"),
                cancel: config.callback_url("/api/v1/payments/cancel"),
                ipn: config.callback_url("/api/v1/payments/ipn"),
            },
        })
    }

    fn credentials(&self) -> Result<(&str, &str), ServiceError> {
        self.credentials
            .as_ref()
            .map(|(id, password)| (id.as_str(), password.as_str()))
            .ok_or_else(|| {
                ServiceError::ServiceUnavailable("Payment gateway not configured".to_string())
            })
    }
}

fn upstream(err: reqwest::Error) -> ServiceError {
    ServiceError::ExternalServiceError(format!("Payment gateway request failed: {}", err))
}

#[async_trait]
impl PaymentGateway for SslCommerzGateway {
    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    async fn initialize_payment(
        &self,
        request: PaymentInitRequest,
    ) -> Result<PaymentSession, ServiceError> {
        let (store_id, store_password) = self.credentials()?;
        let amount = format!("{:.2}", request.amount);
        let item_count = request.item_count.to_string();
        let c = &request.customer;

        let form: Vec<(&str, &str)> = vec![
            ("store_id", store_id),
            ("store_passwd", store_password),
            ("total_amount", &amount),
            ("currency", &request.currency),
            ("tran_id", &request.transaction_id),
            ("success_url", &self.callbacks.success),
            ("fail_url", &self.callbacks.fail),
            ("cancel_url", &self.callbacks.cancel),
            ("ipn_url", &self.callbacks.ipn),
            ("cus_name", &c.name),
            ("cus_email", &c.email),
            ("cus_phone", &c.phone),
            ("cus_add1", &c.address),
            ("cus_city", &c.city),
            ("cus_postcode", &c.postcode),
            ("cus_country", "Bangladesh"),
            ("shipping_method", "Courier"),
            ("ship_name", &c.name),
            ("ship_add1", &c.address),
            ("ship_city", &c.city),
            ("ship_postcode", &c.postcode),
            ("ship_country", "Bangladesh"),
            ("product_name", &request.product_name),
            ("product_category", "General"),
            ("product_profile", "general"),
            ("num_of_item", &item_count),
        ];

        let response: InitResponse = self
            .client
            .post(format!("{}{}", self.base_url, INIT_PATH))
            .form(&form)
            .send()
            .await
            .map_err(upstream)?
            .error_for_status()
            .map_err(upstream)?
            .json()
            .await
            .map_err(upstream)?;

        match (response.status.as_str(), response.gateway_page_url, response.session_key) {
            ("SUCCESS", Some(url), Some(key)) if !url.is_empty() => {
                info!(transaction_id = %request.transaction_id, "Payment session created");
                Ok(PaymentSession {
                    session_key: key,
                    redirect_url: url,
                })
            }
            _ => Err(ServiceError::PaymentFailed(
                response
                    .failed_reason
                    .filter(|r| !r.is_empty())
                    .unwrap_or_else(|| "Payment gateway rejected the session".to_string()),
            )),
        }
    }

    #[instrument(skip(self))]
    async fn verify_payment(
        &self,
        validation_id: &str,
        transaction_id: &str,
        expected_amount: Decimal,
    ) -> Result<PaymentVerification, ServiceError> {
        let (store_id, store_password) = self.credentials()?;

        let response: ValidationResponse = self
            .client
            .get(format!("{}{}", self.base_url, VALIDATION_PATH))
            .query(&[
                ("val_id", validation_id),
                ("store_id", store_id),
                ("store_passwd", store_password),
                ("format", "json"),
            ])
            .send()
            .await
            .map_err(upstream)?
            .error_for_status()
            .map_err(upstream)?
            .json()
            .await
            .map_err(upstream)?;

        if !matches!(response.status.as_str(), "VALID" | "VALIDATED") {
            return Ok(PaymentVerification::invalid(format!(
                "Gateway status {}",
                response.status
            )));
        }
        if response.tran_id.as_deref() != Some(transaction_id) {
            return Ok(PaymentVerification::invalid("Transaction id mismatch"));
        }

        let paid = response
            .amount
            .as_deref()
            .and_then(|a| Decimal::from_str(a.trim()).ok());
        if paid.map(|a| a.round_dp(2)) != Some(expected_amount.round_dp(2)) {
            return Ok(PaymentVerification::invalid("Amount mismatch"));
        }

        let reference = response
            .bank_tran_id
            .or(response.val_id)
            .unwrap_or_else(|| validation_id.to_string());
        Ok(PaymentVerification::valid(reference))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_credentials_are_reported_as_unavailable() {
        let config = AppConfig::new(
            "sqlite::memory:".into(),
            "127.0.0.1".into(),
            8080,
            "test".into(),
        );
        let gateway = SslCommerzGateway::from_config(&config).unwrap();
        assert!(matches!(
            gateway.credentials(),
            Err(ServiceError::ServiceUnavailable(_))
        ));
        assert!(gateway.callbacks.ipn.ends_with("/api/v1/payments/ipn"));
    }
}
