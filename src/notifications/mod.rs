use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Email templates sent by the order flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NotificationTemplate {
    OrderPlaced,
    PaymentConfirmed,
    OrderCancelled,
}

/// Notification delivery errors
#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Delivery failed: {0}")]
    Delivery(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Outbound notification transport
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(
        &self,
        to: &str,
        template: NotificationTemplate,
        data: serde_json::Value,
    ) -> Result<(), NotificationError>;
}

/// Default transport: writes the notification to the log
#[derive(Debug, Clone, Default)]
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn send(
        &self,
        to: &str,
        template: NotificationTemplate,
        data: serde_json::Value,
    ) -> Result<(), NotificationError> {
        info!(to = %to, template = %template, payload = %data, "notification sent");
        Ok(())
    }
}

/// Sends in the background. Failures are logged and never reach the caller.
pub fn dispatch(
    notifier: Arc<dyn Notifier>,
    to: Option<String>,
    template: NotificationTemplate,
    data: serde_json::Value,
) {
    let Some(to) = to.filter(|t| !t.is_empty()) else {
        return;
    };
    tokio::spawn(async move {
        if let Err(e) = notifier.send(&to, template, data).await {
            warn!(error = %e, template = %template, "notification failed");
        }
    });
}
