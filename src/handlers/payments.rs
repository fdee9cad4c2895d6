use crate::entities::order::PaymentStatus;
use crate::services::payments::{CallbackSource, GatewayCallback, PaymentOutcome};
use crate::{errors::ServiceError, AppState};
use axum::{
    extract::{Form, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    routing::post,
    Router,
};
use tracing::{error, warn};

/// Creates the router for gateway callbacks. These routes carry no caller
/// identity; every success is verified with the gateway before it counts.
pub fn payment_routes() -> Router<AppState> {
    Router::new()
        .route("/success", post(payment_success))
        .route("/fail", post(payment_fail))
        .route("/cancel", post(payment_cancel))
        .route("/ipn", post(payment_ipn))
}

async fn payment_success(
    State(state): State<AppState>,
    Form(callback): Form<GatewayCallback>,
) -> Response {
    browser_callback(state, CallbackSource::Success, callback).await
}

async fn payment_fail(
    State(state): State<AppState>,
    Form(callback): Form<GatewayCallback>,
) -> Response {
    browser_callback(state, CallbackSource::Fail, callback).await
}

async fn payment_cancel(
    State(state): State<AppState>,
    Form(callback): Form<GatewayCallback>,
) -> Response {
    browser_callback(state, CallbackSource::Cancel, callback).await
}

/// Server-to-server notification; answers plain text
async fn payment_ipn(
    State(state): State<AppState>,
    Form(callback): Form<GatewayCallback>,
) -> Response {
    match state
        .services
        .payments
        .handle_callback(CallbackSource::Ipn, callback)
        .await
    {
        Ok(outcome) => (StatusCode::OK, ipn_acknowledgement(&outcome)).into_response(),
        Err(err) => {
            let status = err.status_code();
            if status.is_server_error() {
                error!(error = %err, "IPN processing failed");
            } else {
                warn!(error = %err, "IPN rejected");
            }
            (status, err.response_message()).into_response()
        }
    }
}

fn ipn_acknowledgement(outcome: &PaymentOutcome) -> &'static str {
    match outcome {
        PaymentOutcome::Confirmed(_) => "IPN processed: payment confirmed",
        PaymentOutcome::AlreadyConfirmed(_) => "IPN processed: payment already confirmed",
        PaymentOutcome::Cancelled(_) => "IPN processed: payment not verified",
        PaymentOutcome::Ignored(_) => "IPN processed: no change",
    }
}

/// Applies the callback and sends the browser back to the storefront
async fn browser_callback(
    state: AppState,
    source: CallbackSource,
    callback: GatewayCallback,
) -> Response {
    let result = state.services.payments.handle_callback(source, callback).await;
    let path = redirect_path(source, &result);
    if let Err(err) = &result {
        warn!(%source, error = %err, "Payment callback could not be applied");
    }
    Redirect::to(&state.config.frontend_url(&path)).into_response()
}

fn redirect_path(source: CallbackSource, result: &Result<PaymentOutcome, ServiceError>) -> String {
    let outcome = match result {
        Ok(outcome) => outcome,
        Err(_) => return "/payment/failed".to_string(),
    };
    let page = if outcome.order().payment_status == PaymentStatus::Paid {
        "success"
    } else if source == CallbackSource::Cancel {
        "cancelled"
    } else {
        "failed"
    };
    format!("/payment/{}?order={}", page, outcome.order().order_number)
}
