mod common;

use std::sync::atomic::Ordering;

use assert_matches::assert_matches;
use axum::http::{header, StatusCode};
use common::{dhaka_address, response_text, TestApp};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::EntityTrait;
use storefront_api::{
    entities::commerce::{coupon::CouponDiscountType, Cart, Coupon},
    entities::order::{self, OrderStatus, PaymentMethod, PaymentStatus},
    notifications::NotificationTemplate,
    errors::ServiceError,
    services::commerce::AddToCartInput,
    services::orders::{CreateOrderInput, UpdateOrderStatusInput},
    services::payments::{CallbackSource, GatewayCallback, PaymentOutcome},
};
use uuid::Uuid;

struct PendingPayment {
    app: TestApp,
    user: Uuid,
    product_id: Uuid,
    coupon_id: Uuid,
    order: order::Model,
}

/// Signed-in buyer with a gateway order waiting for payment
async fn pending_payment() -> PendingPayment {
    let app = TestApp::new().await;
    let saree = app.seed_product("saree", dec!(2500), Decimal::ZERO, 5).await;
    let coupon = app
        .seed_coupon("SAVE10", CouponDiscountType::Percentage, dec!(10), Decimal::ZERO, Some(10))
        .await;
    let user = Uuid::new_v4();
    app.state
        .services
        .cart
        .add_item(
            user,
            AddToCartInput {
                product_id: saree.product.id,
                variant_sku: None,
                variant_options: None,
                quantity: 2,
                price: None,
            },
        )
        .await
        .expect("add to cart");

    let placed = app
        .state
        .services
        .orders
        .create_order(
            Some(user),
            CreateOrderInput {
                items: None,
                shipping_address: serde_json::from_value(dhaka_address(Some("buyer@example.com")))
                    .expect("address"),
                payment_method: PaymentMethod::Gateway,
                coupon_code: Some("SAVE10".to_string()),
            },
        )
        .await
        .expect("place gateway order");

    PendingPayment {
        app,
        user,
        product_id: saree.product.id,
        coupon_id: coupon.id,
        order: placed.order.order,
    }
}

async fn reload(app: &TestApp, id: Uuid) -> order::Model {
    order::Entity::find_by_id(id)
        .one(&*app.state.db)
        .await
        .expect("load order")
        .expect("order exists")
}

fn location(response: &axum::response::Response) -> String {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

#[tokio::test]
async fn test_success_redirect_then_duplicate_ipn_confirms_once() {
    let PendingPayment {
        app,
        user,
        product_id,
        coupon_id,
        order,
    } = pending_payment().await;
    let number = order.order_number.as_str();

    let response = app
        .post_form(
            "/api/v1/payments/success",
            &[("tran_id", number), ("val_id", "val-1"), ("status", "VALID")],
        )
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        location(&response),
        format!("https://shop.test/payment/success?order={}", number)
    );

    let response = app
        .post_form(
            "/api/v1/payments/ipn",
            &[("tran_id", number), ("val_id", "val-1"), ("status", "VALID")],
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response_text(response).await,
        "IPN processed: payment already confirmed"
    );

    let paid = reload(&app, order.id).await;
    assert_eq!(paid.order_status, OrderStatus::Processing);
    assert_eq!(paid.payment_status, PaymentStatus::Paid);
    assert!(paid.paid_at.is_some());
    assert!(paid.stock_deducted);
    assert_eq!(paid.gateway_transaction_ref.as_deref(), Some("bank-val-1"));

    assert_eq!(app.product_stock(product_id).await, 3);
    assert_eq!(app.gateway.verify_calls.load(Ordering::SeqCst), 1);

    let coupon = Coupon::find_by_id(coupon_id)
        .one(&*app.state.db)
        .await
        .expect("load coupon")
        .expect("coupon exists");
    assert_eq!(coupon.used_count, 1);

    let carts = Cart::find().all(&*app.state.db).await.expect("carts");
    assert!(carts.iter().all(|c| c.user_id != user));

    let sent = app.notifier.wait_for(1).await;
    assert!(sent.contains(&(
        "buyer@example.com".to_string(),
        NotificationTemplate::PaymentConfirmed
    )));
}

#[tokio::test]
async fn test_fail_callback_never_downgrades_a_paid_order() {
    let PendingPayment { app, order, .. } = pending_payment().await;
    let number = order.order_number.as_str();

    let response = app
        .post_form("/api/v1/payments/ipn", &[("tran_id", number), ("val_id", "val-7")])
        .await;
    assert_eq!(
        response_text(response).await,
        "IPN processed: payment confirmed"
    );

    let response = app
        .post_form("/api/v1/payments/fail", &[("tran_id", number), ("status", "FAILED")])
        .await;
    assert_eq!(
        location(&response),
        format!("https://shop.test/payment/success?order={}", number)
    );

    let current = reload(&app, order.id).await;
    assert_eq!(current.order_status, OrderStatus::Processing);
    assert_eq!(current.payment_status, PaymentStatus::Paid);
}

#[tokio::test]
async fn test_rejected_verification_cancels_without_stock_change() {
    let PendingPayment {
        app,
        product_id,
        order,
        ..
    } = pending_payment().await;
    app.gateway.reject_verification.store(true, Ordering::SeqCst);
    let number = order.order_number.as_str();

    let response = app
        .post_form("/api/v1/payments/success", &[("tran_id", number), ("val_id", "forged")])
        .await;
    assert_eq!(
        location(&response),
        format!("https://shop.test/payment/failed?order={}", number)
    );

    let current = reload(&app, order.id).await;
    assert_eq!(current.order_status, OrderStatus::Cancelled);
    assert_eq!(current.payment_status, PaymentStatus::Failed);
    assert!(!current.stock_deducted);
    assert_eq!(app.product_stock(product_id).await, 5);
}

#[tokio::test]
async fn test_success_without_validation_id_is_not_trusted() {
    let PendingPayment { app, order, .. } = pending_payment().await;

    app.post_form(
        "/api/v1/payments/success",
        &[("tran_id", order.order_number.as_str()), ("status", "VALID")],
    )
    .await;

    let current = reload(&app, order.id).await;
    assert_eq!(current.order_status, OrderStatus::Cancelled);
    assert_eq!(app.gateway.verify_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_cancel_callback_lands_on_cancelled_page() {
    let PendingPayment { app, order, .. } = pending_payment().await;
    let number = order.order_number.as_str();

    let response = app
        .post_form("/api/v1/payments/cancel", &[("tran_id", number)])
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        location(&response),
        format!("https://shop.test/payment/cancelled?order={}", number)
    );

    let current = reload(&app, order.id).await;
    assert_eq!(current.order_status, OrderStatus::Cancelled);
    assert_eq!(current.payment_status, PaymentStatus::Failed);

    // A late success for a cancelled order changes nothing
    let response = app
        .post_form("/api/v1/payments/ipn", &[("tran_id", number), ("val_id", "val-9")])
        .await;
    assert_eq!(response_text(response).await, "IPN processed: no change");
    assert_eq!(reload(&app, order.id).await.order_status, OrderStatus::Cancelled);
}

#[tokio::test]
async fn test_unknown_or_missing_transactions() {
    let app = TestApp::new().await;

    let response = app
        .post_form("/api/v1/payments/ipn", &[("tran_id", "ORD-19990101-0001")])
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app.post_form("/api/v1/payments/ipn", &[("status", "VALID")]).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .post_form("/api/v1/payments/success", &[("tran_id", "ORD-19990101-0001")])
        .await;
    assert_eq!(location(&response), "https://shop.test/payment/failed");
}

#[tokio::test]
async fn test_concurrent_success_and_ipn_decrement_stock_once() {
    let PendingPayment {
        app,
        product_id,
        order,
        ..
    } = pending_payment().await;
    let payments = &app.state.services.payments;
    let callback = |val_id: &str| GatewayCallback {
        tran_id: Some(order.order_number.clone()),
        status: Some("VALID".to_string()),
        val_id: Some(val_id.to_string()),
    };

    let (redirect, ipn) = tokio::join!(
        payments.handle_callback(CallbackSource::Success, callback("val-1")),
        payments.handle_callback(CallbackSource::Ipn, callback("val-1")),
    );
    let outcomes = [redirect.expect("success callback"), ipn.expect("ipn callback")];

    assert!(outcomes.iter().all(PaymentOutcome::is_paid));
    assert_eq!(
        outcomes
            .iter()
            .filter(|o| matches!(o, PaymentOutcome::Confirmed(_)))
            .count(),
        1
    );
    assert_eq!(
        outcomes
            .iter()
            .filter(|o| matches!(o, PaymentOutcome::AlreadyConfirmed(_)))
            .count(),
        1
    );
    assert_eq!(app.product_stock(product_id).await, 3);

    let paid = reload(&app, order.id).await;
    assert_eq!(paid.payment_status, PaymentStatus::Paid);
    assert!(paid.stock_deducted);
}

#[tokio::test]
async fn test_unpaid_gateway_order_cannot_be_advanced_by_admin() {
    let PendingPayment {
        app,
        product_id,
        order,
        ..
    } = pending_payment().await;
    let orders = &app.state.services.orders;

    for status in [OrderStatus::Confirmed, OrderStatus::Processing] {
        let result = orders
            .update_status(order.id, UpdateOrderStatusInput { status, note: None })
            .await;
        assert_matches!(result, Err(ServiceError::InvalidOperation(_)));
    }
    assert_eq!(reload(&app, order.id).await.order_status, OrderStatus::Pending);

    // The gateway can still settle the order afterwards
    let number = order.order_number.as_str();
    app.post_form(
        "/api/v1/payments/success",
        &[("tran_id", number), ("val_id", "val-1"), ("status", "VALID")],
    )
    .await;

    let paid = reload(&app, order.id).await;
    assert_eq!(paid.order_status, OrderStatus::Processing);
    assert_eq!(paid.payment_status, PaymentStatus::Paid);
    assert!(paid.stock_deducted);
    assert_eq!(app.product_stock(product_id).await, 3);

    let shipped = orders
        .update_status(
            order.id,
            UpdateOrderStatusInput {
                status: OrderStatus::Shipped,
                note: None,
            },
        )
        .await
        .expect("ship paid order");
    assert_eq!(shipped.order_status, OrderStatus::Shipped);
}

#[tokio::test]
async fn test_admin_may_cancel_unpaid_gateway_order() {
    let PendingPayment { app, order, .. } = pending_payment().await;

    let cancelled = app
        .state
        .services
        .orders
        .update_status(
            order.id,
            UpdateOrderStatusInput {
                status: OrderStatus::Cancelled,
                note: Some("Buyer abandoned payment".to_string()),
            },
        )
        .await
        .expect("cancel unpaid gateway order");
    assert_eq!(cancelled.order_status, OrderStatus::Cancelled);
    assert!(!cancelled.stock_deducted);
}
