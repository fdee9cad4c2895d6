mod common;

use assert_matches::assert_matches;
use axum::http::{Method, StatusCode};
use chrono::{Duration, Utc};
use common::{money, product_input, response_json, TestApp};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;
use storefront_api::{
    entities::commerce::{
        campaign::{CampaignDiscountType, CampaignTarget},
        coupon::CouponDiscountType,
    },
    errors::ServiceError,
    services::commerce::{
        checkout_service::{CheckoutItemInput, DestinationInput},
        shipping::ShippingZone,
        AddToCartInput, CheckoutRequest, CreateCampaignInput,
    },
};
use uuid::Uuid;

fn dhaka_city() -> DestinationInput {
    DestinationInput {
        district: Some("Dhaka".to_string()),
        upazila: Some("Dhanmondi".to_string()),
    }
}

fn guest_line(product_id: Uuid, quantity: i32) -> CheckoutItemInput {
    CheckoutItemInput {
        product_id,
        variant_sku: None,
        variant_options: None,
        quantity,
        price: None,
    }
}

#[tokio::test]
async fn test_guest_calculation_with_discounted_product_and_coupon() {
    let app = TestApp::new().await;
    let panjabi = app.seed_product("panjabi", dec!(1000), dec!(20), 10).await;
    app.seed_coupon("SAVE10", CouponDiscountType::Percentage, dec!(10), dec!(500), None)
        .await;

    let body = json!({
        "items": [{ "product_id": panjabi.product.id, "quantity": 2 }],
        "destination": { "district": "Dhaka", "upazila": "Dhanmondi" },
        "coupon_code": "save10"
    });
    let response = app
        .request(Method::POST, "/api/v1/checkout/calculate", Some(body), None, false)
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let breakdown = response_json(response).await;
    assert_eq!(money(&breakdown["subtotal"]), dec!(1600));
    assert_eq!(money(&breakdown["discount"]), dec!(160));
    assert_eq!(money(&breakdown["shipping"]), dec!(50));
    assert_eq!(money(&breakdown["tax"]), Decimal::ZERO);
    assert_eq!(money(&breakdown["total"]), dec!(1490.00));
    assert_eq!(breakdown["shipping_zone"], "dhaka_city");
    assert_eq!(breakdown["coupon"]["applied"], true);
    assert_eq!(breakdown["coupon"]["code"], "SAVE10");
}

#[tokio::test]
async fn test_large_percentage_coupon_has_no_implicit_cap() {
    let app = TestApp::new().await;
    let jamdani = app.seed_product("jamdani", dec!(5220), Decimal::ZERO, 20).await;
    app.seed_coupon("BIG30", CouponDiscountType::Percentage, dec!(30), dec!(510), None)
        .await;

    let breakdown = app
        .state
        .services
        .checkout
        .calculate(
            None,
            CheckoutRequest {
                items: Some(vec![guest_line(jamdani.product.id, 10)]),
                destination: dhaka_city(),
                coupon_code: Some("BIG30".to_string()),
            },
        )
        .await
        .expect("calculate");

    assert_eq!(breakdown.subtotal, dec!(52200));
    assert_eq!(breakdown.discount, dec!(15660.00));
    assert_eq!(breakdown.shipping, Decimal::ZERO);
    assert_eq!(breakdown.total, dec!(36540.00));
}

#[tokio::test]
async fn test_coupon_below_minimum_is_reported_not_raised() {
    let app = TestApp::new().await;
    let tupi = app.seed_product("tupi", dec!(300), Decimal::ZERO, 20).await;
    app.seed_coupon("BIGSPEND", CouponDiscountType::Fixed, dec!(200), dec!(5000), None)
        .await;

    let breakdown = app
        .state
        .services
        .checkout
        .calculate(
            None,
            CheckoutRequest {
                items: Some(vec![guest_line(tupi.product.id, 1)]),
                destination: dhaka_city(),
                coupon_code: Some("BIGSPEND".to_string()),
            },
        )
        .await
        .expect("calculate");

    let coupon = breakdown.coupon.expect("coupon evaluation");
    assert!(!coupon.applied);
    assert!(coupon
        .message
        .as_deref()
        .map_or(false, |m| m.contains("Minimum order amount")));
    assert_eq!(breakdown.discount, Decimal::ZERO);
    assert_eq!(breakdown.total, dec!(350));
}

#[tokio::test]
async fn test_free_shipping_coupon_waives_the_zone_rate() {
    let app = TestApp::new().await;
    let tupi = app.seed_product("tupi", dec!(300), Decimal::ZERO, 20).await;
    app.seed_coupon("SHIPFREE", CouponDiscountType::FreeShipping, Decimal::ZERO, Decimal::ZERO, None)
        .await;

    let breakdown = app
        .state
        .services
        .checkout
        .calculate(
            None,
            CheckoutRequest {
                items: Some(vec![guest_line(tupi.product.id, 1)]),
                destination: DestinationInput {
                    district: Some("Sylhet".to_string()),
                    upazila: Some("Sylhet Sadar".to_string()),
                },
                coupon_code: Some("shipfree".to_string()),
            },
        )
        .await
        .expect("calculate");

    assert!(breakdown.free_shipping);
    assert_eq!(breakdown.shipping_zone, Some(ShippingZone::OtherDistrict));
    assert_eq!(breakdown.shipping, Decimal::ZERO);
    assert_eq!(breakdown.total, dec!(300));
}

#[tokio::test]
async fn test_incomplete_destination_skips_shipping() {
    let app = TestApp::new().await;
    let tupi = app.seed_product("tupi", dec!(300), Decimal::ZERO, 20).await;

    let breakdown = app
        .state
        .services
        .checkout
        .calculate(
            None,
            CheckoutRequest {
                items: Some(vec![guest_line(tupi.product.id, 2)]),
                destination: DestinationInput {
                    district: Some("Dhaka".to_string()),
                    upazila: None,
                },
                coupon_code: None,
            },
        )
        .await
        .expect("calculate");

    assert!(!breakdown.address_complete);
    assert_eq!(breakdown.shipping, Decimal::ZERO);
    assert_eq!(breakdown.total, dec!(600));
    assert!(breakdown.message.is_some());
}

#[tokio::test]
async fn test_unknown_district_is_a_bad_request() {
    let app = TestApp::new().await;
    let tupi = app.seed_product("tupi", dec!(300), Decimal::ZERO, 20).await;

    let body = json!({
        "items": [{ "product_id": tupi.product.id, "quantity": 1 }],
        "destination": { "district": "Atlantis", "upazila": "Harbour" }
    });
    let response = app
        .request(Method::POST, "/api/v1/checkout/calculate", Some(body), None, false)
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_category_campaign_applies_to_subcategories_before_coupon() {
    let app = TestApp::new().await;
    let men = app.seed_category("men", None).await;
    let panjabi_category = app.seed_category("panjabi", Some(men)).await;

    let mut input = product_input("eid-panjabi", dec!(1000), Decimal::ZERO, 10);
    input.category_id = Some(panjabi_category);
    let panjabi = app
        .state
        .services
        .catalog
        .create_product(input)
        .await
        .expect("create product");

    let now = Utc::now();
    app.state
        .services
        .campaigns
        .create_campaign(CreateCampaignInput {
            name: "Eid sale".to_string(),
            target: CampaignTarget::Category,
            category_id: Some(men),
            product_ids: Vec::new(),
            discount_type: CampaignDiscountType::Percentage,
            discount_value: dec!(10),
            start_date: now - Duration::hours(1),
            end_date: now + Duration::days(7),
            priority: 1,
        })
        .await
        .expect("create campaign");
    app.seed_coupon("SAVE10", CouponDiscountType::Percentage, dec!(10), Decimal::ZERO, None)
        .await;

    let breakdown = app
        .state
        .services
        .checkout
        .calculate(
            None,
            CheckoutRequest {
                items: Some(vec![guest_line(panjabi.product.id, 1)]),
                destination: dhaka_city(),
                coupon_code: Some("SAVE10".to_string()),
            },
        )
        .await
        .expect("calculate");

    assert_eq!(breakdown.campaign_discount, dec!(100));
    assert_eq!(breakdown.coupon_discount, dec!(90));
    assert_eq!(breakdown.discount, dec!(190));
    assert_eq!(breakdown.total, dec!(860));
}

#[tokio::test]
async fn test_signed_in_calculation_uses_cart_snapshots() {
    let app = TestApp::new().await;
    let saree = app.seed_product("saree", dec!(2500), Decimal::ZERO, 10).await;
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

    let breakdown = app
        .state
        .services
        .checkout
        .calculate(
            Some(user),
            CheckoutRequest {
                items: None,
                destination: DestinationInput {
                    district: Some("Dhaka".to_string()),
                    upazila: Some("Savar".to_string()),
                },
                coupon_code: None,
            },
        )
        .await
        .expect("calculate");

    // 5000 lands in the reduced shipping tier
    assert_eq!(breakdown.subtotal, dec!(5000));
    assert_eq!(breakdown.shipping, dec!(30));
    assert_eq!(breakdown.total, dec!(5030));

    assert_matches!(
        app.state
            .services
            .checkout
            .calculate(
                None,
                CheckoutRequest {
                    items: None,
                    destination: dhaka_city(),
                    coupon_code: None,
                },
            )
            .await,
        Err(ServiceError::Unauthorized(_))
    );
}

#[tokio::test]
async fn test_validate_coupon_endpoint_evaluates_against_cart() {
    let app = TestApp::new().await;
    let saree = app.seed_product("saree", dec!(2500), Decimal::ZERO, 10).await;
    app.seed_coupon("SAVE10", CouponDiscountType::Percentage, dec!(10), dec!(500), None)
        .await;
    let user = Uuid::new_v4();

    let body = json!({ "product_id": saree.product.id, "quantity": 1 });
    let response = app
        .request(Method::POST, "/api/v1/cart/items", Some(body), Some(user), false)
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .request(
            Method::POST,
            "/api/v1/coupons/validate",
            Some(json!({ "code": "save10" })),
            Some(user),
            false,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let evaluation = response_json(response).await;
    assert_eq!(evaluation["applied"], true);
    assert_eq!(money(&evaluation["discount"]), dec!(250));

    let response = app
        .request(
            Method::POST,
            "/api/v1/coupons/validate",
            Some(json!({ "code": "NOPE" })),
            Some(user),
            false,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let evaluation = response_json(response).await;
    assert_eq!(evaluation["applied"], false);
    assert_eq!(evaluation["message"], "Invalid coupon code");
}
