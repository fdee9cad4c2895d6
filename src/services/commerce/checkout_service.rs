use crate::{
    config::{AppConfig, ShippingConfig},
    entities::commerce::CouponModel,
    errors::ServiceError,
    services::commerce::{
        campaign_service::{self, CampaignMatcher},
        cart_service,
        catalog_service::{self, VariantSelector},
        coupon_service::{self, CouponEvaluation, CouponLine},
        pricing_service::round_money,
        shipping::{self, Destination, ShippingZone},
    },
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{ConnectionTrait, DatabaseConnection};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use uuid::Uuid;
use validator::Validate;

pub const ADDRESS_INCOMPLETE_MESSAGE: &str =
    "Select a district and upazila to calculate shipping and tax";

/// One priced order line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricedLine {
    pub product_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_id: Option<Uuid>,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant_sku: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub quantity: i32,
    pub unit_price: Decimal,
    /// Per-unit campaign discount
    pub campaign_discount: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub campaign_id: Option<Uuid>,
}

impl PricedLine {
    pub fn line_subtotal(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }

    pub fn line_campaign_discount(&self) -> Decimal {
        self.campaign_discount * Decimal::from(self.quantity)
    }

    fn coupon_line(&self) -> CouponLine {
        CouponLine {
            product_id: self.product_id,
            category_id: self.category_id,
            amount: self.line_subtotal() - self.line_campaign_discount(),
        }
    }

    /// Applies the best running campaign for this line
    pub fn with_campaign(mut self, matcher: &CampaignMatcher) -> Self {
        if let Some((campaign, off)) =
            matcher.best_for(self.product_id, self.category_id, self.unit_price)
        {
            self.campaign_discount = off;
            self.campaign_id = Some(campaign.id);
        }
        self
    }
}

/// Coupon code together with the coupon it resolved to, if any
#[derive(Debug, Clone, Copy)]
pub struct CouponQuery<'a> {
    pub code: &'a str,
    pub coupon: Option<&'a CouponModel>,
}

/// Checkout totals. Every amount is rounded to 2 dp and
/// `total = subtotal - discount + shipping + tax`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceBreakdown {
    pub subtotal: Decimal,
    pub campaign_discount: Decimal,
    pub coupon_discount: Decimal,
    pub discount: Decimal,
    pub shipping: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
    pub free_shipping: bool,
    pub shipping_zone: Option<ShippingZone>,
    pub address_complete: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coupon: Option<CouponEvaluation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Computes the checkout breakdown for already priced lines.
///
/// Campaign discounts come first; the coupon is evaluated on what is left.
/// Shipping uses the post-discount subtotal and is skipped, together with
/// tax, while the destination is incomplete.
pub fn compute_breakdown(
    lines: &[PricedLine],
    destination: Destination,
    coupon: Option<CouponQuery<'_>>,
    shipping_config: &ShippingConfig,
    tax_rate: Decimal,
    now: DateTime<Utc>,
) -> PriceBreakdown {
    let subtotal: Decimal = lines.iter().map(PricedLine::line_subtotal).sum();
    let campaign_discount: Decimal = lines.iter().map(PricedLine::line_campaign_discount).sum();

    let evaluation = coupon.map(|q| {
        let coupon_lines: Vec<CouponLine> = lines.iter().map(PricedLine::coupon_line).collect();
        coupon_service::evaluate_coupon(q.coupon, q.code, &coupon_lines, now)
    });
    let coupon_discount = evaluation
        .as_ref()
        .map_or(Decimal::ZERO, |e| e.discount);
    let free_shipping = evaluation.as_ref().map_or(false, |e| e.free_shipping);

    let discount = round_money((campaign_discount + coupon_discount).min(subtotal));
    let subtotal = round_money(subtotal);
    let after_discount = subtotal - discount;

    let (shipping, tax, zone, complete, message) = match destination {
        Destination::Incomplete => (
            Decimal::ZERO,
            Decimal::ZERO,
            None,
            false,
            Some(ADDRESS_INCOMPLETE_MESSAGE.to_string()),
        ),
        Destination::Resolved(zone) => (
            round_money(shipping::shipping_fee(
                shipping_config,
                after_discount,
                zone,
                free_shipping,
            )),
            round_money(after_discount * tax_rate),
            Some(zone),
            true,
            None,
        ),
    };

    PriceBreakdown {
        subtotal,
        campaign_discount: round_money(campaign_discount.min(subtotal)),
        coupon_discount: round_money(coupon_discount),
        discount,
        shipping,
        tax,
        total: after_discount + shipping + tax,
        free_shipping,
        shipping_zone: zone,
        address_complete: complete,
        coupon: evaluation,
        message,
    }
}

/// Guest-supplied checkout line
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CheckoutItemInput {
    pub product_id: Uuid,
    pub variant_sku: Option<String>,
    pub variant_options: Option<Vec<crate::entities::commerce::VariantOption>>,
    #[validate(range(min = 1))]
    pub quantity: i32,
    /// Client-side unit price, honored by the calculator when positive
    pub price: Option<Decimal>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DestinationInput {
    pub district: Option<String>,
    pub upazila: Option<String>,
}

/// Request body of the checkout calculator
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct CheckoutRequest {
    /// Guest lines; the caller's cart is used when absent
    #[validate]
    pub items: Option<Vec<CheckoutItemInput>>,
    #[serde(default)]
    pub destination: DestinationInput,
    pub coupon_code: Option<String>,
}

/// Lines, breakdown and the coupon row behind a priced checkout
#[derive(Debug, Clone)]
pub struct Quote {
    pub lines: Vec<PricedLine>,
    pub breakdown: PriceBreakdown,
    pub coupon: Option<CouponModel>,
}

impl Quote {
    /// Coupon that was actually applied
    pub fn applied_coupon(&self) -> Option<&CouponModel> {
        match &self.breakdown.coupon {
            Some(eval) if eval.applied => self.coupon.as_ref(),
            _ => None,
        }
    }
}

/// Prices guest lines from the catalog. Unknown products are `NotFound` and
/// unknown variants `InvalidVariant`.
pub async fn price_items<C: ConnectionTrait>(
    conn: &C,
    items: &[CheckoutItemInput],
    honor_client_price: bool,
    now: DateTime<Utc>,
) -> Result<Vec<PricedLine>, ServiceError> {
    let mut lines = Vec::with_capacity(items.len());
    for item in items {
        let product = catalog_service::load_product(conn, item.product_id)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Product {} not found", item.product_id))
            })?;
        let variant = product.select_variant(&VariantSelector {
            sku: item.variant_sku.clone(),
            options: item.variant_options.clone(),
        })?;

        let unit_price = match item.price {
            Some(price) if honor_client_price && price > Decimal::ZERO => price,
            _ => product.unit_price(variant, now),
        };

        lines.push(PricedLine {
            product_id: product.product.id,
            category_id: product.product.category_id,
            name: product.product.name.clone(),
            variant_sku: variant.map(|v| v.sku.clone()),
            variant_label: variant.map(|v| v.label()),
            image: product.representative_image(variant),
            quantity: item.quantity,
            unit_price,
            campaign_discount: Decimal::ZERO,
            campaign_id: None,
        });
    }
    Ok(lines)
}

/// Prices the user's cart from its persisted snapshots
pub async fn price_cart<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
) -> Result<Vec<PricedLine>, ServiceError> {
    let Some(cart) = cart_service::load_cart(conn, user_id).await? else {
        return Ok(Vec::new());
    };

    let mut lines = Vec::with_capacity(cart.items.len());
    for item in cart.items {
        let Some(product) = catalog_service::load_product(conn, item.product_id).await? else {
            warn!(item_id = %item.id, "Skipping cart item for missing product");
            continue;
        };
        let variant = item
            .variant_sku
            .as_deref()
            .and_then(|sku| product.variants.iter().find(|v| v.sku == sku));

        lines.push(PricedLine {
            product_id: item.product_id,
            category_id: product.product.category_id,
            name: product.product.name.clone(),
            variant_sku: item.variant_sku.clone(),
            variant_label: variant.map(|v| v.label()),
            image: product.representative_image(variant),
            quantity: item.quantity,
            unit_price: item.price_at_purchase,
            campaign_discount: Decimal::ZERO,
            campaign_id: None,
        });
    }
    Ok(lines)
}

/// Applies campaigns, looks up the coupon and destination, and computes the
/// breakdown. Shared by the calculator and order creation.
pub async fn quote_lines<C: ConnectionTrait>(
    conn: &C,
    config: &AppConfig,
    lines: Vec<PricedLine>,
    destination: &DestinationInput,
    coupon_code: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Quote, ServiceError> {
    let destination =
        shipping::lookup_destination(destination.district.as_deref(), destination.upazila.as_deref())?;

    let matcher = campaign_service::load_matcher(conn, now).await?;
    let lines: Vec<PricedLine> = if matcher.is_empty() {
        lines
    } else {
        lines.into_iter().map(|l| l.with_campaign(&matcher)).collect()
    };

    let code = coupon_code.map(str::trim).filter(|c| !c.is_empty());
    let coupon = match code {
        Some(code) => coupon_service::find_by_code(conn, code).await?,
        None => None,
    };

    let breakdown = compute_breakdown(
        &lines,
        destination,
        code.map(|code| CouponQuery {
            code,
            coupon: coupon.as_ref(),
        }),
        &config.shipping,
        config.tax_rate(),
        now,
    );

    Ok(Quote {
        lines,
        breakdown,
        coupon,
    })
}

/// Checkout calculator
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    config: Arc<AppConfig>,
}

impl CheckoutService {
    pub fn new(db: Arc<DatabaseConnection>, config: Arc<AppConfig>) -> Self {
        Self { db, config }
    }

    /// Prices guest lines or the caller's cart against a destination and an
    /// optional coupon. Coupon problems and an incomplete address are
    /// reported in the breakdown; unknown destinations are errors.
    #[instrument(skip(self, request))]
    pub async fn calculate(
        &self,
        user_id: Option<Uuid>,
        request: CheckoutRequest,
    ) -> Result<PriceBreakdown, ServiceError> {
        request.validate()?;
        let now = Utc::now();

        let lines = match (&request.items, user_id) {
            (Some(items), _) => price_items(&*self.db, items, true, now).await?,
            (None, Some(user_id)) => price_cart(&*self.db, user_id).await?,
            (None, None) => {
                return Err(ServiceError::Unauthorized(
                    "Sign in or provide items to calculate checkout".to_string(),
                ))
            }
        };
        if lines.is_empty() {
            return Err(ServiceError::ValidationError(
                "No items to check out".to_string(),
            ));
        }

        let quote = quote_lines(
            &*self.db,
            &self.config,
            lines,
            &request.destination,
            request.coupon_code.as_deref(),
            now,
        )
        .await?;

        debug!(total = %quote.breakdown.total, "Checkout calculated");
        Ok(quote.breakdown)
    }

    /// Evaluates a coupon code against the caller's cart
    #[instrument(skip(self))]
    pub async fn validate_coupon(
        &self,
        user_id: Uuid,
        code: &str,
    ) -> Result<CouponEvaluation, ServiceError> {
        let now = Utc::now();
        let lines = price_cart(&*self.db, user_id).await?;
        let matcher = campaign_service::load_matcher(&*self.db, now).await?;
        let coupon_lines: Vec<CouponLine> = lines
            .into_iter()
            .map(|l| l.with_campaign(&matcher).coupon_line())
            .collect();

        let coupon = coupon_service::find_by_code(&*self.db, code).await?;
        Ok(coupon_service::evaluate_coupon(
            coupon.as_ref(),
            code,
            &coupon_lines,
            now,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::commerce::coupon::CouponDiscountType;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn line(unit: Decimal, qty: i32) -> PricedLine {
        PricedLine {
            product_id: Uuid::new_v4(),
            category_id: None,
            name: "Panjabi".into(),
            variant_sku: None,
            variant_label: None,
            image: None,
            quantity: qty,
            unit_price: unit,
            campaign_discount: Decimal::ZERO,
            campaign_id: None,
        }
    }

    fn coupon(code: &str, value: Decimal, min: Decimal) -> CouponModel {
        let now = Utc::now();
        CouponModel {
            id: Uuid::new_v4(),
            code: code.into(),
            discount_type: CouponDiscountType::Percentage,
            value,
            min_order_amount: min,
            max_discount_amount: None,
            start_date: now - Duration::days(1),
            expiry_date: now + Duration::days(1),
            max_usage: None,
            used_count: 0,
            is_active: true,
            product_ids: serde_json::json!([]),
            category_ids: serde_json::json!([]),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn discounted_product_with_coupon_in_city() {
        let save10 = coupon("SAVE10", dec!(10), dec!(500));
        let breakdown = compute_breakdown(
            &[line(dec!(800), 2)],
            Destination::Resolved(ShippingZone::DhakaCity),
            Some(CouponQuery {
                code: "save10",
                coupon: Some(&save10),
            }),
            &ShippingConfig::default(),
            Decimal::ZERO,
            Utc::now(),
        );

        assert_eq!(breakdown.subtotal, dec!(1600));
        assert_eq!(breakdown.discount, dec!(160));
        assert_eq!(breakdown.shipping, dec!(50));
        assert_eq!(breakdown.tax, Decimal::ZERO);
        assert_eq!(breakdown.total, dec!(1490.00));
    }

    #[test]
    fn big_order_gets_free_shipping_and_full_percentage() {
        let big30 = coupon("BIG30", dec!(30), dec!(510));
        let breakdown = compute_breakdown(
            &[line(dec!(5220), 10)],
            Destination::Resolved(ShippingZone::OtherDistrict),
            Some(CouponQuery {
                code: "BIG30",
                coupon: Some(&big30),
            }),
            &ShippingConfig::default(),
            Decimal::ZERO,
            Utc::now(),
        );

        assert_eq!(breakdown.subtotal, dec!(52200));
        assert_eq!(breakdown.discount, dec!(15660.00));
        assert_eq!(breakdown.shipping, Decimal::ZERO);
        assert_eq!(breakdown.total, dec!(36540.00));
    }

    #[test]
    fn incomplete_address_skips_shipping_and_tax() {
        let breakdown = compute_breakdown(
            &[line(dec!(300), 1)],
            Destination::Incomplete,
            None,
            &ShippingConfig::default(),
            dec!(0.05),
            Utc::now(),
        );
        assert!(!breakdown.address_complete);
        assert_eq!(breakdown.shipping, Decimal::ZERO);
        assert_eq!(breakdown.tax, Decimal::ZERO);
        assert_eq!(breakdown.total, dec!(300));
        assert_eq!(breakdown.message.as_deref(), Some(ADDRESS_INCOMPLETE_MESSAGE));
    }

    #[test]
    fn tax_applies_to_discounted_subtotal() {
        let breakdown = compute_breakdown(
            &[line(dec!(1000), 1)],
            Destination::Resolved(ShippingZone::DhakaOutside),
            None,
            &ShippingConfig::default(),
            dec!(0.075),
            Utc::now(),
        );
        assert_eq!(breakdown.tax, dec!(75.00));
        assert_eq!(breakdown.total, dec!(1175.00));
    }

    #[test]
    fn campaign_and_coupon_never_exceed_subtotal() {
        let mut l = line(dec!(100), 2);
        l.campaign_discount = dec!(90);
        let mut fixed = coupon("TAKE50", dec!(500), Decimal::ZERO);
        fixed.discount_type = CouponDiscountType::Fixed;

        let breakdown = compute_breakdown(
            &[l],
            Destination::Resolved(ShippingZone::DhakaCity),
            Some(CouponQuery {
                code: "TAKE50",
                coupon: Some(&fixed),
            }),
            &ShippingConfig::default(),
            Decimal::ZERO,
            Utc::now(),
        );

        assert_eq!(breakdown.campaign_discount, dec!(180));
        assert_eq!(breakdown.coupon_discount, dec!(20));
        assert_eq!(breakdown.discount, dec!(200));
        assert_eq!(breakdown.total, breakdown.shipping);
    }

    #[test]
    fn unknown_coupon_is_reported_not_raised() {
        let breakdown = compute_breakdown(
            &[line(dec!(100), 1)],
            Destination::Resolved(ShippingZone::DhakaCity),
            Some(CouponQuery {
                code: "GHOST",
                coupon: None,
            }),
            &ShippingConfig::default(),
            Decimal::ZERO,
            Utc::now(),
        );
        let eval = breakdown.coupon.unwrap();
        assert!(!eval.applied);
        assert_eq!(breakdown.discount, Decimal::ZERO);
        assert_eq!(breakdown.total, dec!(150));
    }
}
