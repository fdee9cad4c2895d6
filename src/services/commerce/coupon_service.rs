use crate::{
    entities::commerce::{
        coupon::{self, CouponDiscountType},
        Coupon, CouponModel,
    },
    errors::ServiceError,
    services::commerce::pricing_service::round_money,
};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::{Condition, Expr},
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::{Validate, ValidationError};

static COUPON_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{3,32}$").expect("coupon code pattern is valid"));

fn validate_non_negative(value: &Decimal) -> Result<(), ValidationError> {
    if *value >= Decimal::ZERO {
        Ok(())
    } else {
        let mut err = ValidationError::new("range");
        err.message = Some("Amount cannot be negative".into());
        Err(err)
    }
}

/// Merchandise line as seen by coupon evaluation. `amount` is the line total
/// after campaign discounts.
#[derive(Debug, Clone, PartialEq)]
pub struct CouponLine {
    pub product_id: Uuid,
    pub category_id: Option<Uuid>,
    pub amount: Decimal,
}

/// Result of applying a coupon code to a set of lines.
///
/// Rejections are reported through `message`, never as errors.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CouponEvaluation {
    pub code: String,
    pub applied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coupon_id: Option<Uuid>,
    pub discount: Decimal,
    pub free_shipping: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CouponEvaluation {
    fn rejected(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            applied: false,
            coupon_id: None,
            discount: Decimal::ZERO,
            free_shipping: false,
            message: Some(message.into()),
        }
    }
}

pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

/// Evaluates `coupon` (looked up by `code`) against the order lines.
///
/// The minimum order amount is checked against the whole merchandise amount;
/// product and category restrictions narrow the discount base to eligible
/// lines. The discount never exceeds its base.
pub fn evaluate_coupon(
    coupon: Option<&CouponModel>,
    code: &str,
    lines: &[CouponLine],
    now: DateTime<Utc>,
) -> CouponEvaluation {
    let code = normalize_code(code);
    let Some(coupon) = coupon else {
        return CouponEvaluation::rejected(&code, "Invalid coupon code");
    };

    if !coupon.is_active {
        return CouponEvaluation::rejected(&code, "Coupon is not active");
    }
    if now < coupon.start_date {
        return CouponEvaluation::rejected(&code, "Coupon is not yet valid");
    }
    if now > coupon.expiry_date {
        return CouponEvaluation::rejected(&code, "Coupon has expired");
    }
    if coupon.is_exhausted() {
        return CouponEvaluation::rejected(&code, "Coupon usage limit reached");
    }

    let merchandise: Decimal = lines.iter().map(|l| l.amount).sum();
    if merchandise < coupon.min_order_amount {
        return CouponEvaluation::rejected(
            &code,
            format!(
                "Minimum order amount of {} required for this coupon",
                round_money(coupon.min_order_amount)
            ),
        );
    }

    let products = coupon.restricted_products();
    let categories = coupon.restricted_categories();
    let base: Decimal = if products.is_empty() && categories.is_empty() {
        merchandise
    } else {
        let eligible: Vec<&CouponLine> = lines
            .iter()
            .filter(|l| {
                products.contains(&l.product_id)
                    || l.category_id.map_or(false, |c| categories.contains(&c))
            })
            .collect();
        if eligible.is_empty() {
            return CouponEvaluation::rejected(&code, "Coupon does not apply to these items");
        }
        eligible.iter().map(|l| l.amount).sum()
    };

    let (discount, free_shipping) = match coupon.discount_type {
        CouponDiscountType::Percentage => {
            let raw = base * coupon.value / Decimal::ONE_HUNDRED;
            let capped = match coupon.max_discount_amount {
                Some(cap) if cap > Decimal::ZERO => raw.min(cap),
                _ => raw,
            };
            (capped, false)
        }
        CouponDiscountType::Fixed => (coupon.value, false),
        CouponDiscountType::FreeShipping => (Decimal::ZERO, true),
    };

    CouponEvaluation {
        code,
        applied: true,
        coupon_id: Some(coupon.id),
        discount: discount.max(Decimal::ZERO).min(base),
        free_shipping,
        message: None,
    }
}

/// Case-insensitive lookup by code
pub async fn find_by_code<C: ConnectionTrait>(
    conn: &C,
    code: &str,
) -> Result<Option<CouponModel>, ServiceError> {
    Ok(Coupon::find()
        .filter(coupon::Column::Code.eq(normalize_code(code)))
        .one(conn)
        .await?)
}

/// Increments `used_count` unless the coupon is already at `max_usage`.
///
/// Returns `false` when the limit was reached. Meant to run inside the
/// transaction that confirms the order.
pub async fn redeem_in<C: ConnectionTrait>(conn: &C, coupon_id: Uuid) -> Result<bool, ServiceError> {
    let result = Coupon::update_many()
        .col_expr(
            coupon::Column::UsedCount,
            Expr::col(coupon::Column::UsedCount).add(1),
        )
        .col_expr(coupon::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(coupon::Column::Id.eq(coupon_id))
        .filter(
            Condition::any()
                .add(coupon::Column::MaxUsage.is_null())
                .add(Expr::col(coupon::Column::UsedCount).lt(Expr::col(coupon::Column::MaxUsage))),
        )
        .exec(conn)
        .await?;

    Ok(result.rows_affected == 1)
}

/// Input for creating a coupon
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateCouponInput {
    #[validate(regex = "COUPON_CODE")]
    pub code: String,
    pub discount_type: CouponDiscountType,
    #[validate(custom = "validate_non_negative")]
    pub value: Decimal,
    #[serde(default)]
    #[validate(custom = "validate_non_negative")]
    pub min_order_amount: Decimal,
    pub max_discount_amount: Option<Decimal>,
    pub start_date: DateTime<Utc>,
    pub expiry_date: DateTime<Utc>,
    #[validate(range(min = 1))]
    pub max_usage: Option<i32>,
    #[serde(default)]
    pub product_ids: Vec<Uuid>,
    #[serde(default)]
    pub category_ids: Vec<Uuid>,
}

impl CreateCouponInput {
    fn check_rules(&self) -> Result<(), ServiceError> {
        if self.start_date >= self.expiry_date {
            return Err(ServiceError::ValidationError(
                "start_date must be before expiry_date".to_string(),
            ));
        }
        match self.discount_type {
            CouponDiscountType::Percentage if self.value > Decimal::ONE_HUNDRED => {
                Err(ServiceError::ValidationError(
                    "Percentage coupons cannot exceed 100".to_string(),
                ))
            }
            CouponDiscountType::Percentage | CouponDiscountType::Fixed
                if self.value <= Decimal::ZERO =>
            {
                Err(ServiceError::ValidationError(
                    "Coupon value must be greater than 0".to_string(),
                ))
            }
            _ => Ok(()),
        }
    }
}

/// Coupon administration
#[derive(Clone)]
pub struct CouponService {
    db: Arc<DatabaseConnection>,
}

impl CouponService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[instrument(skip(self, input), fields(code = %input.code))]
    pub async fn create_coupon(&self, input: CreateCouponInput) -> Result<CouponModel, ServiceError> {
        input.validate()?;
        input.check_rules()?;

        let now = Utc::now();
        let code = normalize_code(&input.code);
        let coupon = coupon::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(code.clone()),
            discount_type: Set(input.discount_type),
            value: Set(input.value),
            min_order_amount: Set(input.min_order_amount),
            max_discount_amount: Set(input.max_discount_amount),
            start_date: Set(input.start_date),
            expiry_date: Set(input.expiry_date),
            max_usage: Set(input.max_usage),
            used_count: Set(0),
            is_active: Set(true),
            product_ids: Set(serde_json::to_value(&input.product_ids)?),
            category_ids: Set(serde_json::to_value(&input.category_ids)?),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await
        .map_err(|e| ServiceError::from_db(e, &format!("Coupon {}", code)))?;

        info!(coupon_id = %coupon.id, code = %coupon.code, "Created coupon");
        Ok(coupon)
    }

    #[instrument(skip(self))]
    pub async fn list_coupons(
        &self,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<CouponModel>, u64), ServiceError> {
        let paginator = Coupon::find()
            .order_by_desc(coupon::Column::CreatedAt)
            .paginate(&*self.db, per_page.max(1));
        let total = paginator.num_items().await?;
        let coupons = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((coupons, total))
    }

    #[instrument(skip(self))]
    pub async fn deactivate_coupon(&self, coupon_id: Uuid) -> Result<CouponModel, ServiceError> {
        let coupon = Coupon::find_by_id(coupon_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Coupon {} not found", coupon_id)))?;

        let mut active: coupon::ActiveModel = coupon.into();
        active.is_active = Set(false);
        active.updated_at = Set(Utc::now());
        let updated = active.update(&*self.db).await?;

        info!(coupon_id = %coupon_id, "Deactivated coupon");
        Ok(updated)
    }
}
