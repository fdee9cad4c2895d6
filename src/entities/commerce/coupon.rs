use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Redeemable discount code
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "coupons")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    /// Stored upper-cased; lookups are case-insensitive
    #[sea_orm(unique)]
    pub code: String,
    pub discount_type: CouponDiscountType,
    /// Percentage (0-100) or fixed amount depending on `discount_type`
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub value: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub min_order_amount: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))", nullable)]
    pub max_discount_amount: Option<Decimal>,
    pub start_date: DateTime<Utc>,
    pub expiry_date: DateTime<Utc>,
    #[sea_orm(nullable)]
    pub max_usage: Option<i32>,
    pub used_count: i32,
    pub is_active: bool,
    /// Restricts the coupon to these products when non-empty
    #[sea_orm(column_type = "Json")]
    pub product_ids: Json,
    /// Restricts the coupon to these categories when non-empty
    #[sea_orm(column_type = "Json")]
    pub category_ids: Json,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
pub enum CouponDiscountType {
    #[sea_orm(string_value = "percentage")]
    Percentage,
    #[sea_orm(string_value = "fixed")]
    Fixed,
    #[sea_orm(string_value = "free_shipping")]
    FreeShipping,
}

impl Model {
    pub fn restricted_products(&self) -> Vec<Uuid> {
        serde_json::from_value(self.product_ids.clone()).unwrap_or_default()
    }

    pub fn restricted_categories(&self) -> Vec<Uuid> {
        serde_json::from_value(self.category_ids.clone()).unwrap_or_default()
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self.max_usage, Some(max) if self.used_count >= max)
    }
}
