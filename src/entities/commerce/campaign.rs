use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Time-boxed automatic discount
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "campaigns")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub name: String,
    pub target: CampaignTarget,
    /// Targeted category; its descendants are included
    #[sea_orm(nullable)]
    pub category_id: Option<Uuid>,
    #[sea_orm(column_type = "Json")]
    pub product_ids: Json,
    pub discount_type: CampaignDiscountType,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub discount_value: Decimal,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    /// Higher wins when several campaigns match
    pub priority: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
pub enum CampaignTarget {
    #[sea_orm(string_value = "sitewide")]
    Sitewide,
    #[sea_orm(string_value = "category")]
    Category,
    #[sea_orm(string_value = "products")]
    Products,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
pub enum CampaignDiscountType {
    #[sea_orm(string_value = "flat")]
    Flat,
    #[sea_orm(string_value = "percentage")]
    Percentage,
}

impl Model {
    pub fn target_products(&self) -> Vec<Uuid> {
        serde_json::from_value(self.product_ids.clone()).unwrap_or_default()
    }

    /// Active flag set and `now` inside the campaign window
    pub fn is_running(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.start_date <= now && now <= self.end_date
    }
}
