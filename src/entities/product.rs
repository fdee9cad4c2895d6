use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Product entity.
///
/// `price` is derived from the base price and the discount window and is
/// refreshed by `services::pricing` before every write.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "products")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub name: String,
    #[sea_orm(unique)]
    pub slug: String,
    #[sea_orm(nullable)]
    pub description: Option<String>,
    #[sea_orm(nullable)]
    pub category_id: Option<Uuid>,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub base_price: Decimal,
    /// Percentage off the base price, 0 when no discount is set
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub discount_percentage: Decimal,
    #[sea_orm(nullable)]
    pub discount_start: Option<DateTime<Utc>>,
    #[sea_orm(nullable)]
    pub discount_end: Option<DateTime<Utc>>,
    /// Effective price at the time of the last write
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub price: Decimal,
    pub stock: i32,
    pub has_variants: bool,
    /// Image URLs, first entry is the primary image
    #[sea_orm(column_type = "Json")]
    pub images: Json,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::commerce::product_variant::Entity")]
    Variants,
    #[sea_orm(
        belongs_to = "super::commerce::category::Entity",
        from = "Column::CategoryId",
        to = "super::commerce::category::Column::Id"
    )]
    Category,
}

impl Related<super::commerce::product_variant::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Variants.def()
    }
}

impl Related<super::commerce::category::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Category.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Primary image, if any
    pub fn primary_image(&self) -> Option<String> {
        self.images
            .as_array()
            .and_then(|images| images.first())
            .and_then(|image| image.as_str())
            .map(str::to_string)
    }
}
