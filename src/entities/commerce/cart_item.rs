use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::product_variant::VariantOption;

/// Cart line item.
///
/// The variant is identified by `variant_sku` (and `variant_id` when it was
/// resolved), or by the sorted `variant_options` selection.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "cart_items")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub cart_id: Uuid,
    pub product_id: Uuid,
    #[sea_orm(nullable)]
    pub variant_id: Option<Uuid>,
    #[sea_orm(nullable)]
    pub variant_sku: Option<String>,
    #[sea_orm(column_type = "Json", nullable)]
    pub variant_options: Option<Json>,
    pub quantity: i32,
    /// Unit price snapshot, refreshed when the cart is read
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub price_at_purchase: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::cart::Entity",
        from = "Column::CartId",
        to = "super::cart::Column::Id",
        on_delete = "Cascade"
    )]
    Cart,
}

impl Related<super::cart::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Cart.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Parsed option selection, if the item was added by options
    pub fn option_selection(&self) -> Option<Vec<VariantOption>> {
        self.variant_options
            .as_ref()
            .and_then(|json| serde_json::from_value(json.clone()).ok())
    }

    pub fn line_total(&self) -> Decimal {
        self.price_at_purchase * Decimal::from(self.quantity)
    }
}
