use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Purchasable variant of a product with `has_variants = true`.
///
/// Pricing fields are optional overrides of the parent product's.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "product_variants")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub product_id: Uuid,
    #[sea_orm(unique)]
    pub sku: String,
    #[sea_orm(column_type = "Json")]
    pub options: Json, // Vec<VariantOption> serialized
    #[sea_orm(column_type = "Decimal(Some((19, 4)))", nullable)]
    pub base_price: Option<Decimal>,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))", nullable)]
    pub discount_percentage: Option<Decimal>,
    #[sea_orm(nullable)]
    pub discount_start: Option<DateTime<Utc>>,
    #[sea_orm(nullable)]
    pub discount_end: Option<DateTime<Utc>>,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub price: Decimal,
    pub stock: i32,
    #[sea_orm(nullable)]
    pub image: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::super::product::Entity",
        from = "Column::ProductId",
        to = "super::super::product::Column::Id"
    )]
    Product,
}

impl Related<super::super::product::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Product.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// One `name: value` pair of a variant, e.g. `Size: M`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VariantOption {
    pub name: String,
    pub value: String,
}

impl VariantOption {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Sorts options by name then value so equal selections compare equal.
pub fn normalize_options(mut options: Vec<VariantOption>) -> Vec<VariantOption> {
    options.sort();
    options.dedup();
    options
}

impl Model {
    /// Parsed option set; malformed JSON yields an empty set.
    pub fn option_list(&self) -> Vec<VariantOption> {
        serde_json::from_value(self.options.clone()).unwrap_or_default()
    }

    /// Display label such as `Size: M / Color: Red`
    pub fn label(&self) -> String {
        self.option_list()
            .iter()
            .map(|o| format!("{}: {}", o.name, o.value))
            .collect::<Vec<_>>()
            .join(" / ")
    }

    /// True when `selection` names exactly this variant's option set
    pub fn matches_options(&self, selection: &[VariantOption]) -> bool {
        normalize_options(self.option_list()) == normalize_options(selection.to_vec())
    }
}
