//! Stock ledger for products and variants.

use crate::{
    entities::commerce::{product_variant, Product, ProductVariant},
    entities::product,
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::Utc;
use metrics::counter;
use sea_orm::{
    sea_query::{Expr, SimpleExpr},
    ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockDirection {
    Increase,
    Decrease,
}

/// One quantity to move for a product, or a variant when `variant_sku` is set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLine {
    pub product_id: Uuid,
    pub variant_sku: Option<String>,
    pub quantity: i32,
}

/// Applied change, reported back so callers can publish it after commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StockChange {
    pub product_id: Uuid,
    pub sku: Option<String>,
    pub old_quantity: i32,
    pub new_quantity: i32,
}

impl StockChange {
    pub fn into_event(self) -> Event {
        Event::StockAdjusted {
            product_id: self.product_id,
            sku: self.sku,
            old_quantity: self.old_quantity,
            new_quantity: self.new_quantity,
        }
    }
}

fn next_quantity(current: i32, quantity: i32, direction: StockDirection) -> i32 {
    match direction {
        StockDirection::Increase => current.saturating_add(quantity),
        StockDirection::Decrease => current.saturating_sub(quantity).max(0),
    }
}

/// `stock + q`, or `stock - q` floored at zero, evaluated by the database
fn stock_expr<C: ColumnTrait>(column: C, quantity: i32, direction: StockDirection) -> SimpleExpr {
    match direction {
        StockDirection::Increase => Expr::col(column).add(quantity),
        StockDirection::Decrease => Expr::case(
            Expr::col(column).gte(quantity),
            Expr::col(column).sub(quantity),
        )
        .finally(0)
        .into(),
    }
}

/// Applies every line on `conn`, which is expected to be a transaction owned by
/// the caller. Lines pointing at missing products or variants are skipped.
pub async fn adjust_stock_in<C: ConnectionTrait>(
    conn: &C,
    lines: &[StockLine],
    direction: StockDirection,
) -> Result<Vec<StockChange>, ServiceError> {
    let now = Utc::now();
    let mut changes = Vec::with_capacity(lines.len());

    for line in lines.iter().filter(|l| l.quantity > 0) {
        let Some(product) = Product::find_by_id(line.product_id).one(conn).await? else {
            warn!(product_id = %line.product_id, "Stock adjustment skipped: product not found");
            continue;
        };

        let change = if product.has_variants {
            let Some(sku) = line.variant_sku.as_deref() else {
                warn!(product_id = %product.id, "Stock adjustment skipped: variant sku missing");
                continue;
            };
            let Some(variant) = ProductVariant::find()
                .filter(product_variant::Column::ProductId.eq(product.id))
                .filter(product_variant::Column::Sku.eq(sku))
                .one(conn)
                .await?
            else {
                warn!(product_id = %product.id, sku = %sku, "Stock adjustment skipped: variant not found");
                continue;
            };

            ProductVariant::update_many()
                .col_expr(
                    product_variant::Column::Stock,
                    stock_expr(product_variant::Column::Stock, line.quantity, direction),
                )
                .col_expr(product_variant::Column::UpdatedAt, Expr::value(now))
                .filter(product_variant::Column::Id.eq(variant.id))
                .exec(conn)
                .await?;

            StockChange {
                product_id: product.id,
                sku: Some(variant.sku),
                old_quantity: variant.stock,
                new_quantity: next_quantity(variant.stock, line.quantity, direction),
            }
        } else {
            Product::update_many()
                .col_expr(
                    product::Column::Stock,
                    stock_expr(product::Column::Stock, line.quantity, direction),
                )
                .col_expr(product::Column::UpdatedAt, Expr::value(now))
                .filter(product::Column::Id.eq(product.id))
                .exec(conn)
                .await?;

            StockChange {
                product_id: product.id,
                sku: None,
                old_quantity: product.stock,
                new_quantity: next_quantity(product.stock, line.quantity, direction),
            }
        };

        if direction == StockDirection::Decrease && change.old_quantity < line.quantity {
            warn!(
                product_id = %change.product_id,
                sku = ?change.sku,
                available = change.old_quantity,
                requested = line.quantity,
                "Stock clamped at zero"
            );
            counter!("storefront.stock.clamped", 1);
        }

        changes.push(change);
    }

    Ok(changes)
}

/// Stock ledger running each adjustment in its own transaction
#[derive(Clone)]
pub struct InventoryService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl InventoryService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Adjusts all lines atomically; any database error rolls everything back.
    #[instrument(skip(self, lines), fields(lines = lines.len()))]
    pub async fn adjust_stock(
        &self,
        lines: &[StockLine],
        direction: StockDirection,
    ) -> Result<Vec<StockChange>, ServiceError> {
        let txn = self.db.begin().await?;
        let changes = adjust_stock_in(&txn, lines, direction).await?;
        txn.commit().await?;

        info!(?direction, applied = changes.len(), "Stock adjusted");
        for change in &changes {
            self.event_sender
                .send_or_log(change.clone().into_event())
                .await;
        }
        Ok(changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decrease_floors_at_zero() {
        assert_eq!(next_quantity(3, 5, StockDirection::Decrease), 0);
        assert_eq!(next_quantity(10, 4, StockDirection::Decrease), 6);
        assert_eq!(next_quantity(10, 4, StockDirection::Increase), 14);
    }
}
