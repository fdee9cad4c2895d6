use crate::{
    entities::commerce::{
        cart, cart_item, product_variant::normalize_options, Cart, CartItem, CartItemModel,
        CartModel, ProductVariantModel, VariantOption,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::commerce::{
        catalog_service::{self, ProductWithVariants, VariantSelector},
        pricing_service::round_money,
    },
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, ModelTrait,
    QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

/// Shopping cart service. Each user owns at most one cart, created on first use.
///
/// The `CartService` keeps the cart consistent with the catalog:
/// - Items snapshot their unit price in `price_at_purchase`
/// - Reading a cart drops lines whose product or variant is gone and
///   re-prices the rest
/// - Every mutation recomputes `total_price` inside the same transaction
///
/// # Examples
///
/// ```ignore
/// use storefront_api::services::commerce::{AddToCartInput, CartService};
///
/// let cart_service = CartService::new(db, event_sender);
///
/// let cart = cart_service
///     .add_item(user_id, AddToCartInput {
///         product_id,
///         variant_sku: Some("KURTA-M-RED".to_string()),
///         variant_options: None,
///         quantity: 2,
///         price: None,
///     })
///     .await?;
/// ```
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl CartService {
    /// Creates a new `CartService` instance.
    ///
    /// # Arguments
    ///
    /// * `db` - Database connection pool
    /// * `event_sender` - Event sender for publishing cart events
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Returns the user's cart after reconciling it with the catalog.
    ///
    /// Reconciliation:
    /// - Drops items whose product no longer exists
    /// - Drops items whose variant selection no longer matches a variant
    /// - Refreshes `price_at_purchase` when the current price differs at 2 dp
    /// - Recomputes and persists the total when anything changed
    ///
    /// Running it twice in a row changes nothing the second time.
    ///
    /// # Arguments
    ///
    /// * `user_id` - Owner of the cart
    ///
    /// # Returns
    ///
    /// * `Ok(CartWithItems)` - The reconciled cart, created empty if missing
    /// * `Err(ServiceError)` - Database transaction error
    #[instrument(skip(self))]
    pub async fn get_cart(&self, user_id: Uuid) -> Result<CartWithItems, ServiceError> {
        let now = Utc::now();
        let txn = self.db.begin().await?;

        let cart = get_or_create_cart(&txn, user_id, now).await?;
        let items = cart
            .find_related(CartItem)
            .order_by_asc(cart_item::Column::CreatedAt)
            .all(&txn)
            .await?;

        let mut products: HashMap<Uuid, Option<ProductWithVariants>> = HashMap::new();
        let mut kept = Vec::with_capacity(items.len());
        let mut dirty = false;

        for item in items {
            if !products.contains_key(&item.product_id) {
                let loaded = catalog_service::load_product(&txn, item.product_id).await?;
                products.insert(item.product_id, loaded);
            }
            let Some(Some(product)) = products.get(&item.product_id) else {
                warn!(item_id = %item.id, product_id = %item.product_id, "Dropping cart item: product removed");
                CartItem::delete_by_id(item.id).exec(&txn).await?;
                dirty = true;
                continue;
            };

            let selector = VariantSelector {
                sku: item.variant_sku.clone(),
                options: item.option_selection(),
            };
            let variant = match product.select_variant(&selector) {
                Ok(variant) => variant,
                Err(_) => {
                    warn!(item_id = %item.id, sku = ?item.variant_sku, "Dropping cart item: variant no longer matches");
                    CartItem::delete_by_id(item.id).exec(&txn).await?;
                    dirty = true;
                    continue;
                }
            };

            let current = product.unit_price(variant, now);
            let variant_id = variant.map(|v| v.id);
            if round_money(current) != round_money(item.price_at_purchase)
                || variant_id != item.variant_id
            {
                let mut active: cart_item::ActiveModel = item.into();
                active.price_at_purchase = Set(current);
                active.variant_id = Set(variant_id);
                active.updated_at = Set(now);
                kept.push(active.update(&txn).await?);
                dirty = true;
            } else {
                kept.push(item);
            }
        }

        let total = items_total(&kept);
        let cart = if dirty || round_money(total) != round_money(cart.total_price) {
            let mut active: cart::ActiveModel = cart.into();
            active.total_price = Set(total);
            active.updated_at = Set(now);
            active.update(&txn).await?
        } else {
            cart
        };

        txn.commit().await?;

        if dirty {
            info!(cart_id = %cart.id, user_id = %user_id, "Cart reconciled");
        }
        Ok(CartWithItems { cart, items: kept })
    }

    /// Adds an item to the cart or merges it into a matching line.
    ///
    /// The variant is found by full option set or by sku. Lines merge on
    /// `(product, variant_id)`, then `(product, sorted options)`, then the
    /// bare product. A merged line sums the quantities and takes the fresh
    /// price and variant snapshot.
    ///
    /// # Arguments
    ///
    /// * `user_id` - Owner of the cart; the cart is created if missing
    /// * `input` - Product, variant selection, quantity and optional price
    ///
    /// # Returns
    ///
    /// * `Ok(CartWithItems)` - Updated cart with recalculated total
    /// * `Err(ServiceError::NotFound)` - Product not found
    /// * `Err(ServiceError::InvalidVariant)` - No variant matches the selection
    /// * `Err(ServiceError::ValidationError)` - Quantity below 1
    #[instrument(skip(self, input), fields(product_id = %input.product_id))]
    pub async fn add_item(
        &self,
        user_id: Uuid,
        input: AddToCartInput,
    ) -> Result<CartWithItems, ServiceError> {
        input.validate()?;
        let now = Utc::now();
        let txn = self.db.begin().await?;

        let product = catalog_service::load_product(&txn, input.product_id)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Product {} not found", input.product_id))
            })?;

        let selector = VariantSelector {
            sku: input.variant_sku.clone(),
            options: input.variant_options.clone(),
        };
        let variant = product.select_variant(&selector)?;
        let unit_price = match input.price {
            Some(price) if price > Decimal::ZERO => price,
            _ => product.unit_price(variant, now),
        };

        let cart = get_or_create_cart(&txn, user_id, now).await?;
        let existing = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::ProductId.eq(input.product_id))
            .all(&txn)
            .await?;

        let (variant_id, variant_sku, variant_options) = variant_snapshot(variant)?;

        match find_merge_target(&existing, variant) {
            Some(item) => {
                let quantity = item.quantity + input.quantity;
                let mut active: cart_item::ActiveModel = item.clone().into();
                active.quantity = Set(quantity);
                active.price_at_purchase = Set(unit_price);
                active.variant_id = Set(variant_id);
                active.variant_sku = Set(variant_sku);
                active.variant_options = Set(variant_options);
                active.updated_at = Set(now);
                active.update(&txn).await?;
            }
            None => {
                cart_item::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    cart_id: Set(cart.id),
                    product_id: Set(input.product_id),
                    variant_id: Set(variant_id),
                    variant_sku: Set(variant_sku),
                    variant_options: Set(variant_options),
                    quantity: Set(input.quantity),
                    price_at_purchase: Set(unit_price),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(&txn)
                .await?;
            }
        }

        let updated = recalculate_cart_total(&txn, cart, now).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartUpdated {
                cart_id: updated.cart.id,
                user_id,
            })
            .await;

        info!(
            cart_id = %updated.cart.id,
            product_id = %input.product_id,
            quantity = input.quantity,
            "Added item to cart"
        );
        Ok(updated)
    }

    /// Sets the quantity of one cart line.
    ///
    /// # Returns
    ///
    /// * `Ok(CartWithItems)` - Updated cart
    /// * `Err(ServiceError::ValidationError)` - Quantity below 1
    /// * `Err(ServiceError::NotFound)` - Cart or item not found
    #[instrument(skip(self))]
    pub async fn update_item_quantity(
        &self,
        user_id: Uuid,
        item_id: Uuid,
        quantity: i32,
    ) -> Result<CartWithItems, ServiceError> {
        if quantity < 1 {
            return Err(ServiceError::ValidationError(
                "quantity must be at least 1".to_string(),
            ));
        }
        let now = Utc::now();
        let txn = self.db.begin().await?;

        let cart = find_cart(&txn, user_id).await?;
        let item = CartItem::find_by_id(item_id)
            .filter(cart_item::Column::CartId.eq(cart.id))
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Cart item {} not found", item_id)))?;

        let mut active: cart_item::ActiveModel = item.into();
        active.quantity = Set(quantity);
        active.updated_at = Set(now);
        active.update(&txn).await?;

        let updated = recalculate_cart_total(&txn, cart, now).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartUpdated {
                cart_id: updated.cart.id,
                user_id,
            })
            .await;
        Ok(updated)
    }

    /// Removes one line. Removing an item that is not in the cart is a no-op.
    ///
    /// # Returns
    ///
    /// * `Ok(CartWithItems)` - Updated cart
    /// * `Err(ServiceError::NotFound)` - The user has no cart
    #[instrument(skip(self))]
    pub async fn remove_item(
        &self,
        user_id: Uuid,
        item_id: Uuid,
    ) -> Result<CartWithItems, ServiceError> {
        let now = Utc::now();
        let txn = self.db.begin().await?;

        let cart = find_cart(&txn, user_id).await?;
        CartItem::delete_many()
            .filter(cart_item::Column::Id.eq(item_id))
            .filter(cart_item::Column::CartId.eq(cart.id))
            .exec(&txn)
            .await?;

        let updated = recalculate_cart_total(&txn, cart, now).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartUpdated {
                cart_id: updated.cart.id,
                user_id,
            })
            .await;
        Ok(updated)
    }

    /// Deletes the user's cart and its items.
    #[instrument(skip(self))]
    pub async fn clear_cart(&self, user_id: Uuid) -> Result<(), ServiceError> {
        let txn = self.db.begin().await?;
        let removed = clear_cart_in(&txn, user_id).await?;
        txn.commit().await?;

        if removed {
            self.event_sender
                .send_or_log(Event::CartCleared { user_id })
                .await;
        }
        Ok(())
    }
}

/// Cart with its items
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartWithItems {
    #[serde(flatten)]
    pub cart: CartModel,
    pub items: Vec<CartItemModel>,
}

/// Input for adding an item to a cart
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AddToCartInput {
    pub product_id: Uuid,
    pub variant_sku: Option<String>,
    pub variant_options: Option<Vec<VariantOption>>,
    #[validate(range(min = 1))]
    pub quantity: i32,
    /// Client-supplied unit price, used when positive
    pub price: Option<Decimal>,
}

/// Deletes the user's cart inside the caller's transaction. Returns whether a
/// cart existed.
pub async fn clear_cart_in<C: ConnectionTrait>(conn: &C, user_id: Uuid) -> Result<bool, ServiceError> {
    let Some(cart) = Cart::find()
        .filter(cart::Column::UserId.eq(user_id))
        .one(conn)
        .await?
    else {
        return Ok(false);
    };

    CartItem::delete_many()
        .filter(cart_item::Column::CartId.eq(cart.id))
        .exec(conn)
        .await?;
    Cart::delete_by_id(cart.id).exec(conn).await?;
    Ok(true)
}

/// Loads the user's cart with its items, without reconciling.
pub async fn load_cart<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
) -> Result<Option<CartWithItems>, ServiceError> {
    let Some(cart) = Cart::find()
        .filter(cart::Column::UserId.eq(user_id))
        .one(conn)
        .await?
    else {
        return Ok(None);
    };
    let items = cart
        .find_related(CartItem)
        .order_by_asc(cart_item::Column::CreatedAt)
        .all(conn)
        .await?;
    Ok(Some(CartWithItems { cart, items }))
}

async fn find_cart<C: ConnectionTrait>(conn: &C, user_id: Uuid) -> Result<CartModel, ServiceError> {
    Cart::find()
        .filter(cart::Column::UserId.eq(user_id))
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Cart for user {} not found", user_id)))
}

async fn get_or_create_cart<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
    now: DateTime<Utc>,
) -> Result<CartModel, ServiceError> {
    if let Some(cart) = Cart::find()
        .filter(cart::Column::UserId.eq(user_id))
        .one(conn)
        .await?
    {
        return Ok(cart);
    }

    let cart = cart::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(user_id),
        total_price: Set(Decimal::ZERO),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(conn)
    .await
    .map_err(|e| ServiceError::from_db(e, "Cart"))?;

    info!(cart_id = %cart.id, user_id = %user_id, "Created cart");
    Ok(cart)
}

async fn recalculate_cart_total<C: ConnectionTrait>(
    conn: &C,
    cart: CartModel,
    now: DateTime<Utc>,
) -> Result<CartWithItems, ServiceError> {
    let items = cart
        .find_related(CartItem)
        .order_by_asc(cart_item::Column::CreatedAt)
        .all(conn)
        .await?;

    let mut active: cart::ActiveModel = cart.into();
    active.total_price = Set(items_total(&items));
    active.updated_at = Set(now);
    let cart = active.update(conn).await?;

    Ok(CartWithItems { cart, items })
}

fn items_total(items: &[CartItemModel]) -> Decimal {
    items.iter().map(CartItemModel::line_total).sum()
}

type VariantSnapshot = (Option<Uuid>, Option<String>, Option<serde_json::Value>);

fn variant_snapshot(variant: Option<&ProductVariantModel>) -> Result<VariantSnapshot, ServiceError> {
    match variant {
        Some(v) => Ok((
            Some(v.id),
            Some(v.sku.clone()),
            Some(serde_json::to_value(normalize_options(v.option_list()))?),
        )),
        None => Ok((None, None, None)),
    }
}

fn find_merge_target<'a>(
    existing: &'a [CartItemModel],
    variant: Option<&ProductVariantModel>,
) -> Option<&'a CartItemModel> {
    match variant {
        Some(v) => {
            let options = normalize_options(v.option_list());
            existing
                .iter()
                .find(|i| i.variant_id == Some(v.id))
                .or_else(|| {
                    existing.iter().find(|i| {
                        i.option_selection()
                            .map(normalize_options)
                            .map_or(false, |sel| sel == options)
                    })
                })
        }
        None => existing.iter().find(|i| {
            i.variant_id.is_none()
                && i.variant_sku.is_none()
                && i.option_selection().map_or(true, |sel| sel.is_empty())
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn item(variant_id: Option<Uuid>, options: Option<serde_json::Value>) -> CartItemModel {
        CartItemModel {
            id: Uuid::new_v4(),
            cart_id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            variant_id,
            variant_sku: variant_id.map(|_| "SKU".to_string()),
            variant_options: options,
            quantity: 1,
            price_at_purchase: dec!(100),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn variant(options: serde_json::Value) -> ProductVariantModel {
        ProductVariantModel {
            id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            sku: "KURTA-M-RED".into(),
            options,
            base_price: None,
            discount_percentage: None,
            discount_start: None,
            discount_end: None,
            price: dec!(100),
            stock: 3,
            image: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn merges_by_variant_id_first() {
        let v = variant(serde_json::json!([{"name": "Size", "value": "M"}]));
        let mut by_id = item(Some(v.id), None);
        by_id.quantity = 7;
        let other = item(Some(Uuid::new_v4()), None);
        let items = vec![other, by_id.clone()];
        assert_eq!(find_merge_target(&items, Some(&v)).map(|i| i.id), Some(by_id.id));
    }

    #[test]
    fn merges_by_sorted_options_when_id_missing() {
        let v = variant(serde_json::json!([
            {"name": "Size", "value": "M"},
            {"name": "Color", "value": "Red"}
        ]));
        let legacy = item(
            None,
            Some(serde_json::json!([
                {"name": "Color", "value": "Red"},
                {"name": "Size", "value": "M"}
            ])),
        );
        let items = vec![legacy.clone()];
        assert_eq!(find_merge_target(&items, Some(&v)).map(|i| i.id), Some(legacy.id));
    }

    #[test]
    fn plain_product_merges_only_with_plain_lines() {
        let with_variant = item(Some(Uuid::new_v4()), None);
        let plain = item(None, None);
        let items = vec![with_variant, plain.clone()];
        assert_eq!(find_merge_target(&items, None).map(|i| i.id), Some(plain.id));
    }

    #[test]
    fn total_sums_snapshots() {
        let mut a = item(None, None);
        a.quantity = 2;
        a.price_at_purchase = dec!(800);
        let mut b = item(None, None);
        b.price_at_purchase = dec!(45.50);
        assert_eq!(items_total(&[a, b]), dec!(1645.50));
    }
}
