use crate::{
    config::AppConfig,
    entities::order::{
        self, Entity as OrderEntity, Model as OrderModel, OrderStatus, PaymentMethod,
        PaymentStatus,
    },
    entities::order_item::{self, Entity as OrderItemEntity, Model as OrderItemModel},
    entities::order_sequence,
    entities::order_status_history::{self, Entity as OrderHistoryEntity},
    errors::ServiceError,
    events::{Event, EventSender},
    notifications::{self, NotificationTemplate, Notifier},
    services::{
        commerce::{
            cart_service,
            checkout_service::{self, CheckoutItemInput, DestinationInput, PriceBreakdown, PricedLine},
            coupon_service,
            shipping::{self, Destination, ShippingAddress},
        },
        inventory::{self, StockChange, StockDirection, StockLine},
        order_status,
        payment_gateway::{PaymentCustomer, PaymentGateway, PaymentInitRequest},
    },
};
use chrono::{NaiveDate, Utc};
use metrics::counter;
use sea_orm::{
    sea_query::{Expr, OnConflict},
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

/// `ORD-YYYYMMDD-NNNN`
pub fn format_order_number(date: NaiveDate, sequence: i32) -> String {
    format!("ORD-{}-{:04}", date.format("%Y%m%d"), sequence)
}

/// Claims the next order number for `date` inside the caller's transaction.
///
/// The per-day counter is bumped with an upsert, so concurrent orders on the
/// same day get distinct numbers.
pub async fn next_order_number<C: ConnectionTrait>(
    conn: &C,
    date: NaiveDate,
) -> Result<String, ServiceError> {
    let day = date.format("%Y%m%d").to_string();

    order_sequence::Entity::insert(order_sequence::ActiveModel {
        day: Set(day.clone()),
        last_value: Set(1),
    })
    .on_conflict(
        OnConflict::column(order_sequence::Column::Day)
            .value(
                order_sequence::Column::LastValue,
                Expr::col((order_sequence::Entity, order_sequence::Column::LastValue)).add(1),
            )
            .to_owned(),
    )
    .exec_without_returning(conn)
    .await?;

    let sequence = order_sequence::Entity::find_by_id(day.clone())
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::InternalError(format!("Order sequence {} missing", day)))?;

    Ok(format_order_number(date, sequence.last_value))
}

/// Stock lines that an order's items consume
pub fn stock_lines_for(items: &[OrderItemModel]) -> Vec<StockLine> {
    items
        .iter()
        .map(|item| StockLine {
            product_id: item.product_id,
            variant_sku: item.variant_sku.clone(),
            quantity: item.quantity,
        })
        .collect()
}

pub async fn load_items<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
) -> Result<Vec<OrderItemModel>, ServiceError> {
    Ok(OrderItemEntity::find()
        .filter(order_item::Column::OrderId.eq(order_id))
        .all(conn)
        .await?)
}

/// Buyer email stored in the order's shipping address
pub fn contact_email(order: &OrderModel) -> Option<String> {
    serde_json::from_value::<ShippingAddress>(order.shipping_address.clone())
        .ok()
        .and_then(|a| a.email)
}

/// Caller identity as established by the upstream auth layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Requester {
    pub user_id: Uuid,
    pub is_admin: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateOrderInput {
    /// Guest lines; the caller's cart is used when absent
    #[validate]
    pub items: Option<Vec<CheckoutItemInput>>,
    #[validate]
    pub shipping_address: ShippingAddress,
    pub payment_method: PaymentMethod,
    pub coupon_code: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateOrderStatusInput {
    pub status: OrderStatus,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderWithItems {
    #[serde(flatten)]
    pub order: OrderModel,
    pub items: Vec<OrderItemModel>,
    pub history: Vec<order_status_history::Model>,
}

/// Result of placing an order
#[derive(Debug, Clone, Serialize)]
pub struct PlacedOrder {
    pub order: OrderWithItems,
    pub breakdown: PriceBreakdown,
    /// Gateway page the buyer must be sent to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
}

/// Order placement, retrieval and administrative transitions
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    config: Arc<AppConfig>,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn Notifier>,
}

impl OrderService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        config: Arc<AppConfig>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            db,
            event_sender,
            config,
            gateway,
            notifier,
        }
    }

    /// Places an order from the caller's cart or from guest lines.
    ///
    /// Cash on delivery decrements stock, redeems the coupon and clears the
    /// cart in the creating transaction. Gateway orders are stored as pending
    /// and handed to the gateway; a rejected session cancels the order.
    #[instrument(skip(self, input), fields(payment_method = %input.payment_method))]
    pub async fn create_order(
        &self,
        user_id: Option<Uuid>,
        input: CreateOrderInput,
    ) -> Result<PlacedOrder, ServiceError> {
        input.validate()?;
        let now = Utc::now();

        let destination = DestinationInput {
            district: input.shipping_address.district.clone(),
            upazila: input.shipping_address.upazila.clone(),
        };
        if shipping::lookup_destination(
            destination.district.as_deref(),
            destination.upazila.as_deref(),
        )? == Destination::Incomplete
        {
            return Err(ServiceError::ValidationError(
                "Shipping address must include district and upazila".to_string(),
            ));
        }

        let from_cart = input.items.is_none();
        let lines = match (&input.items, user_id) {
            (Some(items), _) => checkout_service::price_items(&*self.db, items, false, now).await?,
            (None, Some(user_id)) => checkout_service::price_cart(&*self.db, user_id).await?,
            (None, None) => {
                return Err(ServiceError::Unauthorized(
                    "Sign in or provide items to place an order".to_string(),
                ))
            }
        };
        if lines.is_empty() {
            return Err(ServiceError::ValidationError("Cart is empty".to_string()));
        }

        let quote = checkout_service::quote_lines(
            &*self.db,
            &self.config,
            lines,
            &destination,
            input.coupon_code.as_deref(),
            now,
        )
        .await?;
        if let Some(eval) = quote.breakdown.coupon.as_ref().filter(|e| !e.applied) {
            return Err(ServiceError::ValidationError(
                eval.message
                    .clone()
                    .unwrap_or_else(|| "Coupon cannot be applied".to_string()),
            ));
        }
        let coupon = quote.applied_coupon().cloned();
        let is_cod = input.payment_method == PaymentMethod::Cod;

        let txn = self.db.begin().await?;
        let order_number = next_order_number(&txn, now.date_naive()).await?;
        let order_id = Uuid::new_v4();
        let b = &quote.breakdown;

        let order = order::ActiveModel {
            id: Set(order_id),
            order_number: Set(order_number.clone()),
            user_id: Set(user_id),
            shipping_address: Set(serde_json::to_value(&input.shipping_address)?),
            payment_method: Set(input.payment_method),
            order_status: Set(OrderStatus::Pending),
            payment_status: Set(PaymentStatus::Pending),
            items_price: Set(b.subtotal),
            discount_price: Set(b.discount),
            shipping_price: Set(b.shipping),
            tax_price: Set(b.tax),
            total_price: Set(b.total),
            coupon_id: Set(coupon.as_ref().map(|c| c.id)),
            coupon_code: Set(coupon.as_ref().map(|c| c.code.clone())),
            stock_deducted: Set(is_cod),
            gateway_session_key: Set(None),
            gateway_transaction_ref: Set(None),
            paid_at: Set(None),
            delivered_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await
        .map_err(|e| ServiceError::from_db(e, &format!("Order {}", order_number)))?;

        let items = insert_items(&txn, order_id, &quote.lines).await?;
        let history = order_status::record_status_in(
            &txn,
            order_id,
            OrderStatus::Pending,
            Some("Order placed".to_string()),
        )
        .await?;

        let mut stock_changes = Vec::new();
        if is_cod {
            stock_changes =
                inventory::adjust_stock_in(&txn, &stock_lines_for(&items), StockDirection::Decrease)
                    .await?;
            if let Some(coupon) = &coupon {
                if !coupon_service::redeem_in(&txn, coupon.id).await? {
                    return Err(ServiceError::Conflict(format!(
                        "Coupon {} has reached its usage limit",
                        coupon.code
                    )));
                }
            }
            if let (true, Some(user_id)) = (from_cart, user_id) {
                cart_service::clear_cart_in(&txn, user_id).await?;
            }
        }

        txn.commit().await?;

        info!(order_id = %order_id, order_number = %order_number, total = %order.total_price, "Order created");
        counter!("storefront.orders.created", 1);
        self.event_sender
            .send_or_log(Event::OrderCreated {
                order_id,
                order_number: order_number.clone(),
                total: order.total_price,
            })
            .await;
        self.publish_stock_changes(stock_changes).await;

        let mut placed = PlacedOrder {
            order: OrderWithItems {
                order,
                items,
                history: vec![history],
            },
            breakdown: quote.breakdown.clone(),
            redirect_url: None,
        };

        if is_cod {
            if let Some(coupon) = &coupon {
                self.event_sender
                    .send_or_log(Event::CouponRedeemed {
                        coupon_id: coupon.id,
                        order_id,
                    })
                    .await;
            }
            if let (true, Some(user_id)) = (from_cart, user_id) {
                self.event_sender
                    .send_or_log(Event::CartCleared { user_id })
                    .await;
            }
            self.notify(&placed.order.order, NotificationTemplate::OrderPlaced);
            return Ok(placed);
        }

        let session = self
            .gateway
            .initialize_payment(PaymentInitRequest {
                order_id,
                transaction_id: order_number.clone(),
                amount: placed.order.order.total_price,
                currency: self.config.currency.clone(),
                product_name: product_summary(&quote.lines),
                item_count: quote.lines.iter().map(|l| l.quantity).sum(),
                customer: customer_from(&input.shipping_address),
            })
            .await;

        match session {
            Ok(session) => {
                let mut active: order::ActiveModel = placed.order.order.clone().into();
                active.gateway_session_key = Set(Some(session.session_key));
                active.updated_at = Set(Utc::now());
                placed.order.order = active.update(&*self.db).await?;
                placed.redirect_url = Some(session.redirect_url);
                info!(order_id = %order_id, "Redirecting buyer to payment gateway");
                Ok(placed)
            }
            Err(err) => {
                warn!(order_id = %order_id, error = %err, "Payment initialization failed");
                self.fail_gateway_order(order_id, &err).await?;
                Err(match err {
                    ServiceError::PaymentFailed(_) | ServiceError::ServiceUnavailable(_) => err,
                    other => ServiceError::PaymentFailed(other.to_string()),
                })
            }
        }
    }

    async fn fail_gateway_order(&self, order_id: Uuid, err: &ServiceError) -> Result<(), ServiceError> {
        let txn = self.db.begin().await?;
        let result = OrderEntity::update_many()
            .set(order::ActiveModel {
                order_status: Set(OrderStatus::Cancelled),
                payment_status: Set(PaymentStatus::Failed),
                updated_at: Set(Utc::now()),
                ..Default::default()
            })
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::OrderStatus.eq(OrderStatus::Pending))
            .exec(&txn)
            .await?;
        if result.rows_affected == 1 {
            order_status::record_status_in(
                &txn,
                order_id,
                OrderStatus::Cancelled,
                Some(format!("Payment initialization failed: {}", err)),
            )
            .await?;
        }
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::PaymentFailed {
                order_id,
                reason: err.to_string(),
            })
            .await;
        Ok(())
    }

    /// Order by id; visible to its owner and to administrators.
    #[instrument(skip(self))]
    pub async fn get_order(
        &self,
        requester: Requester,
        order_id: Uuid,
    ) -> Result<OrderWithItems, ServiceError> {
        let order = self.find_visible(requester, order_id).await?;
        let items = load_items(&*self.db, order_id).await?;
        let history = OrderHistoryEntity::find()
            .filter(order_status_history::Column::OrderId.eq(order_id))
            .order_by_asc(order_status_history::Column::ChangedAt)
            .all(&*self.db)
            .await?;
        Ok(OrderWithItems {
            order,
            items,
            history,
        })
    }

    /// The caller's orders, newest first
    #[instrument(skip(self))]
    pub async fn list_orders(
        &self,
        user_id: Uuid,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<OrderModel>, u64), ServiceError> {
        let paginator = OrderEntity::find()
            .filter(order::Column::UserId.eq(user_id))
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&*self.db, per_page.max(1));
        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((orders, total))
    }

    /// Lets a buyer cancel their own order while it is still pending.
    #[instrument(skip(self))]
    pub async fn cancel_order(
        &self,
        requester: Requester,
        order_id: Uuid,
    ) -> Result<OrderModel, ServiceError> {
        let order = self.find_visible(requester, order_id).await?;
        if order.order_status != OrderStatus::Pending || order.payment_status == PaymentStatus::Paid
        {
            return Err(ServiceError::InvalidOperation(
                "Only pending, unpaid orders can be cancelled".to_string(),
            ));
        }
        self.change_status(order, OrderStatus::Cancelled, Some("Cancelled by customer".to_string()))
            .await
    }

    /// Administrative status change following the transition table.
    #[instrument(skip(self, input), fields(new_status = %input.status))]
    pub async fn update_status(
        &self,
        order_id: Uuid,
        input: UpdateOrderStatusInput,
    ) -> Result<OrderModel, ServiceError> {
        let order = OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
        order_status::ensure_transition(order.order_status, input.status)?;
        order_status::ensure_payment_settled(&order, input.status)?;
        self.change_status(order, input.status, input.note).await
    }

    async fn change_status(
        &self,
        order: OrderModel,
        to: OrderStatus,
        note: Option<String>,
    ) -> Result<OrderModel, ServiceError> {
        let now = Utc::now();
        let from = order.order_status;
        let order_id = order.id;

        let mut changes = order::ActiveModel {
            order_status: Set(to),
            updated_at: Set(now),
            ..Default::default()
        };
        let restock = to == OrderStatus::Cancelled && order.stock_deducted;
        if restock {
            changes.stock_deducted = Set(false);
        }
        match to {
            OrderStatus::Delivered => {
                changes.delivered_at = Set(Some(now));
                if order.payment_method == PaymentMethod::Cod
                    && order.payment_status != PaymentStatus::Paid
                {
                    changes.payment_status = Set(PaymentStatus::Paid);
                    changes.paid_at = Set(Some(now));
                }
            }
            OrderStatus::Refunded if order.payment_status == PaymentStatus::Paid => {
                changes.payment_status = Set(PaymentStatus::Refunded);
            }
            _ => {}
        }

        let txn = self.db.begin().await?;
        let result = OrderEntity::update_many()
            .set(changes)
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::OrderStatus.eq(from))
            .exec(&txn)
            .await?;
        if result.rows_affected != 1 {
            return Err(ServiceError::Conflict(format!(
                "Order {} changed concurrently",
                order_id
            )));
        }

        let mut stock_changes = Vec::new();
        if restock {
            let items = load_items(&txn, order_id).await?;
            stock_changes =
                inventory::adjust_stock_in(&txn, &stock_lines_for(&items), StockDirection::Increase)
                    .await?;
        }
        order_status::record_status_in(&txn, order_id, to, note).await?;

        let updated = OrderEntity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
        txn.commit().await?;

        info!(order_id = %order_id, from = %from, to = %to, restocked = restock, "Order status changed");
        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status: from.to_string(),
                new_status: to.to_string(),
            })
            .await;
        self.publish_stock_changes(stock_changes).await;
        if to == OrderStatus::Cancelled {
            self.notify(&updated, NotificationTemplate::OrderCancelled);
        }
        Ok(updated)
    }

    async fn find_visible(
        &self,
        requester: Requester,
        order_id: Uuid,
    ) -> Result<OrderModel, ServiceError> {
        let order = OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
        if requester.is_admin || order.user_id == Some(requester.user_id) {
            Ok(order)
        } else {
            error!(order_id = %order_id, user_id = %requester.user_id, "Order access denied");
            Err(ServiceError::Forbidden("Order belongs to another customer".to_string()))
        }
    }

    async fn publish_stock_changes(&self, changes: Vec<StockChange>) {
        for change in changes {
            self.event_sender.send_or_log(change.into_event()).await;
        }
    }

    fn notify(&self, order: &OrderModel, template: NotificationTemplate) {
        notifications::dispatch(
            self.notifier.clone(),
            contact_email(order),
            template,
            serde_json::json!({
                "order_number": order.order_number,
                "total": order.total_price,
                "status": order.order_status,
            }),
        );
    }
}

async fn insert_items<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
    lines: &[PricedLine],
) -> Result<Vec<OrderItemModel>, ServiceError> {
    let mut items = Vec::with_capacity(lines.len());
    for line in lines {
        let item = order_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            product_id: Set(line.product_id),
            name: Set(line.name.clone()),
            variant_sku: Set(line.variant_sku.clone()),
            variant_label: Set(line.variant_label.clone()),
            quantity: Set(line.quantity),
            unit_price: Set(line.unit_price),
            image: Set(line.image.clone()),
        }
        .insert(conn)
        .await?;
        items.push(item);
    }
    Ok(items)
}

fn product_summary(lines: &[PricedLine]) -> String {
    let names: Vec<&str> = lines.iter().map(|l| l.name.as_str()).collect();
    let summary = names.join(", ");
    if summary.chars().count() > 255 {
        summary.chars().take(252).collect::<String>() + "..."
    } else {
        summary
    }
}

fn customer_from(address: &ShippingAddress) -> PaymentCustomer {
    PaymentCustomer {
        name: address.full_name.clone(),
        email: address.email.clone().unwrap_or_default(),
        phone: address.phone.clone(),
        address: address.address_line.clone(),
        city: address.district.clone().unwrap_or_default(),
        postcode: address.postal_code.clone().unwrap_or_default(),
    }
}
