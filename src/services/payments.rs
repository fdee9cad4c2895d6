//! Payment gateway callbacks driving the order state machine.

use crate::{
    entities::order::{self, Entity as OrderEntity, Model as OrderModel, OrderStatus, PaymentStatus},
    errors::ServiceError,
    events::{Event, EventSender},
    notifications::{self, NotificationTemplate, Notifier},
    services::{
        commerce::{cart_service, coupon_service},
        inventory::{self, StockDirection},
        order_status,
        orders::{self, contact_email},
        payment_gateway::PaymentGateway,
    },
};
use chrono::Utc;
use metrics::counter;
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use strum::Display;
use tracing::{info, instrument, warn};

/// Which gateway endpoint delivered the callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum CallbackSource {
    Success,
    Fail,
    Cancel,
    Ipn,
}

/// Form fields posted by the gateway
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayCallback {
    #[serde(alias = "transactionId")]
    pub tran_id: Option<String>,
    pub status: Option<String>,
    #[serde(alias = "validationId")]
    pub val_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOutcome {
    /// This callback confirmed the payment
    Confirmed(OrderModel),
    /// The order was already paid; nothing changed
    AlreadyConfirmed(OrderModel),
    /// The order moved to cancelled
    Cancelled(OrderModel),
    /// The order was not pending; nothing changed
    Ignored(OrderModel),
}

impl PaymentOutcome {
    pub fn order(&self) -> &OrderModel {
        match self {
            Self::Confirmed(o) | Self::AlreadyConfirmed(o) | Self::Cancelled(o) | Self::Ignored(o) => o,
        }
    }

    pub fn is_paid(&self) -> bool {
        matches!(self, Self::Confirmed(_) | Self::AlreadyConfirmed(_))
    }
}

/// Applies gateway callbacks to orders. Success redirects, failure and cancel
/// redirects, and IPN notifications all go through [`PaymentService::handle_callback`].
#[derive(Clone)]
pub struct PaymentService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn Notifier>,
}

impl PaymentService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            db,
            event_sender,
            gateway,
            notifier,
        }
    }

    /// Idempotent: repeated success or IPN callbacks for a paid order change
    /// nothing, and failure callbacks never touch a paid order.
    #[instrument(skip(self, callback), fields(tran_id = ?callback.tran_id))]
    pub async fn handle_callback(
        &self,
        source: CallbackSource,
        callback: GatewayCallback,
    ) -> Result<PaymentOutcome, ServiceError> {
        let tran_id = callback
            .tran_id
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ServiceError::ValidationError("tran_id is required".to_string()))?;

        let order = OrderEntity::find()
            .filter(order::Column::OrderNumber.eq(tran_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", tran_id)))?;

        info!(order_id = %order.id, %source, gateway_status = ?callback.status, "Payment callback received");

        match source {
            CallbackSource::Success | CallbackSource::Ipn => self.confirm(order, callback.val_id).await,
            CallbackSource::Fail | CallbackSource::Cancel => {
                let reason = format!("Payment {} reported by gateway", source);
                self.cancel_pending(order, reason).await
            }
        }
    }

    async fn confirm(
        &self,
        order: OrderModel,
        val_id: Option<String>,
    ) -> Result<PaymentOutcome, ServiceError> {
        if order.payment_status == PaymentStatus::Paid {
            return Ok(PaymentOutcome::AlreadyConfirmed(order));
        }
        if order.order_status != OrderStatus::Pending {
            return Ok(PaymentOutcome::Ignored(order));
        }

        let Some(val_id) = val_id.filter(|v| !v.trim().is_empty()) else {
            return self
                .cancel_pending(order, "Missing validation id".to_string())
                .await;
        };

        let verification = self
            .gateway
            .verify_payment(&val_id, &order.order_number, order.total_price)
            .await?;
        if !verification.valid {
            let reason = verification
                .reason
                .unwrap_or_else(|| "Payment could not be verified".to_string());
            return self.cancel_pending(order, reason).await;
        }
        let transaction_ref = verification.transaction_ref.unwrap_or(val_id);

        let now = Utc::now();
        let txn = self.db.begin().await?;
        let claimed = OrderEntity::update_many()
            .set(order::ActiveModel {
                order_status: Set(OrderStatus::Processing),
                payment_status: Set(PaymentStatus::Paid),
                paid_at: Set(Some(now)),
                gateway_transaction_ref: Set(Some(transaction_ref.clone())),
                stock_deducted: Set(true),
                updated_at: Set(now),
                ..Default::default()
            })
            .filter(order::Column::Id.eq(order.id))
            .filter(order::Column::OrderStatus.eq(OrderStatus::Pending))
            .filter(order::Column::PaymentStatus.ne(PaymentStatus::Paid))
            .exec(&txn)
            .await?;

        if claimed.rows_affected != 1 {
            txn.rollback().await?;
            let current = self.reload(order.id).await?;
            return Ok(if current.payment_status == PaymentStatus::Paid {
                PaymentOutcome::AlreadyConfirmed(current)
            } else {
                PaymentOutcome::Ignored(current)
            });
        }

        let items = orders::load_items(&txn, order.id).await?;
        let stock_changes = if order.stock_deducted {
            Vec::new()
        } else {
            inventory::adjust_stock_in(&txn, &orders::stock_lines_for(&items), StockDirection::Decrease)
                .await?
        };

        let mut redeemed = None;
        if let Some(coupon_id) = order.coupon_id {
            if coupon_service::redeem_in(&txn, coupon_id).await? {
                redeemed = Some(coupon_id);
            } else {
                warn!(order_id = %order.id, coupon_id = %coupon_id, "Coupon usage limit exceeded by paid order");
            }
        }

        let cleared = match order.user_id {
            Some(user_id) => cart_service::clear_cart_in(&txn, user_id).await?,
            None => false,
        };
        order_status::record_status_in(
            &txn,
            order.id,
            OrderStatus::Processing,
            Some(format!("Payment confirmed ({})", transaction_ref)),
        )
        .await?;

        let confirmed = OrderEntity::find_by_id(order.id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order.id)))?;
        txn.commit().await?;

        info!(order_id = %order.id, transaction_ref = %transaction_ref, "Payment confirmed");
        counter!("storefront.payments.confirmed", 1);

        self.event_sender
            .send_or_log(Event::PaymentCaptured {
                order_id: order.id,
                transaction_ref,
            })
            .await;
        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id: order.id,
                old_status: OrderStatus::Pending.to_string(),
                new_status: OrderStatus::Processing.to_string(),
            })
            .await;
        for change in stock_changes {
            self.event_sender.send_or_log(change.into_event()).await;
        }
        if let Some(coupon_id) = redeemed {
            self.event_sender
                .send_or_log(Event::CouponRedeemed {
                    coupon_id,
                    order_id: order.id,
                })
                .await;
        }
        if let (true, Some(user_id)) = (cleared, order.user_id) {
            self.event_sender
                .send_or_log(Event::CartCleared { user_id })
                .await;
        }

        notifications::dispatch(
            self.notifier.clone(),
            contact_email(&confirmed),
            NotificationTemplate::PaymentConfirmed,
            serde_json::json!({
                "order_number": confirmed.order_number,
                "total": confirmed.total_price,
            }),
        );

        Ok(PaymentOutcome::Confirmed(confirmed))
    }

    /// Moves a pending, unpaid order to cancelled with a failed payment.
    async fn cancel_pending(
        &self,
        order: OrderModel,
        reason: String,
    ) -> Result<PaymentOutcome, ServiceError> {
        if order.order_status != OrderStatus::Pending || order.payment_status == PaymentStatus::Paid {
            return Ok(PaymentOutcome::Ignored(order));
        }

        let txn = self.db.begin().await?;
        let result = OrderEntity::update_many()
            .set(order::ActiveModel {
                order_status: Set(OrderStatus::Cancelled),
                payment_status: Set(PaymentStatus::Failed),
                updated_at: Set(Utc::now()),
                ..Default::default()
            })
            .filter(order::Column::Id.eq(order.id))
            .filter(order::Column::OrderStatus.eq(OrderStatus::Pending))
            .filter(order::Column::PaymentStatus.ne(PaymentStatus::Paid))
            .exec(&txn)
            .await?;

        if result.rows_affected != 1 {
            txn.rollback().await?;
            return Ok(PaymentOutcome::Ignored(self.reload(order.id).await?));
        }

        order_status::record_status_in(&txn, order.id, OrderStatus::Cancelled, Some(reason.clone()))
            .await?;
        let cancelled = OrderEntity::find_by_id(order.id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order.id)))?;
        txn.commit().await?;

        warn!(order_id = %order.id, reason = %reason, "Payment failed, order cancelled");
        self.event_sender
            .send_or_log(Event::PaymentFailed {
                order_id: order.id,
                reason,
            })
            .await;

        Ok(PaymentOutcome::Cancelled(cancelled))
    }

    async fn reload(&self, order_id: uuid::Uuid) -> Result<OrderModel, ServiceError> {
        OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }
}
