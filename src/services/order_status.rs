use chrono::Utc;
use sea_orm::{ActiveModelTrait, ActiveValue::Set, ConnectionTrait};
use uuid::Uuid;

use crate::{
    entities::{
        order::{self, OrderStatus, PaymentMethod, PaymentStatus},
        order_status_history,
    },
    errors::ServiceError,
};

/// Whether an administrator may move an order from `from` to `to`
pub fn is_valid_transition(from: OrderStatus, to: OrderStatus) -> bool {
    use OrderStatus::*;

    matches!(
        (from, to),
        (Pending, Confirmed)
            | (Pending, Processing)
            | (Pending, Cancelled)
            | (Confirmed, Processing)
            | (Confirmed, Shipped)
            | (Confirmed, Cancelled)
            | (Processing, Shipped)
            | (Processing, Cancelled)
            | (Shipped, Delivered)
            | (Delivered, Refunded)
            | (Cancelled, Refunded)
    )
}

/// Statuses reachable from `from`
pub fn allowed_transitions(from: OrderStatus) -> Vec<OrderStatus> {
    use sea_orm::Iterable;

    OrderStatus::iter()
        .filter(|to| is_valid_transition(from, *to))
        .collect()
}

pub fn ensure_transition(from: OrderStatus, to: OrderStatus) -> Result<(), ServiceError> {
    if is_valid_transition(from, to) {
        Ok(())
    } else {
        Err(ServiceError::InvalidOperation(format!(
            "Cannot transition order from '{}' to '{}'",
            from, to
        )))
    }
}

/// A gateway order still waiting on its payment can only be cancelled by an
/// administrator; the payment callback owns the move to `Processing`.
pub fn ensure_payment_settled(order: &order::Model, to: OrderStatus) -> Result<(), ServiceError> {
    let awaiting_payment = order.payment_method == PaymentMethod::Gateway
        && order.order_status == OrderStatus::Pending
        && order.payment_status != PaymentStatus::Paid;
    if awaiting_payment && to != OrderStatus::Cancelled {
        return Err(ServiceError::InvalidOperation(format!(
            "Order {} is awaiting gateway payment and can only be cancelled",
            order.order_number
        )));
    }
    Ok(())
}

/// Appends a history entry inside the caller's transaction
pub async fn record_status_in<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
    status: OrderStatus,
    note: Option<String>,
) -> Result<order_status_history::Model, ServiceError> {
    let entry = order_status_history::ActiveModel {
        id: Set(Uuid::new_v4()),
        order_id: Set(order_id),
        status: Set(status),
        note: Set(note),
        changed_at: Set(Utc::now()),
    }
    .insert(conn)
    .await?;
    Ok(entry)
}
