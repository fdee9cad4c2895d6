pub mod commerce;
pub mod common;
pub mod orders;
pub mod payments;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::events::EventSender;
use crate::notifications::Notifier;
use crate::services::{
    commerce::{CampaignService, CartService, CatalogService, CheckoutService, CouponService},
    inventory::InventoryService,
    orders::OrderService,
    payment_gateway::PaymentGateway,
    payments::PaymentService,
};
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub catalog: Arc<CatalogService>,
    pub cart: Arc<CartService>,
    pub checkout: Arc<CheckoutService>,
    pub coupons: Arc<CouponService>,
    pub campaigns: Arc<CampaignService>,
    pub inventory: Arc<InventoryService>,
    pub orders: Arc<OrderService>,
    pub payments: Arc<PaymentService>,
}

impl AppServices {
    /// Wires every service against one pool, event channel, gateway and notifier.
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        config: Arc<AppConfig>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            catalog: Arc::new(CatalogService::new(db_pool.clone())),
            cart: Arc::new(CartService::new(db_pool.clone(), event_sender.clone())),
            checkout: Arc::new(CheckoutService::new(db_pool.clone(), config.clone())),
            coupons: Arc::new(CouponService::new(db_pool.clone())),
            campaigns: Arc::new(CampaignService::new(db_pool.clone())),
            inventory: Arc::new(InventoryService::new(
                db_pool.clone(),
                event_sender.clone(),
            )),
            orders: Arc::new(OrderService::new(
                db_pool.clone(),
                event_sender.clone(),
                config,
                gateway.clone(),
                notifier.clone(),
            )),
            payments: Arc::new(PaymentService::new(
                db_pool,
                event_sender,
                gateway,
                notifier,
            )),
        }
    }
}
