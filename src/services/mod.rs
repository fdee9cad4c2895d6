// Catalog, cart, promotions and checkout
pub mod commerce;

// Stock ledger
pub mod inventory;

// Orders and their lifecycle
pub mod order_status;
pub mod orders;

// Payment gateway and callbacks
pub mod payment_gateway;
pub mod payments;
