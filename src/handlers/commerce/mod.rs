/// Commerce API handlers module
pub mod campaigns;
pub mod carts;
pub mod checkout;
pub mod coupons;
pub mod products;

// Re-export route builders
pub use campaigns::campaigns_routes;
pub use carts::carts_routes;
pub use checkout::checkout_routes;
pub use coupons::coupons_routes;
pub use products::{categories_routes, products_routes};
