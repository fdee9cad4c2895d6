/// Commerce services: catalog, pricing, cart, promotions and checkout
pub mod campaign_service;
pub mod cart_service;
pub mod catalog_service;
pub mod checkout_service;
pub mod coupon_service;
pub mod pricing_service;
pub mod shipping;

// Re-export services for convenience
pub use campaign_service::{CampaignService, CreateCampaignInput};
pub use cart_service::{AddToCartInput, CartService, CartWithItems};
pub use catalog_service::{CatalogService, CreateProductInput, ProductWithVariants};
pub use checkout_service::{CheckoutRequest, CheckoutService, PriceBreakdown};
pub use coupon_service::{CouponService, CreateCouponInput};
pub use shipping::ShippingAddress;
