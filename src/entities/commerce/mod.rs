/// Commerce entities module
pub mod campaign;
pub mod cart;
pub mod cart_item;
pub mod category;
pub mod coupon;
pub mod product_variant;

// Re-export entities
pub use super::product::{Entity as Product, Model as ProductModel};
pub use campaign::{Entity as Campaign, Model as CampaignModel};
pub use cart::{Entity as Cart, Model as CartModel};
pub use cart_item::{Entity as CartItem, Model as CartItemModel};
pub use category::{Entity as Category, Model as CategoryModel};
pub use coupon::{Entity as Coupon, Model as CouponModel};
pub use product_variant::{Entity as ProductVariant, Model as ProductVariantModel, VariantOption};
