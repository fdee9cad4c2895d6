pub mod commerce;
pub mod order;
pub mod order_item;
pub mod order_sequence;
pub mod order_status_history;
pub mod product; // Catalog product; variants live under `commerce`
