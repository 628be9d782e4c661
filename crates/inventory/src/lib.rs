//! Inventory domain (event-sourced).
//!
//! The loan core does not own physical stock. This crate models just enough
//! of the stock subsystem to back the relocation contract: serialized items,
//! their current location and their move history.

pub mod item;
pub mod location;

pub use item::{
    ItemMoved, ItemRegistered, MoveItem, RegisterItem, STOCK_ITEM_AGGREGATE_TYPE, StockItem,
    StockItemCommand, StockItemEvent, StockItemId,
};
pub use location::StockLocation;
