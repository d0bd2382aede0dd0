// src/order/mod.rs

//! Transaction list and ordering passes

pub mod entry;
pub mod list;
pub mod sort;

pub use entry::{EntryState, TransactionEntry};
pub use list::TransactionList;
pub use sort::{SortMode, order_configure, order_critical, order_unpack};
