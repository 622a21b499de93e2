//! Database models module
//!
//! Row structs live in models.rs; `Table<T>` is the handle the dao layer
//! implements its queries on.

mod models;
mod table;

pub use models::*;

pub use table::Table;
