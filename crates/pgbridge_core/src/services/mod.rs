//! Service layer for pgbridge.
//!
//! - `manager` - DatabaseManager: session lifecycle, tables, data, transactions
//! - `sql` - Identifier validation and statement builders

pub mod manager;
pub mod sql;

pub use manager::DatabaseManager;
