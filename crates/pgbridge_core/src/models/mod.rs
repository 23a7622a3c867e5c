//! Data models for pgbridge.
//!
//! - `config` - ConnectionConfig, ConnectionOptions, SslMode
//! - `value` - SqlValue, Row
//! - `record` - RowRecord
//! - `frame` - DataFrame (Arrow record batch)
//! - `schema` - ColumnSpec, ColumnDetail, InsertOutcome

pub mod config;
pub mod frame;
mod numeric;
pub mod record;
pub mod schema;
pub mod value;

pub use config::{ConnectionConfig, ConnectionConfigBuilder, ConnectionOptions, SslMode};
pub use frame::DataFrame;
pub use record::RowRecord;
pub use schema::{ColumnDetail, ColumnSpec, InsertOutcome};
pub use value::{Row, SqlValue};
