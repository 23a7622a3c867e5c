//! Core library for pgbridge, a PostgreSQL database manager.
//!
//! This crate provides:
//!
//! - **error**: Error taxonomy with PostgreSQL-specific details
//! - **models**: Connection configuration, values, records and frames
//! - **services**: The `DatabaseManager` and SQL statement builders
//! - **env**: Configuration from `DB_*` environment variables and `.env`
//! - **logging**: Structured logging setup
//!
//! ```no_run
//! use pgbridge_core::{record, ColumnSpec, DatabaseManager};
//!
//! # async fn run() -> pgbridge_core::PgBridgeResult<()> {
//! let mut db = DatabaseManager::from_env()?;
//! db.connect().await?;
//! db.create_table("users", &[ColumnSpec::new("id", "SERIAL PRIMARY KEY"), ColumnSpec::new("name", "TEXT")]).await?;
//! db.insert_data("users", &[record! { "name" => "john_doe" }]).await?;
//! let frame = db.execute_query_frame("SELECT * FROM users", &[]).await?;
//! println!("{}", pgbridge_core::models::frame::render(&frame)?);
//! # Ok(())
//! # }
//! ```

pub mod env;
pub mod error;
pub mod logging;
pub mod models;
pub mod services;

pub use error::{ErrorInfo, PgBridgeError, PgBridgeResult};
pub use models::{
    ColumnDetail, ColumnSpec, ConnectionConfig, ConnectionConfigBuilder, ConnectionOptions,
    DataFrame, InsertOutcome, Row, RowRecord, SqlValue, SslMode,
};
pub use services::DatabaseManager;
