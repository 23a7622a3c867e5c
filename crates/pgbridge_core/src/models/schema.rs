//! Table definition and introspection models.

use serde::{Deserialize, Serialize};

/// A column definition used to build `CREATE TABLE`.
///
/// `definition` is raw SQL (type plus constraints) and is trusted as-is;
/// only the column name is validated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    /// Column name.
    pub name: String,
    /// Type and constraints, e.g. "VARCHAR(50) UNIQUE NOT NULL".
    #[serde(rename = "type")]
    pub definition: String,
}

impl ColumnSpec {
    /// Create a column definition.
    pub fn new(name: impl Into<String>, definition: impl Into<String>) -> Self {
        Self { name: name.into(), definition: definition.into() }
    }
}

impl<N: Into<String>, D: Into<String>> From<(N, D)> for ColumnSpec {
    fn from((name, definition): (N, D)) -> Self {
        Self::new(name, definition)
    }
}

/// A PostgreSQL column as reported by the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDetail {
    /// Column name.
    pub name: String,
    /// Data type (e.g., "integer", "character varying(50)").
    pub data_type: String,
    /// Whether the column allows NULL values.
    pub is_nullable: bool,
    /// Whether this column is part of the primary key.
    pub is_primary_key: bool,
    /// Default value expression, if any.
    pub default_value: Option<String>,
    /// Column position (1-based ordinal).
    pub ordinal_position: i32,
}

/// Outcome of a duplicate-tolerant insert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InsertOutcome {
    /// Rows written.
    pub inserted: u64,
    /// Rows discarded by a uniqueness conflict.
    pub skipped: u64,
}

impl InsertOutcome {
    /// Total rows submitted.
    pub fn total(&self) -> u64 {
        self.inserted + self.skipped
    }
}
