//! Error types for pgbridge.
//!
//! One variant per failure kind. Driver errors are classified by SQLSTATE
//! class so callers can tell constraint violations from connectivity problems.

use thiserror::Error;

/// Main error type for every `DatabaseManager` operation.
#[derive(Debug, Error)]
pub enum PgBridgeError {
    /// Required connection parameter missing or invalid.
    #[error("Config error: {message}")]
    Config {
        /// Human-readable error message.
        message: String,
    },

    /// TLS, network or authentication failure, or no live session.
    #[error("Connection error: {message}")]
    Connection {
        /// Human-readable error message.
        message: String,
        /// Actionable hint for the user.
        hint: Option<String>,
        /// Optional underlying error source.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// DDL failure.
    #[error("Schema error: {message}")]
    Schema {
        /// PostgreSQL error message.
        message: String,
        /// PostgreSQL error code (e.g., "42601").
        code: Option<String>,
        /// PostgreSQL hint.
        hint: Option<String>,
    },

    /// Constraint violation (unique, foreign key, not-null, check).
    #[error("Integrity error: {message}")]
    Integrity {
        /// PostgreSQL error message.
        message: String,
        /// Additional detail from PostgreSQL.
        detail: Option<String>,
        /// Name of the violated constraint.
        constraint: Option<String>,
        /// PostgreSQL error code (e.g., "23505").
        code: Option<String>,
    },

    /// Statement execution error with PostgreSQL-specific details.
    #[error("{message}")]
    Query {
        /// PostgreSQL error message.
        message: String,
        /// Additional detail from PostgreSQL.
        detail: Option<String>,
        /// PostgreSQL hint.
        hint: Option<String>,
        /// Position in query (1-indexed).
        position: Option<usize>,
        /// PostgreSQL error code (e.g., "42P01").
        code: Option<String>,
    },

    /// A statement inside `execute_transaction` failed; the transaction was rolled back.
    #[error("Transaction rolled back: statement {index} failed: {source}")]
    Transaction {
        /// Zero-based index of the failing statement.
        index: usize,
        /// The failure of that statement.
        #[source]
        source: Box<PgBridgeError>,
        /// Set when the ROLLBACK itself failed.
        rollback_error: Option<String>,
    },

    /// Caller input rejected before any statement was sent.
    #[error("Validation error: {message}")]
    Validation {
        /// Human-readable error message.
        message: String,
    },
}

const ROLLBACK_FAILED_HINT: &str =
    "The rollback also failed. Reconnect before retrying; the server drops the open transaction when the session ends";

/// Result alias used across the crate.
pub type PgBridgeResult<T> = Result<T, PgBridgeError>;

impl PgBridgeError {
    // ========== Constructors ==========

    /// Create a new config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config { message: message.into() }
    }

    /// Create a new connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection { message: message.into(), hint: None, source: None }
    }

    /// Create a new connection error with hint.
    pub fn connection_with_hint(message: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::Connection { message: message.into(), hint: Some(hint.into()), source: None }
    }

    /// The error every operation returns while no session is held.
    pub fn not_connected() -> Self {
        Self::connection_with_hint("Not connected", "Call connect() before issuing operations")
    }

    /// Create a new query error with full PostgreSQL details.
    pub fn query(
        message: impl Into<String>,
        detail: Option<String>,
        hint: Option<String>,
        position: Option<usize>,
        code: Option<String>,
    ) -> Self {
        Self::Query { message: message.into(), detail, hint, position, code }
    }

    /// Create a new validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation { message: message.into() }
    }

    /// Wrap a statement failure inside a rolled back transaction.
    pub fn transaction(index: usize, source: PgBridgeError) -> Self {
        Self::Transaction { index, source: Box::new(source), rollback_error: None }
    }

    /// Record that the ROLLBACK issued after this error failed too.
    ///
    /// Transaction errors keep their kind and index. Any other error becomes
    /// a connection error, since a session that cannot roll back is unusable.
    pub fn with_rollback_failure<E>(self, rollback: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        match self {
            Self::Transaction { index, source, .. } => {
                Self::Transaction { index, source, rollback_error: Some(rollback.to_string()) }
            }
            other => Self::Connection {
                message: format!("{other}; rollback failed: {rollback}"),
                hint: Some(ROLLBACK_FAILED_HINT.to_string()),
                source: Some(Box::new(rollback)),
            },
        }
    }

    /// Reclassify an execution error raised by a DDL statement.
    ///
    /// Connection, validation and config errors keep their kind.
    pub fn into_schema(self) -> Self {
        match self {
            Self::Query { message, hint, code, .. } => Self::Schema { message, code, hint },
            Self::Integrity { message, code, .. } => Self::Schema { message, code, hint: None },
            other => other,
        }
    }

    // ========== Methods ==========

    /// Check if this error is the "not connected" guard.
    pub fn is_not_connected(&self) -> bool {
        matches!(self, Self::Connection { message, .. } if message == "Not connected")
    }

    /// Check if this error belongs to the connection kind.
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }

    /// Check if this error is a constraint violation.
    pub fn is_integrity(&self) -> bool {
        matches!(self, Self::Integrity { .. })
    }

    /// Get the error category name.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config { .. } => "Config",
            Self::Connection { .. } => "Connection",
            Self::Schema { .. } => "Schema",
            Self::Integrity { .. } => "Integrity",
            Self::Query { .. } => "Query",
            Self::Transaction { .. } => "Transaction",
            Self::Validation { .. } => "Validation",
        }
    }

    /// Get actionable hint for the user.
    pub fn hint(&self) -> Option<&str> {
        match self {
            Self::Config { .. } => Some("Set DB_HOST, DB_USER, DB_PASSWORD and DB_NAME"),
            Self::Connection { hint, .. } => {
                hint.as_deref().or(Some("Check that the database server is running"))
            }
            Self::Schema { hint, .. } => hint.as_deref(),
            Self::Integrity { .. } => Some("A row violates a table constraint"),
            Self::Query { hint, .. } => hint.as_deref(),
            Self::Transaction { rollback_error: Some(_), .. } => Some(ROLLBACK_FAILED_HINT),
            Self::Transaction { source, .. } => source.hint(),
            Self::Validation { .. } => None,
        }
    }

    /// Get PostgreSQL error code (if applicable).
    pub fn pg_code(&self) -> Option<&str> {
        match self {
            Self::Schema { code, .. } | Self::Integrity { code, .. } | Self::Query { code, .. } => {
                code.as_deref()
            }
            Self::Transaction { source, .. } => source.pg_code(),
            _ => None,
        }
    }

    /// Index of the failing statement for transaction errors.
    pub fn failed_statement(&self) -> Option<usize> {
        match self {
            Self::Transaction { index, .. } => Some(*index),
            _ => None,
        }
    }

    /// Convert to user-displayable error info.
    pub fn to_error_info(&self) -> ErrorInfo {
        let error_type = format!("{} Error", self.category());
        let message = self.to_string();
        let hint = self.hint().map(String::from);

        let technical_detail = match self {
            Self::Query { detail, code, position, .. } => {
                let mut parts = Vec::new();
                if let Some(code) = code {
                    parts.push(format!("Code: {code}"));
                }
                if let Some(pos) = position {
                    parts.push(format!("Position: {pos}"));
                }
                if let Some(detail) = detail {
                    parts.push(format!("Detail: {detail}"));
                }
                if parts.is_empty() {
                    None
                } else {
                    Some(parts.join("\n"))
                }
            }
            Self::Integrity { detail, constraint, code, .. } => {
                let parts: Vec<String> = [
                    code.as_ref().map(|c| format!("Code: {c}")),
                    constraint.as_ref().map(|c| format!("Constraint: {c}")),
                    detail.as_ref().map(|d| format!("Detail: {d}")),
                ]
                .into_iter()
                .flatten()
                .collect();
                (!parts.is_empty()).then(|| parts.join("\n"))
            }
            Self::Transaction { index, rollback_error, .. } => Some(match rollback_error {
                Some(rollback) => format!("Failed statement index: {index}\nRollback failed: {rollback}"),
                None => format!("Failed statement index: {index}"),
            }),
            _ => None,
        };

        ErrorInfo { error_type, message, hint, technical_detail }
    }
}

/// User-displayable error information.
#[derive(Debug, Clone)]
pub struct ErrorInfo {
    /// Category name (e.g., "Connection Error").
    pub error_type: String,
    /// User-friendly message.
    pub message: String,
    /// Actionable suggestion.
    pub hint: Option<String>,
    /// Technical detail for logs or verbose output.
    pub technical_detail: Option<String>,
}

// ========== Error Conversions ==========

/// Convert from tokio_postgres::Error to PgBridgeError.
impl From<tokio_postgres::Error> for PgBridgeError {
    fn from(err: tokio_postgres::Error) -> Self {
        if let Some(db_err) = err.as_db_error() {
            let message = db_err.message().to_string();
            let detail = db_err.detail().map(String::from);
            let hint = db_err.hint().map(String::from);
            let position = db_err.position().and_then(|p| match p {
                tokio_postgres::error::ErrorPosition::Original(pos) => Some(*pos as usize),
                tokio_postgres::error::ErrorPosition::Internal { .. } => None,
            });
            let code_str = db_err.code().code();
            let code = Some(code_str.to_string());

            return match code_str {
                "28P01" => PgBridgeError::Connection {
                    message,
                    hint: Some("Invalid password - check your credentials".to_string()),
                    source: None,
                },
                _ if code_str.starts_with("28") => PgBridgeError::Connection {
                    message,
                    hint: Some("Authentication failed - check username and permissions".to_string()),
                    source: None,
                },
                _ if code_str.starts_with("08") => PgBridgeError::Connection {
                    message,
                    hint: None,
                    source: Some(Box::new(err)),
                },
                _ if code_str.starts_with("23") => PgBridgeError::Integrity {
                    message,
                    detail,
                    constraint: db_err.constraint().map(String::from),
                    code,
                },
                _ => PgBridgeError::Query { message, detail, hint, position, code },
            };
        }

        if err.is_closed() {
            return PgBridgeError::Connection {
                message: "Connection closed".to_string(),
                hint: Some("Reconnect before retrying".to_string()),
                source: Some(Box::new(err)),
            };
        }

        // Parameter conversion failures surface as driver errors without a
        // database error attached; they are statement problems, not network ones.
        let text = err.to_string();
        if text.starts_with("error serializing parameter")
            || text.starts_with("error deserializing column")
            || text.contains("parameters but got")
        {
            return PgBridgeError::query(text, None, None, None, None);
        }

        PgBridgeError::Connection { message: text, hint: None, source: Some(Box::new(err)) }
    }
}

/// Convert from native_tls::Error to PgBridgeError.
impl From<native_tls::Error> for PgBridgeError {
    fn from(err: native_tls::Error) -> Self {
        PgBridgeError::Connection {
            message: format!("Failed to create TLS connector: {err}"),
            hint: Some("Verify SSL certificate configuration".to_string()),
            source: Some(Box::new(err)),
        }
    }
}

/// Convert from arrow's ArrowError to PgBridgeError.
impl From<arrow::error::ArrowError> for PgBridgeError {
    fn from(err: arrow::error::ArrowError) -> Self {
        PgBridgeError::query(format!("Failed to build result frame: {err}"), None, None, None, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_connected_is_connection_kind() {
        let err = PgBridgeError::not_connected();
        assert!(err.is_connection());
        assert!(err.is_not_connected());
        assert_eq!(err.category(), "Connection");
        assert_eq!(err.hint(), Some("Call connect() before issuing operations"));
    }

    #[test]
    fn test_connection_error_default_hint() {
        let err = PgBridgeError::connection("refused");
        assert!(!err.is_not_connected());
        assert_eq!(err.hint(), Some("Check that the database server is running"));
    }

    #[test]
    fn test_into_schema_reclassifies_query_errors() {
        let err = PgBridgeError::query(
            "type \"strng\" does not exist",
            None,
            None,
            Some(12),
            Some("42704".to_string()),
        )
        .into_schema();
        assert_eq!(err.category(), "Schema");
        assert_eq!(err.pg_code(), Some("42704"));

        let conn = PgBridgeError::not_connected().into_schema();
        assert!(conn.is_not_connected());
    }

    #[test]
    fn test_transaction_error_reports_index() {
        let inner = PgBridgeError::Integrity {
            message: "duplicate key value violates unique constraint \"t_name_key\"".into(),
            detail: Some("Key (name)=(x) already exists.".into()),
            constraint: Some("t_name_key".into()),
            code: Some("23505".into()),
        };
        let err = PgBridgeError::transaction(1, inner);

        assert_eq!(err.failed_statement(), Some(1));
        assert_eq!(err.pg_code(), Some("23505"));
        assert!(err.to_string().contains("statement 1 failed"));

        let info = err.to_error_info();
        assert_eq!(info.error_type, "Transaction Error");
        assert_eq!(info.technical_detail.as_deref(), Some("Failed statement index: 1"));
    }

    #[test]
    fn test_failed_rollback_is_reported_on_transaction_error() {
        let inner = PgBridgeError::query("division by zero", None, None, None, Some("22012".into()));
        let err = PgBridgeError::transaction(2, inner).with_rollback_failure(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "connection reset by peer",
        ));

        assert_eq!(err.failed_statement(), Some(2));
        assert_eq!(err.pg_code(), Some("22012"));
        assert_eq!(err.hint(), Some(ROLLBACK_FAILED_HINT));
        assert_eq!(
            err.to_error_info().technical_detail.as_deref(),
            Some("Failed statement index: 2\nRollback failed: connection reset by peer")
        );
    }

    #[test]
    fn test_failed_rollback_turns_other_errors_into_connection_errors() {
        let inner = PgBridgeError::Integrity {
            message: "duplicate key value violates unique constraint \"t_pkey\"".into(),
            detail: None,
            constraint: Some("t_pkey".into()),
            code: Some("23505".into()),
        };
        let err = inner.with_rollback_failure(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "broken pipe",
        ));

        assert!(err.is_connection());
        assert!(err.to_string().contains("t_pkey"));
        assert!(err.to_string().ends_with("rollback failed: broken pipe"));
        assert_eq!(err.hint(), Some(ROLLBACK_FAILED_HINT));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_tls_errors_are_connection_errors() {
        let cert_err = native_tls::Certificate::from_pem(b"not a certificate")
            .err()
            .expect("garbage is not a certificate");
        let err = PgBridgeError::from(cert_err);

        assert!(err.is_connection());
        assert_eq!(err.hint(), Some("Verify SSL certificate configuration"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_error_info_for_query_error() {
        let err = PgBridgeError::query(
            "syntax error at or near \"SELEC\"",
            Some("detail text".into()),
            Some("check spelling".into()),
            Some(1),
            Some("42601".into()),
        );
        let info = err.to_error_info();
        assert_eq!(info.error_type, "Query Error");
        assert_eq!(info.hint.as_deref(), Some("check spelling"));
        assert_eq!(
            info.technical_detail.as_deref(),
            Some("Code: 42601\nPosition: 1\nDetail: detail text")
        );
    }

    #[test]
    fn test_integrity_error_info_lists_constraint() {
        let err = PgBridgeError::Integrity {
            message: "null value in column \"name\" violates not-null constraint".into(),
            detail: None,
            constraint: None,
            code: Some("23502".into()),
        };
        assert!(err.is_integrity());
        assert_eq!(err.to_error_info().technical_detail.as_deref(), Some("Code: 23502"));
    }
}
