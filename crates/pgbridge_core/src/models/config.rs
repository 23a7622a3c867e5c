//! Connection configuration models.

use crate::error::{PgBridgeError, PgBridgeResult};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Default PostgreSQL port.
pub const DEFAULT_PORT: u16 = 5432;

/// SSL mode for database connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SslMode {
    /// No SSL
    Disable,
    /// Require SSL, accept any certificate (default)
    #[default]
    Require,
    /// Require SSL, verify CA
    VerifyCa,
    /// Require SSL, verify CA and hostname
    VerifyFull,
}

impl SslMode {
    /// Convert to the libpq spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disable => "disable",
            Self::Require => "require",
            Self::VerifyCa => "verify-ca",
            Self::VerifyFull => "verify-full",
        }
    }

    /// Parse from the libpq spelling.
    pub fn parse(s: &str) -> PgBridgeResult<Self> {
        match s.trim().to_lowercase().as_str() {
            "disable" => Ok(Self::Disable),
            "require" => Ok(Self::Require),
            "verify-ca" | "verify_ca" => Ok(Self::VerifyCa),
            "verify-full" | "verify_full" => Ok(Self::VerifyFull),
            other => Err(PgBridgeError::config(format!(
                "Unsupported sslmode '{other}' (expected disable, require, verify-ca or verify-full)"
            ))),
        }
    }

    /// Whether the session must be encrypted.
    pub fn requires_tls(&self) -> bool {
        !matches!(self, Self::Disable)
    }
}

impl fmt::Display for SslMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Additional connection options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionOptions {
    /// Connection timeout in seconds
    pub connect_timeout_secs: u32,
    /// Statement timeout in seconds (None = server default)
    pub statement_timeout_secs: Option<u32>,
    /// Application name sent to PostgreSQL
    pub application_name: String,
    /// TCP keepalives on the session socket
    pub keepalives: bool,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            statement_timeout_secs: None,
            application_name: "pgbridge".to_string(),
            keepalives: true,
        }
    }
}

/// Configuration for a database connection.
///
/// The password is skipped by serde and redacted from `Debug` output.
#[derive(Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Server hostname or IP
    pub host: String,
    /// Server port (default 5432)
    pub port: u16,
    /// Database name (1-63 chars)
    pub database: String,
    /// Login username
    pub user: String,
    /// Login password
    #[serde(skip_serializing, default)]
    pub password: String,
    /// SSL configuration
    #[serde(default)]
    pub ssl_mode: SslMode,
    /// PEM root certificate added to the trust store for verify-ca/verify-full
    #[serde(default)]
    pub ssl_root_cert: Option<PathBuf>,
    /// Additional options
    #[serde(default)]
    pub options: ConnectionOptions,
}

impl ConnectionConfig {
    /// Create a new connection configuration with required fields.
    pub fn new(
        host: impl Into<String>,
        database: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            database: database.into(),
            user: user.into(),
            password: password.into(),
            ssl_mode: SslMode::default(),
            ssl_root_cert: None,
            options: ConnectionOptions::default(),
        }
    }

    /// Create a builder for complex configurations.
    pub fn builder() -> ConnectionConfigBuilder {
        ConnectionConfigBuilder::default()
    }

    /// Validate the configuration.
    ///
    /// Runs before any network attempt.
    pub fn validate(&self) -> PgBridgeResult<()> {
        let mut missing = Vec::new();
        if self.host.trim().is_empty() {
            missing.push("host");
        }
        if self.user.trim().is_empty() {
            missing.push("user");
        }
        if self.password.is_empty() {
            missing.push("password");
        }
        if self.database.trim().is_empty() {
            missing.push("database");
        }
        if !missing.is_empty() {
            return Err(PgBridgeError::config(format!(
                "Missing required connection parameter(s): {}",
                missing.join(", ")
            )));
        }
        if self.database.len() > 63 {
            return Err(PgBridgeError::config("Database name must be 1-63 characters"));
        }
        if self.port == 0 {
            return Err(PgBridgeError::config("Port must be between 1 and 65535"));
        }
        if self.options.connect_timeout_secs == 0 {
            return Err(PgBridgeError::config("Connect timeout must be at least 1 second"));
        }
        if self.ssl_root_cert.is_some() && !self.ssl_mode.requires_tls() {
            return Err(PgBridgeError::config("ssl_root_cert requires an sslmode other than disable"));
        }
        Ok(())
    }

    /// Get the display connection string (without password).
    pub fn display_url(&self) -> String {
        format!(
            "postgresql://{}@{}:{}/{}?sslmode={}",
            self.user, self.host, self.port, self.database, self.ssl_mode
        )
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("ssl_mode", &self.ssl_mode)
            .field("ssl_root_cert", &self.ssl_root_cert)
            .field("options", &self.options)
            .finish()
    }
}

/// Builder for ConnectionConfig.
///
/// Values set explicitly win over values merged from the environment.
#[derive(Default)]
pub struct ConnectionConfigBuilder {
    pub(crate) host: Option<String>,
    pub(crate) port: Option<u16>,
    pub(crate) database: Option<String>,
    pub(crate) user: Option<String>,
    pub(crate) password: Option<String>,
    pub(crate) ssl_mode: Option<SslMode>,
    pub(crate) ssl_root_cert: Option<PathBuf>,
    pub(crate) connect_timeout_secs: Option<u32>,
    pub(crate) statement_timeout_secs: Option<u32>,
    pub(crate) application_name: Option<String>,
}

impl ConnectionConfigBuilder {
    /// Set the host.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Set the port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set the database name.
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Set the username.
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Set the password.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set the SSL mode.
    pub fn ssl_mode(mut self, ssl_mode: SslMode) -> Self {
        self.ssl_mode = Some(ssl_mode);
        self
    }

    /// Set a PEM root certificate for certificate verification.
    pub fn ssl_root_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.ssl_root_cert = Some(path.into());
        self
    }

    /// Set the connection timeout.
    pub fn connect_timeout_secs(mut self, secs: u32) -> Self {
        self.connect_timeout_secs = Some(secs);
        self
    }

    /// Set the statement timeout.
    pub fn statement_timeout_secs(mut self, secs: u32) -> Self {
        self.statement_timeout_secs = Some(secs);
        self
    }

    /// Set the application name reported to the server.
    pub fn application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = Some(name.into());
        self
    }

    /// Build and validate the configuration.
    pub fn build(self) -> PgBridgeResult<ConnectionConfig> {
        let defaults = ConnectionOptions::default();
        let config = ConnectionConfig {
            host: self.host.unwrap_or_default(),
            port: self.port.unwrap_or(DEFAULT_PORT),
            database: self.database.unwrap_or_default(),
            user: self.user.unwrap_or_default(),
            password: self.password.unwrap_or_default(),
            ssl_mode: self.ssl_mode.unwrap_or_default(),
            ssl_root_cert: self.ssl_root_cert,
            options: ConnectionOptions {
                connect_timeout_secs: self
                    .connect_timeout_secs
                    .unwrap_or(defaults.connect_timeout_secs),
                statement_timeout_secs: self.statement_timeout_secs,
                application_name: self.application_name.unwrap_or(defaults.application_name),
                keepalives: defaults.keepalives,
            },
        };
        config.validate()?;
        Ok(config)
    }
}

impl fmt::Debug for ConnectionConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfigBuilder")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("ssl_mode", &self.ssl_mode)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ssl_mode_parse() {
        assert_eq!(SslMode::parse("require").unwrap(), SslMode::Require);
        assert_eq!(SslMode::parse("VERIFY-FULL").unwrap(), SslMode::VerifyFull);
        assert_eq!(SslMode::parse("verify_ca").unwrap(), SslMode::VerifyCa);
        assert_eq!(SslMode::parse("disable").unwrap(), SslMode::Disable);
        assert!(SslMode::parse("prefer").is_err());
        assert_eq!(SslMode::default(), SslMode::Require);
    }

    #[test]
    fn test_new_uses_defaults() {
        let config = ConnectionConfig::new("db.example.com", "app", "alice", "secret");
        assert_eq!(config.port, 5432);
        assert_eq!(config.ssl_mode, SslMode::Require);
        assert!(config.validate().is_ok());
        assert_eq!(
            config.display_url(),
            "postgresql://alice@db.example.com:5432/app?sslmode=require"
        );
    }

    #[test]
    fn test_validate_reports_all_missing_fields() {
        let config = ConnectionConfig::new("", "", "alice", "");
        let err = config.validate().unwrap_err();
        assert_eq!(err.category(), "Config");
        let message = err.to_string();
        assert!(message.contains("host"));
        assert!(message.contains("password"));
        assert!(message.contains("database"));
        assert!(!message.contains("user"));
    }

    #[test]
    fn test_validate_rejects_zero_port() {
        let mut config = ConnectionConfig::new("h", "d", "u", "p");
        config.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_root_cert_without_tls() {
        let mut config = ConnectionConfig::new("h", "d", "u", "p");
        config.ssl_mode = SslMode::Disable;
        config.ssl_root_cert = Some(PathBuf::from("/tmp/ca.pem"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_debug_redacts_password() {
        let config = ConnectionConfig::new("h", "d", "u", "hunter2");
        let debug = format!("{config:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("<redacted>"));

        let builder = ConnectionConfig::builder().password("hunter2");
        assert!(!format!("{builder:?}").contains("hunter2"));
    }

    #[test]
    fn test_serialize_skips_password() {
        let config = ConnectionConfig::new("h", "d", "u", "hunter2");
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("hunter2"));
        assert!(json.contains("\"ssl_mode\":\"require\""));
    }

    #[test]
    fn test_builder() {
        let config = ConnectionConfig::builder()
            .host("localhost")
            .port(6543)
            .database("orders")
            .user("app")
            .password("pw")
            .ssl_mode(SslMode::Disable)
            .statement_timeout_secs(30)
            .build()
            .unwrap();
        assert_eq!(config.port, 6543);
        assert_eq!(config.ssl_mode, SslMode::Disable);
        assert_eq!(config.options.statement_timeout_secs, Some(30));
        assert_eq!(config.options.application_name, "pgbridge");
    }

    #[test]
    fn test_builder_without_required_fields_fails() {
        let err = ConnectionConfig::builder().host("localhost").build().unwrap_err();
        assert_eq!(err.category(), "Config");
    }
}
