//! Environment boundary for connection configuration.
//!
//! Reads `<PREFIX>HOST`, `<PREFIX>USER`, `<PREFIX>NAME`, `<PREFIX>PORT`,
//! `<PREFIX>SSLMODE`, `<PREFIX>PASSWORD` and a few optional settings. The
//! rest of the crate only ever sees a `ConnectionConfig` value.

use crate::error::{PgBridgeError, PgBridgeResult};
use crate::models::{ConnectionConfig, ConnectionConfigBuilder, SslMode};

/// Default variable prefix (`DB_HOST`, `DB_USER`, ...).
pub const DEFAULT_ENV_PREFIX: &str = "DB_";

/// Load a `.env` file from the working directory or its parents, if any.
pub fn load_dotenv() {
    match dotenvy::dotenv() {
        Ok(path) => tracing::debug!(path = %path.display(), "Loaded environment file"),
        Err(e) if e.not_found() => {}
        Err(e) => tracing::warn!(error = %e, "Failed to load environment file"),
    }
}

/// Resolve a configuration from `DB_*` variables (after loading `.env`).
pub fn config_from_env() -> PgBridgeResult<ConnectionConfig> {
    config_from_env_with_prefix(DEFAULT_ENV_PREFIX)
}

/// Resolve a configuration from variables named with a custom prefix.
pub fn config_from_env_with_prefix(prefix: &str) -> PgBridgeResult<ConnectionConfig> {
    ConnectionConfig::builder().with_env(prefix)?.build()
}

impl ConnectionConfigBuilder {
    /// Fill unset fields from `<prefix>*` environment variables, loading
    /// `.env` first.
    pub fn with_env(self, prefix: &str) -> PgBridgeResult<Self> {
        load_dotenv();
        merge_env(self, prefix, |key| std::env::var(key).ok())
    }

    /// Fill unset fields from `lookup` instead of the process environment.
    pub fn with_lookup<F>(self, prefix: &str, lookup: F) -> PgBridgeResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        merge_env(self, prefix, lookup)
    }
}

/// Fill every field the builder does not already carry from `lookup`.
///
/// Explicitly set builder values win. Empty variables count as unset.
pub fn merge_env<F>(
    mut builder: ConnectionConfigBuilder,
    prefix: &str,
    lookup: F,
) -> PgBridgeResult<ConnectionConfigBuilder>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |suffix: &str| {
        lookup(&format!("{prefix}{suffix}"))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };

    if builder.host.is_none() {
        builder.host = get("HOST");
    }
    if builder.user.is_none() {
        builder.user = get("USER");
    }
    if builder.database.is_none() {
        builder.database = get("NAME");
    }
    if builder.password.is_none() {
        // Passwords are taken verbatim.
        builder.password = lookup(&format!("{prefix}PASSWORD")).filter(|v| !v.is_empty());
    }
    if builder.port.is_none() {
        if let Some(raw) = get("PORT") {
            builder.port = Some(parse_number(prefix, "PORT", &raw)?);
        }
    }
    if builder.ssl_mode.is_none() {
        if let Some(raw) = get("SSLMODE") {
            builder.ssl_mode = Some(SslMode::parse(&raw)?);
        }
    }
    if builder.ssl_root_cert.is_none() {
        builder.ssl_root_cert = get("SSLROOTCERT").map(Into::into);
    }
    if builder.connect_timeout_secs.is_none() {
        if let Some(raw) = get("CONNECT_TIMEOUT") {
            builder.connect_timeout_secs = Some(parse_number(prefix, "CONNECT_TIMEOUT", &raw)?);
        }
    }
    if builder.statement_timeout_secs.is_none() {
        if let Some(raw) = get("STATEMENT_TIMEOUT") {
            builder.statement_timeout_secs =
                Some(parse_number(prefix, "STATEMENT_TIMEOUT", &raw)?);
        }
    }
    if builder.application_name.is_none() {
        builder.application_name = get("APPLICATION_NAME");
    }

    Ok(builder)
}

fn parse_number<T: std::str::FromStr>(prefix: &str, suffix: &str, raw: &str) -> PgBridgeResult<T> {
    raw.parse()
        .map_err(|_| PgBridgeError::config(format!("{prefix}{suffix} must be a number, got '{raw}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_full_environment() {
        let lookup = lookup_from(&[
            ("DB_HOST", "instance.cloud.example.com"),
            ("DB_USER", "svc"),
            ("DB_NAME", "databricks_postgres"),
            ("DB_PORT", "5433"),
            ("DB_SSLMODE", "verify-full"),
            ("DB_PASSWORD", " token with spaces "),
            ("DB_STATEMENT_TIMEOUT", "15"),
        ]);
        let config = merge_env(ConnectionConfig::builder(), "DB_", lookup).unwrap().build().unwrap();

        assert_eq!(config.host, "instance.cloud.example.com");
        assert_eq!(config.user, "svc");
        assert_eq!(config.database, "databricks_postgres");
        assert_eq!(config.port, 5433);
        assert_eq!(config.ssl_mode, SslMode::VerifyFull);
        assert_eq!(config.password, " token with spaces ");
        assert_eq!(config.options.statement_timeout_secs, Some(15));
    }

    #[test]
    fn test_defaults_for_port_and_sslmode() {
        let lookup = lookup_from(&[
            ("DB_HOST", "h"),
            ("DB_USER", "u"),
            ("DB_NAME", "d"),
            ("DB_PASSWORD", "p"),
        ]);
        let config = merge_env(ConnectionConfig::builder(), "DB_", lookup).unwrap().build().unwrap();
        assert_eq!(config.port, 5432);
        assert_eq!(config.ssl_mode, SslMode::Require);
    }

    #[test]
    fn test_explicit_values_override_environment() {
        let lookup = lookup_from(&[
            ("DB_HOST", "from-env"),
            ("DB_USER", "env-user"),
            ("DB_NAME", "d"),
            ("DB_PASSWORD", "p"),
            ("DB_PORT", "1111"),
        ]);
        let builder = ConnectionConfig::builder().host("explicit").port(2222);
        let config = merge_env(builder, "DB_", lookup).unwrap().build().unwrap();
        assert_eq!(config.host, "explicit");
        assert_eq!(config.port, 2222);
        assert_eq!(config.user, "env-user");
    }

    #[test]
    fn test_custom_prefix() {
        let lookup = lookup_from(&[
            ("DATABRICKS_DB_HOST", "h"),
            ("DATABRICKS_DB_USER", "u"),
            ("DATABRICKS_DB_NAME", "d"),
            ("DATABRICKS_DB_PASSWORD", "p"),
            ("DB_HOST", "ignored"),
        ]);
        let config = merge_env(ConnectionConfig::builder(), "DATABRICKS_DB_", lookup)
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(config.host, "h");
    }

    #[test]
    fn test_missing_password_fails_before_network() {
        let lookup = lookup_from(&[("DB_HOST", "h"), ("DB_USER", "u"), ("DB_NAME", "d")]);
        let err = merge_env(ConnectionConfig::builder(), "DB_", lookup)
            .unwrap()
            .build()
            .unwrap_err();
        assert_eq!(err.category(), "Config");
        assert!(err.to_string().contains("password"));
    }

    #[test]
    fn test_empty_values_count_as_missing() {
        let lookup = lookup_from(&[
            ("DB_HOST", "   "),
            ("DB_USER", "u"),
            ("DB_NAME", "d"),
            ("DB_PASSWORD", "p"),
        ]);
        let err = merge_env(ConnectionConfig::builder(), "DB_", lookup)
            .unwrap()
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("host"));
    }

    #[test]
    fn test_invalid_port_and_sslmode() {
        let bad_port = lookup_from(&[("DB_PORT", "54x2")]);
        let err = merge_env(ConnectionConfig::builder(), "DB_", bad_port).unwrap_err();
        assert!(err.to_string().contains("DB_PORT"));

        let bad_mode = lookup_from(&[("DB_SSLMODE", "sometimes")]);
        let err = merge_env(ConnectionConfig::builder(), "DB_", bad_mode).unwrap_err();
        assert_eq!(err.category(), "Config");
    }

    #[test]
    fn test_builder_with_lookup() {
        let lookup = lookup_from(&[
            ("APP_DB_HOST", "h"),
            ("APP_DB_USER", "u"),
            ("APP_DB_NAME", "d"),
            ("APP_DB_PASSWORD", "p"),
        ]);
        let config = ConnectionConfig::builder()
            .application_name("reports")
            .with_lookup("APP_DB_", lookup)
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(config.host, "h");
        assert_eq!(config.options.application_name, "reports");
    }
}
