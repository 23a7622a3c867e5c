//! Session-owning facade over a single PostgreSQL connection.
//!
//! A `DatabaseManager` holds at most one session. Every operation other than
//! `connect` fails with a "Not connected" connection error while no session is
//! held, without touching the network. Dropping the manager closes the session.

use crate::env;
use crate::error::{PgBridgeError, PgBridgeResult};
use crate::models::{
    ColumnDetail, ColumnSpec, ConnectionConfig, DataFrame, InsertOutcome, Row,
    RowRecord, SqlValue, SslMode,
};
use crate::models::frame;
use crate::services::sql;

use native_tls::TlsConnector;
use postgres_native_tls::MakeTlsConnector;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio_postgres::tls::{MakeTlsConnect, TlsConnect};
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::{Client, NoTls, Socket, Transaction};

static NULL: SqlValue = SqlValue::Null;

/// A live session: the client half of a tokio-postgres connection whose
/// driver task runs on the runtime.
struct Session {
    client: Client,
    opened_at: Instant,
}

/// Owns one PostgreSQL session and exposes table, data and transaction
/// operations over it.
///
/// Operations take `&mut self` where they open a transaction, so a manager
/// is never used by two callers at once.
pub struct DatabaseManager {
    config: ConnectionConfig,
    session: Option<Session>,
}

impl DatabaseManager {
    /// Create a disconnected manager.
    pub fn new(config: ConnectionConfig) -> Self {
        Self { config, session: None }
    }

    /// Create a disconnected manager configured from `DB_*` environment
    /// variables (and `.env`).
    pub fn from_env() -> PgBridgeResult<Self> {
        env::load_dotenv();
        Ok(Self::new(env::config_from_env()?))
    }

    /// Create a manager and connect it.
    pub async fn connect_with(config: ConnectionConfig) -> PgBridgeResult<Self> {
        let mut manager = Self::new(config);
        manager.connect().await?;
        Ok(manager)
    }

    /// Get the connection configuration.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    // ========== Lifecycle ==========

    /// Open the session.
    ///
    /// Does nothing if a live session is already held. The configuration is
    /// validated before any network activity.
    pub async fn connect(&mut self) -> PgBridgeResult<()> {
        if self.is_connected() {
            tracing::debug!(host = %self.config.host, "Already connected");
            return Ok(());
        }
        self.session = None;
        self.config.validate()?;

        tracing::info!(
            host = %self.config.host,
            port = self.config.port,
            database = %self.config.database,
            user = %self.config.user,
            ssl_mode = %self.config.ssl_mode,
            "Connecting to database"
        );

        let pg_config = pg_config(&self.config);
        let timeout = Duration::from_secs(u64::from(self.config.options.connect_timeout_secs));

        let connecting = async {
            match self.config.ssl_mode {
                SslMode::Disable => open(&pg_config, NoTls).await,
                mode => {
                    let tls = tls_connector(mode, self.config.ssl_root_cert.as_deref())?;
                    open(&pg_config, tls).await
                }
            }
        };

        let client = match tokio::time::timeout(timeout, connecting).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(PgBridgeError::connection_with_hint(
                    format!("Connection attempt timed out after {}s", timeout.as_secs()),
                    "Check that the server is reachable and accepting connections",
                ))
            }
        };

        tracing::info!(
            host = %self.config.host,
            database = %self.config.database,
            "Connected to database"
        );

        self.session = Some(Session { client, opened_at: Instant::now() });
        Ok(())
    }

    /// Close the session. Safe to call when not connected.
    pub fn disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            let open_secs = session.opened_at.elapsed().as_secs();
            drop(session.client);
            tracing::info!(
                host = %self.config.host,
                database = %self.config.database,
                open_secs,
                "Database connection closed"
            );
        }
    }

    /// Check whether a live session is held.
    pub fn is_connected(&self) -> bool {
        self.session.as_ref().is_some_and(|s| !s.client.is_closed())
    }

    /// Round-trip a trivial statement to confirm the session still works.
    pub async fn ping(&self) -> PgBridgeResult<()> {
        self.client()?.simple_query("SELECT 1").await?;
        Ok(())
    }

    fn client(&self) -> PgBridgeResult<&Client> {
        match &self.session {
            Some(session) if !session.client.is_closed() => Ok(&session.client),
            Some(_) => Err(closed_session()),
            None => Err(PgBridgeError::not_connected()),
        }
    }

    fn client_mut(&mut self) -> PgBridgeResult<&mut Client> {
        match &mut self.session {
            Some(session) if !session.client.is_closed() => Ok(&mut session.client),
            Some(_) => Err(closed_session()),
            None => Err(PgBridgeError::not_connected()),
        }
    }

    // ========== Tables ==========

    /// Create a table if it does not already exist.
    pub async fn create_table(&self, table: &str, columns: &[ColumnSpec]) -> PgBridgeResult<()> {
        let client = self.client()?;
        let statement = sql::create_table(table, columns)?;

        client
            .batch_execute(&statement)
            .await
            .map_err(|e| PgBridgeError::from(e).into_schema())?;

        tracing::info!(table, columns = columns.len(), "Table created");
        Ok(())
    }

    /// Drop a table and its dependents. Dropping a missing table succeeds.
    pub async fn drop_table(&self, table: &str) -> PgBridgeResult<()> {
        let client = self.client()?;
        let statement = sql::drop_table(table)?;

        client
            .batch_execute(&statement)
            .await
            .map_err(|e| PgBridgeError::from(e).into_schema())?;

        tracing::info!(table, "Table dropped");
        Ok(())
    }

    /// Check whether a table exists, in the current schema unless qualified.
    pub async fn table_exists(&self, table: &str) -> PgBridgeResult<bool> {
        let client = self.client()?;
        let (schema, name) = catalog_name(table)?;

        let row = client
            .query_one(
                r#"
                SELECT EXISTS (
                    SELECT 1
                    FROM pg_catalog.pg_class c
                    JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
                    WHERE c.relname = $2
                      AND n.nspname = COALESCE($1::text, current_schema())
                      AND c.relkind IN ('r', 'p')
                )
                "#,
                &[&schema, &name],
            )
            .await?;

        Ok(row.get(0))
    }

    /// Column metadata in ordinal order, or `None` if the table does not exist.
    pub async fn get_table_info(&self, table: &str) -> PgBridgeResult<Option<Vec<ColumnDetail>>> {
        if !self.table_exists(table).await? {
            return Ok(None);
        }
        let client = self.client()?;
        let (schema, name) = catalog_name(table)?;

        let rows = client
            .query(
                r#"
                SELECT
                    a.attname AS name,
                    pg_catalog.format_type(a.atttypid, a.atttypmod) AS data_type,
                    NOT a.attnotnull AS is_nullable,
                    COALESCE(
                        (SELECT true FROM pg_catalog.pg_constraint con
                         WHERE con.conrelid = c.oid
                           AND con.contype = 'p'
                           AND a.attnum = ANY(con.conkey)),
                        false
                    ) AS is_primary_key,
                    pg_catalog.pg_get_expr(d.adbin, d.adrelid) AS default_value,
                    a.attnum::int4 AS ordinal_position
                FROM pg_catalog.pg_attribute a
                JOIN pg_catalog.pg_class c ON c.oid = a.attrelid
                JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
                LEFT JOIN pg_catalog.pg_attrdef d ON d.adrelid = a.attrelid AND d.adnum = a.attnum
                WHERE c.relname = $2
                  AND n.nspname = COALESCE($1::text, current_schema())
                  AND c.relkind IN ('r', 'p')
                  AND a.attnum > 0
                  AND NOT a.attisdropped
                ORDER BY a.attnum
                "#,
                &[&schema, &name],
            )
            .await?;

        let columns = rows
            .iter()
            .map(|row| ColumnDetail {
                name: row.get("name"),
                data_type: row.get("data_type"),
                is_nullable: row.get("is_nullable"),
                is_primary_key: row.get("is_primary_key"),
                default_value: row.get("default_value"),
                ordinal_position: row.get("ordinal_position"),
            })
            .collect();

        Ok(Some(columns))
    }

    /// Names of the base tables in the current schema, sorted.
    pub async fn list_tables(&self) -> PgBridgeResult<Vec<String>> {
        let client = self.client()?;

        let rows = client
            .query(
                r#"
                SELECT c.relname::text
                FROM pg_catalog.pg_class c
                JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
                WHERE n.nspname = current_schema()
                  AND c.relkind IN ('r', 'p')
                ORDER BY c.relname
                "#,
                &[],
            )
            .await?;

        Ok(rows.iter().map(|row| row.get(0)).collect())
    }

    // ========== Data ==========

    /// Insert records atomically. Returns the number of rows written.
    ///
    /// All records must carry the same columns. If any row fails, nothing is
    /// written.
    pub async fn insert_data(&mut self, table: &str, records: &[RowRecord]) -> PgBridgeResult<u64> {
        self.client()?;
        let columns = record_columns(records)?;
        let statement_sql = sql::insert(table, &columns, false)?;

        let client = self.client_mut()?;
        let txn = client.transaction().await?;

        let result = async {
            let statement = txn.prepare(&statement_sql).await?;
            let mut inserted = 0;
            for (row, record) in records.iter().enumerate() {
                let params = ordered_params(record, &columns);
                inserted += txn.execute(&statement, &params).await.map_err(|e| {
                    let err = PgBridgeError::from(e);
                    tracing::warn!(table, row, error = %err, "Insert failed");
                    err
                })?;
            }
            Ok::<_, PgBridgeError>(inserted)
        }
        .await;

        match result {
            Ok(inserted) => {
                txn.commit().await?;
                tracing::info!(table, rows = inserted, "Rows inserted");
                Ok(inserted)
            }
            Err(err) => Err(rollback(txn, err).await),
        }
    }

    /// Insert records, skipping any that violate a uniqueness constraint.
    ///
    /// An empty input returns `(0, 0)`. Any other failure rolls the whole
    /// call back.
    pub async fn insert_data_ignore_duplicates(
        &mut self,
        table: &str,
        records: &[RowRecord],
    ) -> PgBridgeResult<InsertOutcome> {
        self.client()?;
        if records.is_empty() {
            tracing::warn!(table, "No records to insert");
            return Ok(InsertOutcome::default());
        }
        let columns = record_columns(records)?;
        let statement_sql = sql::insert(table, &columns, true)?;

        let client = self.client_mut()?;
        let txn = client.transaction().await?;

        let result = async {
            let statement = txn.prepare(&statement_sql).await?;
            let mut outcome = InsertOutcome::default();
            for (row, record) in records.iter().enumerate() {
                let params = ordered_params(record, &columns);
                match txn.execute(&statement, &params).await {
                    Ok(0) => outcome.skipped += 1,
                    Ok(n) => outcome.inserted += n,
                    Err(e) => {
                        let err = PgBridgeError::from(e);
                        tracing::warn!(table, row, error = %err, "Insert failed");
                        return Err(err);
                    }
                }
            }
            Ok::<_, PgBridgeError>(outcome)
        }
        .await;

        match result {
            Ok(outcome) => {
                txn.commit().await?;
                tracing::info!(
                    table,
                    inserted = outcome.inserted,
                    skipped = outcome.skipped,
                    "Rows inserted, duplicates skipped"
                );
                Ok(outcome)
            }
            Err(err) => Err(rollback(txn, err).await),
        }
    }

    /// Set columns on every row matching `condition`. Returns the number of
    /// rows updated.
    ///
    /// `condition` numbers its placeholders from `$1`, bound from `params`.
    pub async fn update_data(
        &self,
        table: &str,
        changes: &RowRecord,
        condition: &str,
        params: &[SqlValue],
    ) -> PgBridgeResult<u64> {
        let client = self.client()?;
        if changes.is_empty() {
            return Err(PgBridgeError::validation("No columns to update"));
        }
        let columns: Vec<&str> = changes.columns().collect();
        let statement = sql::update(table, &columns, condition)?;

        let bound: Vec<&(dyn ToSql + Sync)> = changes
            .values()
            .chain(params.iter())
            .map(|v| v as &(dyn ToSql + Sync))
            .collect();

        let updated = client.execute(&statement, &bound).await?;
        tracing::info!(table, rows = updated, "Rows updated");
        Ok(updated)
    }

    /// Delete every row matching `condition`. Returns the number of rows deleted.
    pub async fn delete_data(
        &self,
        table: &str,
        condition: &str,
        params: &[SqlValue],
    ) -> PgBridgeResult<u64> {
        let client = self.client()?;
        let statement = sql::delete(table, condition)?;

        let deleted = client.execute(&statement, &as_params(params)).await?;
        tracing::info!(table, rows = deleted, "Rows deleted");
        Ok(deleted)
    }

    // ========== Queries ==========

    /// Run a statement and return its rows. Statements without a result set
    /// return an empty list.
    pub async fn execute_query(&self, query: &str, params: &[SqlValue]) -> PgBridgeResult<Vec<Row>> {
        let client = self.client()?;
        tracing::debug!(sql = %sql::truncate_sql(query, 100), params = params.len(), "Executing query");

        let rows = client.query(query, &as_params(params)).await?;
        rows.iter().map(decode_row).collect()
    }

    /// Run a statement and return the number of rows it affected.
    pub async fn execute_statement(&self, query: &str, params: &[SqlValue]) -> PgBridgeResult<u64> {
        let client = self.client()?;
        tracing::debug!(sql = %sql::truncate_sql(query, 100), params = params.len(), "Executing statement");

        Ok(client.execute(query, &as_params(params)).await?)
    }

    /// Run a query and return its result as a `DataFrame`, an Arrow
    /// record batch.
    ///
    /// The schema comes from the prepared statement, so a query that returns
    /// no rows still yields its columns.
    pub async fn execute_query_frame(
        &self,
        query: &str,
        params: &[SqlValue],
    ) -> PgBridgeResult<DataFrame> {
        let client = self.client()?;
        tracing::debug!(sql = %sql::truncate_sql(query, 100), params = params.len(), "Executing frame query");

        let statement = client.prepare(query).await?;
        let columns: Vec<(&str, Type)> =
            statement.columns().iter().map(|col| (col.name(), col.type_().clone())).collect();

        let rows = client.query(&statement, &as_params(params)).await?;
        let rows = rows.iter().map(decode_row).collect::<PgBridgeResult<Vec<Row>>>()?;

        frame::build_frame(&columns, &rows)
    }

    // ========== Transactions ==========

    /// Run statements in order inside one transaction.
    ///
    /// On the first failure the transaction is rolled back and a
    /// `Transaction` error names the failing statement's index. A failed
    /// COMMIT reports index `queries.len()`. Returns the number of statements
    /// run.
    pub async fn execute_transaction<S: AsRef<str>>(&mut self, queries: &[S]) -> PgBridgeResult<usize> {
        let client = self.client_mut()?;
        if queries.is_empty() {
            return Ok(0);
        }

        let txn = client.transaction().await?;
        for (index, query) in queries.iter().enumerate() {
            if let Err(e) = txn.batch_execute(query.as_ref()).await {
                let err = PgBridgeError::from(e);
                tracing::warn!(index, error = %err, "Transaction statement failed, rolling back");
                return Err(rollback(txn, PgBridgeError::transaction(index, err)).await);
            }
        }

        txn.commit()
            .await
            .map_err(|e| PgBridgeError::transaction(queries.len(), e.into()))?;

        tracing::info!(statements = queries.len(), "Transaction committed");
        Ok(queries.len())
    }
}

impl Drop for DatabaseManager {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl std::fmt::Debug for DatabaseManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseManager")
            .field("config", &self.config)
            .field("connected", &self.is_connected())
            .finish()
    }
}

fn closed_session() -> PgBridgeError {
    PgBridgeError::connection_with_hint("Connection closed", "Call connect() to open a new session")
}

fn pg_config(config: &ConnectionConfig) -> tokio_postgres::Config {
    let mut pg_config = tokio_postgres::Config::new();
    pg_config.host(&config.host);
    pg_config.port(config.port);
    pg_config.dbname(&config.database);
    pg_config.user(&config.user);
    pg_config.password(&config.password);
    pg_config.application_name(&config.options.application_name);
    pg_config.connect_timeout(Duration::from_secs(u64::from(config.options.connect_timeout_secs)));
    pg_config.keepalives(config.options.keepalives);
    pg_config.keepalives_idle(Duration::from_secs(60));
    pg_config.ssl_mode(if config.ssl_mode.requires_tls() {
        tokio_postgres::config::SslMode::Require
    } else {
        tokio_postgres::config::SslMode::Disable
    });

    if let Some(secs) = config.options.statement_timeout_secs {
        pg_config.options(&format!("-c statement_timeout={secs}s"));
    }

    pg_config
}

/// Build the TLS connector for a TLS ssl mode.
///
/// `require` skips certificate checks unless a root certificate is supplied,
/// in which case it verifies the chain like `verify-ca`.
fn tls_connector(mode: SslMode, root_cert: Option<&Path>) -> PgBridgeResult<MakeTlsConnector> {
    let mut builder = TlsConnector::builder();

    match mode {
        SslMode::Require if root_cert.is_none() => {
            builder.danger_accept_invalid_certs(true);
            builder.danger_accept_invalid_hostnames(true);
        }
        SslMode::Require | SslMode::VerifyCa => {
            builder.danger_accept_invalid_hostnames(true);
        }
        SslMode::VerifyFull | SslMode::Disable => {}
    }

    if let Some(path) = root_cert {
        let pem = std::fs::read(path).map_err(|e| {
            PgBridgeError::connection_with_hint(
                format!("Failed to read root certificate {}: {e}", path.display()),
                "Check that the certificate file exists and is readable",
            )
        })?;
        let cert = native_tls::Certificate::from_pem(&pem).map_err(|e| {
            PgBridgeError::connection_with_hint(
                format!("Failed to parse root certificate: {e}"),
                "Ensure the certificate is in PEM format",
            )
        })?;
        builder.add_root_certificate(cert);
    }

    Ok(MakeTlsConnector::new(builder.build()?))
}

/// Connect and spawn the connection driver.
async fn open<T>(pg_config: &tokio_postgres::Config, tls: T) -> PgBridgeResult<Client>
where
    T: MakeTlsConnect<Socket>,
    T::Stream: Send + 'static,
    T::TlsConnect: Send,
    <T::TlsConnect as TlsConnect<Socket>>::Future: Send,
{
    let (client, connection) = pg_config.connect(tls).await.map_err(connect_error)?;

    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::warn!(error = %e, "Database connection terminated");
        }
    });

    Ok(client)
}

/// Anything that goes wrong while opening a session is a connection error.
fn connect_error(err: tokio_postgres::Error) -> PgBridgeError {
    match PgBridgeError::from(err) {
        err @ PgBridgeError::Connection { .. } => err,
        other => PgBridgeError::connection_with_hint(
            other.to_string(),
            "Check the database name, credentials and server settings",
        ),
    }
}

/// Roll back after `err`. A failed ROLLBACK is folded into the returned error.
async fn rollback(txn: Transaction<'_>, err: PgBridgeError) -> PgBridgeError {
    match txn.rollback().await {
        Ok(()) => err,
        Err(e) => {
            tracing::warn!(error = %e, "Rollback failed");
            err.with_rollback_failure(e)
        }
    }
}

/// Catalog lookup key for a possibly qualified table name. Unquoted
/// identifiers fold to lower case.
fn catalog_name(table: &str) -> PgBridgeResult<(Option<String>, String)> {
    let (schema, name) = sql::split_table_name(table)?;
    Ok((schema.map(str::to_ascii_lowercase), name.to_ascii_lowercase()))
}

/// Validate a batch of records and return the shared column order.
fn record_columns(records: &[RowRecord]) -> PgBridgeResult<Vec<&str>> {
    let first = records
        .first()
        .ok_or_else(|| PgBridgeError::validation("No records provided"))?;
    if first.is_empty() {
        return Err(PgBridgeError::validation("Records must have at least one column"));
    }

    if let Some((index, record)) =
        records.iter().enumerate().skip(1).find(|(_, r)| !r.same_columns(first))
    {
        return Err(PgBridgeError::validation(format!(
            "Record {index} has columns [{}] but record 0 has [{}]",
            record.columns().collect::<Vec<_>>().join(", "),
            first.columns().collect::<Vec<_>>().join(", "),
        )));
    }

    Ok(first.columns().collect())
}

fn ordered_params<'a>(record: &'a RowRecord, columns: &[&str]) -> Vec<&'a (dyn ToSql + Sync)> {
    columns
        .iter()
        .map(|c| record.get(c).unwrap_or(&NULL) as &(dyn ToSql + Sync))
        .collect()
}

fn as_params(params: &[SqlValue]) -> Vec<&(dyn ToSql + Sync)> {
    params.iter().map(|v| v as &(dyn ToSql + Sync)).collect()
}

fn decode_row(row: &tokio_postgres::Row) -> PgBridgeResult<Row> {
    (0..row.len())
        .map(|i| row.try_get::<_, SqlValue>(i).map_err(PgBridgeError::from))
        .collect()
}
