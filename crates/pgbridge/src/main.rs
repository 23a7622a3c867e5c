//! pgbridge - walks a `DatabaseManager` through its operations against the
//! database described by the `DB_*` environment (or `.env`).
//!
//! Usage: `pgbridge [ENV_PREFIX]`, e.g. `pgbridge DATABRICKS_DB_`.

use pgbridge_core::env::{config_from_env_with_prefix, DEFAULT_ENV_PREFIX};
use pgbridge_core::logging::{init_logging, log_dir, LogConfig};
use pgbridge_core::models::frame::render;
use pgbridge_core::{record, ColumnSpec, DatabaseManager, PgBridgeResult, SqlValue};
use std::process::ExitCode;

const USERS: &str = "pgbridge_demo_users";
const ORDERS: &str = "pgbridge_demo_orders";

#[tokio::main]
async fn main() -> ExitCode {
    let _logging_guard = init_logging(LogConfig::new(log_dir()));

    let prefix = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_ENV_PREFIX.to_string());
    tracing::info!(prefix = %prefix, "Starting pgbridge");

    match run(&prefix).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let info = e.to_error_info();
            eprintln!("{}: {}", info.error_type, info.message);
            if let Some(hint) = info.hint {
                eprintln!("hint: {hint}");
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(prefix: &str) -> PgBridgeResult<()> {
    let config = config_from_env_with_prefix(prefix)?;
    println!("Connecting to {}", config.display_url());

    let mut db = DatabaseManager::connect_with(config).await?;
    let result = walkthrough(&mut db).await;

    for table in [ORDERS, USERS] {
        if let Err(e) = db.drop_table(table).await {
            tracing::warn!(table, error = %e, "Cleanup failed");
        }
    }
    db.disconnect();
    result
}

async fn walkthrough(db: &mut DatabaseManager) -> PgBridgeResult<()> {
    db.create_table(
        USERS,
        &[
            ColumnSpec::new("id", "SERIAL PRIMARY KEY"),
            ColumnSpec::new("username", "VARCHAR(50) UNIQUE NOT NULL"),
            ColumnSpec::new("email", "VARCHAR(100)"),
            ColumnSpec::new("balance", "NUMERIC(10,2) DEFAULT 0"),
            ColumnSpec::new("created_at", "TIMESTAMPTZ DEFAULT now()"),
        ],
    )
    .await?;
    db.create_table(
        ORDERS,
        &[
            ColumnSpec::new("id", "SERIAL PRIMARY KEY"),
            ColumnSpec::new("user_id", &format!("INTEGER REFERENCES {USERS}(id)")),
            ColumnSpec::new("product", "TEXT NOT NULL"),
            ColumnSpec::new("quantity", "INTEGER CHECK (quantity > 0)"),
        ],
    )
    .await?;
    println!("Tables: {}", db.list_tables().await?.join(", "));

    let users = vec![
        record! { "username" => "john_doe", "email" => "john@example.com", "balance" => 120.5 },
        record! { "username" => "jane_smith", "email" => "jane@example.com", "balance" => 75 },
    ];
    let inserted = db.insert_data(USERS, &users).await?;
    println!("Inserted {inserted} users");

    let mut again = users.clone();
    again.push(record! { "username" => "bob_jones", "email" => SqlValue::Null, "balance" => 0 });
    let outcome = db.insert_data_ignore_duplicates(USERS, &again).await?;
    println!("Duplicate-tolerant insert: {} inserted, {} skipped", outcome.inserted, outcome.skipped);

    let updated = db
        .update_data(
            USERS,
            &record! { "email" => "bob@example.com" },
            "username = $1",
            &["bob_jones".into()],
        )
        .await?;
    println!("Updated {updated} user(s)");

    if let Some(columns) = db.get_table_info(USERS).await? {
        println!("\n{USERS}:");
        for column in columns {
            println!(
                "  {:<12} {:<28} nullable={} pk={} default={}",
                column.name,
                column.data_type,
                column.is_nullable,
                column.is_primary_key,
                column.default_value.as_deref().unwrap_or("-"),
            );
        }
    }

    let committed = db
        .execute_transaction(&[
            format!("INSERT INTO {ORDERS} (user_id, product, quantity) SELECT id, 'Laptop', 1 FROM {USERS} WHERE username = 'john_doe'"),
            format!("UPDATE {USERS} SET balance = balance - 99.99 WHERE username = 'john_doe'"),
        ])
        .await?;
    println!("\nTransaction committed {committed} statements");

    match db
        .execute_transaction(&[
            format!("INSERT INTO {ORDERS} (user_id, product, quantity) SELECT id, 'Mouse', 1 FROM {USERS} WHERE username = 'jane_smith'"),
            format!("INSERT INTO {ORDERS} (user_id, product, quantity) VALUES (NULL, 'Broken', 0)"),
        ])
        .await
    {
        Ok(_) => println!("Unexpected commit"),
        Err(e) => println!("Transaction rolled back at statement {:?}: {e}", e.failed_statement()),
    }

    let frame = db
        .execute_query_frame(
            &format!(
                "SELECT u.username, u.balance, count(o.id) AS orders \
                 FROM {USERS} u LEFT JOIN {ORDERS} o ON o.user_id = u.id \
                 GROUP BY u.username, u.balance ORDER BY u.username"
            ),
            &[],
        )
        .await?;
    println!("\n{}\n", render(&frame)?);

    let deleted = db.delete_data(USERS, "email IS NULL", &[]).await?;
    println!("Deleted {deleted} user(s) without email");

    let rows = db.execute_query(&format!("SELECT count(*) FROM {USERS}"), &[]).await?;
    if let Some(count) = rows.first().and_then(|row| row.first()) {
        println!("{count} user(s) remain");
    }

    Ok(())
}
