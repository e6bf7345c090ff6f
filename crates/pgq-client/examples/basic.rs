//! Basic pooled query example.
//!
//! This example demonstrates how to build an executor for PostgreSQL, run
//! statements with parameters, watch lifecycle events and shut down.
//!
//! # Running
//!
//! ```bash
//! # Set connection details via environment variables
//! export PGQ_HOST=localhost
//! export PGQ_DATABASE=postgres
//! export PGQ_USER=postgres
//! export PGQ_PASSWORD=postgres
//!
//! cargo run --example basic
//! ```

// Allow common patterns in example code
#![allow(clippy::unwrap_used, clippy::expect_used)]

use pgq_client::{
    Config, ConnectionConfig, EmitControl, Error, EventKind, PgExecutor, PoolOptions,
    escape_single_quotes,
};
use serde_json::json;

#[tokio::main]
async fn main() -> Result<(), Error> {
    // Initialize tracing for logging
    tracing_subscriber::fmt::init();

    let host = std::env::var("PGQ_HOST").unwrap_or_else(|_| "localhost".into());
    let database = std::env::var("PGQ_DATABASE").unwrap_or_else(|_| "postgres".into());
    let user = std::env::var("PGQ_USER").unwrap_or_else(|_| "postgres".into());
    let password = std::env::var("PGQ_PASSWORD").unwrap_or_else(|_| "postgres".into());

    let config = Config::new(ConnectionConfig::new(&host, user, password).database(database))
        .pool(PoolOptions::new().min(1).max(4))
        .emit(EmitControl::all());

    println!("Connecting to PostgreSQL at {host}...");
    let executor = PgExecutor::connect(config)?;

    // Print every event as the JSON payload observers receive
    for kind in [
        EventKind::Connect,
        EventKind::Disconnect,
        EventKind::Query,
        EventKind::Results,
    ] {
        executor.on(kind, |event| println!("event: {}", event.to_json()));
    }

    let result = executor.query("SELECT version() AS version", &[]).await?;
    if let Some(row) = result.first() {
        println!("Server version: {}", row["version"]);
    }

    // Parameters are bound as JSON values
    let result = executor
        .query(
            "SELECT n, n * $1::int4 AS scaled FROM generate_series(1, $2::int4) AS n",
            &[json!(10), json!(3)],
        )
        .await?;
    println!("{} rows: {:?}", result.row_count, result.rows);

    // Hand-built statement text needs escaping
    let name = "O'Brien";
    let sql = format!("SELECT '{}' AS name", escape_single_quotes(name));
    let result = executor.query(&sql, &[]).await?;
    println!("Escaped literal round-trip: {}", result.rows[0]["name"]);

    // Failed statements release their connection too
    match executor.query("SELECT * FROM no_such_table", &[]).await {
        Ok(_) => println!("Unexpected success"),
        Err(e) => println!("Expected error ({:?}): {e}", e.code()),
    }

    println!("Pool status: {:?}", executor.status());

    executor.close().await?;
    println!("Pool closed.");

    Ok(())
}
