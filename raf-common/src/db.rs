//! Staging database connection pool
//!
//! Each request checks out its own connection and runs its whole
//! stage/invoke cycle inside one transaction on it.

use crate::config::DatabaseConfig;
use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::info;

/// Open the staging database pool described by `config`
pub async fn connect(config: &DatabaseConfig) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&config.url)?
        .busy_timeout(config.connect_timeout());

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.connect_timeout())
        .connect_with(options)
        .await?;

    info!(
        "Connected to staging database (max {} connections)",
        config.max_connections
    );

    Ok(pool)
}
