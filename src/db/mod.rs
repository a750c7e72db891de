//! Database module

mod devices;
mod ip;
mod schema;

pub use devices::{Device, DeviceUpdate};
pub use ip::{DedupKey, Ledger, Stats, Verdict};

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;

use crate::config::DatabaseConfig;

#[derive(Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        if config.url == ":memory:" {
            return Self::in_memory().await;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", config.url))?;
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    /// Single-connection in-memory database. Every pooled connection to
    /// `:memory:` would be a separate database, so the pool is pinned to one.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> Result<()> {
        // WAL is a no-op for in-memory databases
        sqlx::query("PRAGMA journal_mode=WAL")
            .execute(&self.pool)
            .await?;
        sqlx::query("PRAGMA synchronous=NORMAL")
            .execute(&self.pool)
            .await?;

        for statement in [
            schema::CREATE_IP_LOGS,
            schema::CREATE_IP_RECORDS,
            schema::CREATE_STATS,
            schema::SEED_STATS,
            schema::CREATE_DEVICES,
            schema::CREATE_INDEX_IP_LOGS_CHECKED,
            schema::CREATE_INDEX_IP_RECORDS_CHECKED,
            schema::CREATE_INDEX_DEVICES_UPDATE,
        ] {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub(crate) fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

/// Convert stored unix millis back into a timestamp
pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or(DateTime::UNIX_EPOCH)
}
