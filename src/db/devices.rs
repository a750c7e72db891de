//! Device heartbeat registry

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{Sqlite, SqliteArguments};
use sqlx::query::Query;
use sqlx::FromRow;

use super::Database;

/// A registered remote device as reported by its last heartbeat
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Device {
    pub id: String,
    pub ip: Option<String>,
    pub country_code: Option<String>,
    pub ram_total: i64,
    pub ram_used: i64,
    pub cpu_percent: f64,
    pub description: Option<String>,
    /// Unix seconds
    pub last_update: Option<i64>,
    pub counter1: i64,
    pub counter2: i64,
    pub counter3: i64,
    pub counter4: i64,
    pub counter5: i64,
    /// Seconds the device has been running
    pub runtime: i64,
    pub restart: bool,
    pub threads_active: i64,
    pub threads_total: i64,
    pub bytes_sent: i64,
    pub bytes_received: i64,
}

/// Heartbeat payload. Fields left out are not touched on update.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceUpdate {
    pub id: String,
    pub ip: Option<String>,
    pub country_code: Option<String>,
    pub ram_total: Option<i64>,
    pub ram_used: Option<i64>,
    pub cpu_percent: Option<f64>,
    pub description: Option<String>,
    pub counter1: Option<i64>,
    pub counter2: Option<i64>,
    pub counter3: Option<i64>,
    pub counter4: Option<i64>,
    pub counter5: Option<i64>,
    pub runtime: Option<i64>,
    pub restart: Option<bool>,
    pub threads_active: Option<i64>,
    pub threads_total: Option<i64>,
    pub bytes_sent: Option<i64>,
    pub bytes_received: Option<i64>,
}

const SELECT_DEVICE: &str = r#"
SELECT id, ip, country_code, ram_total, ram_used, cpu_percent, description, last_update,
       counter1, counter2, counter3, counter4, counter5, runtime, restart,
       threads_active, threads_total, bytes_sent, bytes_received
FROM devices
"#;

const UPDATE_DEVICE: &str = r#"
UPDATE devices SET
    ip = COALESCE(?, ip),
    country_code = COALESCE(?, country_code),
    ram_total = COALESCE(?, ram_total),
    ram_used = COALESCE(?, ram_used),
    cpu_percent = COALESCE(?, cpu_percent),
    description = COALESCE(?, description),
    counter1 = COALESCE(?, counter1),
    counter2 = COALESCE(?, counter2),
    counter3 = COALESCE(?, counter3),
    counter4 = COALESCE(?, counter4),
    counter5 = COALESCE(?, counter5),
    runtime = COALESCE(?, runtime),
    restart = COALESCE(?, restart),
    threads_active = COALESCE(?, threads_active),
    threads_total = COALESCE(?, threads_total),
    bytes_sent = COALESCE(?, bytes_sent),
    bytes_received = COALESCE(?, bytes_received),
    last_update = ?
WHERE id = ?
"#;

const INSERT_DEVICE: &str = r#"
INSERT INTO devices (
    ip, country_code, ram_total, ram_used, cpu_percent, description,
    counter1, counter2, counter3, counter4, counter5, runtime, restart,
    threads_active, threads_total, bytes_sent, bytes_received,
    last_update, id
) VALUES (
    ?, ?, COALESCE(?, 0), COALESCE(?, 0), COALESCE(?, 0), ?,
    COALESCE(?, 0), COALESCE(?, 0), COALESCE(?, 0), COALESCE(?, 0), COALESCE(?, 0), COALESCE(?, 0), COALESCE(?, FALSE),
    COALESCE(?, 0), COALESCE(?, 0), COALESCE(?, 0), COALESCE(?, 0),
    ?, ?
)
ON CONFLICT(id) DO NOTHING
"#;

const UPSERT_ATTEMPTS: usize = 3;

/// Bind the payload columns, then `last_update` and `id`, in the order both
/// `UPDATE_DEVICE` and `INSERT_DEVICE` expect them.
fn bind_update<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    update: &'q DeviceUpdate,
    now: DateTime<Utc>,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    query
        .bind(update.ip.as_deref())
        .bind(update.country_code.as_deref())
        .bind(update.ram_total)
        .bind(update.ram_used)
        .bind(update.cpu_percent)
        .bind(update.description.as_deref())
        .bind(update.counter1)
        .bind(update.counter2)
        .bind(update.counter3)
        .bind(update.counter4)
        .bind(update.counter5)
        .bind(update.runtime)
        .bind(update.restart)
        .bind(update.threads_active)
        .bind(update.threads_total)
        .bind(update.bytes_sent)
        .bind(update.bytes_received)
        .bind(now.timestamp())
        .bind(update.id.as_str())
}

impl Database {
    /// All devices ordered by id
    pub async fn list_devices(&self) -> sqlx::Result<Vec<Device>> {
        sqlx::query_as::<_, Device>(&format!("{SELECT_DEVICE} ORDER BY id ASC"))
            .fetch_all(self.pool())
            .await
    }

    pub async fn get_device(&self, id: &str) -> sqlx::Result<Option<Device>> {
        sqlx::query_as::<_, Device>(&format!("{SELECT_DEVICE} WHERE id = ?"))
            .bind(id)
            .fetch_optional(self.pool())
            .await
    }

    /// Apply the supplied fields to an existing device. `None` if the id is unknown.
    pub async fn patch_device(&self, update: &DeviceUpdate, now: DateTime<Utc>) -> sqlx::Result<Option<Device>> {
        let result = bind_update(sqlx::query(UPDATE_DEVICE), update, now)
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_device(&update.id).await
    }

    /// Insert the device, or patch it when the id already exists.
    pub async fn upsert_device(&self, update: &DeviceUpdate, now: DateTime<Utc>) -> sqlx::Result<Device> {
        for _ in 0..UPSERT_ATTEMPTS {
            if let Some(device) = self.patch_device(update, now).await? {
                return Ok(device);
            }

            let inserted = bind_update(sqlx::query(INSERT_DEVICE), update, now)
                .execute(self.pool())
                .await?;
            if inserted.rows_affected() == 1 {
                if let Some(device) = self.get_device(&update.id).await? {
                    return Ok(device);
                }
            }
            // Lost a race with a concurrent insert or delete
        }
        Err(sqlx::Error::RowNotFound)
    }

    /// Returns false if no device had this id
    pub async fn delete_device(&self, id: &str) -> sqlx::Result<bool> {
        let result = sqlx::query("DELETE FROM devices WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn count_devices(&self) -> sqlx::Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM devices")
            .fetch_one(self.pool())
            .await?;
        Ok(row.0)
    }

    /// Devices whose last heartbeat is older than `threshold`, or that never sent one
    pub async fn outdated_devices(&self, threshold: Duration, now: DateTime<Utc>) -> sqlx::Result<Vec<Device>> {
        let cutoff = now.timestamp() - threshold.num_seconds();
        sqlx::query_as::<_, Device>(&format!(
            "{SELECT_DEVICE} WHERE last_update IS NULL OR last_update < ? ORDER BY id ASC"
        ))
        .bind(cutoff)
        .fetch_all(self.pool())
        .await
    }

}
