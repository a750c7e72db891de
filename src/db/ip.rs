//! IP dedup ledgers and the stats row

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::SqliteConnection;

use super::{from_millis, Database};

/// Which dedup table a check runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ledger {
    /// `ip_logs`, keyed by IP alone
    Logs,
    /// `ip_records`, keyed by (IP, group)
    Records,
}

#[derive(Debug, Clone)]
pub struct DedupKey<'a> {
    pub ip: &'a str,
    pub group: Option<&'a str>,
}

impl<'a> DedupKey<'a> {
    pub fn ip(ip: &'a str) -> Self {
        Self { ip, group: None }
    }

    pub fn grouped(ip: &'a str, group: Option<&'a str>) -> Self {
        Self { ip, group }
    }

    fn group_id(&self) -> &'a str {
        self.group.unwrap_or("")
    }
}

/// Outcome of a dedup check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub allow: bool,
    /// No row existed for the key before this check
    pub fresh: bool,
    /// On deny, the stored timestamp that caused it
    pub last_checked: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    pub allow: i64,
    #[serde(rename = "notAllow")]
    pub not_allow: i64,
    pub fresh: i64,
    pub duplicate: i64,
    pub last_delete: Option<String>,
}

impl Database {
    /// Allow `key` unless it was recorded less than `window` before `now`.
    ///
    /// A fresh key is claimed with `INSERT .. ON CONFLICT DO NOTHING`; an
    /// existing one only through an `UPDATE` guarded on the stored timestamp
    /// being at least `window` old. Each statement is atomic, so concurrent
    /// checks of one key yield a single allow per window. Denied checks leave
    /// the stored timestamp untouched. The claim and the stats bump commit
    /// together or not at all.
    pub async fn check_and_record(
        &self,
        ledger: Ledger,
        key: &DedupKey<'_>,
        window: Duration,
        now: DateTime<Utc>,
    ) -> sqlx::Result<Verdict> {
        let mut tx = self.pool().begin().await?;
        let verdict = claim(&mut *tx, ledger, key, window, now).await?;
        bump_stats(&mut *tx, &verdict).await?;
        tx.commit().await?;
        Ok(verdict)
    }

    pub async fn last_checked(&self, ledger: Ledger, key: &DedupKey<'_>) -> sqlx::Result<Option<DateTime<Utc>>> {
        let mut conn = self.pool().acquire().await?;
        stored_at(&mut *conn, ledger, key).await
    }

    /// Delete ledger rows last checked more than `max_age` before `now`, across
    /// both tables, and store `note(deleted)` as the stats row's `last_delete`
    /// in the same transaction.
    pub async fn purge_older_than<F>(&self, max_age: Duration, now: DateTime<Utc>, note: F) -> sqlx::Result<u64>
    where
        F: FnOnce(u64) -> String,
    {
        let cutoff = now.timestamp_millis().saturating_sub(max_age.num_milliseconds());
        let mut tx = self.pool().begin().await?;

        let logs = sqlx::query("DELETE FROM ip_logs WHERE last_checked < ?")
            .bind(cutoff)
            .execute(&mut *tx)
            .await?;
        let records = sqlx::query("DELETE FROM ip_records WHERE last_checked < ?")
            .bind(cutoff)
            .execute(&mut *tx)
            .await?;
        let deleted = logs.rows_affected() + records.rows_affected();

        sqlx::query("UPDATE stats SET last_delete = ? WHERE id = 1")
            .bind(note(deleted))
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(deleted)
    }

    pub async fn stats(&self) -> sqlx::Result<Stats> {
        let row: Option<(i64, i64, i64, i64, Option<String>)> =
            sqlx::query_as("SELECT allow, not_allow, fresh, duplicate, last_delete FROM stats WHERE id = 1")
                .fetch_optional(self.pool())
                .await?;

        let (allow, not_allow, fresh, duplicate, last_delete) = row.unwrap_or_default();
        Ok(Stats { allow, not_allow, fresh, duplicate, last_delete })
    }

    pub async fn count_ip_records(&self) -> sqlx::Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM ip_records")
            .fetch_one(self.pool())
            .await?;
        Ok(row.0)
    }
}

async fn claim(
    conn: &mut SqliteConnection,
    ledger: Ledger,
    key: &DedupKey<'_>,
    window: Duration,
    now: DateTime<Utc>,
) -> sqlx::Result<Verdict> {
    let now_ms = now.timestamp_millis();
    let cutoff = now_ms.saturating_sub(window.num_milliseconds());

    let inserted = match ledger {
        Ledger::Logs => {
            sqlx::query("INSERT INTO ip_logs (ip, last_checked) VALUES (?, ?) ON CONFLICT(ip) DO NOTHING")
                .bind(key.ip)
                .bind(now_ms)
                .execute(&mut *conn)
                .await?
        }
        Ledger::Records => {
            sqlx::query(
                "INSERT INTO ip_records (ip, group_id, last_checked) VALUES (?, ?, ?) ON CONFLICT(ip, group_id) DO NOTHING",
            )
            .bind(key.ip)
            .bind(key.group_id())
            .bind(now_ms)
            .execute(&mut *conn)
            .await?
        }
    };
    if inserted.rows_affected() == 1 {
        return Ok(Verdict { allow: true, fresh: true, last_checked: None });
    }

    let refreshed = match ledger {
        Ledger::Logs => {
            sqlx::query("UPDATE ip_logs SET last_checked = ? WHERE ip = ? AND last_checked <= ?")
                .bind(now_ms)
                .bind(key.ip)
                .bind(cutoff)
                .execute(&mut *conn)
                .await?
        }
        Ledger::Records => {
            sqlx::query("UPDATE ip_records SET last_checked = ? WHERE ip = ? AND group_id = ? AND last_checked <= ?")
                .bind(now_ms)
                .bind(key.ip)
                .bind(key.group_id())
                .bind(cutoff)
                .execute(&mut *conn)
                .await?
        }
    };
    if refreshed.rows_affected() == 1 {
        return Ok(Verdict { allow: true, fresh: false, last_checked: None });
    }

    Ok(Verdict {
        allow: false,
        fresh: false,
        last_checked: stored_at(conn, ledger, key).await?,
    })
}

async fn stored_at(
    conn: &mut SqliteConnection,
    ledger: Ledger,
    key: &DedupKey<'_>,
) -> sqlx::Result<Option<DateTime<Utc>>> {
    let row: Option<(i64,)> = match ledger {
        Ledger::Logs => {
            sqlx::query_as("SELECT last_checked FROM ip_logs WHERE ip = ?")
                .bind(key.ip)
                .fetch_optional(&mut *conn)
                .await?
        }
        Ledger::Records => {
            sqlx::query_as("SELECT last_checked FROM ip_records WHERE ip = ? AND group_id = ?")
                .bind(key.ip)
                .bind(key.group_id())
                .fetch_optional(&mut *conn)
                .await?
        }
    };
    Ok(row.map(|(ms,)| from_millis(ms)))
}

async fn bump_stats(conn: &mut SqliteConnection, verdict: &Verdict) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        UPDATE stats
        SET allow = allow + ?, not_allow = not_allow + ?, fresh = fresh + ?, duplicate = duplicate + ?
        WHERE id = 1
        "#,
    )
    .bind(i64::from(verdict.allow))
    .bind(i64::from(!verdict.allow))
    .bind(i64::from(verdict.fresh))
    .bind(i64::from(!verdict.fresh))
    .execute(&mut *conn)
    .await?;
    Ok(())
}
