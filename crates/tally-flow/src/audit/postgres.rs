//! Postgres-backed audit store.
//!
//! The table is keyed by `(pipeline_name, index_name, query_windows_start_ts,
//! query_windows_end_ts)`. Claims are a single conditional
//! `INSERT ... ON CONFLICT ... DO UPDATE ... WHERE`, so two runs racing for the
//! same window cannot both win.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::{AuditKey, AuditRecord, AuditStatus, AuditStore, ClaimResult};
use crate::error::{Error, Result};

/// Default audit table name.
pub const DEFAULT_TABLE: &str = "reconciliation_audit";

/// Audit store backed by a Postgres table.
#[derive(Debug, Clone)]
pub struct PgAuditStore {
    pool: PgPool,
    table: String,
}

#[derive(Debug, sqlx::FromRow)]
struct AuditRow {
    status: String,
    source_count: Option<i64>,
    target_count: Option<i64>,
    retry_number: i32,
    error_message: Option<String>,
    rec_last_updated_ts: DateTime<Utc>,
}

impl AuditRow {
    fn into_record(self, key: AuditKey) -> Result<AuditRecord> {
        Ok(AuditRecord {
            key,
            status: self.status.parse()?,
            source_count: self.source_count.map(count_from_db).transpose()?,
            target_count: self.target_count.map(count_from_db).transpose()?,
            retry_number: u32::try_from(self.retry_number).map_err(|_| {
                Error::audit_unavailable(format!("negative retry_number {}", self.retry_number))
            })?,
            error_message: self.error_message,
            last_updated_ts: self.rec_last_updated_ts,
        })
    }
}

fn count_from_db(value: i64) -> Result<u64> {
    u64::try_from(value).map_err(|_| Error::audit_unavailable(format!("negative count {value}")))
}

fn count_to_db(value: Option<u64>) -> Result<Option<i64>> {
    value
        .map(|v| {
            i64::try_from(v).map_err(|_| Error::InvalidArgument {
                message: format!("count {v} exceeds the audit column range"),
            })
        })
        .transpose()
}

fn retry_to_db(value: u32) -> Result<i32> {
    i32::try_from(value).map_err(|_| Error::InvalidArgument {
        message: format!("retry_number {value} exceeds the audit column range"),
    })
}

fn db_err(context: &str) -> impl FnOnce(sqlx::Error) -> Error + '_ {
    move |e| Error::audit_unavailable_with_source(format!("{context} failed"), e)
}

fn validate_table_name(table: &str) -> Result<()> {
    let valid = !table.is_empty()
        && table.split('.').all(|part| {
            !part.is_empty()
                && part
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_')
        });
    if valid {
        Ok(())
    } else {
        Err(Error::configuration(format!("invalid audit table name '{table}'")))
    }
}

impl PgAuditStore {
    /// Creates a store over `table` (optionally schema-qualified).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the table name is not a plain identifier.
    pub fn new(pool: PgPool, table: impl Into<String>) -> Result<Self> {
        let table = table.into();
        validate_table_name(&table)?;
        Ok(Self { pool, table })
    }

    /// Creates the audit table if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AuditUnavailable`] if the statement fails.
    pub async fn ensure_schema(&self) -> Result<()> {
        let sql = format!(
            r"
            CREATE TABLE IF NOT EXISTS {table} (
                pipeline_name TEXT NOT NULL,
                index_name TEXT NOT NULL,
                query_windows_start_ts TIMESTAMPTZ NOT NULL,
                query_windows_end_ts TIMESTAMPTZ NOT NULL,
                status TEXT NOT NULL,
                source_count BIGINT,
                target_count BIGINT,
                retry_number INTEGER NOT NULL DEFAULT 0,
                error_message TEXT,
                rec_last_updated_ts TIMESTAMPTZ NOT NULL,
                PRIMARY KEY (pipeline_name, index_name, query_windows_start_ts, query_windows_end_ts)
            )
            ",
            table = self.table
        );
        sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .map_err(db_err("create audit table"))?;
        Ok(())
    }

    fn select_sql(&self, lock: bool) -> String {
        format!(
            r"
            SELECT status, source_count, target_count, retry_number, error_message, rec_last_updated_ts
            FROM {table}
            WHERE pipeline_name = $1 AND index_name = $2
              AND query_windows_start_ts = $3 AND query_windows_end_ts = $4
            ORDER BY rec_last_updated_ts DESC
            LIMIT 1
            {suffix}
            ",
            table = self.table,
            suffix = if lock { "FOR UPDATE" } else { "" }
        )
    }
}

#[async_trait]
impl AuditStore for PgAuditStore {
    async fn get(&self, key: &AuditKey) -> Result<Option<AuditRecord>> {
        let row = sqlx::query_as::<_, AuditRow>(&self.select_sql(false))
            .bind(&key.pipeline_name)
            .bind(&key.index_name)
            .bind(key.window_start)
            .bind(key.window_end)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err("audit lookup"))?;
        row.map(|r| r.into_record(key.clone())).transpose()
    }

    async fn upsert(&self, record: AuditRecord) -> Result<AuditRecord> {
        let mut tx = self.pool.begin().await.map_err(db_err("begin audit upsert"))?;

        let stored = sqlx::query_as::<_, AuditRow>(&self.select_sql(true))
            .bind(&record.key.pipeline_name)
            .bind(&record.key.index_name)
            .bind(record.key.window_start)
            .bind(record.key.window_end)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err("audit lookup"))?
            .map(|r| r.into_record(record.key.clone()))
            .transpose()?;

        let merged = record.merged_onto(stored.as_ref(), Utc::now());
        merged.validate()?;

        let sql = format!(
            r"
            INSERT INTO {table} (
                pipeline_name, index_name, query_windows_start_ts, query_windows_end_ts,
                status, source_count, target_count, retry_number, error_message, rec_last_updated_ts
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (pipeline_name, index_name, query_windows_start_ts, query_windows_end_ts)
            DO UPDATE SET
                status = EXCLUDED.status,
                source_count = EXCLUDED.source_count,
                target_count = EXCLUDED.target_count,
                retry_number = EXCLUDED.retry_number,
                error_message = EXCLUDED.error_message,
                rec_last_updated_ts = EXCLUDED.rec_last_updated_ts
            ",
            table = self.table
        );
        sqlx::query(&sql)
            .bind(&merged.key.pipeline_name)
            .bind(&merged.key.index_name)
            .bind(merged.key.window_start)
            .bind(merged.key.window_end)
            .bind(merged.status.as_str())
            .bind(count_to_db(merged.source_count)?)
            .bind(count_to_db(merged.target_count)?)
            .bind(retry_to_db(merged.retry_number)?)
            .bind(merged.error_message.as_deref())
            .bind(merged.last_updated_ts)
            .execute(&mut *tx)
            .await
            .map_err(db_err("audit upsert"))?;

        tx.commit().await.map_err(db_err("commit audit upsert"))?;
        Ok(merged)
    }

    async fn claim(&self, record: AuditRecord) -> Result<ClaimResult> {
        let sql = format!(
            r"
            INSERT INTO {table} AS t (
                pipeline_name, index_name, query_windows_start_ts, query_windows_end_ts,
                status, source_count, target_count, retry_number, error_message, rec_last_updated_ts
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW())
            ON CONFLICT (pipeline_name, index_name, query_windows_start_ts, query_windows_end_ts)
            DO UPDATE SET
                status = EXCLUDED.status,
                source_count = COALESCE(EXCLUDED.source_count, t.source_count),
                target_count = COALESCE(EXCLUDED.target_count, t.target_count),
                retry_number = EXCLUDED.retry_number,
                error_message = COALESCE(EXCLUDED.error_message, t.error_message),
                rec_last_updated_ts = GREATEST(NOW(), t.rec_last_updated_ts + INTERVAL '1 microsecond')
            WHERE t.status NOT IN ($10, $11)
            RETURNING status
            ",
            table = self.table
        );
        let claimed: Option<String> = sqlx::query_scalar(&sql)
            .bind(&record.key.pipeline_name)
            .bind(&record.key.index_name)
            .bind(record.key.window_start)
            .bind(record.key.window_end)
            .bind(record.status.as_str())
            .bind(count_to_db(record.source_count)?)
            .bind(count_to_db(record.target_count)?)
            .bind(retry_to_db(record.retry_number)?)
            .bind(record.error_message.as_deref())
            .bind(AuditStatus::InProgress.as_str())
            .bind(AuditStatus::Completed.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err("audit claim"))?;

        if claimed.is_some() {
            return Ok(ClaimResult::Claimed);
        }
        let status = self.get_status(&record.key).await?.ok_or_else(|| {
            Error::audit_unavailable(format!("claim on {} lost its row", record.key))
        })?;
        Ok(ClaimResult::Held { status })
    }
}
