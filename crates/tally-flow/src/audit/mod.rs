//! Audit model and pluggable audit storage.
//!
//! One audit row exists per `(pipeline, index, window)` key. It records where
//! the latest run for that window stands and is the only shared mutable state
//! the engine touches.
//!
//! ## Status lifecycle
//!
//! ```text
//! NOT_STARTED ──▶ IN_PROGRESS ──▶ COMPLETED
//!                     │  ▲
//!                     ▼  │ (only while the window is open)
//!                   FAILED
//! ```
//!
//! ## Write semantics
//!
//! - Upserts are keyed: an existing row is updated in place.
//! - Counts and the error message coalesce: `None` never clears a stored value.
//! - `last_updated_ts` is stamped by the store and strictly increases per key.
//! - Reads take the row with the greatest `last_updated_ts`, so duplicate rows
//!   for one key are tolerated.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use tally_core::Window;

use crate::error::{Error, Result};

/// Status of an audited window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    /// No run has touched the window.
    #[default]
    NotStarted,
    /// A run owns the window.
    InProgress,
    /// Source and target counts matched.
    Completed,
    /// The latest attempt failed.
    Failed,
}

impl AuditStatus {
    /// Returns the stored representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Returns true if the transition from self to target is valid.
    ///
    /// Rewriting the current status is always allowed so upserts stay
    /// idempotent. `Failed -> InProgress` is only valid while the window is
    /// open; that time check belongs to the caller.
    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        if *self == target {
            return true;
        }
        match self {
            Self::NotStarted => matches!(target, Self::InProgress),
            Self::InProgress => matches!(target, Self::Completed | Self::Failed),
            Self::Failed => matches!(target, Self::InProgress),
            Self::Completed => false,
        }
    }

    /// Returns true if a new run must leave the window alone.
    #[must_use]
    pub const fn blocks_new_run(&self) -> bool {
        matches!(self, Self::InProgress | Self::Completed)
    }
}

impl fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "not_started" => Ok(Self::NotStarted),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(Error::InvalidArgument {
                message: format!("unknown audit status '{other}'"),
            }),
        }
    }
}

/// Identity of an audit row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AuditKey {
    /// Pipeline the window belongs to.
    pub pipeline_name: String,
    /// Index (dataset) within the pipeline.
    pub index_name: String,
    /// First instant of the window.
    pub window_start: DateTime<FixedOffset>,
    /// Last instant of the window.
    pub window_end: DateTime<FixedOffset>,
}

impl AuditKey {
    /// Creates the key for a window.
    #[must_use]
    pub fn new(pipeline_name: impl Into<String>, index_name: impl Into<String>, window: &Window) -> Self {
        Self {
            pipeline_name: pipeline_name.into(),
            index_name: index_name.into(),
            window_start: window.start(),
            window_end: window.end(),
        }
    }
}

impl fmt::Display for AuditKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}@{}",
            self.pipeline_name,
            self.index_name,
            self.window_start.date_naive()
        )
    }
}

/// One audit row.
///
/// `None` counts and error message mean "unset": on upsert they leave any
/// previously stored value in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Row identity.
    pub key: AuditKey,
    /// Current status.
    pub status: AuditStatus,
    /// Count reported by the remote counting job.
    pub source_count: Option<u64>,
    /// Row count observed in the warehouse.
    pub target_count: Option<u64>,
    /// Failed attempts consumed by the current run.
    pub retry_number: u32,
    /// Most recent failure cause.
    pub error_message: Option<String>,
    /// Write timestamp, stamped by the store.
    pub last_updated_ts: DateTime<Utc>,
}

impl AuditRecord {
    /// Creates a record with every optional field unset.
    #[must_use]
    pub fn new(key: AuditKey, status: AuditStatus) -> Self {
        Self {
            key,
            status,
            source_count: None,
            target_count: None,
            retry_number: 0,
            error_message: None,
            last_updated_ts: DateTime::<Utc>::MIN_UTC,
        }
    }

    /// Sets the source count.
    #[must_use]
    pub fn with_source_count(mut self, count: u64) -> Self {
        self.source_count = Some(count);
        self
    }

    /// Sets the target count.
    #[must_use]
    pub fn with_target_count(mut self, count: u64) -> Self {
        self.target_count = Some(count);
        self
    }

    /// Sets the retry number.
    #[must_use]
    pub fn with_retry_number(mut self, retry_number: u32) -> Self {
        self.retry_number = retry_number;
        self
    }

    /// Sets the error message.
    #[must_use]
    pub fn with_error_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    /// Applies this write on top of the stored row, stamping `now`.
    ///
    /// Unset fields keep the stored value and the timestamp advances by at least
    /// one microsecond past the stored one.
    #[must_use]
    pub fn merged_onto(self, stored: Option<&Self>, now: DateTime<Utc>) -> Self {
        let Some(stored) = stored else {
            return Self {
                last_updated_ts: now,
                ..self
            };
        };

        Self {
            source_count: self.source_count.or(stored.source_count),
            target_count: self.target_count.or(stored.target_count),
            error_message: self.error_message.or_else(|| stored.error_message.clone()),
            last_updated_ts: now.max(stored.last_updated_ts + TimeDelta::microseconds(1)),
            ..self
        }
    }

    /// Checks the invariants a stored row must satisfy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if a completed row lacks a count or its
    /// counts differ.
    pub fn validate(&self) -> Result<()> {
        if self.status == AuditStatus::Completed {
            match (self.source_count, self.target_count) {
                (Some(source), Some(target)) if source == target => {}
                (source, target) => {
                    return Err(Error::InvalidArgument {
                        message: format!(
                            "completed audit row {} requires equal counts, got source={source:?} target={target:?}",
                            self.key
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Outcome of [`AuditStore::claim`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimResult {
    /// The window now belongs to the caller.
    Claimed,
    /// Another run holds or already finished the window.
    Held {
        /// The status that blocked the claim.
        status: AuditStatus,
    },
}

impl ClaimResult {
    /// Returns true if the claim succeeded.
    #[must_use]
    pub const fn is_claimed(&self) -> bool {
        matches!(self, Self::Claimed)
    }
}

/// Storage abstraction for audit rows.
///
/// Any connectivity failure must surface as [`Error::AuditUnavailable`].
///
/// ## Concurrency
///
/// `get_status` followed by `upsert` is advisory only: two runs can both read
/// "not started" before either writes. Backends that can perform a conditional
/// write should override [`AuditStore::claim`] to close that gap.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Returns the latest row for `key`, or `None` if no row exists.
    async fn get(&self, key: &AuditKey) -> Result<Option<AuditRecord>>;

    /// Inserts or updates the row for `record.key` with coalesce semantics.
    ///
    /// Returns the row as stored.
    async fn upsert(&self, record: AuditRecord) -> Result<AuditRecord>;

    /// Returns the latest status for `key`, or `None` if no row exists.
    async fn get_status(&self, key: &AuditKey) -> Result<Option<AuditStatus>> {
        Ok(self.get(key).await?.map(|record| record.status))
    }

    /// Writes `record` only if the stored status does not block a new run.
    ///
    /// The default implementation reads then writes and is not atomic.
    async fn claim(&self, record: AuditRecord) -> Result<ClaimResult> {
        if let Some(status) = self.get_status(&record.key).await? {
            if status.blocks_new_run() {
                return Ok(ClaimResult::Held { status });
            }
        }
        self.upsert(record).await?;
        Ok(ClaimResult::Claimed)
    }
}
