//! In-memory audit store for testing and single-process use.
//!
//! ## Limitations
//!
//! - **No durability**: all rows are lost when the process exits
//! - **Single-process only**: claims are atomic within this process only
//! - **Bounded history**: the write log keeps the most recent
//!   [`DEFAULT_HISTORY_CAPACITY`] writes unless configured otherwise

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;

use tally_core::{Clock, SystemClock};

use super::{AuditKey, AuditRecord, AuditStore, ClaimResult};
use crate::error::{Error, Result};

/// Number of writes kept in the history log by default.
pub const DEFAULT_HISTORY_CAPACITY: usize = 1024;

/// In-memory audit store.
///
/// Keeps every row per key (duplicates are tolerated, reads take the latest)
/// plus a log of recent writes for inspection. The log drops its oldest
/// entries once it holds `history_capacity` writes.
#[derive(Debug)]
pub struct InMemoryAuditStore {
    rows: RwLock<HashMap<AuditKey, Vec<AuditRecord>>>,
    history: RwLock<VecDeque<AuditRecord>>,
    history_capacity: usize,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryAuditStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::audit_unavailable("lock poisoned")
}

fn latest(rows: &[AuditRecord]) -> Option<&AuditRecord> {
    rows.iter().max_by_key(|row| row.last_updated_ts)
}

impl InMemoryAuditStore {
    /// Creates an empty store stamping writes with the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates an empty store stamping writes with `clock`.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
            history: RwLock::new(VecDeque::new()),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            clock,
        }
    }

    /// Keeps at most `capacity` writes in the history log. Zero disables it.
    #[must_use]
    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    /// Inserts `record` as an additional row without merging or stamping.
    ///
    /// Used to seed state, including duplicate rows for one key.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn insert_raw(&self, record: AuditRecord) -> Result<()> {
        let mut rows = self.rows.write().map_err(poison_err)?;
        rows.entry(record.key.clone()).or_default().push(record);
        Ok(())
    }

    /// Returns every stored row for `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn rows(&self, key: &AuditKey) -> Result<Vec<AuditRecord>> {
        let rows = self.rows.read().map_err(poison_err)?;
        Ok(rows.get(key).cloned().unwrap_or_default())
    }

    /// Returns the retained rows written through [`AuditStore::upsert`] for `key`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn history(&self, key: &AuditKey) -> Result<Vec<AuditRecord>> {
        let history = self.history.read().map_err(poison_err)?;
        Ok(history.iter().filter(|r| &r.key == key).cloned().collect())
    }

    /// Merges `record` onto the latest row under an already held write lock.
    fn write_locked(
        &self,
        rows: &mut HashMap<AuditKey, Vec<AuditRecord>>,
        record: AuditRecord,
    ) -> Result<AuditRecord> {
        let entry = rows.entry(record.key.clone()).or_default();
        let merged = record.merged_onto(latest(entry), self.clock.now());
        merged.validate()?;

        match entry
            .iter_mut()
            .max_by_key(|row| row.last_updated_ts)
        {
            Some(current) => *current = merged.clone(),
            None => entry.push(merged.clone()),
        }

        if self.history_capacity > 0 {
            let mut history = self.history.write().map_err(poison_err)?;
            if history.len() == self.history_capacity {
                history.pop_front();
            }
            history.push_back(merged.clone());
        }
        Ok(merged)
    }
}

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn get(&self, key: &AuditKey) -> Result<Option<AuditRecord>> {
        let rows = self.rows.read().map_err(poison_err)?;
        Ok(rows.get(key).and_then(|r| latest(r)).cloned())
    }

    async fn upsert(&self, record: AuditRecord) -> Result<AuditRecord> {
        let mut rows = self.rows.write().map_err(poison_err)?;
        self.write_locked(&mut rows, record)
    }

    async fn claim(&self, record: AuditRecord) -> Result<ClaimResult> {
        let mut rows = self.rows.write().map_err(poison_err)?;
        if let Some(current) = rows.get(&record.key).and_then(|r| latest(r)) {
            if current.status.blocks_new_run() {
                return Ok(ClaimResult::Held {
                    status: current.status,
                });
            }
        }
        self.write_locked(&mut rows, record)?;
        Ok(ClaimResult::Claimed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditStatus;
    use chrono::{NaiveDate, TimeDelta, Utc};
    use tally_core::WindowCalculator;

    fn key() -> AuditKey {
        let window = WindowCalculator::new("UTC")
            .unwrap()
            .window_for_date(NaiveDate::from_ymd_opt(2025, 6, 9).unwrap())
            .unwrap();
        AuditKey::new("lsf", "usergroups", &window)
    }

    #[tokio::test]
    async fn missing_key_has_no_status() -> Result<()> {
        let store = InMemoryAuditStore::new();
        assert_eq!(store.get_status(&key()).await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn upsert_updates_in_place() -> Result<()> {
        let store = InMemoryAuditStore::new();
        store
            .upsert(AuditRecord::new(key(), AuditStatus::InProgress).with_source_count(10))
            .await?;
        store
            .upsert(AuditRecord::new(key(), AuditStatus::Failed).with_target_count(9))
            .await?;

        let rows = store.rows(&key())?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, AuditStatus::Failed);
        assert_eq!(rows[0].source_count, Some(10));
        assert_eq!(store.history(&key())?.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn history_keeps_most_recent_writes() -> Result<()> {
        let store = InMemoryAuditStore::new().with_history_capacity(2);
        for count in [1, 2, 3] {
            store
                .upsert(AuditRecord::new(key(), AuditStatus::InProgress).with_source_count(count))
                .await?;
        }

        let counts: Vec<_> = store.history(&key())?.iter().map(|r| r.source_count).collect();
        assert_eq!(counts, vec![Some(2), Some(3)]);

        let silent = InMemoryAuditStore::new().with_history_capacity(0);
        silent.upsert(AuditRecord::new(key(), AuditStatus::InProgress)).await?;
        assert!(silent.history(&key())?.is_empty());
        assert!(silent.get(&key()).await?.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn timestamps_strictly_increase() -> Result<()> {
        let store = InMemoryAuditStore::new();
        let mut previous = None;
        for _ in 0..5 {
            let row = store
                .upsert(AuditRecord::new(key(), AuditStatus::InProgress))
                .await?;
            if let Some(prev) = previous {
                assert!(row.last_updated_ts > prev);
            }
            previous = Some(row.last_updated_ts);
        }
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_rows_resolve_to_latest() -> Result<()> {
        let store = InMemoryAuditStore::new();
        let now = Utc::now();
        let mut older = AuditRecord::new(key(), AuditStatus::Completed)
            .with_source_count(1)
            .with_target_count(1);
        older.last_updated_ts = now - TimeDelta::hours(1);
        let mut newer = AuditRecord::new(key(), AuditStatus::Failed);
        newer.last_updated_ts = now;

        store.insert_raw(newer)?;
        store.insert_raw(older)?;

        assert_eq!(store.get_status(&key()).await?, Some(AuditStatus::Failed));
        Ok(())
    }

    #[tokio::test]
    async fn rejects_completed_with_mismatched_counts() {
        let store = InMemoryAuditStore::new();
        store
            .upsert(AuditRecord::new(key(), AuditStatus::InProgress).with_source_count(10))
            .await
            .unwrap();

        let err = store
            .upsert(AuditRecord::new(key(), AuditStatus::Completed).with_target_count(9))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
        assert_eq!(
            store.get_status(&key()).await.unwrap(),
            Some(AuditStatus::InProgress)
        );
    }

    #[tokio::test]
    async fn claim_is_refused_while_held() -> Result<()> {
        let store = InMemoryAuditStore::new();
        let claim = AuditRecord::new(key(), AuditStatus::InProgress);

        assert_eq!(store.claim(claim.clone()).await?, ClaimResult::Claimed);
        assert_eq!(
            store.claim(claim.clone()).await?,
            ClaimResult::Held {
                status: AuditStatus::InProgress
            }
        );

        store
            .upsert(AuditRecord::new(key(), AuditStatus::Failed))
            .await?;
        assert!(store.claim(claim).await?.is_claimed());
        Ok(())
    }
}
