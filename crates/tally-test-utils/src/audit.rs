//! Audit store with failure injection.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use tally_core::Clock;
use tally_flow::audit::memory::InMemoryAuditStore;
use tally_flow::audit::{AuditKey, AuditRecord, AuditStatus, AuditStore, ClaimResult};
use tally_flow::error::{Error, Result};

#[derive(Debug, Default)]
struct FailurePlan {
    reads: bool,
    writes: bool,
    writes_with_status: Vec<AuditStatus>,
}

/// In-memory audit store whose reads or writes can be made to fail.
///
/// Injected failures surface as [`Error::AuditUnavailable`], the way a lost
/// database connection would.
#[derive(Debug, Clone)]
pub struct FlakyAuditStore {
    inner: Arc<InMemoryAuditStore>,
    plan: Arc<Mutex<FailurePlan>>,
}

impl FlakyAuditStore {
    /// Creates an empty store stamping writes with `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(InMemoryAuditStore::with_clock(clock)),
            plan: Arc::new(Mutex::new(FailurePlan::default())),
        }
    }

    /// Returns the underlying store.
    pub fn inner(&self) -> &InMemoryAuditStore {
        &self.inner
    }

    /// Makes every read fail.
    pub fn fail_reads(&self) {
        self.plan.lock().expect("lock").reads = true;
    }

    /// Makes every write fail.
    pub fn fail_writes(&self) {
        self.plan.lock().expect("lock").writes = true;
    }

    /// Makes writes of `status` fail.
    pub fn fail_writes_with_status(&self, status: AuditStatus) {
        self.plan
            .lock()
            .expect("lock")
            .writes_with_status
            .push(status);
    }

    /// Clears all injected failures.
    pub fn heal(&self) {
        *self.plan.lock().expect("lock") = FailurePlan::default();
    }

    /// Seeds a row directly, bypassing failure injection.
    pub fn seed(&self, record: AuditRecord) {
        self.inner.insert_raw(record).expect("seed audit row");
    }

    /// Returns the latest row for `key`, bypassing failure injection.
    pub fn latest(&self, key: &AuditKey) -> Option<AuditRecord> {
        let rows = self.inner.rows(key).expect("read audit rows");
        rows.into_iter().max_by_key(|r| r.last_updated_ts)
    }

    /// Returns every write for `key`, oldest first.
    pub fn history(&self, key: &AuditKey) -> Vec<AuditRecord> {
        self.inner.history(key).expect("read audit history")
    }

    fn check_read(&self) -> Result<()> {
        if self.plan.lock().expect("lock").reads {
            return Err(Error::audit_unavailable("injected read failure"));
        }
        Ok(())
    }

    fn check_write(&self, status: AuditStatus) -> Result<()> {
        let plan = self.plan.lock().expect("lock");
        if plan.writes || plan.writes_with_status.contains(&status) {
            return Err(Error::audit_unavailable(format!(
                "injected write failure for status {status}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl AuditStore for FlakyAuditStore {
    async fn get(&self, key: &AuditKey) -> Result<Option<AuditRecord>> {
        self.check_read()?;
        self.inner.get(key).await
    }

    async fn upsert(&self, record: AuditRecord) -> Result<AuditRecord> {
        self.check_write(record.status)?;
        self.inner.upsert(record).await
    }

    async fn claim(&self, record: AuditRecord) -> Result<ClaimResult> {
        self.check_write(record.status)?;
        self.inner.claim(record).await
    }
}
