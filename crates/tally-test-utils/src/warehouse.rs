//! Scripted warehouse client.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use tally_flow::error::{Error, Result};
use tally_flow::warehouse::{FilenamePattern, TaskIdentity, WarehouseClient};

/// Record of a warehouse call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WarehouseOp {
    /// A raw statement was executed.
    Execute {
        /// Statement text.
        statement: String,
    },
    /// The ingestion task was triggered.
    Trigger {
        /// Task triggered.
        task: TaskIdentity,
    },
    /// Rows were counted.
    Count {
        /// Pattern counted.
        pattern: FilenamePattern,
    },
    /// Rows were deleted.
    Delete {
        /// Pattern deleted.
        pattern: FilenamePattern,
    },
}

/// Warehouse client returning scripted row counts.
///
/// Row counts are consumed in order; once the script runs out the default
/// count (if any) is returned.
#[derive(Debug, Clone, Default)]
pub struct ScriptedWarehouse {
    counts: Arc<Mutex<VecDeque<std::result::Result<u64, String>>>>,
    default_count: Arc<Mutex<Option<u64>>>,
    trigger_failures: Arc<Mutex<VecDeque<String>>>,
    delete_failure: Arc<Mutex<Option<String>>>,
    operations: Arc<Mutex<Vec<WarehouseOp>>>,
}

impl ScriptedWarehouse {
    /// Creates a warehouse with an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a row count.
    pub fn push_count(&self, count: u64) {
        self.counts.lock().expect("lock").push_back(Ok(count));
    }

    /// Queues a failing row count.
    pub fn push_count_failure(&self, message: impl Into<String>) {
        self.counts.lock().expect("lock").push_back(Err(message.into()));
    }

    /// Sets the count returned once the script is exhausted.
    pub fn set_default_count(&self, count: u64) {
        *self.default_count.lock().expect("lock") = Some(count);
    }

    /// Makes the next trigger fail.
    pub fn push_trigger_failure(&self, message: impl Into<String>) {
        self.trigger_failures
            .lock()
            .expect("lock")
            .push_back(message.into());
    }

    /// Makes every row deletion fail.
    pub fn fail_deletes(&self, message: impl Into<String>) {
        *self.delete_failure.lock().expect("lock") = Some(message.into());
    }

    /// Returns all recorded operations.
    pub fn operations(&self) -> Vec<WarehouseOp> {
        self.operations.lock().expect("lock").clone()
    }

    /// Returns the patterns passed to `delete_rows`, in order.
    pub fn deletes(&self) -> Vec<FilenamePattern> {
        self.operations()
            .into_iter()
            .filter_map(|op| match op {
                WarehouseOp::Delete { pattern } => Some(pattern),
                _ => None,
            })
            .collect()
    }

    /// Returns the number of ingestion triggers.
    pub fn trigger_count(&self) -> usize {
        self.operations()
            .iter()
            .filter(|op| matches!(op, WarehouseOp::Trigger { .. }))
            .count()
    }

    fn record(&self, op: WarehouseOp) {
        self.operations.lock().expect("lock").push(op);
    }
}

#[async_trait]
impl WarehouseClient for ScriptedWarehouse {
    async fn execute(&self, statement: &str) -> Result<()> {
        self.record(WarehouseOp::Execute {
            statement: statement.to_string(),
        });
        Ok(())
    }

    async fn trigger_ingestion_task(&self, task: &TaskIdentity) -> Result<()> {
        self.record(WarehouseOp::Trigger { task: task.clone() });
        match self.trigger_failures.lock().expect("lock").pop_front() {
            Some(message) => Err(Error::warehouse(message)),
            None => Ok(()),
        }
    }

    async fn count_rows(&self, pattern: &FilenamePattern) -> Result<u64> {
        self.record(WarehouseOp::Count {
            pattern: pattern.clone(),
        });
        let scripted = self.counts.lock().expect("lock").pop_front();
        match scripted {
            Some(Ok(count)) => Ok(count),
            Some(Err(message)) => Err(Error::warehouse(message)),
            None => (*self.default_count.lock().expect("lock"))
                .ok_or_else(|| Error::warehouse("no scripted row count")),
        }
    }

    async fn delete_rows(&self, pattern: &FilenamePattern) -> Result<u64> {
        self.record(WarehouseOp::Delete {
            pattern: pattern.clone(),
        });
        match self.delete_failure.lock().expect("lock").clone() {
            Some(message) => Err(Error::warehouse(message)),
            None => Ok(0),
        }
    }
}
