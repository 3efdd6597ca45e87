//! Removal of a window's partially ingested data before a retry.
//!
//! Cleanup is scoped to exactly one window: the staged object by exact key and
//! the warehouse rows under the window's filename prefix. Nothing wider is
//! ever deleted.

use std::sync::Arc;

use tracing::{info, warn};

use tally_core::ObjectStore;

use crate::error::{Error, Result};
use crate::staging::StagedWindow;
use crate::warehouse::WarehouseClient;

/// What a successful cleanup removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanupReport {
    /// Warehouse rows deleted.
    pub rows_deleted: u64,
}

/// Deletes the staged object and matching warehouse rows for a window.
#[derive(Clone)]
pub struct CleanupCoordinator {
    object_store: Arc<dyn ObjectStore>,
    warehouse: Arc<dyn WarehouseClient>,
}

impl std::fmt::Debug for CleanupCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupCoordinator").finish_non_exhaustive()
    }
}

impl CleanupCoordinator {
    /// Creates a coordinator over the given collaborators.
    #[must_use]
    pub fn new(object_store: Arc<dyn ObjectStore>, warehouse: Arc<dyn WarehouseClient>) -> Self {
        Self {
            object_store,
            warehouse,
        }
    }

    /// Deletes the staged object and the window's warehouse rows.
    ///
    /// Both deletions are attempted even if the first fails.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CleanupPartialFailure`] listing every deletion that failed.
    pub async fn cleanup(&self, staged: &StagedWindow) -> Result<CleanupReport> {
        let mut failures = Vec::new();

        if let Err(e) = self.object_store.delete(staged.object()).await {
            warn!(object = %staged.object(), error = %e, "failed to delete staged object");
            failures.push(format!("object {}: {e}", staged.object()));
        }

        let rows_deleted = match self.warehouse.delete_rows(staged.filename_pattern()).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(pattern = %staged.filename_pattern(), error = %e, "failed to delete warehouse rows");
                failures.push(format!("rows {}: {e}", staged.filename_pattern()));
                0
            }
        };

        if !failures.is_empty() {
            return Err(Error::CleanupPartialFailure { failures });
        }

        info!(
            object = %staged.object(),
            pattern = %staged.filename_pattern(),
            rows_deleted,
            "cleaned up window"
        );
        Ok(CleanupReport { rows_deleted })
    }
}
