//! # tally-flow
//!
//! Audit-driven reconciliation engine for a recurring extract/load cycle.
//!
//! Each cycle obtains a record count from a remote compute fleet, stages the
//! corresponding data file in an object store, triggers warehouse ingestion and
//! compares the ingested row count against the original count. The engine is
//! safe to re-invoke from an external scheduler:
//!
//! - **Skip-aware**: a window that is already running or completed is a no-op
//! - **Bounded retries**: mismatches and transient failures consume attempts
//!   with volume-scaled back-off in between
//! - **Clean retries**: partially-ingested data is removed before each retry
//! - **Auditable**: every status change is written to the audit store first
//!
//! ## Core Concepts
//!
//! - **Window**: the local day one cycle reconciles
//! - **Audit record**: the single row per (pipeline, index, window) tracking
//!   status, counts and retries
//! - **Collaborators**: the remote job runner, warehouse client and object store,
//!   all behind traits
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tally_flow::prelude::*;
//!
//! let orchestrator = ReconciliationOrchestrator::new(
//!     config,
//!     Collaborators {
//!         runner: Arc::new(my_runner),
//!         warehouse: Arc::new(my_warehouse),
//!         object_store: Arc::new(my_object_store),
//!         audit: Arc::new(InMemoryAuditStore::new()),
//!         clock: Arc::new(SystemClock),
//!     },
//! )?;
//!
//! match orchestrator.run().await? {
//!     RunOutcome::Completed { source_count, .. } => println!("reconciled {source_count}"),
//!     RunOutcome::Skipped(reason) => println!("skipped: {reason}"),
//! }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod audit;
pub mod cleanup;
pub mod config;
pub mod error;
pub mod metrics;
pub mod orchestrator;
pub mod remote;
pub mod staging;
pub mod warehouse;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::audit::memory::InMemoryAuditStore;
    pub use crate::audit::{AuditKey, AuditRecord, AuditStatus, AuditStore, ClaimResult};
    pub use crate::cleanup::{CleanupCoordinator, CleanupReport};
    pub use crate::config::PipelineConfig;
    pub use crate::error::{Error, Result};
    pub use crate::metrics::ReconMetrics;
    pub use crate::orchestrator::{Collaborators, ReconciliationOrchestrator, RunOutcome, SkipReason};
    pub use crate::remote::{JobKind, JobRequest, RemoteJobRunner};
    pub use crate::staging::StagedWindow;
    pub use crate::warehouse::{FilenamePattern, TaskIdentity, WarehouseClient};
    pub use tally_core::{Clock, ObjectLocation, ObjectStore, SystemClock, Window};
}
