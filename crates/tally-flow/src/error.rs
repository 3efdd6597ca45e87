//! Error types for the reconciliation engine.
//!
//! Collaborator failures are classified so the orchestrator can decide, at the
//! attempt boundary, whether to consume an attempt and retry or to abort:
//!
//! | Variant | Policy |
//! |---------|--------|
//! | `Configuration` | fatal, no retry |
//! | `AuditUnavailable` | fatal for the current run |
//! | `RemoteJob` | retryable, consumes an attempt |
//! | `Warehouse` | retryable, consumes an attempt |
//! | `CleanupPartialFailure` | logged, retry proceeds anyway |

use crate::audit::AuditStatus;
use crate::remote::JobKind;

/// The result type used throughout tally-flow.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during reconciliation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Settings are missing or invalid.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the bad setting.
        message: String,
    },

    /// A caller passed an argument that violates a precondition.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the violated precondition.
        message: String,
    },

    /// The audit store could not be read or written.
    #[error("audit store unavailable: {message}")]
    AuditUnavailable {
        /// Description of the failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A remote job failed to run or returned an unusable result.
    #[error("remote {job} job failed: {message}")]
    RemoteJob {
        /// Which job failed.
        job: JobKind,
        /// Description of the failure.
        message: String,
    },

    /// A warehouse statement failed.
    #[error("warehouse error: {message}")]
    Warehouse {
        /// Description of the failure.
        message: String,
    },

    /// At least one cleanup deletion failed; the others were still attempted.
    #[error("cleanup partially failed: {}", failures.join("; "))]
    CleanupPartialFailure {
        /// One entry per failed deletion.
        failures: Vec<String>,
    },

    /// An audit status change that the lifecycle does not permit.
    #[error("invalid audit transition: {from} -> {to} ({reason})")]
    InvalidStateTransition {
        /// The current status.
        from: AuditStatus,
        /// The attempted status.
        to: AuditStatus,
        /// Why the transition is not allowed.
        reason: String,
    },

    /// The run ended without reconciling the window.
    #[error(
        "reconciliation of {key} ended with status {status} after {retry_number} failed attempt(s): {message}"
    )]
    ReconciliationFailed {
        /// The audit key of the window.
        key: String,
        /// Final audit status.
        status: AuditStatus,
        /// Failed attempts consumed.
        retry_number: u32,
        /// The most recent failure cause.
        message: String,
    },

    /// An error from tally-core.
    #[error("core error: {0}")]
    Core(#[from] tally_core::Error),
}

impl Error {
    /// Creates a new configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new audit-unavailable error.
    #[must_use]
    pub fn audit_unavailable(message: impl Into<String>) -> Self {
        Self::AuditUnavailable {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new audit-unavailable error with a source.
    #[must_use]
    pub fn audit_unavailable_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::AuditUnavailable {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a new remote job error.
    #[must_use]
    pub fn remote_job(job: JobKind, message: impl Into<String>) -> Self {
        Self::RemoteJob {
            job,
            message: message.into(),
        }
    }

    /// Creates a new warehouse error.
    #[must_use]
    pub fn warehouse(message: impl Into<String>) -> Self {
        Self::Warehouse {
            message: message.into(),
        }
    }

    /// Returns true if the failure should consume an attempt rather than abort the run.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RemoteJob { .. }
                | Self::Warehouse { .. }
                | Self::CleanupPartialFailure { .. }
                | Self::Core(tally_core::Error::Storage { .. } | tally_core::Error::NotFound(_))
        )
    }
}
