//! Reconciliation metrics.
//!
//! Recorded through the `metrics` crate facade; installing an exporter is the
//! embedding application's job.
//!
//! ## Metrics Exported
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `tally_runs_total` | Counter | `outcome` | Runs by final outcome |
//! | `tally_attempts_total` | Counter | `result` | Attempts by result |
//! | `tally_cleanups_total` | Counter | `result` | Cleanup invocations by result |
//! | `tally_pause_seconds` | Histogram | `kind` | Timed pauses by kind |
//! | `tally_run_duration_seconds` | Histogram | `outcome` | Wall-clock run duration |
//!
//! ## Usage
//!
//! ```rust,no_run
//! use tally_flow::metrics::{ReconMetrics, outcomes};
//!
//! let metrics = ReconMetrics::new();
//! metrics.record_run(outcomes::COMPLETED);
//! metrics.observe_pause("ingest", 30);
//! ```

use metrics::{counter, histogram};

/// Metric names as constants for consistency.
pub mod names {
    /// Counter: runs by final outcome.
    pub const RUNS_TOTAL: &str = "tally_runs_total";
    /// Counter: attempts by result.
    pub const ATTEMPTS_TOTAL: &str = "tally_attempts_total";
    /// Counter: cleanup invocations by result.
    pub const CLEANUPS_TOTAL: &str = "tally_cleanups_total";
    /// Histogram: timed pauses in seconds.
    pub const PAUSE_SECONDS: &str = "tally_pause_seconds";
    /// Histogram: run duration in seconds.
    pub const RUN_DURATION_SECONDS: &str = "tally_run_duration_seconds";
}

/// Label keys used across metrics.
pub mod labels {
    /// Final outcome of a run.
    pub const OUTCOME: &str = "outcome";
    /// Result of an attempt or cleanup.
    pub const RESULT: &str = "result";
    /// Pause kind (ingest, retry).
    pub const KIND: &str = "kind";
}

/// Values of the `outcome` label.
pub mod outcomes {
    /// Counts matched.
    pub const COMPLETED: &str = "completed";
    /// Another run holds the window.
    pub const SKIPPED_IN_PROGRESS: &str = "skipped_in_progress";
    /// The window is already reconciled.
    pub const SKIPPED_COMPLETED: &str = "skipped_completed";
    /// The failed window has elapsed.
    pub const SKIPPED_STALE: &str = "skipped_stale";
    /// The run ended without reconciling the window.
    pub const FAILED: &str = "failed";
}

/// Values of the `result` label.
pub mod results {
    /// Attempt counts matched.
    pub const MATCHED: &str = "matched";
    /// Attempt counts differed.
    pub const MISMATCHED: &str = "mismatched";
    /// Attempt failed with an error.
    pub const ERROR: &str = "error";
    /// Cleanup removed everything.
    pub const OK: &str = "ok";
    /// At least one cleanup deletion failed.
    pub const PARTIAL_FAILURE: &str = "partial_failure";
}

/// Records reconciliation metrics with consistent labels.
///
/// Cheap to clone; holds no state of its own.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReconMetrics;

impl ReconMetrics {
    /// Creates a new metrics recorder.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Increments `tally_runs_total`.
    pub fn record_run(&self, outcome: &'static str) {
        counter!(names::RUNS_TOTAL, labels::OUTCOME => outcome).increment(1);
    }

    /// Increments `tally_attempts_total`.
    pub fn record_attempt(&self, result: &'static str) {
        counter!(names::ATTEMPTS_TOTAL, labels::RESULT => result).increment(1);
    }

    /// Increments `tally_cleanups_total`.
    pub fn record_cleanup(&self, result: &'static str) {
        counter!(names::CLEANUPS_TOTAL, labels::RESULT => result).increment(1);
    }

    /// Records a timed pause in `tally_pause_seconds`.
    #[allow(clippy::cast_precision_loss)]
    pub fn observe_pause(&self, kind: &'static str, secs: u64) {
        histogram!(names::PAUSE_SECONDS, labels::KIND => kind).record(secs as f64);
    }

    /// Records a run duration in `tally_run_duration_seconds`.
    pub fn observe_run_duration(&self, outcome: &'static str, secs: f64) {
        histogram!(names::RUN_DURATION_SECONDS, labels::OUTCOME => outcome).record(secs);
    }
}
