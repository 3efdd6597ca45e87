//! The reconciliation state machine.
//!
//! One call to [`ReconciliationOrchestrator::run`] reconciles one window:
//!
//! ```text
//! get status ──▶ skip? ──▶ claim ──▶ ┌─ count ─▶ wait ─▶ trigger ─▶ wait ─▶ parse/upload ─▶ count rows ─┐
//!                                    │                                                                 │
//!                                    └──── retry pause ◀── cleanup ◀── mismatch ◀──── compare ◀────────┘
//!                                                                          │
//!                                                                        match ──▶ completed
//! ```
//!
//! Every status change is written to the audit store before the next step
//! starts, so a crash between two steps leaves a precise trail.
//!
//! ## Retry numbering
//!
//! `retry_number` counts failed attempts. Attempt `k` starts with
//! `retry_number = k - 1`; a failure in attempt `k` records `retry_number = k`.
//! A window reconciled on its second attempt therefore completes with
//! `retry_number = 1`.
//!
//! ## Concurrency
//!
//! No internal parallelism. Duplicate runs for one window are prevented by the
//! audit claim, which is atomic only if the audit backend overrides
//! [`AuditStore::claim`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{Instrument, debug, error, info, warn};

use tally_core::observability::{attempt_span, reconciliation_span};
use tally_core::{Clock, ObjectStore, RunId, ScaledPause, Window, WindowCalculator};

use crate::audit::{AuditKey, AuditRecord, AuditStatus, AuditStore, ClaimResult};
use crate::cleanup::CleanupCoordinator;
use crate::config::PipelineConfig;
use crate::error::{Error, Result};
use crate::metrics::{ReconMetrics, outcomes, results};
use crate::remote::{JobKind, RemoteJobRunner};
use crate::staging::StagedWindow;
use crate::warehouse::{TaskIdentity, WarehouseClient};

/// External collaborators the orchestrator drives.
#[derive(Clone)]
pub struct Collaborators {
    /// Runs the counting and parse/upload jobs.
    pub runner: Arc<dyn RemoteJobRunner>,
    /// Triggers ingestion and counts or deletes rows.
    pub warehouse: Arc<dyn WarehouseClient>,
    /// Holds the staged file.
    pub object_store: Arc<dyn ObjectStore>,
    /// Persists the audit row.
    pub audit: Arc<dyn AuditStore>,
    /// Time source for window checks and pauses.
    pub clock: Arc<dyn Clock>,
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators")
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

/// Why a run left the window alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Another run holds the window.
    InProgress,
    /// The window is already reconciled.
    AlreadyCompleted,
    /// The window failed and has since elapsed.
    StaleFailure,
}

impl SkipReason {
    /// Returns the skip reason for a status that blocks new runs.
    #[must_use]
    pub const fn for_status(status: AuditStatus) -> Option<Self> {
        match status {
            AuditStatus::InProgress => Some(Self::InProgress),
            AuditStatus::Completed => Some(Self::AlreadyCompleted),
            AuditStatus::NotStarted | AuditStatus::Failed => None,
        }
    }

    const fn metric_outcome(self) -> &'static str {
        match self {
            Self::InProgress => outcomes::SKIPPED_IN_PROGRESS,
            Self::AlreadyCompleted => outcomes::SKIPPED_COMPLETED,
            Self::StaleFailure => outcomes::SKIPPED_STALE,
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::InProgress => "window is already in progress",
            Self::AlreadyCompleted => "window is already completed",
            Self::StaleFailure => "failed window has elapsed",
        })
    }
}

/// Successful result of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Source and target counts matched.
    Completed {
        /// The reconciled count.
        source_count: u64,
        /// Failed attempts before the match.
        retry_number: u32,
    },
    /// The run performed no work.
    Skipped(SkipReason),
}

impl RunOutcome {
    /// Returns true if the window was reconciled by this run.
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

enum AttemptOutcome {
    Held(SkipReason),
    Matched { count: u64 },
    Mismatched { source: u64, target: u64 },
}

/// Drives one window through count, ingest and compare with bounded retries.
pub struct ReconciliationOrchestrator {
    config: Arc<PipelineConfig>,
    runner: Arc<dyn RemoteJobRunner>,
    warehouse: Arc<dyn WarehouseClient>,
    audit: Arc<dyn AuditStore>,
    clock: Arc<dyn Clock>,
    cleanup: CleanupCoordinator,
    calculator: WindowCalculator,
    ingest_pause: ScaledPause,
    retry_pause: ScaledPause,
    task: TaskIdentity,
    metrics: ReconMetrics,
}

impl fmt::Debug for ReconciliationOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconciliationOrchestrator")
            .field("pipeline", &self.config.pipeline_name)
            .field("index", &self.config.index_name)
            .field("max_retry_attempts", &self.config.max_retry_attempts)
            .finish_non_exhaustive()
    }
}

impl ReconciliationOrchestrator {
    /// Creates an orchestrator for one pipeline/index.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if `config` is invalid.
    pub fn new(config: impl Into<Arc<PipelineConfig>>, collaborators: Collaborators) -> Result<Self> {
        let config = config.into();
        config.validate()?;

        Ok(Self {
            calculator: config.window_calculator()?,
            ingest_pause: config.ingest_pause()?,
            retry_pause: config.retry_pause()?,
            task: config.task_identity()?,
            cleanup: CleanupCoordinator::new(
                collaborators.object_store,
                Arc::clone(&collaborators.warehouse),
            ),
            runner: collaborators.runner,
            warehouse: collaborators.warehouse,
            audit: collaborators.audit,
            clock: collaborators.clock,
            metrics: ReconMetrics::new(),
            config,
        })
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Reconciles today's window in the configured timezone.
    ///
    /// # Errors
    ///
    /// See [`ReconciliationOrchestrator::run_window`].
    pub async fn run(&self) -> Result<RunOutcome> {
        let window = self.calculator.compute_at(self.clock.now())?;
        self.run_window(window).await
    }

    /// Reconciles `window`.
    ///
    /// Returns `Ok` only if the window was reconciled or deliberately skipped.
    ///
    /// A window that has already ended and has no audit row is backfilled
    /// with a single attempt: a failed row may only re-enter `InProgress`
    /// while its window is open, so the loop stops after the first failure
    /// regardless of `max_retry_attempts`.
    ///
    /// # Errors
    ///
    /// - [`Error::ReconciliationFailed`] when attempts are exhausted or the
    ///   window elapses between attempts
    /// - [`Error::AuditUnavailable`] when the audit store cannot be reached
    /// - any other non-retryable collaborator error, after it has been recorded
    pub async fn run_window(&self, window: Window) -> Result<RunOutcome> {
        let run_id = RunId::generate();
        let span = reconciliation_span(
            &run_id.to_string(),
            &self.config.pipeline_name,
            &self.config.index_name,
            &window.date().to_string(),
        );

        async {
            let started = self.clock.now();
            let result = self.reconcile(&window).await;

            let outcome = match &result {
                Ok(RunOutcome::Completed { .. }) => outcomes::COMPLETED,
                Ok(RunOutcome::Skipped(reason)) => reason.metric_outcome(),
                Err(_) => outcomes::FAILED,
            };
            self.metrics.record_run(outcome);
            #[allow(clippy::cast_precision_loss)]
            let elapsed = (self.clock.now() - started).num_milliseconds() as f64 / 1000.0;
            self.metrics.observe_run_duration(outcome, elapsed);

            match &result {
                Ok(RunOutcome::Completed {
                    source_count,
                    retry_number,
                }) => info!(source_count, retry_number, "window reconciled"),
                Ok(RunOutcome::Skipped(reason)) => info!(%reason, "run skipped"),
                Err(e) => error!(error = %e, "reconciliation failed"),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn reconcile(&self, window: &Window) -> Result<RunOutcome> {
        let key = AuditKey::new(&self.config.pipeline_name, &self.config.index_name, window);
        let staged = self.config.staged_window(window)?;

        let mut status = match self.audit.get_status(&key).await? {
            Some(status) => {
                if let Some(reason) = SkipReason::for_status(status) {
                    info!(%status, "window already claimed");
                    return Ok(RunOutcome::Skipped(reason));
                }
                if status == AuditStatus::Failed && !window.contains(self.clock.now()) {
                    info!(%status, window = %window, "failed window has elapsed");
                    return Ok(RunOutcome::Skipped(SkipReason::StaleFailure));
                }
                status
            }
            None => AuditStatus::NotStarted,
        };

        let max_attempts = self.config.max_retry_attempts;
        let mut last_source = None;
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            if attempt > 1 && !window.contains(self.clock.now()) {
                return Err(Error::ReconciliationFailed {
                    key: key.to_string(),
                    status,
                    retry_number: attempt - 1,
                    message: format!("window {window} elapsed before attempt {attempt}; last failure: {last_error}"),
                });
            }

            let result = self
                .attempt(&key, window, &staged, attempt, &mut status, &mut last_source)
                .instrument(attempt_span(attempt, max_attempts))
                .await;

            match result {
                Ok(AttemptOutcome::Held(reason)) => {
                    info!(%reason, "lost the claim to another run");
                    return Ok(RunOutcome::Skipped(reason));
                }
                Ok(AttemptOutcome::Matched { count }) => {
                    let retry_number = attempt - 1;
                    let completed = AuditRecord::new(key.clone(), AuditStatus::Completed)
                        .with_source_count(count)
                        .with_target_count(count)
                        .with_retry_number(retry_number);
                    if let Err(e) = self.write(&mut status, completed).await {
                        self.record_fatal(&key, &mut status, attempt, &e).await;
                        return Err(e);
                    }
                    self.metrics.record_attempt(results::MATCHED);
                    return Ok(RunOutcome::Completed {
                        source_count: count,
                        retry_number,
                    });
                }
                Ok(AttemptOutcome::Mismatched { source, target }) => {
                    self.metrics.record_attempt(results::MISMATCHED);
                    last_error = format!("count mismatch: source_count={source} target_count={target}");
                    warn!(attempt, source_count = source, target_count = target, "count mismatch");

                    let failed = AuditRecord::new(key.clone(), AuditStatus::Failed)
                        .with_target_count(target)
                        .with_retry_number(attempt)
                        .with_error_message(&last_error);
                    self.write(&mut status, failed).await?;
                    self.clean(&staged).await;
                }
                Err(e) if e.is_retryable() => {
                    self.metrics.record_attempt(results::ERROR);
                    last_error = e.to_string();
                    warn!(attempt, error = %e, "attempt failed");

                    let failed = AuditRecord::new(key.clone(), AuditStatus::Failed)
                        .with_retry_number(attempt)
                        .with_error_message(&last_error);
                    if let Err(write_err) = self.write(&mut status, failed).await {
                        error!(error = %write_err, cause = %e, "failed to record attempt failure");
                        return Err(e);
                    }
                }
                Err(e) => {
                    self.metrics.record_attempt(results::ERROR);
                    self.record_fatal(&key, &mut status, attempt, &e).await;
                    return Err(e);
                }
            }

            if attempt == max_attempts {
                break;
            }
            let reference = last_source.unwrap_or(self.retry_pause.threshold_count());
            self.pause("retry", self.retry_pause.wait_secs(reference)).await;
        }

        Err(Error::ReconciliationFailed {
            key: key.to_string(),
            status,
            retry_number: max_attempts,
            message: last_error,
        })
    }

    /// Marks the window in progress, or reports who holds it.
    async fn begin_attempt(
        &self,
        key: &AuditKey,
        status: &mut AuditStatus,
        attempt: u32,
    ) -> Result<Option<SkipReason>> {
        let record =
            AuditRecord::new(key.clone(), AuditStatus::InProgress).with_retry_number(attempt - 1);

        if attempt > 1 {
            self.write(status, record).await?;
            return Ok(None);
        }

        self.check_transition(*status, AuditStatus::InProgress)?;
        match self.audit.claim(record).await? {
            ClaimResult::Claimed => {
                *status = AuditStatus::InProgress;
                debug!("claimed window");
                Ok(None)
            }
            ClaimResult::Held { status: held } => {
                Ok(Some(SkipReason::for_status(held).unwrap_or(SkipReason::InProgress)))
            }
        }
    }

    /// Runs one attempt: count, wait, trigger, wait, parse/upload, count rows.
    async fn attempt(
        &self,
        key: &AuditKey,
        window: &Window,
        staged: &StagedWindow,
        attempt: u32,
        status: &mut AuditStatus,
        last_source: &mut Option<u64>,
    ) -> Result<AttemptOutcome> {
        if let Some(reason) = self.begin_attempt(key, status, attempt).await? {
            return Ok(AttemptOutcome::Held(reason));
        }

        let count_request = self
            .config
            .job_request(JobKind::Count, window, attempt, staged);
        let source = self.runner.run_count(&count_request).await?;
        *last_source = Some(source);
        info!(source_count = source, "source counted");

        self.audit
            .upsert(AuditRecord::new(key.clone(), AuditStatus::InProgress)
                .with_source_count(source)
                .with_retry_number(attempt - 1))
            .await?;

        let ingest_wait = self.ingest_pause.wait_secs(source);
        self.pause("ingest", ingest_wait).await;

        self.warehouse.trigger_ingestion_task(&self.task).await?;
        debug!(task = %self.task, "ingestion task triggered");
        self.pause("ingest", ingest_wait).await;

        let parse_request = self
            .config
            .job_request(JobKind::ParseAndUpload, window, attempt, staged);
        self.runner.run_parse_and_upload(&parse_request).await?;
        debug!(object = %staged.object(), "staged file uploaded");

        let target = self.warehouse.count_rows(staged.filename_pattern()).await?;
        info!(source_count = source, target_count = target, "target counted");

        Ok(if target == source {
            AttemptOutcome::Matched { count: source }
        } else {
            AttemptOutcome::Mismatched { source, target }
        })
    }

    fn check_transition(&self, from: AuditStatus, to: AuditStatus) -> Result<()> {
        if from.can_transition_to(to) {
            Ok(())
        } else {
            Err(Error::InvalidStateTransition {
                from,
                to,
                reason: format!("not permitted for {}", self.config.index_name),
            })
        }
    }

    /// Validates the transition, writes the record, then tracks the new status.
    async fn write(&self, status: &mut AuditStatus, record: AuditRecord) -> Result<()> {
        self.check_transition(*status, record.status)?;
        let target = record.status;
        self.audit.upsert(record).await?;
        *status = target;
        Ok(())
    }

    /// Best-effort `Failed` write for an error that ends the run.
    async fn record_fatal(&self, key: &AuditKey, status: &mut AuditStatus, attempt: u32, cause: &Error) {
        if !status.can_transition_to(AuditStatus::Failed) {
            error!(%status, error = %cause, "run aborted before the window was claimed");
            return;
        }
        let failed = AuditRecord::new(key.clone(), AuditStatus::Failed)
            .with_retry_number(attempt)
            .with_error_message(cause.to_string());
        if let Err(e) = self.write(status, failed).await {
            error!(error = %e, cause = %cause, "failed to record fatal error");
        }
    }

    async fn clean(&self, staged: &StagedWindow) {
        match self.cleanup.cleanup(staged).await {
            Ok(report) => {
                self.metrics.record_cleanup(results::OK);
                debug!(rows_deleted = report.rows_deleted, "cleanup finished");
            }
            Err(e) => {
                self.metrics.record_cleanup(results::PARTIAL_FAILURE);
                warn!(error = %e, "cleanup incomplete, retrying anyway");
            }
        }
    }

    async fn pause(&self, kind: &'static str, wait_secs: u64) {
        info!(kind, wait_secs, "pausing");
        self.metrics.observe_pause(kind, wait_secs);
        self.clock.sleep(Duration::from_secs(wait_secs)).await;
    }
}
