//! End-to-end tests for the reconciliation state machine.
//!
//! Every collaborator is scripted and time is virtual, so multi-hour back-offs
//! run instantly and every pause is observable.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};

use tally_flow::audit::AuditStatus;
use tally_flow::config::PipelineConfig;
use tally_flow::error::Error;
use tally_flow::orchestrator::{Collaborators, ReconciliationOrchestrator, SkipReason};
use tally_flow::remote::JobKind;
use tally_test_utils::{
    Harness, assert_audit, assert_completed, assert_no_collaborator_calls, assert_skipped,
    assert_terminal_failure, init_test_logging, pipeline_config,
};

fn harness() -> Harness {
    init_test_logging();
    Harness::new(pipeline_config())
}

fn harness_with(edit: impl FnOnce(&mut PipelineConfig)) -> Harness {
    init_test_logging();
    let mut config = pipeline_config();
    edit(&mut config);
    Harness::new(config)
}

#[tokio::test]
async fn matching_counts_complete_on_first_attempt() {
    let h = harness();
    h.runner.push_count(100);
    h.warehouse.push_count(100);

    let result = h.run().await;

    assert_completed(&result, 100, 0);
    let row = h.audit_row();
    assert_audit(&row, AuditStatus::Completed, 0);
    assert_eq!(row.source_count, Some(100));
    assert_eq!(row.target_count, Some(100));
    assert_eq!(row.error_message, None);

    assert_eq!(h.runner.calls_of(JobKind::Count), 1);
    assert_eq!(h.runner.calls_of(JobKind::ParseAndUpload), 1);
    assert_eq!(h.warehouse.trigger_count(), 1);
    assert!(h.objects.contains(h.staged().object()));
    assert!(h.warehouse.deletes().is_empty());
}

#[tokio::test]
async fn run_derives_todays_window_from_the_clock() {
    let h = harness();
    h.runner.push_count(5);
    h.warehouse.push_count(5);

    let result = h.orchestrator.run().await;

    assert_completed(&result, 5, 0);
    assert_eq!(h.audit_row().key, h.key());
}

#[tokio::test]
async fn skip_on_completed_makes_no_calls() {
    let h = harness();
    h.seed_status(AuditStatus::Completed);

    let result = h.run().await;

    assert_skipped(&result, SkipReason::AlreadyCompleted);
    assert_no_collaborator_calls(&h);
    assert_eq!(h.audit_row().status, AuditStatus::Completed);
}

#[tokio::test]
async fn skip_on_in_progress_makes_no_calls() {
    let h = harness();
    h.seed_status(AuditStatus::InProgress);

    let result = h.run().await;

    assert_skipped(&result, SkipReason::InProgress);
    assert_no_collaborator_calls(&h);
    assert!(h.audit.history(&h.key()).is_empty());
}

#[tokio::test]
async fn second_invocation_while_first_runs_is_a_noop() {
    let h = harness();
    h.runner.push_count(100);
    h.warehouse.push_count(100);

    let second = ReconciliationOrchestrator::new(
        pipeline_config(),
        Collaborators {
            runner: Arc::new(h.runner.clone()),
            warehouse: Arc::new(h.warehouse.clone()),
            object_store: Arc::new(h.objects.clone()),
            audit: Arc::new(h.audit.clone()),
            clock: Arc::new(h.clock.clone()),
        },
    )
    .unwrap();

    let (first, duplicate) = tokio::join!(h.run(), second.run_window(h.window));

    assert_completed(&first, 100, 0);
    assert_skipped(&duplicate, SkipReason::InProgress);
    assert_eq!(h.runner.calls_of(JobKind::Count), 1);
    assert_eq!(h.runner.calls_of(JobKind::ParseAndUpload), 1);
}

#[tokio::test]
async fn rerun_after_completion_is_a_noop() {
    let h = harness();
    h.runner.set_default_count(42);
    h.warehouse.set_default_count(42);

    assert_completed(&h.run().await, 42, 0);
    let calls = h.collaborator_calls();

    assert_skipped(&h.run().await, SkipReason::AlreadyCompleted);
    assert_eq!(h.collaborator_calls(), calls);
}

#[tokio::test]
async fn retry_after_mismatch_then_succeed() {
    let h = harness();
    h.runner.push_count(100);
    h.runner.push_count(100);
    h.warehouse.push_count(90);
    h.warehouse.push_count(100);

    let result = h.run().await;

    assert_completed(&result, 100, 1);
    let row = h.audit_row();
    assert_audit(&row, AuditStatus::Completed, 1);
    assert_eq!(row.target_count, Some(100));

    // exactly one cleanup, scoped to the window
    assert_eq!(h.objects.deletes(), vec![h.staged().object().clone()]);
    assert_eq!(h.warehouse.deletes(), vec![h.staged().filename_pattern().clone()]);

    let statuses: Vec<_> = h
        .audit
        .history(&h.key())
        .iter()
        .map(|r| (r.status, r.retry_number))
        .collect();
    assert_eq!(
        statuses,
        vec![
            (AuditStatus::InProgress, 0),
            (AuditStatus::InProgress, 0),
            (AuditStatus::Failed, 1),
            (AuditStatus::InProgress, 1),
            (AuditStatus::InProgress, 1),
            (AuditStatus::Completed, 1),
        ]
    );

    let failed = &h.audit.history(&h.key())[2];
    assert_eq!(failed.source_count, Some(100));
    assert_eq!(failed.target_count, Some(90));
    assert_eq!(
        failed.error_message.as_deref(),
        Some("count mismatch: source_count=100 target_count=90")
    );

    let attempts: Vec<u32> = h.runner.calls().iter().map(|r| r.attempt).collect();
    assert_eq!(attempts, vec![1, 1, 2, 2]);
}

#[tokio::test]
async fn exhaustion_stops_at_max_attempts() {
    let h = harness_with(|c| c.max_retry_attempts = 2);
    h.runner.set_default_count(100);
    h.warehouse.set_default_count(90);

    let result = h.run().await;

    assert_terminal_failure(&result, 2);
    let row = h.audit_row();
    assert_audit(&row, AuditStatus::Failed, 2);
    assert_eq!(row.source_count, Some(100));
    assert_eq!(row.target_count, Some(90));
    assert!(row.error_message.unwrap().contains("count mismatch"));

    assert_eq!(h.runner.calls_of(JobKind::Count), 2);
    assert_eq!(h.objects.deletes().len(), 2);
    // two ingest waits per attempt, one retry pause between the attempts
    assert_eq!(h.clock.pause_secs(), vec![30, 30, 30, 30, 30]);
}

#[tokio::test]
async fn terminal_failure_reports_status_and_retries() {
    let h = harness_with(|c| c.max_retry_attempts = 1);
    h.runner.push_count(10);
    h.warehouse.push_count(9);

    let err = h.run().await.unwrap_err();

    let message = err.to_string();
    assert!(message.contains("failed"), "{message}");
    assert!(message.contains("after 1 failed attempt(s)"), "{message}");
    assert!(message.contains("source_count=10 target_count=9"), "{message}");
}

#[tokio::test]
async fn stale_failure_is_not_retried() {
    let h = harness();
    h.seed_status(AuditStatus::Failed);
    h.clock.set(h.window.end().with_timezone(&Utc) + TimeDelta::seconds(1));

    let result = h.run().await;

    assert_skipped(&result, SkipReason::StaleFailure);
    assert_no_collaborator_calls(&h);
    assert_eq!(h.audit_row().status, AuditStatus::Failed);
}

#[tokio::test]
async fn backfill_of_elapsed_window_gets_one_attempt() {
    let h = harness();
    h.clock.set(h.window.end().with_timezone(&Utc) + TimeDelta::hours(1));
    h.runner.set_default_count(100);
    h.warehouse.set_default_count(90);

    let result = h.run().await;

    assert_terminal_failure(&result, 1);
    assert_eq!(h.runner.calls_of(JobKind::Count), 1);
    assert_eq!(h.warehouse.deletes().len(), 1);
    assert_audit(&h.audit_row(), AuditStatus::Failed, 1);
}

#[tokio::test]
async fn failure_within_window_is_retried() {
    let h = harness();
    h.seed_status(AuditStatus::Failed);
    h.runner.push_count(7);
    h.warehouse.push_count(7);

    let result = h.run().await;

    assert_completed(&result, 7, 0);
    assert_eq!(h.audit_row().status, AuditStatus::Completed);
}

#[tokio::test]
async fn remote_count_failure_consumes_an_attempt() {
    let h = harness();
    h.runner.push_count_failure("ssh: connection reset");
    h.runner.push_count(100);
    h.warehouse.push_count(100);

    let result = h.run().await;

    assert_completed(&result, 100, 1);
    let failed = h
        .audit
        .history(&h.key())
        .into_iter()
        .find(|r| r.status == AuditStatus::Failed)
        .unwrap();
    assert_eq!(failed.retry_number, 1);
    assert!(
        failed
            .error_message
            .unwrap()
            .contains("remote count job failed: ssh: connection reset")
    );
    // no count known yet, so the retry pause falls back to the threshold
    assert_eq!(h.clock.pause_secs(), vec![30, 30, 30]);
    // no cleanup without a mismatch
    assert!(h.objects.deletes().is_empty());
}

#[tokio::test]
async fn warehouse_trigger_failure_consumes_an_attempt() {
    let h = harness_with(|c| c.max_retry_attempts = 2);
    h.runner.set_default_count(50);
    h.warehouse.push_trigger_failure("task suspended");
    h.warehouse.push_count(50);

    let result = h.run().await;

    assert_completed(&result, 50, 1);
    assert_eq!(h.warehouse.trigger_count(), 2);
}

#[tokio::test]
async fn parse_failures_exhaust_attempts() {
    let h = harness_with(|c| c.max_retry_attempts = 2);
    h.runner.set_default_count(50);
    h.runner.push_parse_failure("parser crashed");
    h.runner.push_parse_failure("parser crashed again");

    let result = h.run().await;

    assert_terminal_failure(&result, 2);
    let row = h.audit_row();
    assert!(row.error_message.unwrap().contains("parser crashed again"));
    assert_eq!(row.source_count, Some(50));
}

#[tokio::test]
async fn audit_read_failure_is_fatal_without_calls() {
    let h = harness();
    h.audit.fail_reads();

    let err = h.run().await.unwrap_err();

    assert!(matches!(err, Error::AuditUnavailable { .. }));
    assert!(!err.is_retryable());
    assert_no_collaborator_calls(&h);
}

#[tokio::test]
async fn audit_claim_failure_is_fatal_without_calls() {
    let h = harness();
    h.audit.fail_writes();

    let err = h.run().await.unwrap_err();

    assert!(matches!(err, Error::AuditUnavailable { .. }));
    assert_no_collaborator_calls(&h);
    assert!(h.audit.latest(&h.key()).is_none());
}

#[tokio::test]
async fn audit_failure_mid_run_is_recorded_and_surfaced() {
    let h = harness();
    h.runner.set_default_count(10);
    h.warehouse.set_default_count(10);
    h.audit.fail_writes_with_status(AuditStatus::Completed);

    let err = h.run().await.unwrap_err();

    assert!(matches!(err, Error::AuditUnavailable { .. }));
    let row = h.audit_row();
    assert_audit(&row, AuditStatus::Failed, 1);
    assert!(row.error_message.unwrap().contains("injected write failure"));
    assert_eq!(h.runner.calls_of(JobKind::Count), 1);
}

#[tokio::test]
async fn audit_failure_during_error_handling_keeps_original_error() {
    let h = harness();
    h.runner.push_count_failure("fleet offline");
    h.audit.fail_writes_with_status(AuditStatus::Failed);

    let err = h.run().await.unwrap_err();

    assert!(matches!(err, Error::RemoteJob { job: JobKind::Count, .. }), "{err}");
    assert_eq!(h.audit_row().status, AuditStatus::InProgress);
    assert_eq!(h.runner.calls_of(JobKind::Count), 1);
}

#[tokio::test]
async fn cleanup_partial_failure_does_not_stop_retries() {
    let h = harness();
    h.runner.set_default_count(100);
    h.warehouse.push_count(90);
    h.warehouse.push_count(100);
    h.objects.inject_delete_failure(h.staged().object().key.clone());
    h.warehouse.fail_deletes("warehouse busy");

    let result = h.run().await;

    assert_completed(&result, 100, 1);
    // both deletions were attempted despite the first failing
    assert_eq!(h.objects.deletes().len(), 1);
    assert_eq!(h.warehouse.deletes().len(), 1);
}

#[tokio::test]
async fn zero_source_count_is_a_valid_count() {
    let h = harness();
    h.runner.push_count(0);
    h.warehouse.push_count(0);

    let result = h.run().await;

    assert_completed(&result, 0, 0);
    assert_eq!(h.audit_row().source_count, Some(0));
    assert_eq!(h.clock.pause_secs(), vec![30, 30]);
}

#[tokio::test]
async fn pauses_scale_with_source_volume() {
    let h = harness_with(|c| c.retry_pause_base_secs = Some(120));
    h.runner.set_default_count(2000);
    h.warehouse.push_count(1999);
    h.warehouse.push_count(2000);

    let result = h.run().await;

    assert_completed(&result, 2000, 1);
    // ingest: 30 * (1 + 1.0 * 1.0) = 60; retry: 120 * 2 = 240
    assert_eq!(h.clock.pause_secs(), vec![60, 60, 240, 60, 60]);
}

#[tokio::test]
async fn window_elapsing_during_backoff_ends_the_run() {
    let h = harness_with(|c| c.retry_pause_base_secs = Some(13 * 3600));
    h.runner.set_default_count(100);
    h.warehouse.set_default_count(90);

    let result = h.run().await;

    assert_terminal_failure(&result, 1);
    assert_eq!(h.runner.calls_of(JobKind::Count), 1);
    assert_audit(&h.audit_row(), AuditStatus::Failed, 1);
    assert!(h.clock.pauses().contains(&Duration::from_secs(13 * 3600)));
}
