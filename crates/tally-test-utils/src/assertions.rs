//! Custom assertion helpers.

use tally_flow::audit::{AuditRecord, AuditStatus};
use tally_flow::error::{Error, Result};
use tally_flow::orchestrator::{RunOutcome, SkipReason};

use crate::Harness;

/// Asserts the run was skipped for `reason`.
///
/// # Panics
///
/// Panics if the run did not skip for `reason`.
pub fn assert_skipped(result: &Result<RunOutcome>, reason: SkipReason) {
    match result {
        Ok(RunOutcome::Skipped(actual)) => assert_eq!(*actual, reason, "wrong skip reason"),
        other => panic!("expected skip ({reason}), got {other:?}"),
    }
}

/// Asserts the run completed with the given count and retry number.
///
/// # Panics
///
/// Panics if the run did not complete as expected.
pub fn assert_completed(result: &Result<RunOutcome>, source_count: u64, retry_number: u32) {
    match result {
        Ok(RunOutcome::Completed {
            source_count: actual_count,
            retry_number: actual_retry,
        }) => {
            assert_eq!(*actual_count, source_count, "wrong reconciled count");
            assert_eq!(*actual_retry, retry_number, "wrong retry number");
        }
        other => panic!("expected completion, got {other:?}"),
    }
}

/// Asserts the run ended in a terminal reconciliation failure.
///
/// # Panics
///
/// Panics if the error is not [`Error::ReconciliationFailed`] with the given retry number.
pub fn assert_terminal_failure(result: &Result<RunOutcome>, retry_number: u32) {
    match result {
        Err(Error::ReconciliationFailed {
            status,
            retry_number: actual,
            ..
        }) => {
            assert_eq!(*status, AuditStatus::Failed, "terminal status");
            assert_eq!(*actual, retry_number, "wrong retry number");
        }
        other => panic!("expected terminal failure, got {other:?}"),
    }
}

/// Asserts an audit row's status and retry number.
///
/// # Panics
///
/// Panics on mismatch.
pub fn assert_audit(record: &AuditRecord, status: AuditStatus, retry_number: u32) {
    assert_eq!(record.status, status, "audit status for {}", record.key);
    assert_eq!(
        record.retry_number, retry_number,
        "audit retry_number for {}",
        record.key
    );
}

/// Asserts the harness made no runner, warehouse or object store calls.
///
/// # Panics
///
/// Panics if any collaborator was called.
pub fn assert_no_collaborator_calls(harness: &Harness) {
    assert_eq!(
        harness.collaborator_calls(),
        0,
        "runner: {:?}\nwarehouse: {:?}\nobjects: {:?}",
        harness.runner.calls(),
        harness.warehouse.operations(),
        harness.objects.operations()
    );
}
