//! Tests for window-scoped cleanup.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use bytes::Bytes;
use chrono::NaiveDate;

use tally_core::{ObjectLocation, ObjectStore, WindowCalculator};
use tally_flow::cleanup::CleanupCoordinator;
use tally_flow::error::Error;
use tally_flow::staging::StagedWindow;
use tally_test_utils::{ScriptedWarehouse, TracingObjectStore, test_window};

fn staged() -> StagedWindow {
    StagedWindow::new("raw-landing", "lsf/usergroups", "usergroups", &test_window()).unwrap()
}

fn coordinator(objects: &TracingObjectStore, warehouse: &ScriptedWarehouse) -> CleanupCoordinator {
    CleanupCoordinator::new(Arc::new(objects.clone()), Arc::new(warehouse.clone()))
}

#[tokio::test]
async fn removes_only_the_windows_object() {
    let objects = TracingObjectStore::new();
    let warehouse = ScriptedWarehouse::new();
    let staged = staged();

    let next_day = WindowCalculator::new("UTC")
        .unwrap()
        .window_for_date(NaiveDate::from_ymd_opt(2025, 6, 10).unwrap())
        .unwrap();
    let neighbour = StagedWindow::new("raw-landing", "lsf/usergroups", "usergroups", &next_day).unwrap();
    let other_index = ObjectLocation::new("raw-landing", "lsf/usergroups/2025-06-09/00-00/jobs_2025-06-09T00-00-00.json");

    for location in [staged.object(), neighbour.object(), &other_index] {
        objects.put(location, Bytes::from_static(b"{}")).await.unwrap();
    }

    let report = coordinator(&objects, &warehouse).cleanup(&staged).await.unwrap();

    assert_eq!(report.rows_deleted, 0);
    assert!(!objects.contains(staged.object()));
    assert!(objects.contains(neighbour.object()));
    assert!(objects.contains(&other_index));
    assert_eq!(warehouse.deletes(), vec![staged.filename_pattern().clone()]);
}

#[tokio::test]
async fn missing_object_is_not_a_failure() {
    let objects = TracingObjectStore::new();
    let warehouse = ScriptedWarehouse::new();

    assert!(coordinator(&objects, &warehouse).cleanup(&staged()).await.is_ok());
}

#[tokio::test]
async fn object_failure_still_deletes_rows() {
    let objects = TracingObjectStore::new();
    let warehouse = ScriptedWarehouse::new();
    let staged = staged();
    objects.inject_failure(staged.object().key.clone());

    let err = coordinator(&objects, &warehouse).cleanup(&staged).await.unwrap_err();

    let Error::CleanupPartialFailure { failures } = &err else {
        panic!("expected partial failure, got {err:?}");
    };
    assert_eq!(failures.len(), 1);
    assert!(failures[0].starts_with("object "));
    assert_eq!(warehouse.deletes().len(), 1);
    assert!(err.is_retryable());
}

#[tokio::test]
async fn both_failures_are_reported() {
    let objects = TracingObjectStore::new();
    let warehouse = ScriptedWarehouse::new();
    let staged = staged();
    objects.inject_failure(staged.object().key.clone());
    warehouse.fail_deletes("warehouse offline");

    let err = coordinator(&objects, &warehouse).cleanup(&staged).await.unwrap_err();

    let Error::CleanupPartialFailure { failures } = err else {
        panic!("expected partial failure");
    };
    assert_eq!(failures.len(), 2);
    assert!(failures[1].contains("warehouse offline"));
    assert_eq!(objects.deletes(), vec![staged.object().clone()]);
}

#[tokio::test]
async fn index_with_extended_name_is_left_alone() {
    let objects = TracingObjectStore::new();
    let warehouse = ScriptedWarehouse::new();
    let window = test_window();
    let staged = StagedWindow::new("raw-landing", "", "usergroup", &window).unwrap();
    let sibling = StagedWindow::new("raw-landing", "", "usergroup_simple", &window).unwrap();

    for location in [staged.object(), sibling.object()] {
        objects.put(location, Bytes::from_static(b"{}")).await.unwrap();
    }

    coordinator(&objects, &warehouse).cleanup(&staged).await.unwrap();

    assert!(!objects.contains(staged.object()));
    assert!(objects.contains(sibling.object()));
    let deleted = warehouse.deletes();
    assert_eq!(deleted.len(), 1);
    assert!(!deleted[0].matches(&sibling.object().key));
    assert_eq!(deleted[0].like_pattern(), r"2025-06-09/00-00/usergroup\_2025-06-09T00-00-00%");
}
