//! Fixtures and a fully wired test harness.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, TimeDelta, Utc};

use tally_core::{Window, WindowCalculator};
use tally_flow::audit::{AuditKey, AuditRecord, AuditStatus};
use tally_flow::config::{PipelineConfig, RemoteJobConfig, StagingConfig, WarehouseConfig};
use tally_flow::error::Result;
use tally_flow::orchestrator::{Collaborators, ReconciliationOrchestrator, RunOutcome};
use tally_flow::remote::JobScript;
use tally_flow::staging::StagedWindow;

use crate::{FlakyAuditStore, ManualClock, ScriptedRunner, ScriptedWarehouse, TracingObjectStore};

/// Date of the default test window.
pub fn test_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 6, 9).expect("valid date")
}

/// The UTC window for [`test_date`].
pub fn test_window() -> Window {
    WindowCalculator::new("UTC")
        .expect("utc")
        .window_for_date(test_date())
        .expect("window")
}

/// Noon inside `window`.
pub fn midday(window: &Window) -> DateTime<Utc> {
    window.start().with_timezone(&Utc) + TimeDelta::hours(12)
}

/// A valid pipeline config: 3 attempts, 30s base wait, threshold 1000, slope 1.0, UTC.
pub fn pipeline_config() -> PipelineConfig {
    PipelineConfig {
        pipeline_name: "lsf".into(),
        index_name: "usergroups".into(),
        timezone: "UTC".into(),
        max_retry_attempts: 3,
        base_wait_secs: 30,
        avg_record_count_threshold: 1000,
        pause_scaling_slope: 1.0,
        retry_pause_base_secs: None,
        remote: RemoteJobConfig {
            connection_id: "k8_ssh".into(),
            remote_working_dir: "/tmp/tally".into(),
            count_script: JobScript {
                local_path: "scripts/count.py".into(),
                remote_path: "/tmp/tally/count.py".into(),
                remote_config_path: "/tmp/tally/count.json".into(),
            },
            parser_script: JobScript {
                local_path: "scripts/parse.py".into(),
                remote_path: "/tmp/tally/parse.py".into(),
                remote_config_path: "/tmp/tally/parse.json".into(),
            },
        },
        staging: StagingConfig {
            bucket: "raw-landing".into(),
            prefix_base: "lsf/usergroups".into(),
        },
        warehouse: WarehouseConfig {
            database: "RAW".into(),
            schema: "LSF".into(),
            raw_table: "USERGROUPS_RAW".into(),
            task_name: "LOAD_USERGROUPS".into(),
        },
        job_parameters: BTreeMap::new(),
    }
}

/// An orchestrator wired to scripted collaborators and a virtual clock.
///
/// The clock starts at noon of [`test_window`].
#[derive(Debug)]
pub struct Harness {
    /// Virtual clock.
    pub clock: ManualClock,
    /// Scripted remote runner; uploads into `objects`.
    pub runner: ScriptedRunner,
    /// Scripted warehouse.
    pub warehouse: ScriptedWarehouse,
    /// Object store recording operations.
    pub objects: TracingObjectStore,
    /// Audit store with failure injection.
    pub audit: FlakyAuditStore,
    /// Window the harness reconciles.
    pub window: Window,
    /// Orchestrator under test.
    pub orchestrator: ReconciliationOrchestrator,
}

impl Harness {
    /// Builds a harness for `config` over [`test_window`].
    pub fn new(config: PipelineConfig) -> Self {
        let window = test_window();
        let clock = ManualClock::new(midday(&window));
        let objects = TracingObjectStore::new();
        let runner = ScriptedRunner::new().with_object_store(Arc::new(objects.clone()));
        let warehouse = ScriptedWarehouse::new();
        let audit = FlakyAuditStore::new(Arc::new(clock.clone()));

        let orchestrator = ReconciliationOrchestrator::new(
            config,
            Collaborators {
                runner: Arc::new(runner.clone()),
                warehouse: Arc::new(warehouse.clone()),
                object_store: Arc::new(objects.clone()),
                audit: Arc::new(audit.clone()),
                clock: Arc::new(clock.clone()),
            },
        )
        .expect("valid harness config");

        Self {
            clock,
            runner,
            warehouse,
            objects,
            audit,
            window,
            orchestrator,
        }
    }

    /// Runs the orchestrator over the harness window.
    pub async fn run(&self) -> Result<RunOutcome> {
        self.orchestrator.run_window(self.window).await
    }

    /// Audit key of the harness window.
    pub fn key(&self) -> AuditKey {
        let config = self.orchestrator.config();
        AuditKey::new(&config.pipeline_name, &config.index_name, &self.window)
    }

    /// Staged names of the harness window.
    pub fn staged(&self) -> StagedWindow {
        self.orchestrator
            .config()
            .staged_window(&self.window)
            .expect("staged window")
    }

    /// Seeds the audit row for the harness window.
    pub fn seed_status(&self, status: AuditStatus) {
        let mut record = AuditRecord::new(self.key(), status);
        if status == AuditStatus::Completed {
            record = record.with_source_count(10).with_target_count(10);
        }
        record.last_updated_ts = self.window.start().with_timezone(&Utc);
        self.audit.seed(record);
    }

    /// Latest audit row for the harness window.
    pub fn audit_row(&self) -> AuditRecord {
        self.audit.latest(&self.key()).expect("audit row exists")
    }

    /// Total calls made to the runner, warehouse and object store.
    pub fn collaborator_calls(&self) -> usize {
        self.runner.calls().len() + self.warehouse.operations().len() + self.objects.operations().len()
    }
}
