//! Pipeline configuration.
//!
//! A [`PipelineConfig`] is loaded once, validated, and then shared read-only
//! (as `Arc<PipelineConfig>`) by every component. Nothing mutates it after
//! construction.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use tally_core::{ScaledPause, Window, WindowCalculator};

use crate::error::{Error, Result};
use crate::remote::{JobKind, JobRequest, JobScript};
use crate::staging::StagedWindow;
use crate::warehouse::TaskIdentity;

/// Default number of attempts per run.
pub const DEFAULT_MAX_RETRY_ATTEMPTS: u32 = 3;

/// Default timezone used to derive windows.
pub const DEFAULT_TIMEZONE: &str = "UTC";

fn default_max_retry_attempts() -> u32 {
    DEFAULT_MAX_RETRY_ATTEMPTS
}

fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}

/// Remote fleet settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteJobConfig {
    /// Connection identity used to reach the fleet.
    pub connection_id: String,
    /// Working directory on the remote host.
    pub remote_working_dir: String,
    /// Counting job script.
    pub count_script: JobScript,
    /// Parse/upload job script.
    pub parser_script: JobScript,
}

/// Object store settings for the staged file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagingConfig {
    /// Bucket holding staged files.
    pub bucket: String,
    /// Key prefix under which windows are laid out.
    #[serde(default)]
    pub prefix_base: String,
}

/// Warehouse settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarehouseConfig {
    /// Database holding the raw table and the ingestion task.
    pub database: String,
    /// Schema holding the raw table and the ingestion task.
    pub schema: String,
    /// Table the ingestion task loads into.
    pub raw_table: String,
    /// Ingestion task name.
    pub task_name: String,
}

/// Immutable settings for one pipeline/index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name.
    pub pipeline_name: String,
    /// Index (dataset) name.
    pub index_name: String,
    /// IANA timezone the window is computed in.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Attempts per run, including the first.
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    /// Base ingest wait in seconds.
    pub base_wait_secs: u64,
    /// Record count above which waits start to scale.
    pub avg_record_count_threshold: u64,
    /// Extra wait per unit of excess ratio above the threshold.
    pub pause_scaling_slope: f64,
    /// Base inter-retry pause in seconds. Falls back to `base_wait_secs`.
    #[serde(default)]
    pub retry_pause_base_secs: Option<u64>,
    /// Remote fleet settings.
    pub remote: RemoteJobConfig,
    /// Staged file settings.
    pub staging: StagingConfig,
    /// Warehouse settings.
    pub warehouse: WarehouseConfig,
    /// Settings forwarded to the remote jobs unchanged.
    #[serde(default)]
    pub job_parameters: BTreeMap<String, serde_json::Value>,
}

impl PipelineConfig {
    /// Parses and validates a JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the document is malformed or fails
    /// [`PipelineConfig::validate`].
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::configuration(format!("invalid pipeline config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the file cannot be read or is invalid.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            Error::configuration(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_json(&json)
    }

    /// Checks every setting.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] naming the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("pipeline_name", &self.pipeline_name),
            ("index_name", &self.index_name),
            ("remote.connection_id", &self.remote.connection_id),
            ("staging.bucket", &self.staging.bucket),
        ] {
            if value.trim().is_empty() {
                return Err(Error::configuration(format!("{name} must not be empty")));
            }
        }

        if self.max_retry_attempts == 0 {
            return Err(Error::configuration("max_retry_attempts must be at least 1"));
        }
        if self.avg_record_count_threshold == 0 {
            return Err(Error::configuration(
                "avg_record_count_threshold must be greater than zero",
            ));
        }
        if !self.pause_scaling_slope.is_finite() || self.pause_scaling_slope < 0.0 {
            return Err(Error::configuration(format!(
                "pause_scaling_slope must be a non-negative number, got {}",
                self.pause_scaling_slope
            )));
        }

        self.window_calculator()?;
        self.task_identity()?;
        self.raw_table_identity()?;
        Ok(())
    }

    /// Returns the calculator for this pipeline's timezone.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the timezone is unknown.
    pub fn window_calculator(&self) -> Result<WindowCalculator> {
        WindowCalculator::new(&self.timezone).map_err(|e| Error::configuration(e.to_string()))
    }

    /// Returns the pause applied after triggering steps, scaled by the source count.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the threshold is zero or the slope is not finite.
    pub fn ingest_pause(&self) -> Result<ScaledPause> {
        ScaledPause::new(
            self.avg_record_count_threshold,
            self.base_wait_secs,
            self.pause_scaling_slope,
        )
        .map_err(|e| Error::configuration(e.to_string()))
    }

    /// Returns the pause applied between attempts.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the threshold is zero or the slope is not finite.
    pub fn retry_pause(&self) -> Result<ScaledPause> {
        ScaledPause::new(
            self.avg_record_count_threshold,
            self.retry_pause_base_secs.unwrap_or(self.base_wait_secs),
            self.pause_scaling_slope,
        )
        .map_err(|e| Error::configuration(e.to_string()))
    }

    /// Returns the ingestion task identity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if an identifier is invalid.
    pub fn task_identity(&self) -> Result<TaskIdentity> {
        TaskIdentity::new(
            &self.warehouse.database,
            &self.warehouse.schema,
            &self.warehouse.task_name,
        )
    }

    /// Returns the raw table identity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if an identifier is invalid.
    pub fn raw_table_identity(&self) -> Result<TaskIdentity> {
        TaskIdentity::new(
            &self.warehouse.database,
            &self.warehouse.schema,
            &self.warehouse.raw_table,
        )
    }

    /// Returns the staged names for `window`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the bucket or index name is empty.
    pub fn staged_window(&self, window: &Window) -> Result<StagedWindow> {
        StagedWindow::new(
            &self.staging.bucket,
            &self.staging.prefix_base,
            &self.index_name,
            window,
        )
    }

    /// Builds the request for one remote job.
    #[must_use]
    pub fn job_request(
        &self,
        kind: JobKind,
        window: &Window,
        attempt: u32,
        staged: &StagedWindow,
    ) -> JobRequest {
        let script = match kind {
            JobKind::Count => self.remote.count_script.clone(),
            JobKind::ParseAndUpload => self.remote.parser_script.clone(),
        };
        JobRequest {
            kind,
            pipeline_name: self.pipeline_name.clone(),
            index_name: self.index_name.clone(),
            window: *window,
            attempt,
            connection_id: self.remote.connection_id.clone(),
            remote_working_dir: self.remote.remote_working_dir.clone(),
            script,
            staged_object: staged.object().clone(),
            parameters: self.job_parameters.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{
        "pipeline_name": "lsf",
        "index_name": "usergroups",
        "base_wait_secs": 30,
        "avg_record_count_threshold": 1000,
        "pause_scaling_slope": 1.0,
        "remote": {
            "connection_id": "k8_ssh",
            "remote_working_dir": "/tmp/tally",
            "count_script": {
                "local_path": "scripts/count.py",
                "remote_path": "/tmp/tally/count.py",
                "remote_config_path": "/tmp/tally/count.json"
            },
            "parser_script": {
                "local_path": "scripts/parse.py",
                "remote_path": "/tmp/tally/parse.py",
                "remote_config_path": "/tmp/tally/parse.json"
            }
        },
        "staging": { "bucket": "raw", "prefix_base": "lsf/usergroups" },
        "warehouse": {
            "database": "RAW",
            "schema": "LSF",
            "raw_table": "USERGROUPS_RAW",
            "task_name": "LOAD_USERGROUPS"
        }
    }"#;

    fn with(edit: impl FnOnce(&mut serde_json::Value)) -> String {
        let mut value: serde_json::Value = serde_json::from_str(MINIMAL).unwrap();
        edit(&mut value);
        value.to_string()
    }

    #[test]
    fn defaults_apply() {
        let config = PipelineConfig::from_json(MINIMAL).unwrap();
        assert_eq!(config.max_retry_attempts, 3);
        assert_eq!(config.timezone, "UTC");
        assert!(config.job_parameters.is_empty());
        assert_eq!(config.retry_pause().unwrap().base_wait_secs(), 30);
    }

    #[test]
    fn retry_pause_base_overrides() {
        let config =
            PipelineConfig::from_json(&with(|v| v["retry_pause_base_secs"] = 120.into())).unwrap();
        assert_eq!(config.retry_pause().unwrap().base_wait_secs(), 120);
        assert_eq!(config.ingest_pause().unwrap().base_wait_secs(), 30);
    }

    #[test]
    fn rejects_invalid_settings() {
        let cases = [
            with(|v| v["max_retry_attempts"] = 0.into()),
            with(|v| v["avg_record_count_threshold"] = 0.into()),
            with(|v| v["pause_scaling_slope"] = (-1.0).into()),
            with(|v| v["timezone"] = "Mars/Olympus".into()),
            with(|v| v["pipeline_name"] = " ".into()),
            with(|v| v["staging"]["bucket"] = "".into()),
            with(|v| v["warehouse"]["task_name"] = "LOAD; DROP".into()),
        ];
        for json in cases {
            let err = PipelineConfig::from_json(&json).unwrap_err();
            assert!(matches!(err, Error::Configuration { .. }), "{err}");
        }
    }

    #[test]
    fn malformed_json_is_a_configuration_error() {
        let err = PipelineConfig::from_json("{").unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[test]
    fn job_request_uses_matching_script() {
        let config = PipelineConfig::from_json(MINIMAL).unwrap();
        let window = config.window_calculator().unwrap().compute().unwrap();
        let staged = config.staged_window(&window).unwrap();

        let count = config.job_request(JobKind::Count, &window, 1, &staged);
        let parse = config.job_request(JobKind::ParseAndUpload, &window, 2, &staged);

        assert_eq!(count.script.remote_path, "/tmp/tally/count.py");
        assert_eq!(parse.script.remote_path, "/tmp/tally/parse.py");
        assert_eq!(parse.attempt, 2);
        assert_eq!(parse.staged_object, *staged.object());
    }
}
