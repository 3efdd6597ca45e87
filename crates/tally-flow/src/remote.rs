//! Remote job runner contract.
//!
//! Counting and parse/upload jobs run on a remote compute fleet. How a job is
//! physically dispatched (SSH, a Kubernetes job, a queue) is the runner's
//! concern; the engine hands it a [`JobRequest`] and expects either a count or
//! a success signal back. Step-level timeouts and transport retries also belong
//! to the runner.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use tally_core::{ObjectLocation, Window};

use crate::error::{Error, Result};

/// The two jobs the engine runs remotely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Counts the source records for the window.
    Count,
    /// Parses the source records and uploads the staged file.
    ParseAndUpload,
}

impl JobKind {
    /// Returns the job name used in logs and payloads.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::ParseAndUpload => "parse_and_upload",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Script locations for one remote job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobScript {
    /// Path of the script on the dispatching host.
    pub local_path: String,
    /// Path the script is copied to on the remote host.
    pub remote_path: String,
    /// Path the serialized request is written to on the remote host.
    pub remote_config_path: String,
}

/// Everything a remote job needs to process one window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    /// Which job to run.
    pub kind: JobKind,
    /// Pipeline name.
    pub pipeline_name: String,
    /// Index name.
    pub index_name: String,
    /// Window the job processes.
    pub window: Window,
    /// One-based attempt number.
    pub attempt: u32,
    /// Connection identity used to reach the fleet.
    pub connection_id: String,
    /// Working directory on the remote host.
    pub remote_working_dir: String,
    /// Script locations.
    pub script: JobScript,
    /// Where the parse/upload job places the staged file.
    pub staged_object: ObjectLocation,
    /// Free-form settings forwarded unchanged.
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,
}

impl JobRequest {
    /// Serializes the request into the JSON document shipped to the remote host.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RemoteJob`] if a parameter value cannot be serialized.
    pub fn to_payload(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| Error::remote_job(self.kind, format!("failed to encode job payload: {e}")))
    }
}

/// Runs the counting and parse/upload jobs on the remote fleet.
///
/// Failures must surface as [`Error::RemoteJob`] so the orchestrator treats
/// them as retryable.
#[async_trait]
pub trait RemoteJobRunner: Send + Sync {
    /// Runs the counting job and returns the number of source records.
    async fn run_count(&self, request: &JobRequest) -> Result<u64>;

    /// Runs the parse/upload job, which places the staged file at
    /// `request.staged_object`.
    async fn run_parse_and_upload(&self, request: &JobRequest) -> Result<()>;
}
