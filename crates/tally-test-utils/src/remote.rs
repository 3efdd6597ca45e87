//! Scripted remote job runner.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;

use tally_core::ObjectStore;
use tally_flow::error::{Error, Result};
use tally_flow::remote::{JobKind, JobRequest, RemoteJobRunner};

/// Remote job runner returning scripted results.
///
/// Count results are consumed in order; once the script runs out the default
/// count (if any) is returned. A successful parse/upload writes a small staged
/// file to the attached object store.
#[derive(Clone, Default)]
pub struct ScriptedRunner {
    counts: Arc<Mutex<VecDeque<std::result::Result<u64, String>>>>,
    default_count: Arc<Mutex<Option<u64>>>,
    parses: Arc<Mutex<VecDeque<std::result::Result<(), String>>>>,
    calls: Arc<Mutex<Vec<JobRequest>>>,
    object_store: Option<Arc<dyn ObjectStore>>,
}

impl std::fmt::Debug for ScriptedRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedRunner")
            .field("calls", &self.calls.lock().expect("lock").len())
            .field("uploads", &self.object_store.is_some())
            .finish_non_exhaustive()
    }
}

impl ScriptedRunner {
    /// Creates a runner with an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Uploads staged files to `store` on parse/upload success.
    #[must_use]
    pub fn with_object_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.object_store = Some(store);
        self
    }

    /// Queues a successful count.
    pub fn push_count(&self, count: u64) {
        self.counts.lock().expect("lock").push_back(Ok(count));
    }

    /// Queues a failing count job.
    pub fn push_count_failure(&self, message: impl Into<String>) {
        self.counts.lock().expect("lock").push_back(Err(message.into()));
    }

    /// Sets the count returned once the script is exhausted.
    pub fn set_default_count(&self, count: u64) {
        *self.default_count.lock().expect("lock") = Some(count);
    }

    /// Queues a failing parse/upload job. Unscripted parse jobs succeed.
    pub fn push_parse_failure(&self, message: impl Into<String>) {
        self.parses.lock().expect("lock").push_back(Err(message.into()));
    }

    /// Returns every request received, in order.
    pub fn calls(&self) -> Vec<JobRequest> {
        self.calls.lock().expect("lock").clone()
    }

    /// Returns the number of requests of `kind`.
    pub fn calls_of(&self, kind: JobKind) -> usize {
        self.calls
            .lock()
            .expect("lock")
            .iter()
            .filter(|r| r.kind == kind)
            .count()
    }

    fn record(&self, request: &JobRequest) {
        self.calls.lock().expect("lock").push(request.clone());
    }
}

#[async_trait]
impl RemoteJobRunner for ScriptedRunner {
    async fn run_count(&self, request: &JobRequest) -> Result<u64> {
        self.record(request);
        let scripted = self.counts.lock().expect("lock").pop_front();
        match scripted {
            Some(Ok(count)) => Ok(count),
            Some(Err(message)) => Err(Error::remote_job(JobKind::Count, message)),
            None => (*self.default_count.lock().expect("lock"))
                .ok_or_else(|| Error::remote_job(JobKind::Count, "no scripted count")),
        }
    }

    async fn run_parse_and_upload(&self, request: &JobRequest) -> Result<()> {
        self.record(request);
        let scripted = self.parses.lock().expect("lock").pop_front();
        if let Some(Err(message)) = scripted {
            return Err(Error::remote_job(JobKind::ParseAndUpload, message));
        }
        if let Some(store) = &self.object_store {
            let payload = Bytes::from(request.to_payload()?);
            store
                .put(&request.staged_object, payload)
                .await
                .map_err(|e| Error::remote_job(JobKind::ParseAndUpload, e.to_string()))?;
        }
        Ok(())
    }
}
