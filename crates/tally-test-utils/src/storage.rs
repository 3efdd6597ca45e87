//! Object store with operation tracing.
//!
//! Wraps [`MemoryObjectStore`] and records every call for test assertions.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;

use tally_core::error::{Error, Result};
use tally_core::{MemoryObjectStore, ObjectLocation, ObjectMeta, ObjectStore};

/// Record of an object store operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectOp {
    /// Put operation.
    Put {
        /// Object written.
        location: ObjectLocation,
        /// Bytes written.
        size: usize,
    },
    /// Head operation.
    Head {
        /// Object checked.
        location: ObjectLocation,
    },
    /// Delete operation.
    Delete {
        /// Object deleted.
        location: ObjectLocation,
    },
    /// List operation.
    List {
        /// Bucket listed.
        bucket: String,
        /// Prefix listed.
        prefix: String,
    },
}

/// In-memory object store that records operations and can inject failures.
#[derive(Debug, Clone, Default)]
pub struct TracingObjectStore {
    inner: MemoryObjectStore,
    operations: Arc<Mutex<Vec<ObjectOp>>>,
    fail_keys: Arc<Mutex<Vec<String>>>,
    fail_delete_keys: Arc<Mutex<Vec<String>>>,
}

impl TracingObjectStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all recorded operations.
    pub fn operations(&self) -> Vec<ObjectOp> {
        self.operations.lock().expect("lock").clone()
    }

    /// Returns the locations passed to `delete`, in order.
    pub fn deletes(&self) -> Vec<ObjectLocation> {
        self.operations()
            .into_iter()
            .filter_map(|op| match op {
                ObjectOp::Delete { location } => Some(location),
                _ => None,
            })
            .collect()
    }

    /// Returns true if an object exists at `location`.
    pub fn contains(&self, location: &ObjectLocation) -> bool {
        self.inner.get(location).is_ok()
    }

    /// Makes every operation on keys starting with `prefix` fail.
    pub fn inject_failure(&self, prefix: impl Into<String>) {
        self.fail_keys.lock().expect("lock").push(prefix.into());
    }

    /// Makes deletes of keys starting with `prefix` fail; other operations succeed.
    pub fn inject_delete_failure(&self, prefix: impl Into<String>) {
        self.fail_delete_keys.lock().expect("lock").push(prefix.into());
    }

    /// Clears all injected failures.
    pub fn clear_failures(&self) {
        self.fail_keys.lock().expect("lock").clear();
        self.fail_delete_keys.lock().expect("lock").clear();
    }

    fn record(&self, op: ObjectOp) {
        self.operations.lock().expect("lock").push(op);
    }

    fn check_failure(&self, key: &str) -> Result<()> {
        let fail_keys = self.fail_keys.lock().expect("lock");
        if fail_keys.iter().any(|p| key.starts_with(p)) {
            return Err(Error::storage(format!("injected failure for key: {key}")));
        }
        Ok(())
    }

    fn check_delete_failure(&self, key: &str) -> Result<()> {
        self.check_failure(key)?;
        let fail_keys = self.fail_delete_keys.lock().expect("lock");
        if fail_keys.iter().any(|p| key.starts_with(p)) {
            return Err(Error::storage(format!("injected delete failure for key: {key}")));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for TracingObjectStore {
    async fn put(&self, location: &ObjectLocation, data: Bytes) -> Result<ObjectMeta> {
        self.record(ObjectOp::Put {
            location: location.clone(),
            size: data.len(),
        });
        self.check_failure(&location.key)?;
        self.inner.put(location, data).await
    }

    async fn head(&self, location: &ObjectLocation) -> Result<Option<ObjectMeta>> {
        self.record(ObjectOp::Head {
            location: location.clone(),
        });
        self.check_failure(&location.key)?;
        self.inner.head(location).await
    }

    async fn delete(&self, location: &ObjectLocation) -> Result<()> {
        self.record(ObjectOp::Delete {
            location: location.clone(),
        });
        self.check_delete_failure(&location.key)?;
        self.inner.delete(location).await
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectMeta>> {
        self.record(ObjectOp::List {
            bucket: bucket.to_string(),
            prefix: prefix.to_string(),
        });
        self.check_failure(prefix)?;
        self.inner.list(bucket, prefix).await
    }
}
