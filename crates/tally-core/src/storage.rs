//! Object storage abstraction for staged data files.
//!
//! The staged file produced by the parse/upload job lives in a bucket-addressed
//! object store (S3, GCS, local). The reconciliation engine only ever deletes
//! staged objects by exact key during cleanup; writes and listings exist for
//! the jobs and for verification.
//!
//! ## Semantics
//!
//! - Objects are addressed by [`ObjectLocation`] (bucket + key).
//! - `put` overwrites unconditionally and bumps the object version.
//! - `delete` is idempotent: deleting a missing object succeeds.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Address of an object: bucket plus key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectLocation {
    /// Bucket (or container) name.
    pub bucket: String,
    /// Object key within the bucket.
    pub key: String,
}

impl ObjectLocation {
    /// Creates a location from a bucket and key.
    #[must_use]
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// Metadata about a stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    /// Where the object lives.
    pub location: ObjectLocation,
    /// Object size in bytes.
    pub size: u64,
    /// Monotonic version, bumped on every overwrite.
    pub version: u64,
    /// Last modification timestamp.
    pub last_modified: DateTime<Utc>,
}

/// Object storage contract.
///
/// All storage backends (S3, GCS, memory) implement this trait.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Writes an object, replacing any previous content.
    async fn put(&self, location: &ObjectLocation, data: Bytes) -> Result<ObjectMeta>;

    /// Gets object metadata without reading content.
    ///
    /// Returns `None` if the object doesn't exist.
    async fn head(&self, location: &ObjectLocation) -> Result<Option<ObjectMeta>>;

    /// Deletes an object.
    ///
    /// Succeeds even if the object doesn't exist (idempotent).
    async fn delete(&self, location: &ObjectLocation) -> Result<()>;

    /// Lists objects in `bucket` whose key starts with `prefix`.
    ///
    /// Results are sorted by key.
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectMeta>>;
}

/// In-memory object store for tests and local runs.
///
/// Thread-safe via `RwLock`. Not suitable for production.
#[derive(Debug, Default, Clone)]
pub struct MemoryObjectStore {
    objects: Arc<RwLock<HashMap<ObjectLocation, StoredObject>>>,
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    version: u64,
    last_modified: DateTime<Utc>,
}

impl StoredObject {
    fn meta(&self, location: &ObjectLocation) -> ObjectMeta {
        ObjectMeta {
            location: location.clone(),
            size: self.data.len() as u64,
            version: self.version,
            last_modified: self.last_modified,
        }
    }
}

fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::Internal {
        message: "lock poisoned".into(),
    }
}

impl MemoryObjectStore {
    /// Creates a new empty memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the content of an object.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the object doesn't exist.
    pub fn get(&self, location: &ObjectLocation) -> Result<Bytes> {
        let objects = self.objects.read().map_err(poison_err)?;
        objects
            .get(location)
            .map(|o| o.data.clone())
            .ok_or_else(|| Error::NotFound(format!("object not found: {location}")))
    }

    /// Returns the number of stored objects.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn len(&self) -> Result<usize> {
        Ok(self.objects.read().map_err(poison_err)?.len())
    }

    /// Returns true if no objects are stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, location: &ObjectLocation, data: Bytes) -> Result<ObjectMeta> {
        let mut objects = self.objects.write().map_err(poison_err)?;

        let version = objects.get(location).map_or(1, |o| o.version + 1);
        let stored = StoredObject {
            data,
            version,
            last_modified: Utc::now(),
        };
        let meta = stored.meta(location);
        objects.insert(location.clone(), stored);
        drop(objects);

        Ok(meta)
    }

    async fn head(&self, location: &ObjectLocation) -> Result<Option<ObjectMeta>> {
        let objects = self.objects.read().map_err(poison_err)?;
        Ok(objects.get(location).map(|o| o.meta(location)))
    }

    async fn delete(&self, location: &ObjectLocation) -> Result<()> {
        self.objects.write().map_err(poison_err)?.remove(location);
        Ok(())
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectMeta>> {
        let objects = self.objects.read().map_err(poison_err)?;

        let mut listed: Vec<ObjectMeta> = objects
            .iter()
            .filter(|(loc, _)| loc.bucket == bucket && loc.key.starts_with(prefix))
            .map(|(loc, obj)| obj.meta(loc))
            .collect();
        drop(objects);

        listed.sort_by(|a, b| a.location.key.cmp(&b.location.key));
        Ok(listed)
    }
}
