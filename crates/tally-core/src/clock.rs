//! Time source abstraction.
//!
//! The orchestrator reads wall-clock time to decide whether a window is still
//! open and suspends itself for the ingest wait and retry back-off. Both go
//! through [`Clock`] so tests can substitute a virtual clock.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Source of wall-clock time and timed pauses.
///
/// Pauses are not cancellable from inside the process; dropping the future is
/// the only way to abandon one.
#[async_trait]
pub trait Clock: Send + Sync + fmt::Debug {
    /// Returns the current wall-clock time.
    fn now(&self) -> DateTime<Utc>;

    /// Suspends the caller for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Production clock backed by the system time and the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
