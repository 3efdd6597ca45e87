//! Virtual clock.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};

use tally_core::Clock;

/// Clock whose time only moves when told to or when something sleeps.
///
/// `sleep` returns immediately after advancing time by the requested
/// duration and recording it, so multi-hour back-offs run instantly.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
    pauses: Arc<Mutex<Vec<Duration>>>,
}

impl ManualClock {
    /// Creates a clock reading `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
            pauses: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Moves time forward without recording a pause.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().expect("lock");
        *now += TimeDelta::from_std(by).expect("duration in range");
    }

    /// Sets the current time.
    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().expect("lock") = to;
    }

    /// Returns every pause taken, in order.
    pub fn pauses(&self) -> Vec<Duration> {
        self.pauses.lock().expect("lock").clone()
    }

    /// Returns every pause taken, in whole seconds.
    pub fn pause_secs(&self) -> Vec<u64> {
        self.pauses().iter().map(Duration::as_secs).collect()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("lock")
    }

    async fn sleep(&self, duration: Duration) {
        self.pauses.lock().expect("lock").push(duration);
        self.advance(duration);
        tokio::task::yield_now().await;
    }
}
