//! Volume-scaled pauses.
//!
//! Both the pre-ingestion wait and the inter-retry back-off grow with the number
//! of records in flight. A pause is calibrated for `threshold_count` records; at
//! or below that volume the base wait applies unchanged, above it the wait grows
//! linearly with the excess ratio:
//!
//! ```text
//! excess = (count - threshold) / threshold
//! wait   = ceil(base * (1 + slope * excess))
//! ```
//!
//! The result is never below `base_wait_secs`.

use std::time::Duration;

use crate::error::{Error, Result};

/// A validated pause calculator.
///
/// ## Example
///
/// ```rust
/// use tally_core::backoff::ScaledPause;
///
/// let pause = ScaledPause::new(1_000, 60, 0.5).unwrap();
/// assert_eq!(pause.wait_secs(800), 60);
/// assert_eq!(pause.wait_secs(1_500), 75);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaledPause {
    threshold_count: u64,
    base_wait_secs: u64,
    slope: f64,
}

impl ScaledPause {
    /// Creates a calculator for the given reference volume, base wait and slope.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `threshold_count` is zero or `slope`
    /// is not a finite number.
    pub fn new(threshold_count: u64, base_wait_secs: u64, slope: f64) -> Result<Self> {
        if threshold_count == 0 {
            return Err(Error::invalid_argument(
                "threshold_count must be greater than 0",
            ));
        }
        if !slope.is_finite() {
            return Err(Error::invalid_argument(format!(
                "slope must be a finite number, got {slope}"
            )));
        }
        Ok(Self {
            threshold_count,
            base_wait_secs,
            slope,
        })
    }

    /// Reference record count the base wait is calibrated for.
    #[must_use]
    pub const fn threshold_count(&self) -> u64 {
        self.threshold_count
    }

    /// Wait applied at or below the reference volume.
    #[must_use]
    pub const fn base_wait_secs(&self) -> u64 {
        self.base_wait_secs
    }

    /// Scaling factor applied to the excess ratio.
    #[must_use]
    pub const fn slope(&self) -> f64 {
        self.slope
    }

    /// Returns the pause, in whole seconds, for `count` records.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn wait_secs(&self, count: u64) -> u64 {
        if count <= self.threshold_count {
            return self.base_wait_secs;
        }

        let base = self.base_wait_secs as f64;
        let excess_ratio = (count - self.threshold_count) as f64 / self.threshold_count as f64;
        let scaled = (base + base * self.slope * excess_ratio).ceil();

        // Float-to-int casts saturate, so huge volumes clamp to u64::MAX.
        (scaled as u64).max(self.base_wait_secs)
    }

    /// Returns the pause for `count` records as a [`Duration`].
    #[must_use]
    pub fn wait(&self, count: u64) -> Duration {
        Duration::from_secs(self.wait_secs(count))
    }
}

/// Computes a scaled pause in one call.
///
/// # Errors
///
/// Returns [`Error::InvalidArgument`] if `threshold_count` is zero or `slope`
/// is not finite.
pub fn scaled_pause(count: u64, threshold_count: u64, base_wait_secs: u64, slope: f64) -> Result<u64> {
    Ok(ScaledPause::new(threshold_count, base_wait_secs, slope)?.wait_secs(count))
}
