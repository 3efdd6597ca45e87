//! # tally-core
//!
//! Shared primitives for the tally count-reconciliation pipeline.
//!
//! This crate provides the building blocks every other tally crate leans on:
//!
//! - **Windows**: Day-long reconciliation windows computed in a configured timezone
//! - **Back-off**: The scaled pause calculation used for ingest waits and retries
//! - **Clock**: Wall-clock time and timed pauses behind a swappable trait
//! - **Object Storage**: The staged-file store contract plus an in-memory backend
//! - **Identifiers**: Sortable run identifiers for log correlation
//! - **Error Types**: Shared error definitions and result types
//!
//! ## Example
//!
//! ```rust
//! use tally_core::prelude::*;
//!
//! # fn main() -> tally_core::Result<()> {
//! let window = WindowCalculator::new("UTC")?.compute()?;
//! let pause = ScaledPause::new(1_000, 30, 1.0)?;
//!
//! assert!(window.start() <= window.end());
//! assert_eq!(pause.wait_secs(2_000), 60);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod backoff;
pub mod clock;
pub mod error;
pub mod id;
pub mod observability;
pub mod storage;
pub mod window;

pub use backoff::{ScaledPause, scaled_pause};
pub use clock::{Clock, SystemClock};
pub use error::{Error, Result};
pub use id::RunId;
pub use storage::{MemoryObjectStore, ObjectLocation, ObjectMeta, ObjectStore};
pub use window::{Window, WindowCalculator, compute_window};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::backoff::{ScaledPause, scaled_pause};
    pub use crate::clock::{Clock, SystemClock};
    pub use crate::error::{Error, Result};
    pub use crate::id::RunId;
    pub use crate::storage::{MemoryObjectStore, ObjectLocation, ObjectMeta, ObjectStore};
    pub use crate::window::{Window, WindowCalculator, compute_window};
}
