//! Shared test utilities for tally integration tests.
//!
//! This crate provides:
//! - [`ManualClock`]: virtual time that records every pause
//! - [`ScriptedRunner`] and [`ScriptedWarehouse`]: collaborator fakes with
//!   scripted results and recorded calls
//! - [`TracingObjectStore`]: in-memory object store with operation recording
//! - [`FlakyAuditStore`]: in-memory audit store with failure injection
//! - [`Harness`]: an orchestrator wired to all of the above
//! - Custom assertion helpers
//!
//! # Example
//!
//! ```rust,ignore
//! use tally_test_utils::{Harness, pipeline_config};
//!
//! #[tokio::test]
//! async fn reconciles() {
//!     let harness = Harness::new(pipeline_config());
//!     harness.runner.push_count(100);
//!     harness.warehouse.push_count(100);
//!     assert!(harness.run().await.unwrap().is_completed());
//! }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![allow(clippy::must_use_candidate)]
// Test utilities use expect/unwrap for cleaner test code - panics are acceptable in tests
#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::missing_panics_doc)]

pub mod assertions;
pub mod audit;
pub mod clock;
pub mod fixtures;
pub mod remote;
pub mod storage;
pub mod warehouse;

pub use assertions::*;
pub use audit::*;
pub use clock::*;
pub use fixtures::*;
pub use remote::*;
pub use storage::*;
pub use warehouse::*;

/// Initialize test logging (call once per test module).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("tally_flow=debug".parse().expect("valid directive")),
        )
        .with_test_writer()
        .try_init();
}
