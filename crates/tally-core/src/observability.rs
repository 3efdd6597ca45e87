//! Observability infrastructure for tally.
//!
//! Structured logging with consistent spans. This module provides the
//! subscriber initialization and the span constructors used by the
//! reconciliation engine.

use std::sync::Once;
use tracing::Span;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

impl LogFormat {
    /// Parses a format name; anything other than `json` selects pretty output.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        if name.eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Pretty
        }
    }
}

/// Initializes the logging subsystem.
///
/// Call once at application startup. Safe to call multiple times;
/// subsequent calls are no-ops.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Controls log levels (e.g., `info`, `tally_flow=debug`)
///
/// # Example
///
/// ```rust
/// use tally_core::observability::{init_logging, LogFormat};
///
/// init_logging(LogFormat::Pretty);
/// ```
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        // A host application may already own the global subscriber.
        let _ = match format {
            LogFormat::Json => tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json())
                .try_init(),
            LogFormat::Pretty => tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().pretty())
                .try_init(),
        };
    });
}

/// Creates the span one reconciliation run executes in.
///
/// # Example
///
/// ```rust
/// use tally_core::observability::reconciliation_span;
///
/// let span = reconciliation_span("01J0000000000000000000000", "lsf", "usergroups", "2025-06-09");
/// let _guard = span.enter();
/// ```
#[must_use]
pub fn reconciliation_span(run_id: &str, pipeline: &str, index: &str, window_date: &str) -> Span {
    tracing::info_span!(
        "reconciliation",
        run_id = run_id,
        pipeline = pipeline,
        index = index,
        window = window_date,
    )
}

/// Creates a span for one attempt within a reconciliation run.
#[must_use]
pub fn attempt_span(attempt: u32, max_attempts: u32) -> Span {
    tracing::info_span!("attempt", attempt = attempt, max_attempts = max_attempts)
}
