//! Console reporter: per-spec log lines and a run summary

use async_trait::async_trait;
use specrun_engine::{Report, SpecResult, Status};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Streaming consumer of run events
#[async_trait]
pub trait Reporter: Send + Sync {
    async fn on_spec_finished(&self, result: &SpecResult);
    async fn on_run_finished(&self, report: &Report);
}

/// Logs one line per finished spec and a final summary line
#[derive(Debug, Default)]
pub struct ConsoleReporter;

#[async_trait]
impl Reporter for ConsoleReporter {
    async fn on_spec_finished(&self, result: &SpecResult) {
        match result.status {
            Status::Passed => info!("✓ {} ({} ms)", result.full_name(), result.duration_ms),
            Status::Failed => error!(
                "✗ {} - {}",
                result.full_name(),
                result
                    .error
                    .as_ref()
                    .map(|e| e.message.as_str())
                    .unwrap_or("unknown error")
            ),
            Status::Pending => info!("? {} (pending)", result.full_name()),
            Status::Skipped => info!(
                "- {} (skipped: {})",
                result.full_name(),
                result
                    .skip_reason
                    .map(|r| r.as_str())
                    .unwrap_or("unknown")
            ),
        }
    }

    async fn on_run_finished(&self, report: &Report) {
        let s = &report.summary;
        info!(
            "Results: {} passed, {} failed, {} pending, {} skipped ({} ms)",
            s.passed, s.failed, s.pending, s.skipped, s.total_duration_ms
        );
    }
}

/// Initialize the global tracing subscriber for harness binaries.
///
/// Respects `RUST_LOG`, defaulting to `info`. Safe to call more than once;
/// later calls are no-ops.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .try_init();
}
