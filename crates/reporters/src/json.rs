//! JSON report writer

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use specrun_engine::{Report, SpecResult};
use tracing::{error, info};

use crate::console::Reporter;

/// Writes the final report as pretty-printed JSON.
///
/// Field names are stable for downstream tooling: `description`, `status`,
/// `durationMs`, `contexts`, `specs`, and the `totalDurationMs` summary.
pub struct JsonReporter {
    output_path: PathBuf,
}

impl JsonReporter {
    pub fn new(output_path: impl Into<PathBuf>) -> Self {
        Self {
            output_path: output_path.into(),
        }
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Serialize a report to the configured path, creating parent
    /// directories as needed
    pub fn write(&self, report: &Report) -> anyhow::Result<PathBuf> {
        if let Some(parent) = self.output_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(report)?;
        std::fs::write(&self.output_path, json)?;
        info!("results written to: {}", self.output_path.display());
        Ok(self.output_path.clone())
    }
}

#[async_trait]
impl Reporter for JsonReporter {
    async fn on_spec_finished(&self, _result: &SpecResult) {}

    async fn on_run_finished(&self, report: &Report) {
        if let Err(error) = self.write(report) {
            error!(%error, path = %self.output_path.display(), "failed to write JSON report");
        }
    }
}
