//! Results, reports, and the aggregation fold
//!
//! The aggregator rebuilds the report tree from the flat result set plus the
//! original tree shape; context id is the join key and spec declaration order
//! is the output order, regardless of completion order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SpecError;
use crate::tree::{ContextId, SpecId, SuiteTree};

/// Final status of one spec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Passed,
    Failed,
    Pending,
    Skipped,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Passed => write!(f, "passed"),
            Status::Failed => write!(f, "failed"),
            Status::Pending => write!(f, "pending"),
            Status::Skipped => write!(f, "skipped"),
        }
    }
}

/// Why a spec was skipped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkipReason {
    /// The spec carries the skipped flag
    Explicit,
    /// Rejected by the filter configuration
    Filtered,
    /// Another spec is focused and this one is not
    Unfocused,
    /// Bail-on-first-failure stopped the run before this spec started
    Bailed,
    /// Run-level cancellation stopped the run before this spec started
    Cancelled,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Explicit => "explicit",
            SkipReason::Filtered => "filtered",
            SkipReason::Unfocused => "unfocused",
            SkipReason::Bailed => "bailed",
            SkipReason::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serializable failure detail attached to failed results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub message: String,
    /// One of "failure", "panic", "timeout", "hook"
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backtrace: Option<String>,
}

impl From<&SpecError> for ErrorDetail {
    fn from(error: &SpecError) -> Self {
        Self {
            message: error.to_string(),
            kind: error.classification().to_string(),
            backtrace: error.backtrace().map(str::to_string),
        }
    }
}

/// Finalized outcome of one spec
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecResult {
    pub description: String,
    /// Context descriptions root→leaf
    pub path: Vec<String>,
    pub status: Status,
    #[serde(rename = "durationMs")]
    pub duration_ms: u64,
    /// Number of body invocations (>1 when retried, 0 when never run)
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
    #[serde(rename = "skipReason", skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
    /// Declaration identity, the aggregation join key
    #[serde(skip)]
    pub(crate) spec: SpecId,
}

impl SpecResult {
    /// Spec id this result belongs to
    pub fn spec(&self) -> SpecId {
        self.spec
    }

    /// Full display name: context path plus spec description
    pub fn full_name(&self) -> String {
        let mut parts: Vec<&str> = self.path.iter().map(String::as_str).collect();
        parts.push(&self.description);
        parts.join(" ")
    }
}

/// Report node mirroring one context of the input tree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextReport {
    pub description: String,
    /// Own specs' results, in declaration order
    pub specs: Vec<SpecResult>,
    /// Child context reports, in declaration order
    pub contexts: Vec<ContextReport>,
}

/// Aggregate counts over every result in the report
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub pending: usize,
    pub skipped: usize,
    #[serde(rename = "totalDurationMs")]
    pub total_duration_ms: u64,
}

impl Summary {
    fn record(&mut self, result: &SpecResult) {
        self.total += 1;
        self.total_duration_ms += result.duration_ms;
        match result.status {
            Status::Passed => self.passed += 1,
            Status::Failed => self.failed += 1,
            Status::Pending => self.pending += 1,
            Status::Skipped => self.skipped += 1,
        }
    }
}

/// Complete run report: a tree mirroring the suite, plus summary statistics.
///
/// Immutable once returned; built exactly once per run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    #[serde(rename = "runId")]
    pub run_id: Uuid,
    #[serde(rename = "startedAt")]
    pub started_at: DateTime<Utc>,
    #[serde(rename = "finishedAt")]
    pub finished_at: DateTime<Utc>,
    pub summary: Summary,
    pub root: ContextReport,
}

impl Report {
    /// Whether the run had no failures
    pub fn success(&self) -> bool {
        self.summary.failed == 0
    }

    /// Iterate every spec result in declaration order
    pub fn all_results(&self) -> Vec<&SpecResult> {
        fn walk<'a>(node: &'a ContextReport, out: &mut Vec<&'a SpecResult>) {
            out.extend(node.specs.iter());
            for child in &node.contexts {
                walk(child, out);
            }
        }
        let mut out = Vec::new();
        walk(&self.root, &mut out);
        out
    }
}

/// Rebuild the report tree from the ordered result set and the tree shape.
///
/// `results` must hold exactly one result per spec, indexed by declaration
/// position.
pub(crate) fn assemble(
    tree: &SuiteTree,
    results: Vec<SpecResult>,
    run_id: Uuid,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
) -> Report {
    debug_assert_eq!(results.len(), tree.spec_count());

    let mut summary = Summary::default();
    for result in &results {
        summary.record(result);
    }

    Report {
        run_id,
        started_at,
        finished_at,
        summary,
        root: build_node(tree, tree.root(), &results),
    }
}

fn build_node(tree: &SuiteTree, id: ContextId, results: &[SpecResult]) -> ContextReport {
    let context = tree.context(id);
    ContextReport {
        description: context.description().to_string(),
        specs: context
            .specs()
            .iter()
            .map(|spec| results[spec.index()].clone())
            .collect(),
        contexts: context
            .children()
            .iter()
            .map(|&child| build_node(tree, child, results))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(description: &str, status: Status, idx: usize) -> SpecResult {
        SpecResult {
            description: description.to_string(),
            path: vec!["root".to_string()],
            status,
            duration_ms: 5,
            attempts: 1,
            error: None,
            skip_reason: None,
            spec: SpecId(idx),
        }
    }

    #[test]
    fn test_summary_fold() {
        let mut summary = Summary::default();
        summary.record(&result("a", Status::Passed, 0));
        summary.record(&result("b", Status::Failed, 1));
        summary.record(&result("c", Status::Pending, 2));
        summary.record(&result("d", Status::Skipped, 3));

        assert_eq!(summary.total, 4);
        assert_eq!(summary.passed, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.pending, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.total_duration_ms, 20);
    }

    #[test]
    fn test_stable_serialization_field_names() {
        let report = Report {
            run_id: Uuid::nil(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            summary: Summary::default(),
            root: ContextReport {
                description: "root".to_string(),
                specs: vec![result("a", Status::Passed, 0)],
                contexts: vec![],
            },
        };

        let json = serde_json::to_value(&report).unwrap();
        assert!(json.get("summary").unwrap().get("totalDurationMs").is_some());
        let spec = &json["root"]["specs"][0];
        assert_eq!(spec["status"], "passed");
        assert_eq!(spec["description"], "a");
        assert_eq!(spec["durationMs"], 5);
        assert!(json["root"].get("contexts").is_some());
    }

    #[test]
    fn test_error_detail_from_spec_error() {
        let error = SpecError::Timeout(std::time::Duration::from_millis(100));
        let detail = ErrorDetail::from(&error);
        assert_eq!(detail.kind, "timeout");
        assert!(detail.message.contains("100ms"));
        assert!(detail.backtrace.is_none());
    }
}
