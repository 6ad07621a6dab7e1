//! Run orchestration
//!
//! The runner drives one pass over a frozen suite tree:
//! scan (focus flags, execution plan) → execute (sequential or
//! semaphore-bounded parallel) → finalize (after_all escalation,
//! aggregation). Hook ordering itself lives in [`crate::hooks`]; this module
//! decides *when* each spec's sequence starts and collects results in
//! declaration order no matter when they complete.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::RunConfig;
use crate::context::ExecutionContext;
use crate::events::{self, EventReceiver, EventSender, RunEvent};
use crate::hooks::{self, HookEngine};
use crate::middleware::{
    FilterMiddleware, Middleware, Outcome, Pipeline, RetryMiddleware, TimeoutMiddleware,
};
use crate::report::{self, ErrorDetail, Report, SkipReason, SpecResult, Status};
use crate::tree::{ContextId, SpecId, SuiteTree};

/// Lifecycle of one run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    NotStarted,
    Scanning,
    Executing,
    Finalizing,
    Done,
}

fn advance(phase: &mut RunPhase, next: RunPhase) {
    debug!(from = ?phase, to = ?next, "run phase");
    *phase = next;
}

/// Executes suite trees under a [`RunConfig`]
pub struct Runner {
    config: RunConfig,
    /// Custom middleware with an optional insertion position in the
    /// assembled chain; `None` appends innermost
    custom: Vec<(Option<usize>, Arc<dyn Middleware>)>,
    events: Vec<EventSender>,
}

impl Default for Runner {
    fn default() -> Self {
        Self::new(RunConfig::default())
    }
}

impl Runner {
    pub fn new(config: RunConfig) -> Self {
        Self {
            config,
            custom: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Append custom middleware at the innermost position, just outside the
    /// body invocation
    pub fn add_middleware(&mut self, middleware: Arc<dyn Middleware>) -> &mut Self {
        self.custom.push((None, middleware));
        self
    }

    /// Insert custom middleware at `position` in the assembled chain
    /// (0 = outermost); positions past the end append innermost
    pub fn insert_middleware(
        &mut self,
        position: usize,
        middleware: Arc<dyn Middleware>,
    ) -> &mut Self {
        self.custom.push((Some(position), middleware));
        self
    }

    /// Subscribe to run events; may be called multiple times, each receiver
    /// sees the full stream
    pub fn subscribe(&mut self) -> EventReceiver {
        let (tx, rx) = events::channel();
        self.events.push(tx);
        rx
    }

    /// Execute the whole tree and return its report.
    ///
    /// Never returns an error: every spec failure, hook failure, panic, or
    /// timeout becomes data in the report.
    pub async fn run(&self, tree: SuiteTree) -> Report {
        let tree = Arc::new(tree);
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let mut phase = RunPhase::NotStarted;

        advance(&mut phase, RunPhase::Scanning);
        let scan = Scan::of(&tree);
        debug!(
            %run_id,
            specs = tree.spec_count(),
            contexts = tree.context_count(),
            any_focus = scan.any_focus(),
            "scanned suite"
        );

        advance(&mut phase, RunPhase::Executing);
        let shared = Arc::new(RunShared {
            tree: Arc::clone(&tree),
            hooks: HookEngine::new(&tree),
            pipeline: self.build_pipeline(),
            config: self.config.clone(),
            any_focus: scan.any_focus(),
            bailed: AtomicBool::new(false),
            events: self.events.clone(),
        });

        let mut slots: Vec<Option<SpecResult>> = (0..tree.spec_count()).map(|_| None).collect();

        if self.config.parallel {
            let semaphore = Arc::new(Semaphore::new(self.config.max_parallelism.max(1)));
            let mut tasks = JoinSet::new();
            for &spec in &scan.plan {
                let shared = Arc::clone(&shared);
                let semaphore = Arc::clone(&semaphore);
                tasks.spawn(async move {
                    // The semaphore is never closed; a failed acquire can
                    // only mean shutdown, in which case running unbounded is
                    // still correct.
                    let _permit = semaphore.acquire_owned().await.ok();
                    let result = execute_spec(&shared, spec).await;
                    (spec, result)
                });
            }
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((spec, result)) => slots[spec.index()] = Some(result),
                    Err(join_error) => warn!(%join_error, "spec task did not complete"),
                }
            }
        } else {
            for &spec in &scan.plan {
                let result = execute_spec(&shared, spec).await;
                slots[spec.index()] = Some(result);
            }
        }

        advance(&mut phase, RunPhase::Finalizing);
        let mut results: Vec<SpecResult> = slots
            .into_iter()
            .enumerate()
            .map(|(idx, slot)| slot.unwrap_or_else(|| missing_result(&tree, SpecId(idx))))
            .collect();

        escalate_after_all_failures(&tree, &shared.hooks, &mut results);

        let finished_at = Utc::now();
        let report = report::assemble(&tree, results, run_id, started_at, finished_at);
        shared.emit(RunEvent::RunFinished(report.clone()));

        info!(
            %run_id,
            total = report.summary.total,
            passed = report.summary.passed,
            failed = report.summary.failed,
            pending = report.summary.pending,
            skipped = report.summary.skipped,
            duration_ms = report.summary.total_duration_ms,
            "run finished"
        );
        advance(&mut phase, RunPhase::Done);

        report
    }

    /// Assemble the middleware chain: Filter → Retry → Timeout (outer→inner),
    /// with custom middleware spliced in at their requested positions
    fn build_pipeline(&self) -> Pipeline {
        let mut chain: Vec<Arc<dyn Middleware>> = vec![
            Arc::new(FilterMiddleware::new(self.config.filter.clone())),
            Arc::new(RetryMiddleware::new(self.config.retry.clone())),
        ];
        if let Some(timeout) = self.config.timeout {
            chain.push(Arc::new(TimeoutMiddleware::new(timeout)));
        }
        for (position, middleware) in &self.custom {
            let at = position.unwrap_or(chain.len()).min(chain.len());
            chain.insert(at, Arc::clone(middleware));
        }
        Pipeline::new(chain)
    }
}

/// State shared by every spec task of one run
struct RunShared {
    tree: Arc<SuiteTree>,
    hooks: HookEngine,
    pipeline: Pipeline,
    config: RunConfig,
    any_focus: bool,
    bailed: AtomicBool,
    events: Vec<EventSender>,
}

impl RunShared {
    fn emit(&self, event: RunEvent) {
        for tx in &self.events {
            // A dropped receiver just stops listening.
            let _ = tx.send(event.clone());
        }
    }

    /// Finalize one spec: record bail, notify subscribers, then drive the
    /// exit counters (which may fire after_all hooks)
    async fn finish(&self, path: &[ContextId], result: SpecResult) -> SpecResult {
        if result.status == Status::Failed
            && self.config.bail
            && !self.bailed.swap(true, Ordering::AcqRel)
        {
            warn!(spec = %result.full_name(), "bailing out after first failure");
        }
        self.emit(RunEvent::SpecFinished(result.clone()));
        self.hooks.finish_spec(&self.tree, path).await;
        result
    }
}

/// Scan results: declaration-order execution plan and bottom-up focus flags
struct Scan {
    plan: Vec<SpecId>,
    /// `subtree_has_focus` per context, arena-indexed; computed once, never
    /// re-derived during traversal
    focus: Vec<bool>,
    root: ContextId,
}

impl Scan {
    fn of(tree: &SuiteTree) -> Self {
        let mut focus = vec![false; tree.context_count()];
        let mut plan = Vec::with_capacity(tree.spec_count());
        Self::visit(tree, tree.root(), &mut focus, &mut plan);
        Self {
            plan,
            focus,
            root: tree.root(),
        }
    }

    fn visit(tree: &SuiteTree, id: ContextId, focus: &mut [bool], plan: &mut Vec<SpecId>) {
        let context = tree.context(id);
        let mut has_focus = false;
        for &spec in context.specs() {
            plan.push(spec);
            has_focus |= tree.spec(spec).is_focused();
        }
        for &child in context.children() {
            Self::visit(tree, child, focus, plan);
            has_focus |= focus[child.index()];
        }
        focus[id.index()] = has_focus;
    }

    fn any_focus(&self) -> bool {
        self.focus[self.root.index()]
    }

    #[cfg(test)]
    fn subtree_has_focus(&self, id: ContextId) -> bool {
        self.focus[id.index()]
    }
}

/// Run one spec through its full sequence:
/// before_all-if-needed → before_each → pipeline → after_each → exit counters
async fn execute_spec(shared: &Arc<RunShared>, id: SpecId) -> SpecResult {
    let tree = &shared.tree;
    let spec = tree.spec(id);
    let path = tree.spec_path(id);
    let path_names = tree.spec_path_names(id);

    // Policy skips never touch hooks or middleware, but still flow through
    // finish() so the exit counters drain.
    let skip = |reason: SkipReason| SpecResult {
        description: spec.description().to_string(),
        path: path_names.clone(),
        status: Status::Skipped,
        duration_ms: 0,
        attempts: 0,
        error: None,
        skip_reason: Some(reason),
        spec: id,
    };

    if spec.is_skipped() {
        return shared.finish(&path, skip(SkipReason::Explicit)).await;
    }
    if shared.any_focus && !spec.is_focused() {
        return shared.finish(&path, skip(SkipReason::Unfocused)).await;
    }
    if shared.config.shutdown.is_cancelled() {
        return shared.finish(&path, skip(SkipReason::Cancelled)).await;
    }
    if shared.bailed.load(Ordering::Acquire) {
        return shared.finish(&path, skip(SkipReason::Bailed)).await;
    }

    let started = Instant::now();

    if let Err(error) = shared.hooks.enter(tree, &path).await {
        // A failed before_all fails every spec in its subtree that has not
        // yet run, with that error attached.
        let result = SpecResult {
            description: spec.description().to_string(),
            path: path_names,
            status: Status::Failed,
            duration_ms: started.elapsed().as_millis() as u64,
            attempts: 0,
            error: Some(ErrorDetail::from(&error)),
            skip_reason: None,
            spec: id,
        };
        return shared.finish(&path, result).await;
    }

    let ctx = Arc::new(ExecutionContext::new(
        id,
        spec.description().to_string(),
        path_names.clone(),
        spec.tags().to_vec(),
    ));

    let mut outcome = match hooks::run_before_each(tree, &path).await {
        Ok(()) => shared.pipeline.execute(&ctx, spec.body.as_ref()).await,
        Err(error) => Outcome::Failed(error),
    };

    // after_each always runs for cleanup; its error only surfaces when the
    // spec had not already failed.
    if let Err(error) = hooks::run_after_each(tree, &path).await {
        if !outcome.is_failed() {
            outcome = Outcome::Failed(error);
        }
    }

    let duration_ms = started.elapsed().as_millis() as u64;
    let result = match outcome {
        Outcome::Passed => SpecResult {
            description: spec.description().to_string(),
            path: path_names,
            status: Status::Passed,
            duration_ms,
            attempts: ctx.attempts(),
            error: None,
            skip_reason: None,
            spec: id,
        },
        Outcome::Failed(error) => SpecResult {
            description: spec.description().to_string(),
            path: path_names,
            status: Status::Failed,
            duration_ms,
            attempts: ctx.attempts(),
            error: Some(ErrorDetail::from(&error)),
            skip_reason: None,
            spec: id,
        },
        Outcome::Skipped(reason) => SpecResult {
            description: spec.description().to_string(),
            path: path_names,
            status: Status::Skipped,
            duration_ms,
            attempts: ctx.attempts(),
            error: None,
            skip_reason: Some(reason),
            spec: id,
        },
        Outcome::Pending => SpecResult {
            description: spec.description().to_string(),
            path: path_names,
            status: Status::Pending,
            duration_ms,
            attempts: 0,
            error: None,
            skip_reason: None,
            spec: id,
        },
    };

    shared.finish(&path, result).await
}

/// Placeholder preserving the one-result-per-spec invariant if a spec task
/// is ever lost (task abort; our own code never panics past `catch_unwind`)
fn missing_result(tree: &SuiteTree, id: SpecId) -> SpecResult {
    SpecResult {
        description: tree.spec(id).description().to_string(),
        path: tree.spec_path_names(id),
        status: Status::Failed,
        duration_ms: 0,
        attempts: 0,
        error: Some(ErrorDetail {
            message: "spec task did not complete".to_string(),
            kind: "panic".to_string(),
            backtrace: None,
        }),
        skip_reason: None,
        spec: id,
    }
}

/// Escalate recorded after_all failures onto their subtrees.
///
/// Deepest contexts first so a spec records the nearest failing cleanup.
/// Specs that already failed keep their own error; skipped and pending specs
/// never participated in the context and are left untouched.
fn escalate_after_all_failures(
    tree: &SuiteTree,
    hooks: &HookEngine,
    results: &mut [SpecResult],
) {
    let ids: Vec<ContextId> = tree.contexts().map(|cx| cx.id()).collect();
    for &id in ids.iter().rev() {
        if let Some(error) = hooks.after_all_error(id) {
            let detail = ErrorDetail::from(&error);
            mark_subtree_failed(tree, id, &detail, results);
        }
    }
}

fn mark_subtree_failed(
    tree: &SuiteTree,
    id: ContextId,
    detail: &ErrorDetail,
    results: &mut [SpecResult],
) {
    let context = tree.context(id);
    for &spec in context.specs() {
        let result = &mut results[spec.index()];
        if result.status == Status::Passed {
            result.status = Status::Failed;
            result.error = Some(detail.clone());
        }
    }
    for &child in context.children() {
        mark_subtree_failed(tree, child, detail, results);
    }
}
