//! Hook ordering engine
//!
//! Owns the only mutable state attached to the tree during a run: per-context
//! entry gates for `before_all` and remaining-spec counters for `after_all`.
//! Both are safe under concurrent sibling execution:
//!
//! - entry is a `tokio::sync::OnceCell`: the first caller performs the
//!   `before_all` invocation while racing callers await it, and the cell
//!   memoizes the outcome (success or the captured error);
//! - exit is an `AtomicUsize` initialized to the subtree spec count; the
//!   decrement that reaches zero runs `after_all` exactly once.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::error::{HookKind, SpecError};
use crate::middleware::panic_message;
use crate::tree::{Context, ContextId, Hook, SuiteTree};

/// Per-context runtime state for one run
struct ContextState {
    /// Gate memoizing the `before_all` outcome
    entered: OnceCell<Result<(), SpecError>>,
    /// Specs in this subtree that have not yet finalized
    remaining: AtomicUsize,
    /// First error from this context's `after_all` hooks, kept for
    /// escalation at finalize time
    after_all_error: Mutex<Option<SpecError>>,
}

/// One-time hook tracking for a single run
pub(crate) struct HookEngine {
    states: Vec<ContextState>,
}

impl HookEngine {
    pub(crate) fn new(tree: &SuiteTree) -> Self {
        let states = tree
            .contexts()
            .map(|context| ContextState {
                entered: OnceCell::new(),
                remaining: AtomicUsize::new(tree.subtree_spec_count(context.id())),
                after_all_error: Mutex::new(None),
            })
            .collect();
        Self { states }
    }

    /// Run `before_all` for every context on `path`, root→leaf, each exactly
    /// once per run.
    ///
    /// Returns the memoized error if any context on the path failed to enter,
    /// whether in this call or an earlier one.
    pub(crate) async fn enter(
        &self,
        tree: &SuiteTree,
        path: &[ContextId],
    ) -> Result<(), SpecError> {
        for &id in path {
            let context = tree.context(id);
            let outcome = self.states[id.index()]
                .entered
                .get_or_init(|| async {
                    if !context.before_all.is_empty() {
                        debug!(context = context.description(), "entering context");
                    }
                    run_hooks(context, HookKind::BeforeAll, &context.before_all).await
                })
                .await;
            if let Err(error) = outcome {
                return Err(error.clone());
            }
        }
        Ok(())
    }

    /// Record one finalized spec: decrement the remaining-spec counter of
    /// every context on `path` leaf→root, running `after_all` on each counter
    /// that reaches zero before moving to the parent.
    pub(crate) async fn finish_spec(&self, tree: &SuiteTree, path: &[ContextId]) {
        for &id in path.iter().rev() {
            if self.states[id.index()].remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                self.run_after_all(tree, id).await;
            }
        }
    }

    /// Whether this context's `before_all` gate was ever opened
    pub(crate) fn was_entered(&self, id: ContextId) -> bool {
        self.states[id.index()].entered.get().is_some()
    }

    /// First `after_all` error recorded for a context, if any
    pub(crate) fn after_all_error(&self, id: ContextId) -> Option<SpecError> {
        self.states[id.index()].after_all_error.lock().clone()
    }

    async fn run_after_all(&self, tree: &SuiteTree, id: ContextId) {
        let context = tree.context(id);
        // A context whose before_all never ran has nothing to clean up; this
        // covers subtrees where every spec was skipped before entry.
        if !self.was_entered(id) {
            return;
        }
        if context.after_all.is_empty() {
            return;
        }
        debug!(context = context.description(), "leaving context");
        // Best-effort even when before_all failed: secondary cleanup errors
        // are recorded and logged, never replacing a primary failure.
        if let Err(error) =
            run_hooks_best_effort(context, HookKind::AfterAll, &context.after_all).await
        {
            warn!(context = context.description(), %error, "after_all hook failed");
            *self.states[id.index()].after_all_error.lock() = Some(error);
        }
    }
}

/// Run the `before_each` chain root→leaf; the first error aborts the chain.
pub(crate) async fn run_before_each(
    tree: &SuiteTree,
    path: &[ContextId],
) -> Result<(), SpecError> {
    for &id in path {
        let context = tree.context(id);
        run_hooks(context, HookKind::BeforeEach, &context.before_each).await?;
    }
    Ok(())
}

/// Run the `after_each` chain leaf→root. Every hook runs regardless of
/// earlier errors; the first error is returned.
pub(crate) async fn run_after_each(
    tree: &SuiteTree,
    path: &[ContextId],
) -> Result<(), SpecError> {
    let mut first_error = None;
    for &id in path.iter().rev() {
        let context = tree.context(id);
        if let Err(error) =
            run_hooks_best_effort(context, HookKind::AfterEach, &context.after_each).await
        {
            first_error.get_or_insert(error);
        }
    }
    match first_error {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

/// Run hooks in order, stopping at the first failure
async fn run_hooks(context: &Context, kind: HookKind, hooks: &[Hook]) -> Result<(), SpecError> {
    for hook in hooks {
        run_hook(context, kind, hook).await?;
    }
    Ok(())
}

/// Run every hook even after a failure, returning the first error
async fn run_hooks_best_effort(
    context: &Context,
    kind: HookKind,
    hooks: &[Hook],
) -> Result<(), SpecError> {
    let mut first_error = None;
    for hook in hooks {
        if let Err(error) = run_hook(context, kind, hook).await {
            warn!(context = context.description(), %kind, %error, "hook failed");
            first_error.get_or_insert(error);
        }
    }
    match first_error {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

/// Invoke one hook, catching both errors and panics at this boundary
async fn run_hook(context: &Context, kind: HookKind, hook: &Hook) -> Result<(), SpecError> {
    match AssertUnwindSafe(hook.invoke()).catch_unwind().await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(error)) => Err(SpecError::Hook {
            kind,
            context: context.description().to_string(),
            message: format!("{error:#}"),
        }),
        Err(payload) => Err(SpecError::Hook {
            kind,
            context: context.description().to_string(),
            message: format!("panicked: {}", panic_message(payload)),
        }),
    }
}
