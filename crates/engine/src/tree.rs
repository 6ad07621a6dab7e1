//! Immutable suite tree model
//!
//! Contexts and specs live in two arenas indexed by [`ContextId`] and
//! [`SpecId`]. The tree is built once by the suite builder and is read-only
//! for the rest of the run; all mutable per-run state (focus flags, one-time
//! hook gates, remaining-spec counters) lives in the scheduler, indexed by
//! the same ids.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::context::ExecutionContext;

/// Index of a context node in the suite arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(pub(crate) usize);

impl ContextId {
    /// Position of this context in the arena
    pub fn index(self) -> usize {
        self.0
    }
}

/// Index of a spec node in the suite arena.
///
/// Spec ids are assigned in declaration order, which makes them the stable
/// identity used for order-preserving result collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpecId(pub(crate) usize);

impl SpecId {
    /// Declaration position of this spec
    pub fn index(self) -> usize {
        self.0
    }
}

/// Future type produced by hook and body invocations
pub type ActionFuture = BoxFuture<'static, anyhow::Result<()>>;

/// Type-erased async hook action
pub type HookFn = Arc<dyn Fn() -> ActionFuture + Send + Sync>;

/// Type-erased async spec body, invoked with the spec's execution context
pub type SpecBody = Arc<dyn Fn(Arc<ExecutionContext>) -> ActionFuture + Send + Sync>;

/// A setup or teardown action attached to a context
#[derive(Clone)]
pub struct Hook {
    action: HookFn,
}

impl Hook {
    /// Wrap an async closure as a hook
    pub fn new<F, Fut>(action: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            action: Arc::new(move || -> ActionFuture { Box::pin(action()) }),
        }
    }

    /// Start the hook action
    pub(crate) fn invoke(&self) -> ActionFuture {
        (self.action)()
    }
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Hook")
    }
}

/// A grouping node: describe/context block with hooks, child contexts and specs
#[derive(Debug)]
pub struct Context {
    pub(crate) id: ContextId,
    pub(crate) description: String,
    pub(crate) parent: Option<ContextId>,
    pub(crate) children: Vec<ContextId>,
    pub(crate) specs: Vec<SpecId>,
    pub(crate) before_all: Vec<Hook>,
    pub(crate) after_all: Vec<Hook>,
    pub(crate) before_each: Vec<Hook>,
    pub(crate) after_each: Vec<Hook>,
    pub(crate) tags: Vec<String>,
}

impl Context {
    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn parent(&self) -> Option<ContextId> {
        self.parent
    }

    /// Child contexts in declaration order
    pub fn children(&self) -> &[ContextId] {
        &self.children
    }

    /// Own specs in declaration order
    pub fn specs(&self) -> &[SpecId] {
        &self.specs
    }

    /// Tags declared on this context (descendants inherit them)
    pub fn tags(&self) -> &[String] {
        &self.tags
    }
}

/// A single test case
pub struct Spec {
    pub(crate) id: SpecId,
    pub(crate) context: ContextId,
    pub(crate) description: String,
    /// `None` means the spec is pending: reported but never executed
    pub(crate) body: Option<SpecBody>,
    /// Own tags unioned with inherited context tags, resolved at build time
    pub(crate) tags: Vec<String>,
    pub(crate) focused: bool,
    pub(crate) skipped: bool,
}

impl Spec {
    pub fn id(&self) -> SpecId {
        self.id
    }

    /// The owning context (non-owning back-reference, used for path reconstruction)
    pub fn context(&self) -> ContextId {
        self.context
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn is_pending(&self) -> bool {
        self.body.is_none()
    }

    pub fn is_focused(&self) -> bool {
        self.focused
    }

    pub fn is_skipped(&self) -> bool {
        self.skipped
    }
}

impl fmt::Debug for Spec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Spec")
            .field("id", &self.id)
            .field("description", &self.description)
            .field("pending", &self.body.is_none())
            .field("focused", &self.focused)
            .field("skipped", &self.skipped)
            .field("tags", &self.tags)
            .finish()
    }
}

/// A frozen suite: the complete context/spec tree handed to the runner.
///
/// Invariant: child and spec ordering is fixed once built and is never
/// reordered during or after execution.
#[derive(Debug)]
pub struct SuiteTree {
    pub(crate) root: ContextId,
    pub(crate) contexts: Vec<Context>,
    pub(crate) specs: Vec<Spec>,
}

impl SuiteTree {
    pub fn root(&self) -> ContextId {
        self.root
    }

    pub fn context(&self, id: ContextId) -> &Context {
        &self.contexts[id.0]
    }

    pub fn spec(&self, id: SpecId) -> &Spec {
        &self.specs[id.0]
    }

    pub fn context_count(&self) -> usize {
        self.contexts.len()
    }

    pub fn spec_count(&self) -> usize {
        self.specs.len()
    }

    pub fn contexts(&self) -> impl Iterator<Item = &Context> {
        self.contexts.iter()
    }

    pub fn specs(&self) -> impl Iterator<Item = &Spec> {
        self.specs.iter()
    }

    /// Context path from the root down to (and including) `id`
    pub fn context_path(&self, id: ContextId) -> Vec<ContextId> {
        let mut path = Vec::new();
        let mut cursor = Some(id);
        while let Some(cx) = cursor {
            path.push(cx);
            cursor = self.contexts[cx.0].parent;
        }
        path.reverse();
        path
    }

    /// Context path from the root down to the spec's owning context
    pub fn spec_path(&self, id: SpecId) -> Vec<ContextId> {
        self.context_path(self.specs[id.0].context)
    }

    /// Context descriptions root→leaf for a spec, used in reports and name filters
    pub fn spec_path_names(&self, id: SpecId) -> Vec<String> {
        self.spec_path(id)
            .into_iter()
            .map(|cx| self.contexts[cx.0].description.clone())
            .collect()
    }

    /// Total number of specs in the subtree rooted at `id`, descendants included
    pub fn subtree_spec_count(&self, id: ContextId) -> usize {
        let cx = &self.contexts[id.0];
        cx.specs.len()
            + cx.children
                .iter()
                .map(|&child| self.subtree_spec_count(child))
                .sum::<usize>()
    }

    /// Whether any spec anywhere in the tree is focused
    pub fn has_focus(&self) -> bool {
        self.specs.iter().any(|s| s.focused)
    }
}

#[cfg(test)]
mod tests {
    use crate::builder::Suite;

    #[test]
    fn test_path_reconstruction() {
        let tree = Suite::describe("root", |cx| {
            cx.context("outer", |cx| {
                cx.context("inner", |cx| {
                    cx.spec("leaf", |_| async { Ok(()) });
                });
            });
        })
        .build()
        .unwrap();

        let spec = tree.specs().next().unwrap().id();
        assert_eq!(tree.spec_path_names(spec), vec!["root", "outer", "inner"]);
        assert_eq!(tree.spec_path(spec).len(), 3);
    }

    #[test]
    fn test_subtree_spec_counts() {
        let tree = Suite::describe("root", |cx| {
            cx.spec("a", |_| async { Ok(()) });
            cx.context("child", |cx| {
                cx.spec("b", |_| async { Ok(()) });
                cx.spec("c", |_| async { Ok(()) });
                cx.context("empty", |_| {});
            });
        })
        .build()
        .unwrap();

        assert_eq!(tree.subtree_spec_count(tree.root()), 3);
        let child = tree.context(tree.root()).children()[0];
        assert_eq!(tree.subtree_spec_count(child), 2);
        let empty = tree.context(child).children()[0];
        assert_eq!(tree.subtree_spec_count(empty), 0);
    }
}
