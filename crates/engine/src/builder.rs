//! Closure-based suite construction
//!
//! ```
//! use specrun_engine::Suite;
//!
//! let tree = Suite::describe("calculator", |cx| {
//!     cx.before_each(|| async { Ok(()) });
//!     cx.spec("adds", |_ctx| async { Ok(()) });
//!     cx.context("division", |cx| {
//!         cx.tag("edge-cases");
//!         cx.spec("rejects zero", |_ctx| async { Ok(()) });
//!         cx.pending("handles negative zero");
//!     });
//! })
//! .build()
//! .unwrap();
//!
//! assert_eq!(tree.spec_count(), 3);
//! ```
//!
//! The builder is the only writer of the tree; `build` freezes it, resolves
//! tag inheritance, and validates. Dynamic constructs (loops generating
//! specs) are resolved here, at declaration time; the runner only ever sees
//! a static tree.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use crate::context::ExecutionContext;
use crate::error::{BuildError, BuildResult};
use crate::tree::{Context, ContextId, Hook, Spec, SpecBody, SpecId, SuiteTree};

/// Declarative construction of a [`SuiteTree`]
pub struct Suite {
    contexts: Vec<Context>,
    specs: Vec<Spec>,
    root: ContextId,
}

impl Suite {
    /// Open a root context and populate it via the closure
    pub fn describe(
        description: impl Into<String>,
        build: impl FnOnce(&mut ContextScope<'_>),
    ) -> Self {
        let mut suite = Suite {
            contexts: Vec::new(),
            specs: Vec::new(),
            root: ContextId(0),
        };
        let root = suite.push_context(description.into(), None);
        suite.root = root;
        let mut scope = ContextScope {
            suite: &mut suite,
            id: root,
            focused: false,
            skipped: false,
        };
        build(&mut scope);
        suite
    }

    /// Freeze the suite: validate and resolve tag inheritance.
    ///
    /// After this point ordering is fixed; the returned tree is never
    /// mutated by the runner.
    pub fn build(mut self) -> BuildResult<SuiteTree> {
        self.validate()?;

        // Resolve inherited tags top-down, then union them into each spec.
        let mut inherited: Vec<Vec<String>> = vec![Vec::new(); self.contexts.len()];
        for idx in 0..self.contexts.len() {
            let mut tags = match self.contexts[idx].parent {
                Some(parent) => inherited[parent.index()].clone(),
                None => Vec::new(),
            };
            for tag in &self.contexts[idx].tags {
                if !tags.contains(tag) {
                    tags.push(tag.clone());
                }
            }
            inherited[idx] = tags;
        }
        for spec in &mut self.specs {
            let mut tags = inherited[spec.context.index()].clone();
            for tag in &spec.tags {
                if !tags.contains(tag) {
                    tags.push(tag.clone());
                }
            }
            spec.tags = tags;
        }

        Ok(SuiteTree {
            root: self.root,
            contexts: self.contexts,
            specs: self.specs,
        })
    }

    fn validate(&self) -> BuildResult<()> {
        for context in &self.contexts {
            if context.description.is_empty() {
                return Err(BuildError::EmptyContextDescription);
            }
            let mut seen = HashSet::new();
            for &spec in &context.specs {
                let description = &self.specs[spec.index()].description;
                if description.is_empty() {
                    return Err(BuildError::EmptySpecDescription {
                        context: context.description.clone(),
                    });
                }
                if !seen.insert(description.as_str()) {
                    return Err(BuildError::DuplicateSpec {
                        context: context.description.clone(),
                        description: description.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    fn push_context(&mut self, description: String, parent: Option<ContextId>) -> ContextId {
        let id = ContextId(self.contexts.len());
        self.contexts.push(Context {
            id,
            description,
            parent,
            children: Vec::new(),
            specs: Vec::new(),
            before_all: Vec::new(),
            after_all: Vec::new(),
            before_each: Vec::new(),
            after_each: Vec::new(),
            tags: Vec::new(),
        });
        if let Some(parent) = parent {
            self.contexts[parent.index()].children.push(id);
        }
        id
    }
}

/// Mutable view of one context while the suite is being declared
pub struct ContextScope<'a> {
    suite: &'a mut Suite,
    id: ContextId,
    /// Focus/skip inherited from focused/skipped ancestor blocks; resolved
    /// onto each spec's flags at declaration time
    focused: bool,
    skipped: bool,
}

impl ContextScope<'_> {
    /// Declare a nested context
    pub fn context(
        &mut self,
        description: impl Into<String>,
        build: impl FnOnce(&mut ContextScope<'_>),
    ) {
        let focused = self.focused;
        let skipped = self.skipped;
        self.child(description, focused, skipped, build);
    }

    /// Declare a focused context: every descendant spec is treated as focused
    pub fn fcontext(
        &mut self,
        description: impl Into<String>,
        build: impl FnOnce(&mut ContextScope<'_>),
    ) {
        let skipped = self.skipped;
        self.child(description, true, skipped, build);
    }

    /// Declare a skipped context: every descendant spec is skipped
    pub fn xcontext(
        &mut self,
        description: impl Into<String>,
        build: impl FnOnce(&mut ContextScope<'_>),
    ) {
        let focused = self.focused;
        self.child(description, focused, true, build);
    }

    fn child(
        &mut self,
        description: impl Into<String>,
        focused: bool,
        skipped: bool,
        build: impl FnOnce(&mut ContextScope<'_>),
    ) {
        let id = self.suite.push_context(description.into(), Some(self.id));
        let mut scope = ContextScope {
            suite: &mut *self.suite,
            id,
            focused,
            skipped,
        };
        build(&mut scope);
    }

    /// Add a tag to this context; descendants inherit it
    pub fn tag(&mut self, tag: impl Into<String>) {
        self.suite.contexts[self.id.index()].tags.push(tag.into());
    }

    /// Register a hook that runs once, before the first spec in this subtree
    pub fn before_all<F, Fut>(&mut self, hook: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.suite.contexts[self.id.index()].before_all.push(Hook::new(hook));
    }

    /// Register a hook that runs once, after the last spec in this subtree
    pub fn after_all<F, Fut>(&mut self, hook: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.suite.contexts[self.id.index()].after_all.push(Hook::new(hook));
    }

    /// Register a hook that runs before every spec in this subtree
    pub fn before_each<F, Fut>(&mut self, hook: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.suite.contexts[self.id.index()].before_each.push(Hook::new(hook));
    }

    /// Register a hook that runs after every spec in this subtree
    pub fn after_each<F, Fut>(&mut self, hook: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.suite.contexts[self.id.index()].after_each.push(Hook::new(hook));
    }

    /// Declare a spec
    pub fn spec<F, Fut>(&mut self, description: impl Into<String>, body: F)
    where
        F: Fn(Arc<ExecutionContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let focused = self.focused;
        let skipped = self.skipped;
        self.push_spec(description.into(), Some(wrap_body(body)), focused, skipped, Vec::new());
    }

    /// Declare a focused spec
    pub fn fspec<F, Fut>(&mut self, description: impl Into<String>, body: F)
    where
        F: Fn(Arc<ExecutionContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let skipped = self.skipped;
        self.push_spec(description.into(), Some(wrap_body(body)), true, skipped, Vec::new());
    }

    /// Declare a skipped spec
    pub fn xspec<F, Fut>(&mut self, description: impl Into<String>, body: F)
    where
        F: Fn(Arc<ExecutionContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let focused = self.focused;
        self.push_spec(description.into(), Some(wrap_body(body)), focused, true, Vec::new());
    }

    /// Declare a spec with its own tags (merged with inherited ones)
    pub fn spec_tagged<F, Fut>(&mut self, description: impl Into<String>, tags: &[&str], body: F)
    where
        F: Fn(Arc<ExecutionContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let focused = self.focused;
        let skipped = self.skipped;
        self.push_spec(
            description.into(),
            Some(wrap_body(body)),
            focused,
            skipped,
            tags.iter().map(|tag| tag.to_string()).collect(),
        );
    }

    /// Declare a pending spec: reported but never executed
    pub fn pending(&mut self, description: impl Into<String>) {
        let focused = self.focused;
        let skipped = self.skipped;
        self.push_spec(description.into(), None, focused, skipped, Vec::new());
    }

    fn push_spec(
        &mut self,
        description: String,
        body: Option<SpecBody>,
        focused: bool,
        skipped: bool,
        tags: Vec<String>,
    ) {
        let id = SpecId(self.suite.specs.len());
        self.suite.specs.push(Spec {
            id,
            context: self.id,
            description,
            body,
            tags,
            focused,
            skipped,
        });
        self.suite.contexts[self.id.index()].specs.push(id);
    }
}

fn wrap_body<F, Fut>(body: F) -> SpecBody
where
    F: Fn(Arc<ExecutionContext>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |ctx| -> crate::tree::ActionFuture { Box::pin(body(ctx)) })
}
