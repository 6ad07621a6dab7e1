//! specrun execution engine
//!
//! A BDD-style test execution engine: a declaratively built tree of nested
//! contexts, specs, and lifecycle hooks is executed under configurable
//! cross-cutting policies (retry, timeout, filtering, bail-out, bounded
//! parallelism) with strict hook ordering and a deterministic,
//! declaration-order report.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        specrun engine                        │
//! ├──────────────────────────────────────────────────────────────┤
//! │  Suite (builder)                                             │
//! │    └── build() -> SuiteTree (frozen arena of contexts/specs) │
//! │  Runner                                                      │
//! │    ├── scan:    focus flags + declaration-order plan         │
//! │    ├── execute: before_all ─ before_each ─ pipeline ─        │
//! │    │            after_each ─ after_all   (per spec)          │
//! │    │            pipeline = Filter → Retry → Timeout → Body   │
//! │    └── finalize: escalation + aggregation -> Report          │
//! │  RunEvent stream                                             │
//! │    ├── SpecFinished(SpecResult)   (completion order)         │
//! │    └── RunFinished(Report)                                   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Hook ordering for a spec in `Inner` under `Outer`:
//! `Outer.before_all, Inner.before_all` (once per run), then per spec
//! `Outer.before_each, Inner.before_each, body, Inner.after_each,
//! Outer.after_each`, and after the last spec of each subtree
//! `Inner.after_all, Outer.after_all`. The same guarantees hold under
//! parallel execution; one-time hooks are gated by per-context atomics.

pub mod builder;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
mod hooks;
pub mod middleware;
pub mod report;
pub mod scheduler;
pub mod tree;

// Re-export the surface a test harness needs day to day.
pub use builder::{ContextScope, Suite};
pub use config::{FilterConfig, RetryPolicy, RunConfig, SpecPredicate};
pub use context::ExecutionContext;
pub use error::{BuildError, HookKind, SpecError};
pub use events::{EventReceiver, RunEvent};
pub use middleware::{Middleware, Next, Outcome};
pub use report::{ContextReport, ErrorDetail, Report, SkipReason, SpecResult, Status, Summary};
pub use scheduler::{RunPhase, Runner};
pub use tree::{ContextId, SpecId, SuiteTree};

/// Engine version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
