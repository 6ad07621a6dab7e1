//! Error types for the specrun engine

use std::time::Duration;

use thiserror::Error;

/// Hook scope, used to attribute hook failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    BeforeAll,
    AfterAll,
    BeforeEach,
    AfterEach,
}

impl std::fmt::Display for HookKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HookKind::BeforeAll => write!(f, "before_all"),
            HookKind::AfterAll => write!(f, "after_all"),
            HookKind::BeforeEach => write!(f, "before_each"),
            HookKind::AfterEach => write!(f, "after_each"),
        }
    }
}

/// Why a spec failed.
///
/// Every failed result in a report carries one of these. Cloneable because a
/// single `before_all` failure is attached to every spec in the affected
/// subtree.
#[derive(Error, Debug, Clone)]
pub enum SpecError {
    /// The spec body returned an error (assertion or unhandled failure)
    #[error("{message}")]
    Failure {
        message: String,
        /// Rendered backtrace, present when capture is enabled
        backtrace: Option<String>,
    },

    /// The spec body (or a hook) panicked
    #[error("panicked: {0}")]
    Panic(String),

    /// The spec body exceeded its time budget
    #[error("timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// A lifecycle hook failed
    #[error("{kind} hook failed in '{context}': {message}")]
    Hook {
        kind: HookKind,
        context: String,
        message: String,
    },
}

impl SpecError {
    /// Capture an error returned by user code (a body or hook invocation)
    pub fn from_user(error: &anyhow::Error) -> Self {
        let backtrace = error.backtrace();
        let backtrace = match backtrace.status() {
            std::backtrace::BacktraceStatus::Captured => Some(backtrace.to_string()),
            _ => None,
        };
        SpecError::Failure {
            message: format!("{error:#}"),
            backtrace,
        }
    }

    /// Stable classification string for serialized reports
    pub fn classification(&self) -> &'static str {
        match self {
            SpecError::Failure { .. } => "failure",
            SpecError::Panic(_) => "panic",
            SpecError::Timeout(_) => "timeout",
            SpecError::Hook { .. } => "hook",
        }
    }

    /// Rendered backtrace, when one was captured
    pub fn backtrace(&self) -> Option<&str> {
        match self {
            SpecError::Failure { backtrace, .. } => backtrace.as_deref(),
            _ => None,
        }
    }
}

/// Errors raised while building a suite tree
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("context description must not be empty")]
    EmptyContextDescription,

    #[error("spec description must not be empty (in context '{context}')")]
    EmptySpecDescription { context: String },

    #[error("duplicate spec '{description}' in context '{context}'")]
    DuplicateSpec {
        context: String,
        description: String,
    },
}

/// Result type alias for suite construction
pub type BuildResult<T> = std::result::Result<T, BuildError>;
