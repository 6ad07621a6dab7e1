//! Composable middleware pipeline wrapping a single spec's body
//!
//! Middleware run in outer-to-inner registration order; each one receives the
//! remainder of the chain as [`Next`] and may short-circuit (filter), drive
//! it more than once (retry), or race it against a timer (timeout). Errors
//! and panics never escape the pipeline: the innermost body invocation
//! converts them into a failed [`Outcome`].

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::{debug, warn};

use crate::config::{FilterConfig, RetryPolicy};
use crate::context::ExecutionContext;
use crate::error::SpecError;
use crate::report::SkipReason;
use crate::tree::SpecBody;

/// What driving a pipeline (or the rest of one) produced
#[derive(Debug, Clone)]
pub enum Outcome {
    Passed,
    Failed(SpecError),
    Skipped(SkipReason),
    /// The spec has no body
    Pending,
}

impl Outcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }
}

/// A composable interceptor around spec body execution
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(&self, ctx: &Arc<ExecutionContext>, next: &Next<'_>) -> Outcome;
}

/// The remainder of a middleware chain, ending at the spec body.
///
/// `run` takes `&self` so a middleware may drive the tail multiple times;
/// every call reaching the end is a fresh body invocation.
pub struct Next<'a> {
    chain: &'a [Arc<dyn Middleware>],
    body: Option<&'a SpecBody>,
}

impl Next<'_> {
    pub async fn run(&self, ctx: &Arc<ExecutionContext>) -> Outcome {
        match self.chain.split_first() {
            Some((middleware, rest)) => {
                let next = Next {
                    chain: rest,
                    body: self.body,
                };
                middleware.handle(ctx, &next).await
            }
            None => invoke_body(ctx, self.body).await,
        }
    }
}

/// Innermost boundary: invoke the body once, converting any error or panic
/// into an outcome
async fn invoke_body(ctx: &Arc<ExecutionContext>, body: Option<&SpecBody>) -> Outcome {
    let Some(body) = body else {
        return Outcome::Pending;
    };

    let attempt = ctx.begin_attempt();
    debug!(spec = %ctx.full_name(), attempt, "invoking spec body");

    match AssertUnwindSafe(body(Arc::clone(ctx))).catch_unwind().await {
        Ok(Ok(())) => Outcome::Passed,
        Ok(Err(error)) => Outcome::Failed(SpecError::from_user(&error)),
        Err(payload) => Outcome::Failed(SpecError::Panic(panic_message(payload))),
    }
}

/// Render a panic payload into a displayable message
pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// A fully assembled chain for one run, shared by every spec
pub struct Pipeline {
    chain: Vec<Arc<dyn Middleware>>,
}

impl Pipeline {
    pub(crate) fn new(chain: Vec<Arc<dyn Middleware>>) -> Self {
        Self { chain }
    }

    /// Drive the whole chain for one spec invocation
    pub async fn execute(&self, ctx: &Arc<ExecutionContext>, body: Option<&SpecBody>) -> Outcome {
        let next = Next {
            chain: &self.chain,
            body,
        };
        next.run(ctx).await
    }
}

// ============================================================================
// Built-in middleware
// ============================================================================

/// Skips specs rejected by the run's filter configuration
pub struct FilterMiddleware {
    filter: FilterConfig,
}

impl FilterMiddleware {
    pub fn new(filter: FilterConfig) -> Self {
        Self { filter }
    }
}

#[async_trait]
impl Middleware for FilterMiddleware {
    async fn handle(&self, ctx: &Arc<ExecutionContext>, next: &Next<'_>) -> Outcome {
        if !self.filter.allows(ctx) {
            debug!(spec = %ctx.full_name(), "filtered out");
            return Outcome::Skipped(SkipReason::Filtered);
        }
        next.run(ctx).await
    }
}

/// Re-drives the inner chain on failure, up to the configured retry count.
///
/// Sits outside the timeout middleware so every attempt gets a fresh time
/// budget. Does not re-run per-spec hooks; those are scheduler-level.
pub struct RetryMiddleware {
    policy: RetryPolicy,
}

impl RetryMiddleware {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl Middleware for RetryMiddleware {
    async fn handle(&self, ctx: &Arc<ExecutionContext>, next: &Next<'_>) -> Outcome {
        let mut remaining = self.policy.retries;
        loop {
            let outcome = next.run(ctx).await;
            match outcome {
                Outcome::Failed(error) if remaining > 0 => {
                    remaining -= 1;
                    debug!(
                        spec = %ctx.full_name(),
                        %error,
                        remaining,
                        "spec body failed, retrying"
                    );
                    if let Some(delay) = self.policy.delay {
                        tokio::time::sleep(delay).await;
                    }
                }
                other => return other,
            }
        }
    }
}

/// Bounds one pass over the inner chain; on expiry, cancels the execution
/// context's token and reports a timeout failure.
pub struct TimeoutMiddleware {
    timeout: Duration,
}

impl TimeoutMiddleware {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Middleware for TimeoutMiddleware {
    async fn handle(&self, ctx: &Arc<ExecutionContext>, next: &Next<'_>) -> Outcome {
        match tokio::time::timeout(self.timeout, next.run(ctx)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                ctx.cancellation().cancel();
                warn!(
                    spec = %ctx.full_name(),
                    timeout_ms = self.timeout.as_millis() as u64,
                    "spec body timed out"
                );
                Outcome::Failed(SpecError::Timeout(self.timeout))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{ActionFuture, SpecId};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn ctx() -> Arc<ExecutionContext> {
        Arc::new(ExecutionContext::new(
            SpecId(0),
            "works".to_string(),
            vec!["suite".to_string()],
            vec![],
        ))
    }

    fn body<F, Fut>(f: F) -> SpecBody
    where
        F: Fn(Arc<ExecutionContext>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Arc::new(move |ctx| Box::pin(f(ctx)) as ActionFuture)
    }

    #[tokio::test]
    async fn test_missing_body_is_pending() {
        let pipeline = Pipeline::new(vec![]);
        let outcome = pipeline.execute(&ctx(), None).await;
        assert!(matches!(outcome, Outcome::Pending));
    }

    #[tokio::test]
    async fn test_body_error_becomes_failed_outcome() {
        let pipeline = Pipeline::new(vec![]);
        let body = body(|_| async { Err(anyhow::anyhow!("broken pipe")) });
        match pipeline.execute(&ctx(), Some(&body)).await {
            Outcome::Failed(error) => assert!(error.to_string().contains("broken pipe")),
            other => panic!("expected Failed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_body_panic_is_caught() {
        let pipeline = Pipeline::new(vec![]);
        let body = body(|_| async { panic!("boom") });
        match pipeline.execute(&ctx(), Some(&body)).await {
            Outcome::Failed(SpecError::Panic(message)) => assert_eq!(message, "boom"),
            other => panic!("expected Panic, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let pipeline = Pipeline::new(vec![Arc::new(RetryMiddleware::new(RetryPolicy {
            retries: 2,
            delay: None,
        }))]);
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let body = body(move |_| {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    anyhow::bail!("flaky");
                }
                Ok(())
            }
        });

        let ctx = ctx();
        let outcome = pipeline.execute(&ctx, Some(&body)).await;
        assert!(matches!(outcome, Outcome::Passed));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(ctx.attempts(), 3);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_keeps_last_failure() {
        let pipeline = Pipeline::new(vec![Arc::new(RetryMiddleware::new(RetryPolicy {
            retries: 1,
            delay: None,
        }))]);
        let body = body(|_| async { Err(anyhow::anyhow!("always broken")) });

        let ctx = ctx();
        let outcome = pipeline.execute(&ctx, Some(&body)).await;
        assert!(outcome.is_failed());
        assert_eq!(ctx.attempts(), 2);
    }

    #[tokio::test]
    async fn test_timeout_cancels_and_fails() {
        let pipeline = Pipeline::new(vec![Arc::new(TimeoutMiddleware::new(
            Duration::from_millis(20),
        ))]);
        let body = body(|_| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        });

        let ctx = ctx();
        let started = std::time::Instant::now();
        let outcome = pipeline.execute(&ctx, Some(&body)).await;
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(matches!(outcome, Outcome::Failed(SpecError::Timeout(_))));
        assert!(ctx.is_cancelled());
    }

    #[tokio::test]
    async fn test_filter_short_circuits_without_invoking_body() {
        let filter = FilterConfig {
            exclude_tags: vec!["skip-me".to_string()],
            ..Default::default()
        };
        let pipeline = Pipeline::new(vec![Arc::new(FilterMiddleware::new(filter))]);
        let body = body(|_| async { Ok(()) });

        let ctx = Arc::new(ExecutionContext::new(
            SpecId(0),
            "works".to_string(),
            vec!["suite".to_string()],
            vec!["skip-me".to_string()],
        ));
        let outcome = pipeline.execute(&ctx, Some(&body)).await;
        assert!(matches!(outcome, Outcome::Skipped(SkipReason::Filtered)));
        assert_eq!(ctx.attempts(), 0);
    }

    #[tokio::test]
    async fn test_custom_middleware_can_drive_next_twice() {
        struct Twice;

        #[async_trait]
        impl Middleware for Twice {
            async fn handle(&self, ctx: &Arc<ExecutionContext>, next: &Next<'_>) -> Outcome {
                let _ = next.run(ctx).await;
                next.run(ctx).await
            }
        }

        let pipeline = Pipeline::new(vec![Arc::new(Twice)]);
        let body = body(|_| async { Ok(()) });
        let ctx = ctx();
        let outcome = pipeline.execute(&ctx, Some(&body)).await;
        assert!(matches!(outcome, Outcome::Passed));
        assert_eq!(ctx.attempts(), 2);
    }
}
