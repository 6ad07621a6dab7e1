//! Per-invocation execution context
//!
//! One `ExecutionContext` is created immediately before a spec enters the
//! middleware pipeline and discarded once its result is finalized. It is
//! never shared across sibling specs; the state bag is exclusive to one
//! spec's middleware chain.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::tree::SpecId;

/// Ephemeral state for a single spec invocation
pub struct ExecutionContext {
    spec: SpecId,
    description: String,
    /// Context descriptions root→leaf
    path: Vec<String>,
    /// Spec tags, own plus inherited
    tags: Vec<String>,
    bag: Mutex<HashMap<String, Arc<dyn Any + Send + Sync>>>,
    cancel: CancellationToken,
    attempts: AtomicU32,
}

impl ExecutionContext {
    pub(crate) fn new(
        spec: SpecId,
        description: String,
        path: Vec<String>,
        tags: Vec<String>,
    ) -> Self {
        Self {
            spec,
            description,
            path,
            tags,
            bag: Mutex::new(HashMap::new()),
            cancel: CancellationToken::new(),
            attempts: AtomicU32::new(0),
        }
    }

    pub fn spec(&self) -> SpecId {
        self.spec
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Context descriptions root→leaf (not including the spec description)
    pub fn path(&self) -> &[String] {
        &self.path
    }

    /// Spec tags, own plus inherited from ancestor contexts
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Full display name: context path plus spec description, space-joined.
    ///
    /// This is the string name-pattern filters match against.
    pub fn full_name(&self) -> String {
        let mut parts: Vec<&str> = self.path.iter().map(String::as_str).collect();
        parts.push(&self.description);
        parts.join(" ")
    }

    /// Store a value in the spec-scoped state bag
    pub fn insert<T: Any + Send + Sync>(&self, key: impl Into<String>, value: T) {
        self.bag.lock().insert(key.into(), Arc::new(value));
    }

    /// Fetch a typed value from the state bag
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        self.bag
            .lock()
            .get(key)
            .cloned()
            .and_then(|value| value.downcast::<T>().ok())
    }

    /// Remove a value from the state bag
    pub fn remove(&self, key: &str) -> bool {
        self.bag.lock().remove(key).is_some()
    }

    /// Cooperative cancellation token for this invocation.
    ///
    /// The timeout middleware cancels it when the time budget is exceeded;
    /// long-running bodies should poll it at suspension points.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Record the start of a body attempt; returns the 1-based attempt number
    pub(crate) fn begin_attempt(&self) -> u32 {
        self.attempts.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Number of body attempts made so far
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ExecutionContext {
        ExecutionContext::new(
            SpecId(0),
            "does things".to_string(),
            vec!["root".to_string(), "inner".to_string()],
            vec!["fast".to_string()],
        )
    }

    #[test]
    fn test_state_bag_typed_roundtrip() {
        let ctx = ctx();
        ctx.insert("port", 8080u16);
        ctx.insert("name", "db".to_string());

        assert_eq!(*ctx.get::<u16>("port").unwrap(), 8080);
        assert_eq!(*ctx.get::<String>("name").unwrap(), "db");
        // Wrong type yields None, not a panic
        assert!(ctx.get::<u32>("port").is_none());
        assert!(ctx.remove("port"));
        assert!(ctx.get::<u16>("port").is_none());
    }

    #[test]
    fn test_full_name_joins_path_and_description() {
        assert_eq!(ctx().full_name(), "root inner does things");
    }

    #[test]
    fn test_attempt_counter() {
        let ctx = ctx();
        assert_eq!(ctx.attempts(), 0);
        assert_eq!(ctx.begin_attempt(), 1);
        assert_eq!(ctx.begin_attempt(), 2);
        assert_eq!(ctx.attempts(), 2);
    }
}
