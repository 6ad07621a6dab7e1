//! Run configuration: retry, timeout, filtering, parallelism, bail

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use tokio_util::sync::CancellationToken;

use crate::context::ExecutionContext;

/// Arbitrary user predicate applied by the filter middleware.
///
/// Returning `false` skips the spec with reason `filtered`.
pub type SpecPredicate = Arc<dyn Fn(&ExecutionContext) -> bool + Send + Sync>;

/// Retry policy for failing spec bodies
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    /// Number of re-invocations after the first failed attempt (0 = no retry)
    pub retries: u32,
    /// Pause between attempts
    pub delay: Option<Duration>,
}

/// Inclusion/exclusion rules deciding which specs run
#[derive(Clone, Default)]
pub struct FilterConfig {
    /// If non-empty, a spec must carry at least one of these tags
    pub include_tags: Vec<String>,
    /// A spec carrying any of these tags is filtered out
    pub exclude_tags: Vec<String>,
    /// If set, the spec's full name must match
    pub name_pattern: Option<Regex>,
    /// If set, specs whose full name matches are filtered out
    pub name_exclude: Option<Regex>,
    /// Arbitrary user predicate, applied last
    pub predicate: Option<SpecPredicate>,
}

impl FilterConfig {
    /// Whether this configuration filters anything at all
    pub fn is_empty(&self) -> bool {
        self.include_tags.is_empty()
            && self.exclude_tags.is_empty()
            && self.name_pattern.is_none()
            && self.name_exclude.is_none()
            && self.predicate.is_none()
    }

    /// Decide whether the spec behind `ctx` is allowed to run
    pub fn allows(&self, ctx: &ExecutionContext) -> bool {
        if ctx
            .tags()
            .iter()
            .any(|tag| self.exclude_tags.contains(tag))
        {
            return false;
        }
        if !self.include_tags.is_empty()
            && !ctx
                .tags()
                .iter()
                .any(|tag| self.include_tags.contains(tag))
        {
            return false;
        }

        let name = ctx.full_name();
        if let Some(pattern) = &self.name_pattern {
            if !pattern.is_match(&name) {
                return false;
            }
        }
        if let Some(pattern) = &self.name_exclude {
            if pattern.is_match(&name) {
                return false;
            }
        }

        if let Some(predicate) = &self.predicate {
            if !predicate(ctx) {
                return false;
            }
        }

        true
    }
}

impl fmt::Debug for FilterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterConfig")
            .field("include_tags", &self.include_tags)
            .field("exclude_tags", &self.exclude_tags)
            .field("name_pattern", &self.name_pattern)
            .field("name_exclude", &self.name_exclude)
            .field("predicate", &self.predicate.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

/// Configuration consumed by the runner and the built-in middleware
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Run sibling specs concurrently
    pub parallel: bool,
    /// Upper bound on concurrently running specs in parallel mode
    pub max_parallelism: usize,
    /// Stop starting new specs after the first failure
    pub bail: bool,
    /// Per-attempt time budget for spec bodies
    pub timeout: Option<Duration>,
    pub retry: RetryPolicy,
    pub filter: FilterConfig,
    /// Run-level cancellation: once cancelled, no new specs are scheduled
    pub shutdown: CancellationToken,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            parallel: false,
            max_parallelism: default_parallelism(),
            bail: false,
            timeout: None,
            retry: RetryPolicy::default(),
            filter: FilterConfig::default(),
            shutdown: CancellationToken::new(),
        }
    }
}

/// Logical core count, falling back to 1 when unknown
pub fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ExecutionContext;
    use crate::tree::SpecId;

    fn ctx(tags: &[&str]) -> ExecutionContext {
        ExecutionContext::new(
            SpecId(0),
            "connects".to_string(),
            vec!["db".to_string(), "pool".to_string()],
            tags.iter().map(|t| t.to_string()).collect(),
        )
    }

    #[test]
    fn test_empty_filter_allows_everything() {
        let filter = FilterConfig::default();
        assert!(filter.is_empty());
        assert!(filter.allows(&ctx(&[])));
    }

    #[test]
    fn test_tag_inclusion_and_exclusion() {
        let filter = FilterConfig {
            include_tags: vec!["fast".to_string()],
            ..Default::default()
        };
        assert!(filter.allows(&ctx(&["fast", "db"])));
        assert!(!filter.allows(&ctx(&["db"])));

        let filter = FilterConfig {
            exclude_tags: vec!["slow".to_string()],
            ..Default::default()
        };
        assert!(!filter.allows(&ctx(&["slow"])));
        assert!(filter.allows(&ctx(&["fast"])));
    }

    #[test]
    fn test_exclude_wins_over_include() {
        let filter = FilterConfig {
            include_tags: vec!["db".to_string()],
            exclude_tags: vec!["slow".to_string()],
            ..Default::default()
        };
        assert!(!filter.allows(&ctx(&["db", "slow"])));
    }

    #[test]
    fn test_name_patterns_match_full_name() {
        let filter = FilterConfig {
            name_pattern: Some(Regex::new("^db pool").unwrap()),
            ..Default::default()
        };
        assert!(filter.allows(&ctx(&[])));

        let filter = FilterConfig {
            name_exclude: Some(Regex::new("connects").unwrap()),
            ..Default::default()
        };
        assert!(!filter.allows(&ctx(&[])));
    }

    #[test]
    fn test_predicate_applied_last() {
        let filter = FilterConfig {
            predicate: Some(Arc::new(|ctx| ctx.tags().is_empty())),
            ..Default::default()
        };
        assert!(filter.allows(&ctx(&[])));
        assert!(!filter.allows(&ctx(&["any"])));
    }
}
