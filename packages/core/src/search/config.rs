//! Search configuration

use std::path::PathBuf;
use std::time::Duration;

/// Reconnect policy for the change-feed subscription
///
/// Delays grow geometrically from `initial_delay` and are capped at
/// `max_delay`. Retries never stop; the current attempt is visible through
/// [`FeedHealth`](crate::search::FeedHealth).
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
            multiplier: 2,
        }
    }
}

impl RetryPolicy {
    /// Delay before reconnect attempt `attempt` (1-based)
    ///
    /// # Examples
    ///
    /// ```
    /// use folio_core::search::RetryPolicy;
    /// use std::time::Duration;
    ///
    /// let policy = RetryPolicy::default();
    /// assert_eq!(policy.delay_for(1), Duration::from_secs(5));
    /// assert_eq!(policy.delay_for(3), Duration::from_secs(20));
    /// assert_eq!(policy.delay_for(50), Duration::from_secs(300));
    /// ```
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = self.multiplier.max(1).checked_pow(exponent).unwrap_or(u32::MAX);
        self.initial_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

/// Configuration for the search index and query composition
#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Path of the index database file
    pub index_path: PathBuf,

    /// Build on open and follow the primary store's change feed.
    /// When false the index is ready immediately and only changes through
    /// explicit `upsert_page`/`remove_page`/`rebuild_index` calls.
    pub auto_sync: bool,

    /// Skip the count comparison and rebuild on open
    pub force_rebuild_on_start: bool,

    /// Maximum number of pages fetched for one build; the rest stay unindexed
    pub max_indexed_documents: usize,

    /// Maximum hits returned by a full search
    pub max_results: usize,

    /// Maximum hits returned by a title-only search
    pub max_title_results: usize,

    /// Approximate number of tokens in a content snippet (at most 64)
    pub snippet_tokens: u32,

    /// Marker inserted before a highlighted match
    pub highlight_open: String,

    /// Marker inserted after a highlighted match
    pub highlight_close: String,

    /// Text marking trimmed snippet boundaries
    pub ellipsis: String,

    /// Change-feed reconnect policy
    pub feed_retry: RetryPolicy,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            index_path: PathBuf::from("./data/search.db"),
            auto_sync: true,
            force_rebuild_on_start: false,
            max_indexed_documents: 50_000,
            max_results: 50,
            max_title_results: 25,
            snippet_tokens: 24,
            highlight_open: "<mark>".to_string(),
            highlight_close: "</mark>".to_string(),
            ellipsis: "…".to_string(),
            feed_retry: RetryPolicy::default(),
        }
    }
}

impl SearchConfig {
    /// Default configuration with the index stored at `index_path`
    pub fn with_index_path(index_path: impl Into<PathBuf>) -> Self {
        Self {
            index_path: index_path.into(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_policy_grows_and_caps() {
        let policy = RetryPolicy {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
            multiplier: 3,
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(300));
        assert_eq!(policy.delay_for(3), Duration::from_millis(900));
        assert_eq!(policy.delay_for(4), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_millis(1000));
    }

    #[test]
    fn test_fixed_delay_policy() {
        let policy = RetryPolicy {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(5),
            multiplier: 1,
        };
        assert_eq!(policy.delay_for(10), Duration::from_secs(5));
    }
}
