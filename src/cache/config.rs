//! Query cache configuration.
//!
//! Built from the `[cache]` section of the resolved settings.

use std::num::NonZeroUsize;
use std::time::Duration;

const DEFAULT_MAX_ENTRIES: usize = 256;
const DEFAULT_MUTATION_TIMEOUT_MS: u64 = 15_000;
const DEFAULT_REFETCH_CONCURRENCY: usize = 4;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Entries kept before least-recently-used eviction.
    pub max_entries: usize,
    /// Upper bound on a single remote mutation; exceeding it counts as a network failure.
    pub mutation_timeout_ms: u64,
    /// Background refetches allowed in flight at once.
    pub refetch_concurrency: usize,
    /// Log full failure chains alongside user messages.
    pub developer_diagnostics: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            mutation_timeout_ms: DEFAULT_MUTATION_TIMEOUT_MS,
            refetch_concurrency: DEFAULT_REFETCH_CONCURRENCY,
            developer_diagnostics: cfg!(debug_assertions),
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            max_entries: settings.max_entries.get(),
            mutation_timeout_ms: settings.mutation_timeout_ms.get(),
            refetch_concurrency: settings.refetch_concurrency.get(),
            developer_diagnostics: settings.developer_diagnostics,
        }
    }
}

impl CacheConfig {
    /// Capacity as `NonZeroUsize`, clamping to 1 if zero.
    pub fn max_entries_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.max_entries).unwrap_or(NonZeroUsize::MIN)
    }

    pub fn mutation_timeout(&self) -> Duration {
        Duration::from_millis(self.mutation_timeout_ms.max(1))
    }

    /// Refetch permits, at least one.
    pub fn refetch_permits(&self) -> usize {
        self.refetch_concurrency.max(1)
    }
}
