//! Fetch execution against the registered resource fetcher.
//!
//! Foreground fetches (initial load, next page) run inline and return their
//! outcome. Background refetches after invalidation are spawned onto a
//! `JoinSet` and bounded by a semaphore; each one takes its ticket when it is
//! scheduled, so a write that lands before the request goes out still wins.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use metrics::{gauge, histogram};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument};

use crate::application::remote::{RemoteError, ResourceFetcher};

use super::config::CacheConfig;
use super::error::FetchError;
use super::keys::{KeyPattern, QueryKey};
use super::lock::mutex_lock;
use super::store::{CacheStore, FetchOutcome, FetchTicket, Staleness};

const SOURCE: &str = "cache::refetch";
const METRIC_REFETCH_MS: &str = "shiftcache_refetch_ms";
const METRIC_REFETCH_PENDING: &str = "shiftcache_refetch_pending";

/// Result of one background refetch.
#[derive(Debug, Clone)]
pub enum Refetched {
    Applied,
    Discarded,
    Failed(RemoteError),
}

/// Background refetches settled by [`Refetcher::settle`].
#[derive(Debug, Default)]
pub struct RefetchReport {
    pub applied: Vec<QueryKey>,
    pub discarded: Vec<QueryKey>,
    pub failed: Vec<(QueryKey, RemoteError)>,
}

impl RefetchReport {
    pub fn total(&self) -> usize {
        self.applied.len() + self.discarded.len() + self.failed.len()
    }

    fn record(&mut self, key: QueryKey, result: Refetched) {
        match result {
            Refetched::Applied => self.applied.push(key),
            Refetched::Discarded => self.discarded.push(key),
            Refetched::Failed(error) => self.failed.push((key, error)),
        }
    }

    fn sort(&mut self) {
        self.applied.sort();
        self.discarded.sort();
        self.failed.sort_by(|left, right| left.0.cmp(&right.0));
    }
}

pub struct Refetcher {
    store: Arc<CacheStore>,
    fetcher: Arc<dyn ResourceFetcher>,
    permits: Arc<Semaphore>,
    tasks: Mutex<JoinSet<(QueryKey, Refetched)>>,
}

impl Refetcher {
    pub fn new(
        config: &CacheConfig,
        store: Arc<CacheStore>,
        fetcher: Arc<dyn ResourceFetcher>,
    ) -> Self {
        Self {
            store,
            fetcher,
            permits: Arc::new(Semaphore::new(config.refetch_permits())),
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    /// Fetch `key` now and store the result if nothing newer landed meanwhile.
    pub async fn fetch(&self, key: &QueryKey) -> Result<FetchOutcome, FetchError> {
        let ticket = self.store.begin_fetch(key);
        self.store.mark_refetching(&ticket);

        let started_at = Instant::now();
        let result = self.fetcher.fetch(key).await;
        record_latency(started_at, "full");

        match result {
            Ok(payload) => Ok(self.store.complete_fetch(ticket, payload)),
            Err(error) => {
                self.store.fail_fetch(&ticket);
                Err(FetchError::Remote(error))
            }
        }
    }

    /// Load the page after the last one held for a list key.
    pub async fn fetch_next_page(&self, key: &QueryKey) -> Result<FetchOutcome, FetchError> {
        let next = self
            .store
            .peek(key)
            .and_then(|entry| entry.payload.next_page_number())
            .ok_or_else(|| FetchError::NoNextPage { key: key.clone() })?;

        let ticket = self.store.begin_fetch(key);
        let started_at = Instant::now();
        let result = self.fetcher.fetch_page(key, next).await;
        record_latency(started_at, "page");

        let outcome = match result {
            Ok(page) => self.store.complete_page_fetch(ticket, page).map_err(FetchError::from),
            Err(error) => {
                self.store.fail_fetch(&ticket);
                Err(FetchError::Remote(error))
            }
        };
        self.resume_invalidation(key);
        outcome
    }

    /// A page fetch supersedes any refetch pending for its key and keeps the
    /// entry's staleness. An entry left stale with nothing in flight gets a
    /// full refetch, which restarts the list from page one.
    fn resume_invalidation(&self, key: &QueryKey) {
        if self.store.staleness(key) == Some(Staleness::Stale) && !self.store.is_fetching(key) {
            debug!(key = %key, "Page fetch left the list stale; scheduling a full refetch");
            self.schedule([key.clone()]);
        }
    }

    /// Queue background refetches. Returns how many were scheduled.
    pub fn schedule<I>(&self, keys: I) -> usize
    where
        I: IntoIterator<Item = QueryKey>,
    {
        let mut tasks = mutex_lock(&self.tasks, SOURCE, "schedule");
        let mut scheduled = 0;
        for key in keys {
            let ticket = self.store.begin_fetch(&key);
            tasks.spawn(run_refetch(
                Arc::clone(&self.store),
                Arc::clone(&self.fetcher),
                Arc::clone(&self.permits),
                ticket,
            ));
            scheduled += 1;
        }
        if scheduled > 0 {
            gauge!(METRIC_REFETCH_PENDING).set(tasks.len() as f64);
            debug!(scheduled, pending = tasks.len(), "Scheduled background refetches");
        }
        scheduled
    }

    /// Mark every key matching `pattern` stale and refetch each one.
    pub fn invalidate_and_refetch(&self, pattern: &KeyPattern) -> Vec<QueryKey> {
        let keys = self.store.mark_stale(pattern);
        self.schedule(keys.iter().cloned());
        keys
    }

    pub fn pending(&self) -> usize {
        mutex_lock(&self.tasks, SOURCE, "pending").len()
    }

    /// Wait for every scheduled refetch, including ones scheduled while waiting.
    #[instrument(skip(self))]
    pub async fn settle(&self) -> RefetchReport {
        let mut report = RefetchReport::default();
        loop {
            let mut batch = std::mem::take(&mut *mutex_lock(&self.tasks, SOURCE, "settle"));
            if batch.is_empty() {
                break;
            }
            while let Some(joined) = batch.join_next().await {
                match joined {
                    Ok((key, result)) => report.record(key, result),
                    Err(join_error) => {
                        error!(error = %join_error, "Background refetch task aborted");
                    }
                }
            }
        }
        report.sort();
        gauge!(METRIC_REFETCH_PENDING).set(0.0);
        if report.total() > 0 {
            info!(
                applied = report.applied.len(),
                discarded = report.discarded.len(),
                failed = report.failed.len(),
                "Background refetches settled"
            );
        }
        report
    }
}

async fn run_refetch(
    store: Arc<CacheStore>,
    fetcher: Arc<dyn ResourceFetcher>,
    permits: Arc<Semaphore>,
    ticket: FetchTicket,
) -> (QueryKey, Refetched) {
    let key = ticket.key().clone();
    let _permit = match permits.acquire_owned().await {
        Ok(permit) => permit,
        Err(closed) => {
            store.fail_fetch(&ticket);
            return (key, Refetched::Failed(RemoteError::other(closed.to_string())));
        }
    };

    // Superseded or cancelled before the request went out.
    if !store.mark_refetching(&ticket) {
        debug!(key = %key, outcome = "skipped", "Background refetch no longer current");
        return (key, Refetched::Discarded);
    }

    let started_at = Instant::now();
    let result = fetcher.fetch(&key).await;
    record_latency(started_at, "background");

    let refetched = match result {
        Ok(payload) => match store.complete_fetch(ticket, payload) {
            FetchOutcome::Applied { .. } => Refetched::Applied,
            FetchOutcome::Discarded { .. } => Refetched::Discarded,
        },
        Err(error) => {
            store.fail_fetch(&ticket);
            debug!(key = %key, error = %error, outcome = "failed", "Background refetch failed");
            Refetched::Failed(error)
        }
    };
    (key, refetched)
}

fn record_latency(started_at: Instant, mode: &'static str) {
    histogram!(METRIC_REFETCH_MS, "mode" => mode)
        .record(started_at.elapsed().as_secs_f64() * 1000.0);
}
