//! Optimistic mutation lifecycle.
//!
//! `Idle → Optimistic → InFlight → Committed | RolledBack`. Everything except
//! the remote call runs synchronously, so the snapshot, the optimistic write
//! and a rollback are each atomic with respect to other tasks on the loop.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use tracing::{debug, info};
use uuid::Uuid;

use crate::application::remote::{RemoteError, RemoteOperations};

use super::config::CacheConfig;
use super::error::MutationError;
use super::events::Epoch;
use super::keys::{KeyPattern, QueryKey};
use super::lock::mutex_lock;
use super::mutation::{Mutation, MutationOutcome, MutationSnapshot, MutationState};
use super::refetch::Refetcher;
use super::report::{ErrorReporter, ReportContext};
use super::resolver::ConsistencyResolver;
use super::store::CacheStore;

const SOURCE: &str = "cache::coordinator";

const METRIC_MUTATION_COMMITTED: &str = "shiftcache_mutation_committed_total";
const METRIC_MUTATION_ROLLED_BACK: &str = "shiftcache_mutation_rolled_back_total";
const METRIC_MUTATION_MS: &str = "shiftcache_mutation_ms";

pub struct MutationCoordinator {
    store: Arc<CacheStore>,
    refetcher: Arc<Refetcher>,
    remote: Arc<dyn RemoteOperations>,
    resolver: ConsistencyResolver,
    reporter: ErrorReporter,
    timeout: Duration,
    /// Runs holding an unconfirmed optimistic write, per key.
    outstanding: Mutex<HashMap<QueryKey, usize>>,
}

/// What the optimistic phase leaves for the rest of a run.
struct Optimistic {
    snapshot: MutationSnapshot,
    /// Keys whose pending fetch was cancelled to make way for the patch.
    cancelled: Vec<QueryKey>,
    /// Version each patch produced, for keys whose capture showed only
    /// authoritative data.
    written: HashMap<QueryKey, Epoch>,
}

/// Tracks the state of one run and logs each transition.
struct Run {
    correlation_id: Uuid,
    state: MutationState,
}

impl Run {
    fn new() -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            state: MutationState::Idle,
        }
    }

    fn advance(&mut self, next: MutationState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal mutation transition {} -> {}",
            self.state.as_str(),
            next.as_str()
        );
        debug!(
            correlation_id = %self.correlation_id,
            from = self.state.as_str(),
            to = next.as_str(),
            "Mutation state changed"
        );
        self.state = next;
    }
}

impl MutationCoordinator {
    pub fn new(
        config: &CacheConfig,
        store: Arc<CacheStore>,
        refetcher: Arc<Refetcher>,
        remote: Arc<dyn RemoteOperations>,
    ) -> Self {
        Self {
            store,
            refetcher,
            remote,
            resolver: ConsistencyResolver,
            reporter: ErrorReporter::new(config.developer_diagnostics),
            timeout: config.mutation_timeout(),
            outstanding: Mutex::new(HashMap::new()),
        }
    }

    /// Run one mutation to a terminal state. Never fails: every error is
    /// rolled back and reported into the returned outcome.
    pub async fn mutate(&self, mutation: Mutation) -> MutationOutcome {
        let started_at = Instant::now();
        let mut run = Run::new();
        let operation = mutation.kind().as_str();
        info!(
            correlation_id = %run.correlation_id,
            mutation = %mutation,
            "Mutation started"
        );

        let optimistic = self.apply_optimistic(&mutation, &mut run);
        let snapshot = &optimistic.snapshot;

        run.advance(MutationState::InFlight);
        let result = match tokio::time::timeout(
            self.timeout,
            self.remote.perform(&mutation, run.correlation_id),
        )
        .await
        {
            Ok(result) => result,
            Err(_elapsed) => Err(RemoteError::Timeout(self.timeout)),
        };

        let outcome = match result {
            Ok(data) => {
                self.release(snapshot);
                self.commit(&mutation, snapshot, &mut run);
                MutationOutcome::Committed {
                    correlation_id: run.correlation_id,
                    data,
                }
            }
            Err(error) => {
                let error = MutationError::from(error);
                let restoration = self
                    .store
                    .restore_unchanged(&snapshot.captured, &optimistic.written);
                self.release(snapshot);
                run.advance(MutationState::RolledBack);

                let context = ReportContext::new(SOURCE, operation)
                    .with_correlation(run.correlation_id);
                let message = self.reporter.report(&error, &context);

                // Diverged entries and cancelled refetches still owe a reload.
                let mut keys: BTreeSet<QueryKey> = restoration
                    .diverged
                    .iter()
                    .chain(&optimistic.cancelled)
                    .cloned()
                    .collect();
                if message.class.forces_refetch() {
                    keys.extend(self.affected_keys(&mutation, snapshot));
                }
                keys.retain(|key| self.store.contains(key));
                if !keys.is_empty() {
                    self.invalidate(&keys);
                }

                counter!(METRIC_MUTATION_ROLLED_BACK, "mutation" => operation).increment(1);
                info!(
                    correlation_id = %run.correlation_id,
                    mutation = %mutation,
                    outcome = "rolled_back",
                    class = message.class.as_str(),
                    restored = restoration.restored.len(),
                    diverged = restoration.diverged.len(),
                    "Mutation rolled back"
                );
                MutationOutcome::RolledBack {
                    correlation_id: run.correlation_id,
                    error,
                    message,
                }
            }
        };

        histogram!(METRIC_MUTATION_MS, "mutation" => operation)
            .record(started_at.elapsed().as_secs_f64() * 1000.0);
        outcome
    }

    /// Capture and patch every cached entry the mutation can predict.
    ///
    /// When nothing cached shows the target the run goes straight to
    /// `InFlight` with an empty snapshot.
    fn apply_optimistic(&self, mutation: &Mutation, run: &mut Run) -> Optimistic {
        let target = mutation.target();
        let touched: Vec<QueryKey> = self
            .store
            .keys_for_resource(&target)
            .into_iter()
            .filter(|key| {
                self.store
                    .peek(key)
                    .is_some_and(|entry| mutation.predict(&entry.payload).is_some())
            })
            .collect();

        if touched.is_empty() {
            debug!(
                correlation_id = %run.correlation_id,
                target = %target,
                "No cached entry shows the target; skipping optimistic write"
            );
            return Optimistic {
                snapshot: MutationSnapshot::new(run.correlation_id, target, Vec::new()),
                cancelled: Vec::new(),
                written: HashMap::new(),
            };
        }

        let cancelled: Vec<QueryKey> = touched
            .iter()
            .filter(|key| self.store.cancel_fetch(key))
            .cloned()
            .collect();
        let snapshot =
            MutationSnapshot::new(run.correlation_id, target, self.store.capture(&touched));
        run.advance(MutationState::Optimistic);

        let mut written = HashMap::new();
        let mut outstanding = mutex_lock(&self.outstanding, SOURCE, "apply_optimistic");
        for entry in &snapshot.captured {
            let patched = self.store.patch(&entry.key, |payload| {
                mutation
                    .predict(payload)
                    .unwrap_or_else(|| payload.clone())
            });
            let holders = outstanding.entry(entry.key.clone()).or_default();
            match patched {
                // A capture taken over another run's unconfirmed write is not
                // something a rollback may put back.
                Ok(version) if *holders == 0 => {
                    written.insert(entry.key.clone(), version);
                }
                Ok(_) => {}
                Err(error) => {
                    let context = ReportContext::new(SOURCE, mutation.kind().as_str())
                        .with_correlation(run.correlation_id);
                    self.reporter.report(&error, &context);
                }
            }
            *holders += 1;
        }
        drop(outstanding);

        debug!(
            correlation_id = %run.correlation_id,
            patched = snapshot.captured.len(),
            cancelled = cancelled.len(),
            "Optimistic write applied"
        );
        Optimistic {
            snapshot,
            cancelled,
            written,
        }
    }

    /// Drop this run's claim on the keys it patched.
    fn release(&self, snapshot: &MutationSnapshot) {
        let mut outstanding = mutex_lock(&self.outstanding, SOURCE, "release");
        for entry in &snapshot.captured {
            if let Some(holders) = outstanding.get_mut(&entry.key) {
                *holders = holders.saturating_sub(1);
                if *holders == 0 {
                    outstanding.remove(&entry.key);
                }
            }
        }
    }

    fn commit(&self, mutation: &Mutation, snapshot: &MutationSnapshot, run: &mut Run) {
        run.advance(MutationState::Committed);
        let keys = self.affected_keys(mutation, snapshot);
        let scheduled = self.invalidate(&keys);

        counter!(METRIC_MUTATION_COMMITTED, "mutation" => mutation.kind().as_str()).increment(1);
        info!(
            correlation_id = %run.correlation_id,
            mutation = %mutation,
            outcome = "committed",
            invalidated = keys.len(),
            scheduled,
            "Mutation committed"
        );
    }

    /// Keys the resolver declares for the mutation, plus every key the
    /// optimistic write touched.
    fn affected_keys(&self, mutation: &Mutation, snapshot: &MutationSnapshot) -> BTreeSet<QueryKey> {
        let plan = self
            .resolver
            .affected_regions(mutation, &self.store, Some(snapshot));
        debug!(correlation_id = %snapshot.correlation_id, plan = %plan, "Invalidation plan");

        let mut keys = plan.keys();
        keys.extend(
            snapshot
                .captured
                .iter()
                .map(|entry| entry.key.clone())
                .filter(|key| self.store.contains(key)),
        );
        keys
    }

    fn invalidate(&self, keys: &BTreeSet<QueryKey>) -> usize {
        for key in keys {
            self.store.mark_stale(&KeyPattern::exact(key.clone()));
        }
        self.refetcher.schedule(keys.iter().cloned())
    }
}
