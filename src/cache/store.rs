//! Query cache storage.
//!
//! Entries live in one LRU map guarded by a single lock together with the
//! fetch tickets, so a version check and the write it guards can never
//! interleave with another writer. The resource index is updated while that
//! lock is held; subscribers are notified only after it is released.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use lru::LruCache;
use metrics::counter;
use time::OffsetDateTime;
use tracing::{debug, trace};

use super::config::CacheConfig;
use super::error::CacheError;
use super::events::{CacheChange, ChangeCallback, ChangeKind, Epoch, Subscribers, Subscription};
use super::keys::{KeyPattern, QueryKey, ResourceRef};
use super::lock::{rw_read, rw_write};
use super::payload::{AppendError, CachePayload};
use super::registry::ResourceIndex;

const SOURCE: &str = "cache::store";

const METRIC_STORE_HIT: &str = "shiftcache_store_hit_total";
const METRIC_STORE_MISS: &str = "shiftcache_store_miss_total";
const METRIC_STORE_EVICT: &str = "shiftcache_store_evict_total";
const METRIC_FETCH_DISCARDED: &str = "shiftcache_fetch_discarded_total";

/// Freshness of a cached payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Staleness {
    /// Written by an authoritative fetch and not invalidated since.
    Fresh,
    /// Known to be out of date; data kept for display.
    Stale,
    /// A refetch is in flight.
    Refetching,
}

impl Staleness {
    pub fn as_str(self) -> &'static str {
        match self {
            Staleness::Fresh => "fresh",
            Staleness::Stale => "stale",
            Staleness::Refetching => "refetching",
        }
    }

    /// Staleness an entry takes when no fetch is in flight for it any more.
    fn settled(self) -> Self {
        match self {
            Staleness::Refetching => Staleness::Stale,
            other => other,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: QueryKey,
    pub payload: Arc<CachePayload>,
    pub fetched_at: OffsetDateTime,
    pub staleness: Staleness,
    pub version: Epoch,
}

/// What a subscribed view renders.
#[derive(Debug, Clone)]
pub struct CacheRead {
    pub payload: Arc<CachePayload>,
    pub staleness: Staleness,
}

/// Pre-mutation copy of one entry.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedEntry {
    pub key: QueryKey,
    pub payload: Arc<CachePayload>,
    pub staleness: Staleness,
    pub fetched_at: OffsetDateTime,
}

/// Keys a guarded rollback put back, and keys it could only mark stale.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Restoration {
    pub restored: Vec<QueryKey>,
    pub diverged: Vec<QueryKey>,
}

/// Proof that a fetch was started against a particular version of a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    id: u64,
    key: QueryKey,
    version: Epoch,
}

impl FetchTicket {
    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    /// Version of the key when the fetch started; 0 if the key was absent.
    pub fn version(&self) -> Epoch {
        self.version
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// The key was written or a newer fetch was started after this one.
    Superseded,
    /// The fetch was cancelled, e.g. ahead of an optimistic write.
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Applied { version: Epoch },
    Discarded { reason: DiscardReason },
}

impl FetchOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, FetchOutcome::Applied { .. })
    }
}

struct StoreState {
    entries: LruCache<QueryKey, CacheEntry>,
    /// Current fetch ticket id per key.
    in_flight: HashMap<QueryKey, u64>,
}

enum TicketState {
    Current,
    Superseded,
    Cancelled,
}

/// Keyed query cache with staleness tracking and version-gated fetches.
pub struct CacheStore {
    state: RwLock<StoreState>,
    index: ResourceIndex,
    subscribers: Arc<Subscribers>,
    epoch: AtomicU64,
    next_ticket: AtomicU64,
}

impl CacheStore {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            state: RwLock::new(StoreState {
                entries: LruCache::new(config.max_entries_non_zero()),
                in_flight: HashMap::new(),
            }),
            index: ResourceIndex::new(),
            subscribers: Arc::new(Subscribers::new()),
            epoch: AtomicU64::new(0),
            next_ticket: AtomicU64::new(0),
        }
    }

    fn next_epoch(&self) -> Epoch {
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn notify(&self, changes: Vec<CacheChange>) {
        self.subscribers.notify_all(&changes);
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Look up an entry, counting a hit or miss and refreshing its LRU position.
    pub fn get(&self, key: &QueryKey) -> Option<CacheEntry> {
        let entry = rw_write(&self.state, SOURCE, "get")
            .entries
            .get(key)
            .cloned();
        match &entry {
            Some(entry) => {
                counter!(METRIC_STORE_HIT).increment(1);
                trace!(key = %key, version = entry.version, staleness = entry.staleness.as_str(), "Cache hit");
            }
            None => {
                counter!(METRIC_STORE_MISS).increment(1);
                trace!(key = %key, "Cache miss");
            }
        }
        entry
    }

    pub fn read(&self, key: &QueryKey) -> Option<CacheRead> {
        self.get(key).map(|entry| CacheRead {
            payload: entry.payload,
            staleness: entry.staleness,
        })
    }

    /// Look up an entry without touching LRU order or metrics.
    pub fn peek(&self, key: &QueryKey) -> Option<CacheEntry> {
        rw_read(&self.state, SOURCE, "peek").entries.peek(key).cloned()
    }

    pub fn contains(&self, key: &QueryKey) -> bool {
        rw_read(&self.state, SOURCE, "contains").entries.contains(key)
    }

    /// Current version of `key`, 0 when absent.
    pub fn version(&self, key: &QueryKey) -> Epoch {
        rw_read(&self.state, SOURCE, "version")
            .entries
            .peek(key)
            .map(|entry| entry.version)
            .unwrap_or(0)
    }

    pub fn staleness(&self, key: &QueryKey) -> Option<Staleness> {
        rw_read(&self.state, SOURCE, "staleness")
            .entries
            .peek(key)
            .map(|entry| entry.staleness)
    }

    pub fn is_fetching(&self, key: &QueryKey) -> bool {
        rw_read(&self.state, SOURCE, "is_fetching")
            .in_flight
            .contains_key(key)
    }

    pub fn len(&self) -> usize {
        rw_read(&self.state, SOURCE, "len").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cached keys selected by `pattern`, in key order.
    pub fn keys_matching(&self, pattern: &KeyPattern) -> Vec<QueryKey> {
        let state = rw_read(&self.state, SOURCE, "keys_matching");
        let mut keys: Vec<QueryKey> = state
            .entries
            .iter()
            .map(|(key, _)| key)
            .filter(|key| pattern.matches(key))
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    /// Cached keys whose payload contains `resource`, in key order.
    pub fn keys_for_resource(&self, resource: &ResourceRef) -> Vec<QueryKey> {
        let mut keys: Vec<QueryKey> = self.index.keys_for_resource(resource).into_iter().collect();
        keys.sort();
        keys
    }

    pub fn subscribe(&self, key: QueryKey, callback: ChangeCallback) -> Subscription {
        self.subscribers.subscribe(key, callback)
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Store an authoritative payload. The entry becomes fresh.
    pub fn set(&self, key: QueryKey, payload: CachePayload) -> Epoch {
        let (version, changes) = {
            let mut state = rw_write(&self.state, SOURCE, "set");
            state.in_flight.remove(&key);
            self.write_entry(
                &mut state,
                key,
                Arc::new(payload),
                Staleness::Fresh,
                OffsetDateTime::now_utc(),
                ChangeKind::Set,
            )
        };
        self.notify(changes);
        version
    }

    /// Replace the payload of an existing entry with `transform` of it.
    ///
    /// Any fetch in flight for the key is abandoned: its result was computed
    /// against a state the optimistic write no longer shows.
    pub fn patch<F>(&self, key: &QueryKey, transform: F) -> Result<Epoch, CacheError>
    where
        F: FnOnce(&CachePayload) -> CachePayload,
    {
        let (version, changes) = {
            let mut state = rw_write(&self.state, SOURCE, "patch");
            let Some(current) = state.entries.peek(key) else {
                return Err(CacheError::PatchOnMissingKey { key: key.clone() });
            };
            let payload = Arc::new(transform(current.payload.as_ref()));
            let staleness = current.staleness.settled();
            let fetched_at = current.fetched_at;
            state.in_flight.remove(key);
            self.write_entry(
                &mut state,
                key.clone(),
                payload,
                staleness,
                fetched_at,
                ChangeKind::Patched,
            )
        };
        debug!(key = %key, version, "Applied optimistic patch");
        self.notify(changes);
        Ok(version)
    }

    /// Flag every matching entry stale and return the matched keys.
    ///
    /// Entries already stale or refetching are left as they are, so repeated
    /// calls produce no further notifications.
    pub fn mark_stale(&self, pattern: &KeyPattern) -> Vec<QueryKey> {
        let mut matched = Vec::new();
        let mut changes = Vec::new();
        {
            let mut state = rw_write(&self.state, SOURCE, "mark_stale");
            for (key, entry) in state.entries.iter_mut() {
                if !pattern.matches(key) {
                    continue;
                }
                matched.push(key.clone());
                if entry.staleness == Staleness::Fresh {
                    entry.staleness = Staleness::Stale;
                    changes.push(CacheChange {
                        key: key.clone(),
                        kind: ChangeKind::MarkedStale,
                        version: entry.version,
                        staleness: Some(Staleness::Stale),
                    });
                }
            }
        }
        matched.sort();
        debug!(
            pattern = %pattern,
            matched = matched.len(),
            changed = changes.len(),
            "Marked cache entries stale"
        );
        self.notify(changes);
        matched
    }

    /// Append one or more following pages to a cached list.
    pub fn append_page(&self, key: &QueryKey, page: CachePayload) -> Result<Epoch, CacheError> {
        let (version, changes) = {
            let mut state = rw_write(&self.state, SOURCE, "append_page");
            self.append_locked(&mut state, key, page)?
        };
        self.notify(changes);
        Ok(version)
    }

    /// Copy the listed entries as they are now. Absent keys are skipped.
    pub fn capture(&self, keys: &[QueryKey]) -> Vec<CapturedEntry> {
        let state = rw_read(&self.state, SOURCE, "capture");
        keys.iter()
            .filter_map(|key| {
                state.entries.peek(key).map(|entry| CapturedEntry {
                    key: entry.key.clone(),
                    payload: Arc::clone(&entry.payload),
                    staleness: entry.staleness,
                    fetched_at: entry.fetched_at,
                })
            })
            .collect()
    }

    /// Put captured entries back exactly as they were.
    ///
    /// A captured `refetching` state comes back as `stale`, since that fetch
    /// was cancelled before the capture was taken.
    pub fn restore(&self, captured: &[CapturedEntry]) -> Vec<Epoch> {
        let mut versions = Vec::with_capacity(captured.len());
        let mut changes = Vec::new();
        {
            let mut state = rw_write(&self.state, SOURCE, "restore");
            for entry in captured {
                state.in_flight.remove(&entry.key);
                let (version, mut written) = self.write_entry(
                    &mut state,
                    entry.key.clone(),
                    Arc::clone(&entry.payload),
                    entry.staleness.settled(),
                    entry.fetched_at,
                    ChangeKind::Restored,
                );
                versions.push(version);
                changes.append(&mut written);
            }
        }
        debug!(restored = captured.len(), "Restored captured cache entries");
        self.notify(changes);
        versions
    }

    /// Roll back entries only where the caller's own write is still the
    /// latest one.
    ///
    /// `expected` maps each key to the version the caller's write produced. A
    /// captured entry is put back when the key still holds that version and
    /// no fetch is in flight for it. Any other entry that is still cached is
    /// marked stale instead and reported as diverged, since its captured
    /// payload no longer describes what the server or another writer has
    /// since produced.
    pub fn restore_unchanged(
        &self,
        captured: &[CapturedEntry],
        expected: &HashMap<QueryKey, Epoch>,
    ) -> Restoration {
        let mut restoration = Restoration::default();
        let mut changes = Vec::new();
        {
            let mut state = rw_write(&self.state, SOURCE, "restore_unchanged");
            for entry in captured {
                let Some(current) = state.entries.peek(&entry.key) else {
                    continue;
                };
                let owned = expected.get(&entry.key) == Some(&current.version)
                    && !state.in_flight.contains_key(&entry.key);
                if owned {
                    let (_, mut written) = self.write_entry(
                        &mut state,
                        entry.key.clone(),
                        Arc::clone(&entry.payload),
                        entry.staleness.settled(),
                        entry.fetched_at,
                        ChangeKind::Restored,
                    );
                    changes.append(&mut written);
                    restoration.restored.push(entry.key.clone());
                    continue;
                }

                if let Some(current) = state.entries.peek_mut(&entry.key)
                    && current.staleness == Staleness::Fresh
                {
                    current.staleness = Staleness::Stale;
                    changes.push(CacheChange {
                        key: entry.key.clone(),
                        kind: ChangeKind::MarkedStale,
                        version: current.version,
                        staleness: Some(Staleness::Stale),
                    });
                }
                restoration.diverged.push(entry.key.clone());
            }
        }
        debug!(
            restored = restoration.restored.len(),
            diverged = restoration.diverged.len(),
            "Rolled back captured cache entries"
        );
        self.notify(changes);
        restoration
    }

    pub fn remove(&self, key: &QueryKey) -> Option<CacheEntry> {
        let removed = {
            let mut state = rw_write(&self.state, SOURCE, "remove");
            state.in_flight.remove(key);
            let removed = state.entries.pop(key);
            if removed.is_some() {
                self.index.unregister(key);
            }
            removed
        };
        if let Some(entry) = &removed {
            self.notify(vec![removed_change(key.clone(), entry.version)]);
        }
        removed
    }

    /// Drop every entry and every pending fetch, e.g. on logout.
    pub fn clear(&self) {
        let changes: Vec<CacheChange> = {
            let mut state = rw_write(&self.state, SOURCE, "clear");
            state.in_flight.clear();
            let changes = state
                .entries
                .iter()
                .map(|(key, entry)| removed_change(key.clone(), entry.version))
                .collect();
            state.entries.clear();
            self.index.clear();
            changes
        };
        debug!(removed = changes.len(), "Cleared query cache");
        self.notify(changes);
    }

    // ========================================================================
    // Fetch tickets
    // ========================================================================

    /// Register a fetch for `key`, superseding any fetch already in flight.
    pub fn begin_fetch(&self, key: &QueryKey) -> FetchTicket {
        let id = self.next_ticket.fetch_add(1, Ordering::SeqCst) + 1;
        let mut state = rw_write(&self.state, SOURCE, "begin_fetch");
        let version = state
            .entries
            .peek(key)
            .map(|entry| entry.version)
            .unwrap_or(0);
        state.in_flight.insert(key.clone(), id);
        trace!(key = %key, ticket = id, version, "Fetch ticket issued");
        FetchTicket {
            id,
            key: key.clone(),
            version,
        }
    }

    /// Flag the entry as refetching once the request is actually on the wire.
    ///
    /// Returns false when the ticket is no longer current.
    pub fn mark_refetching(&self, ticket: &FetchTicket) -> bool {
        let change = {
            let mut state = rw_write(&self.state, SOURCE, "mark_refetching");
            if !matches!(ticket_state(&state, ticket), TicketState::Current) {
                return false;
            }
            match state.entries.peek_mut(&ticket.key) {
                Some(entry) if entry.staleness != Staleness::Refetching => {
                    entry.staleness = Staleness::Refetching;
                    Some(CacheChange {
                        key: ticket.key.clone(),
                        kind: ChangeKind::Refetching,
                        version: entry.version,
                        staleness: Some(Staleness::Refetching),
                    })
                }
                _ => None,
            }
        };
        if let Some(change) = change {
            self.notify(vec![change]);
        }
        true
    }

    /// Apply a full fetch result if the ticket is still current and the key
    /// has not been written since the fetch began.
    ///
    /// A full result replaces the whole payload, so a list restarts from the
    /// pages the fetch returned.
    pub fn complete_fetch(&self, ticket: FetchTicket, payload: CachePayload) -> FetchOutcome {
        let (outcome, changes) = {
            let mut state = rw_write(&self.state, SOURCE, "complete_fetch");
            match self.settle_ticket(&mut state, &ticket) {
                Err((reason, changes)) => (FetchOutcome::Discarded { reason }, changes),
                Ok(()) => {
                    let (version, changes) = self.write_entry(
                        &mut state,
                        ticket.key.clone(),
                        Arc::new(payload),
                        Staleness::Fresh,
                        OffsetDateTime::now_utc(),
                        ChangeKind::Set,
                    );
                    (FetchOutcome::Applied { version }, changes)
                }
            }
        };
        self.log_outcome(&ticket, outcome);
        self.notify(changes);
        outcome
    }

    /// Apply a next-page result under the same ticket rules as a full fetch.
    pub fn complete_page_fetch(
        &self,
        ticket: FetchTicket,
        page: CachePayload,
    ) -> Result<FetchOutcome, CacheError> {
        let (outcome, changes) = {
            let mut state = rw_write(&self.state, SOURCE, "complete_page_fetch");
            match self.settle_ticket(&mut state, &ticket) {
                Err((reason, changes)) => (FetchOutcome::Discarded { reason }, changes),
                Ok(()) => {
                    let (version, changes) = self.append_locked(&mut state, &ticket.key, page)?;
                    (FetchOutcome::Applied { version }, changes)
                }
            }
        };
        self.log_outcome(&ticket, outcome);
        self.notify(changes);
        Ok(outcome)
    }

    /// Give up on a failed fetch; a refetching entry goes back to stale.
    pub fn fail_fetch(&self, ticket: &FetchTicket) -> bool {
        let change = {
            let mut state = rw_write(&self.state, SOURCE, "fail_fetch");
            if !matches!(ticket_state(&state, ticket), TicketState::Current) {
                return false;
            }
            state.in_flight.remove(&ticket.key);
            settle_refetching(&mut state, &ticket.key)
        };
        debug!(key = %ticket.key, ticket = ticket.id, outcome = "failed", "Fetch failed");
        if let Some(change) = change {
            self.notify(vec![change]);
        }
        true
    }

    /// Cancel whatever fetch is in flight for `key`. Returns whether one was.
    pub fn cancel_fetch(&self, key: &QueryKey) -> bool {
        let (cancelled, change) = {
            let mut state = rw_write(&self.state, SOURCE, "cancel_fetch");
            let cancelled = state.in_flight.remove(key).is_some();
            let change = if cancelled {
                settle_refetching(&mut state, key)
            } else {
                None
            };
            (cancelled, change)
        };
        if cancelled {
            debug!(key = %key, "Cancelled in-flight fetch");
        }
        if let Some(change) = change {
            self.notify(vec![change]);
        }
        cancelled
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Consume a ticket. On rejection, returns the reason plus any staleness
    /// change the rejection caused.
    fn settle_ticket(
        &self,
        state: &mut StoreState,
        ticket: &FetchTicket,
    ) -> Result<(), (DiscardReason, Vec<CacheChange>)> {
        let reason = match ticket_state(state, ticket) {
            TicketState::Current => {
                state.in_flight.remove(&ticket.key);
                let version = state
                    .entries
                    .peek(&ticket.key)
                    .map(|entry| entry.version)
                    .unwrap_or(0);
                if version == ticket.version {
                    return Ok(());
                }
                DiscardReason::Superseded
            }
            TicketState::Superseded => DiscardReason::Superseded,
            TicketState::Cancelled => DiscardReason::Cancelled,
        };
        counter!(METRIC_FETCH_DISCARDED).increment(1);
        let changes = if state.in_flight.contains_key(&ticket.key) {
            Vec::new()
        } else {
            settle_refetching(state, &ticket.key).into_iter().collect()
        };
        Err((reason, changes))
    }

    fn append_locked(
        &self,
        state: &mut StoreState,
        key: &QueryKey,
        page: CachePayload,
    ) -> Result<(Epoch, Vec<CacheChange>), CacheError> {
        let Some(current) = state.entries.peek(key) else {
            return Err(CacheError::PatchOnMissingKey { key: key.clone() });
        };
        let payload = current
            .payload
            .append_pages(page)
            .map_err(|error| match error {
                AppendError::Mismatch { received } => CacheError::PayloadMismatch {
                    key: key.clone(),
                    received,
                },
                AppendError::Pagination(source) => CacheError::Pagination {
                    key: key.clone(),
                    source,
                },
            })?;
        let staleness = current.staleness.settled();
        let fetched_at = current.fetched_at;
        Ok(self.write_entry(
            state,
            key.clone(),
            Arc::new(payload),
            staleness,
            fetched_at,
            ChangeKind::Set,
        ))
    }

    /// Write an entry under a fresh epoch, maintaining the resource index and
    /// evicting the least-recently-used entry when over capacity.
    fn write_entry(
        &self,
        state: &mut StoreState,
        key: QueryKey,
        payload: Arc<CachePayload>,
        staleness: Staleness,
        fetched_at: OffsetDateTime,
        kind: ChangeKind,
    ) -> (Epoch, Vec<CacheChange>) {
        let version = self.next_epoch();
        self.index.register(&key, payload.resource_refs());

        let mut changes = vec![CacheChange {
            key: key.clone(),
            kind,
            version,
            staleness: Some(staleness),
        }];

        let entry = CacheEntry {
            key: key.clone(),
            payload,
            fetched_at,
            staleness,
            version,
        };
        if let Some((evicted_key, evicted)) = state.entries.push(key.clone(), entry)
            && evicted_key != key
        {
            counter!(METRIC_STORE_EVICT).increment(1);
            debug!(key = %evicted_key, version = evicted.version, "Evicted cache entry");
            state.in_flight.remove(&evicted_key);
            self.index.unregister(&evicted_key);
            changes.push(removed_change(evicted_key, evicted.version));
        }

        trace!(key = %key, version, kind = ?kind, staleness = staleness.as_str(), "Cache entry written");
        (version, changes)
    }

    fn log_outcome(&self, ticket: &FetchTicket, outcome: FetchOutcome) {
        match outcome {
            FetchOutcome::Applied { version } => {
                debug!(key = %ticket.key, ticket = ticket.id, version, outcome = "applied", "Fetch applied");
            }
            FetchOutcome::Discarded { reason } => {
                debug!(
                    key = %ticket.key,
                    ticket = ticket.id,
                    started_version = ticket.version,
                    outcome = "discarded",
                    reason = ?reason,
                    "Fetch result discarded"
                );
            }
        }
    }
}

fn ticket_state(state: &StoreState, ticket: &FetchTicket) -> TicketState {
    match state.in_flight.get(&ticket.key) {
        Some(id) if *id == ticket.id => TicketState::Current,
        Some(_) => TicketState::Superseded,
        None => {
            let version = state
                .entries
                .peek(&ticket.key)
                .map(|entry| entry.version)
                .unwrap_or(0);
            if version == ticket.version {
                TicketState::Cancelled
            } else {
                TicketState::Superseded
            }
        }
    }
}

/// Move a refetching entry back to stale.
fn settle_refetching(state: &mut StoreState, key: &QueryKey) -> Option<CacheChange> {
    let entry = state.entries.peek_mut(key)?;
    if entry.staleness != Staleness::Refetching {
        return None;
    }
    entry.staleness = Staleness::Stale;
    Some(CacheChange {
        key: key.clone(),
        kind: ChangeKind::RefetchAbandoned,
        version: entry.version,
        staleness: Some(Staleness::Stale),
    })
}

fn removed_change(key: QueryKey, version: Epoch) -> CacheChange {
    CacheChange {
        key,
        kind: ChangeKind::Removed,
        version,
        staleness: None,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use time::macros::datetime;

    use super::*;
    use crate::application::filters::ApplicationFilter;
    use crate::cache::keys::{Resource, Scope};
    use crate::domain::entities::{ApplicationRecord, DashboardSummary};
    use crate::domain::pagination::{Page, PagedList};
    use crate::domain::types::{ApplicationId, ApplicationStatus, JobId};

    fn store() -> CacheStore {
        CacheStore::new(&CacheConfig::default())
    }

    fn application(id: i64) -> ApplicationRecord {
        ApplicationRecord {
            id: ApplicationId(id),
            job_id: JobId(id * 10),
            status: ApplicationStatus::Pending,
            applied_at: datetime!(2026-03-01 09:00 UTC),
            note: None,
        }
    }

    fn page(ids: &[i64], current_page: u32, has_next: bool) -> CachePayload {
        CachePayload::Applications(PagedList::first(Page::new(
            ids.iter().copied().map(application).collect(),
            current_page,
            has_next,
            9,
        )))
    }

    fn dashboard(pending: u64) -> CachePayload {
        CachePayload::Dashboard(DashboardSummary {
            pending,
            ..Default::default()
        })
    }

    fn recorded(store: &CacheStore, key: &QueryKey) -> (Arc<Mutex<Vec<ChangeKind>>>, Subscription) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let subscription = store.subscribe(
            key.clone(),
            Arc::new(move |change: &CacheChange| sink.lock().unwrap().push(change.kind)),
        );
        (seen, subscription)
    }

    #[test]
    fn set_then_get_is_fresh_with_rising_versions() {
        let store = store();
        let key = QueryKey::dashboard();

        let first = store.set(key.clone(), dashboard(1));
        let second = store.set(key.clone(), dashboard(2));

        let entry = store.get(&key).expect("entry");
        assert!(second > first);
        assert_eq!(entry.version, second);
        assert_eq!(entry.staleness, Staleness::Fresh);
        assert_eq!(*entry.payload, dashboard(2));
    }

    #[test]
    fn patch_on_missing_key_is_an_error() {
        let store = store();
        let result = store.patch(&QueryKey::dashboard(), |payload| payload.clone());
        assert!(matches!(result, Err(CacheError::PatchOnMissingKey { .. })));
    }

    #[test]
    fn mark_stale_is_idempotent_and_keeps_refetching() {
        let store = store();
        let pending = QueryKey::application_list(&ApplicationFilter::with_status(
            ApplicationStatus::Pending,
        ));
        let all = QueryKey::application_list(&ApplicationFilter::default());
        store.set(pending.clone(), page(&[1], 1, false));
        store.set(all.clone(), page(&[1, 2], 1, false));

        let ticket = store.begin_fetch(&all);
        assert!(store.mark_refetching(&ticket));

        let (seen, _subscription) = recorded(&store, &pending);
        let pattern = KeyPattern::category(Resource::Application, Scope::List);
        let matched = store.mark_stale(&pattern);
        assert_eq!(matched.len(), 2);
        assert_eq!(store.staleness(&pending), Some(Staleness::Stale));
        assert_eq!(store.staleness(&all), Some(Staleness::Refetching));

        let version = store.version(&pending);
        store.mark_stale(&pattern);
        assert_eq!(store.version(&pending), version);
        assert_eq!(*seen.lock().unwrap(), vec![ChangeKind::MarkedStale]);
    }

    #[test]
    fn fetch_started_before_a_write_is_discarded() {
        let store = store();
        let key = QueryKey::dashboard();
        store.set(key.clone(), dashboard(1));

        let ticket = store.begin_fetch(&key);
        store
            .patch(&key, |_| dashboard(0))
            .expect("entry exists");

        let outcome = store.complete_fetch(ticket, dashboard(1));
        assert_eq!(
            outcome,
            FetchOutcome::Discarded {
                reason: DiscardReason::Superseded
            }
        );
        assert_eq!(*store.peek(&key).expect("entry").payload, dashboard(0));
    }

    #[test]
    fn cancelled_fetch_is_discarded_and_entry_settles_stale() {
        let store = store();
        let key = QueryKey::dashboard();
        store.set(key.clone(), dashboard(1));

        let ticket = store.begin_fetch(&key);
        store.mark_refetching(&ticket);
        assert_eq!(store.staleness(&key), Some(Staleness::Refetching));

        assert!(store.cancel_fetch(&key));
        assert_eq!(store.staleness(&key), Some(Staleness::Stale));
        assert!(!store.mark_refetching(&ticket));

        let outcome = store.complete_fetch(ticket, dashboard(9));
        assert_eq!(
            outcome,
            FetchOutcome::Discarded {
                reason: DiscardReason::Cancelled
            }
        );
        assert_eq!(*store.peek(&key).expect("entry").payload, dashboard(1));
    }

    #[test]
    fn newer_ticket_supersedes_older() {
        let store = store();
        let key = QueryKey::dashboard();

        let older = store.begin_fetch(&key);
        let newer = store.begin_fetch(&key);

        assert!(!store.complete_fetch(older, dashboard(1)).is_applied());
        assert!(store.complete_fetch(newer, dashboard(2)).is_applied());
        assert_eq!(*store.peek(&key).expect("entry").payload, dashboard(2));
        assert!(!store.is_fetching(&key));
    }

    #[test]
    fn failed_fetch_returns_entry_to_stale() {
        let store = store();
        let key = QueryKey::dashboard();
        store.set(key.clone(), dashboard(1));

        let ticket = store.begin_fetch(&key);
        store.mark_refetching(&ticket);
        assert!(store.fail_fetch(&ticket));
        assert_eq!(store.staleness(&key), Some(Staleness::Stale));
    }

    #[test]
    fn restore_returns_exact_payload_and_staleness() {
        let store = store();
        let key = QueryKey::application_detail(ApplicationId(1));
        store.set(key.clone(), CachePayload::Application(application(1)));
        store.mark_stale(&KeyPattern::exact(key.clone()));

        let captured = store.capture(std::slice::from_ref(&key));
        store
            .patch(&key, |_| {
                let mut record = application(1);
                record.status = ApplicationStatus::Withdrawn;
                CachePayload::Application(record)
            })
            .expect("patch");

        store.restore(&captured);
        let entry = store.peek(&key).expect("entry");
        assert_eq!(entry.payload, captured[0].payload);
        assert_eq!(entry.staleness, Staleness::Stale);
        assert_eq!(entry.fetched_at, captured[0].fetched_at);
    }

    #[test]
    fn guarded_restore_only_undoes_its_own_write() {
        let store = store();
        let ours = QueryKey::application_detail(ApplicationId(1));
        let theirs = QueryKey::application_detail(ApplicationId(2));
        store.set(ours.clone(), CachePayload::Application(application(1)));
        store.set(theirs.clone(), CachePayload::Application(application(2)));

        let captured = store.capture(&[ours.clone(), theirs.clone()]);
        let withdrawn = |id| {
            let mut record = application(id);
            record.status = ApplicationStatus::Withdrawn;
            CachePayload::Application(record)
        };
        let mut expected = HashMap::new();
        expected.insert(ours.clone(), store.patch(&ours, |_| withdrawn(1)).expect("patch"));
        expected.insert(theirs.clone(), store.patch(&theirs, |_| withdrawn(2)).expect("patch"));
        // Another writer lands on the second key after our patch.
        store.set(theirs.clone(), withdrawn(2));

        let restoration = store.restore_unchanged(&captured, &expected);
        assert_eq!(restoration.restored, vec![ours.clone()]);
        assert_eq!(restoration.diverged, vec![theirs.clone()]);

        assert_eq!(store.peek(&ours).expect("entry").payload, captured[0].payload);
        assert_eq!(store.staleness(&ours), Some(Staleness::Fresh));
        let diverged = store.peek(&theirs).expect("entry");
        assert_eq!(*diverged.payload, withdrawn(2));
        assert_eq!(diverged.staleness, Staleness::Stale);
    }

    #[test]
    fn guarded_restore_leaves_a_pending_fetch_alone() {
        let store = store();
        let key = QueryKey::dashboard();
        store.set(key.clone(), dashboard(1));
        let captured = store.capture(std::slice::from_ref(&key));
        let version = store.patch(&key, |_| dashboard(0)).expect("patch");
        let ticket = store.begin_fetch(&key);

        let restoration =
            store.restore_unchanged(&captured, &HashMap::from([(key.clone(), version)]));
        assert_eq!(restoration.diverged, vec![key.clone()]);
        assert!(store.is_fetching(&key));
        assert!(store.complete_fetch(ticket, dashboard(2)).is_applied());
        assert_eq!(*store.peek(&key).expect("entry").payload, dashboard(2));
    }

    #[test]
    fn page_append_and_full_refetch() {
        let store = store();
        let key = QueryKey::application_list(&ApplicationFilter::default());
        store.set(key.clone(), page(&[1, 2, 3], 1, true));
        store.append_page(&key, page(&[4, 5, 6], 2, true)).expect("page 2");

        let skipped = store.append_page(&key, page(&[10], 4, false));
        assert!(matches!(skipped, Err(CacheError::Pagination { .. })));

        let ticket = store.begin_fetch(&key);
        let outcome = store
            .complete_page_fetch(ticket, page(&[7, 8, 9], 3, false))
            .expect("page 3");
        assert!(outcome.is_applied());

        let entry = store.peek(&key).expect("entry");
        let CachePayload::Applications(list) = entry.payload.as_ref() else {
            panic!("list payload expected");
        };
        assert_eq!(list.page_count(), 3);

        let ticket = store.begin_fetch(&key);
        store.complete_fetch(ticket, page(&[1, 2, 3], 1, true));
        let entry = store.peek(&key).expect("entry");
        let CachePayload::Applications(list) = entry.payload.as_ref() else {
            panic!("list payload expected");
        };
        assert_eq!(list.page_count(), 1);
        assert!(store.keys_for_resource(&ResourceRef::Application(ApplicationId(7))).is_empty());
    }

    #[test]
    fn index_tracks_every_key_holding_a_resource() {
        let store = store();
        let list = QueryKey::application_list(&ApplicationFilter::default());
        let detail = QueryKey::application_detail(ApplicationId(2));
        store.set(list.clone(), page(&[1, 2], 1, false));
        store.set(detail.clone(), CachePayload::Application(application(2)));

        let mut expected = vec![list, detail.clone()];
        expected.sort();
        assert_eq!(
            store.keys_for_resource(&ResourceRef::Application(ApplicationId(2))),
            expected
        );

        store.remove(&detail);
        assert_eq!(
            store
                .keys_for_resource(&ResourceRef::Application(ApplicationId(2)))
                .len(),
            1
        );
    }

    #[test]
    fn eviction_unregisters_and_notifies() {
        let store = CacheStore::new(&CacheConfig {
            max_entries: 1,
            ..Default::default()
        });
        let first = QueryKey::application_detail(ApplicationId(1));
        store.set(first.clone(), CachePayload::Application(application(1)));
        let (seen, _subscription) = recorded(&store, &first);

        store.set(QueryKey::dashboard(), dashboard(0));

        assert!(!store.contains(&first));
        assert!(
            store
                .keys_for_resource(&ResourceRef::Application(ApplicationId(1)))
                .is_empty()
        );
        assert_eq!(*seen.lock().unwrap(), vec![ChangeKind::Removed]);
    }

    #[test]
    fn clear_removes_everything_and_versions_keep_rising() {
        let store = store();
        let key = QueryKey::dashboard();
        let before = store.set(key.clone(), dashboard(1));
        let (seen, _subscription) = recorded(&store, &key);

        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.version(&key), 0);

        let after = store.set(key.clone(), dashboard(1));
        assert!(after > before);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![ChangeKind::Removed, ChangeKind::Set]
        );
    }
}
