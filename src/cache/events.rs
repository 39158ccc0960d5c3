//! Change notifications for subscribed views.
//!
//! Every write to the store produces a `CacheChange` stamped with the epoch
//! of the write. Subscribers register per key; callbacks run after the store
//! has released its locks, so a callback may read the store again.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use tracing::trace;

use super::keys::QueryKey;
use super::store::Staleness;

/// Monotonic write stamp.
///
/// Every `set`, `patch`, page append and restore takes the next epoch from a
/// store-wide counter, which makes epochs strictly increasing per key as well.
/// A fetch records the epoch it started from and may only land if the key
/// still carries that epoch.
pub type Epoch = u64;

/// What happened to an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Authoritative payload written.
    Set,
    /// Optimistic transform applied.
    Patched,
    /// Pre-mutation payload restored after a failed mutation.
    Restored,
    /// Entry flagged stale; payload unchanged.
    MarkedStale,
    /// A refetch for the entry went out.
    Refetching,
    /// A refetch was abandoned; entry is stale again.
    RefetchAbandoned,
    /// Entry removed (clear, explicit removal or eviction).
    Removed,
}

impl ChangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeKind::Set => "set",
            ChangeKind::Patched => "patched",
            ChangeKind::Restored => "restored",
            ChangeKind::MarkedStale => "marked_stale",
            ChangeKind::Refetching => "refetching",
            ChangeKind::RefetchAbandoned => "refetch_abandoned",
            ChangeKind::Removed => "removed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheChange {
    pub key: QueryKey,
    pub kind: ChangeKind,
    pub version: Epoch,
    /// Staleness after the change; `None` once the entry is gone.
    pub staleness: Option<Staleness>,
}

pub type ChangeCallback = Arc<dyn Fn(&CacheChange) + Send + Sync>;

/// Per-key subscriber lists.
pub struct Subscribers {
    by_key: DashMap<QueryKey, Vec<(u64, ChangeCallback)>>,
    next_id: AtomicU64,
}

impl Subscribers {
    pub fn new() -> Self {
        Self {
            by_key: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn subscribe(self: &Arc<Self>, key: QueryKey, callback: ChangeCallback) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.by_key
            .entry(key.clone())
            .or_default()
            .push((id, callback));
        Subscription {
            key,
            id,
            subscribers: Arc::downgrade(self),
        }
    }

    fn unsubscribe(&self, key: &QueryKey, id: u64) {
        let now_empty = match self.by_key.get_mut(key) {
            Some(mut callbacks) => {
                callbacks.retain(|(existing, _)| *existing != id);
                callbacks.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.by_key.remove_if(key, |_, callbacks| callbacks.is_empty());
        }
    }

    /// Invoke every callback registered for the changed key.
    pub fn notify(&self, change: &CacheChange) {
        let callbacks: Vec<ChangeCallback> = match self.by_key.get(&change.key) {
            Some(entry) => entry.iter().map(|(_, callback)| Arc::clone(callback)).collect(),
            None => return,
        };
        trace!(
            key = %change.key,
            kind = change.kind.as_str(),
            version = change.version,
            subscribers = callbacks.len(),
            "Notifying cache subscribers"
        );
        for callback in callbacks {
            callback(change);
        }
    }

    pub fn notify_all(&self, changes: &[CacheChange]) {
        for change in changes {
            self.notify(change);
        }
    }

    pub fn subscriber_count(&self, key: &QueryKey) -> usize {
        self.by_key.get(key).map(|entry| entry.len()).unwrap_or(0)
    }
}

impl Default for Subscribers {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle returned by `subscribe`; dropping it detaches the callback.
#[must_use = "dropping a subscription unsubscribes immediately"]
pub struct Subscription {
    key: QueryKey,
    id: u64,
    subscribers: Weak<Subscribers>,
}

impl Subscription {
    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    /// Detach now rather than at drop.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(subscribers) = self.subscribers.upgrade() {
            subscribers.unsubscribe(&self.key, self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    fn change(key: &QueryKey, kind: ChangeKind) -> CacheChange {
        CacheChange {
            key: key.clone(),
            kind,
            version: 1,
            staleness: Some(Staleness::Fresh),
        }
    }

    #[test]
    fn notify_reaches_only_subscribers_of_the_key() {
        let subscribers = Arc::new(Subscribers::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let dashboard = QueryKey::dashboard();

        let sink = Arc::clone(&seen);
        let _subscription = subscribers.subscribe(
            dashboard.clone(),
            Arc::new(move |change: &CacheChange| sink.lock().unwrap().push(change.kind)),
        );

        subscribers.notify(&change(&dashboard, ChangeKind::Set));
        subscribers.notify(&change(
            &QueryKey::job_detail(crate::domain::types::JobId(1)),
            ChangeKind::Set,
        ));

        assert_eq!(*seen.lock().unwrap(), vec![ChangeKind::Set]);
    }

    #[test]
    fn dropping_the_handle_unsubscribes() {
        let subscribers = Arc::new(Subscribers::new());
        let dashboard = QueryKey::dashboard();

        let subscription = subscribers.subscribe(dashboard.clone(), Arc::new(|_: &CacheChange| {}));
        let second = subscribers.subscribe(dashboard.clone(), Arc::new(|_: &CacheChange| {}));
        assert_eq!(subscribers.subscriber_count(&dashboard), 2);

        subscription.unsubscribe();
        assert_eq!(subscribers.subscriber_count(&dashboard), 1);

        drop(second);
        assert_eq!(subscribers.subscriber_count(&dashboard), 0);
    }

    #[test]
    fn callbacks_may_subscribe_while_being_notified() {
        let subscribers = Arc::new(Subscribers::new());
        let dashboard = QueryKey::dashboard();
        let nested = Arc::new(Mutex::new(Vec::new()));

        let registry = Arc::clone(&subscribers);
        let holder = Arc::clone(&nested);
        let key = dashboard.clone();
        let _outer = subscribers.subscribe(
            dashboard.clone(),
            Arc::new(move |_: &CacheChange| {
                let handle = registry.subscribe(key.clone(), Arc::new(|_: &CacheChange| {}));
                holder.lock().unwrap().push(handle);
            }),
        );

        subscribers.notify(&change(&dashboard, ChangeKind::MarkedStale));
        assert_eq!(subscribers.subscriber_count(&dashboard), 2);
    }
}
