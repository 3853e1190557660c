use std::collections::hash_map;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Weak;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;
use tracing::trace;

use crate::entry::CacheEntry;
use crate::key::KeyFilter;
use crate::key::QueryKey;
use crate::traits::Fetcher;
use crate::types::FetchMode;
use crate::types::QueryOptions;
use crate::types::DEFAULT_GC_TIME;

/// Callback invoked synchronously after an entry changes.
pub type Listener<V, E> = Arc<dyn Fn(&QueryKey, &CacheEntry<V, E>) + Send + Sync>;

// Everything the store knows about one key. Only `entry` is ever visible outside of this module.
struct Slot<V, E> {
    entry:        CacheEntry<V, E>,
    listeners:    Vec<(u64, Listener<V, E>)>,
    fetcher:      Option<Arc<dyn Fetcher<V, E>>>,
    // Id of the only fetch allowed to settle this entry.
    in_flight:    Option<u64>,
    // Id of the last fetch whose outcome was applied. Waiters block on it.
    settled:      watch::Sender<u64>,
    unused_since: Option<Instant>,
}

impl<V, E> Slot<V, E> {
    fn new(gc_time: Duration) -> Self {
        let (settled, _) = watch::channel(0);
        Self {
            entry: CacheEntry::new(Duration::ZERO, gc_time),
            listeners: Vec::new(),
            fetcher: None,
            in_flight: None,
            settled,
            unused_since: Some(Instant::now()),
        }
    }

    // A read without a subscription restarts the retention countdown.
    fn mark_read(&mut self) {
        if self.entry.subscriber_count() == 0 {
            self.unused_since = Some(Instant::now());
        }
    }

    fn is_evictable(&self, now: Instant) -> bool {
        self.entry.subscriber_count() == 0
            && self.in_flight.is_none()
            && self
                .unused_since
                .is_some_and(|since| now.saturating_duration_since(since) >= self.entry.gc_time())
    }
}

struct Shared<V, E> {
    slots:           Mutex<HashMap<QueryKey, Slot<V, E>>>,
    next_id:         AtomicU64,
    default_gc_time: Duration,
}

// A change to deliver once the slot lock is released.
struct Notice<V, E> {
    key:       QueryKey,
    entry:     CacheEntry<V, E>,
    listeners: Vec<Listener<V, E>>,
}

impl<V, E> Notice<V, E>
where
    E: Clone,
{
    fn collect(key: &QueryKey, slot: &Slot<V, E>) -> Option<Self> {
        if slot.listeners.is_empty() {
            return None;
        }
        Some(Self {
            key:       key.clone(),
            entry:     slot.entry.clone(),
            listeners: slot.listeners.iter().map(|(_, l)| Arc::clone(l)).collect(),
        })
    }

    fn deliver(self) {
        for listener in self.listeners {
            listener(&self.key, &self.entry);
        }
    }
}

/// Outcome of asking the store for a fetch of a key.
pub(crate) struct FetchTicket {
    pub(crate) id: u64,
    settled:       watch::Receiver<u64>,
}

impl FetchTicket {
    /// Waits until this fetch, or a fetch that superseded it, has been applied. Returns `false` if the entry was
    /// removed from the store first.
    pub(crate) async fn wait(mut self) -> bool {
        let id = self.id;
        self.settled.wait_for(|applied| *applied >= id).await.is_ok()
    }
}

/// A fetch the caller has to run and report back with [`CacheStore::settle`] or [`CacheStore::abandon`].
pub(crate) struct FetchJob<V, E> {
    pub(crate) key:     QueryKey,
    pub(crate) id:      u64,
    pub(crate) fetcher: Arc<dyn Fetcher<V, E>>,
}

pub(crate) enum FetchStart<V, E> {
    Issued(FetchTicket, FetchJob<V, E>),
    Joined(FetchTicket),
    // There is nothing to fetch with.
    NoFetcher,
}

/// In-memory keyed store of query results.
///
/// The store is a cheap handle; clones share the same entries. It never suspends and never calls a listener while its
/// internal lock is held, so every method can be called again from inside a listener.
pub struct CacheStore<V, E> {
    shared: Arc<Shared<V, E>>,
}

impl<V, E> Clone for CacheStore<V, E> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<V, E> Default for CacheStore<V, E>
where
    V: Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V, E> CacheStore<V, E>
where
    V: Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::with_gc_time(DEFAULT_GC_TIME)
    }

    /// Creates a store whose entries without an explicit retention window are kept for `gc_time` once unused.
    pub fn with_gc_time(gc_time: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                slots:           Mutex::new(HashMap::new()),
                next_id:         AtomicU64::new(1),
                default_gc_time: gc_time,
            }),
        }
    }

    pub(crate) fn weak(&self) -> WeakCacheStore<V, E> {
        WeakCacheStore {
            shared: Arc::downgrade(&self.shared),
        }
    }

    fn new_slot(&self) -> Slot<V, E> {
        Slot::new(self.shared.default_gc_time)
    }

    /// Looks an entry up. No side effects.
    pub fn get(&self, key: &QueryKey) -> Option<CacheEntry<V, E>> {
        self.shared.slots.lock().get(key).map(|slot| slot.entry.clone())
    }

    pub fn contains(&self, key: &QueryKey) -> bool {
        self.shared.slots.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.shared.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.slots.lock().is_empty()
    }

    pub fn keys(&self) -> Vec<QueryKey> {
        let mut keys = self.shared.slots.lock().keys().cloned().collect::<Vec<_>>();
        keys.sort();
        keys
    }

    pub fn subscriber_count(&self, key: &QueryKey) -> usize {
        self.shared
            .slots
            .lock()
            .get(key)
            .map_or(0, |slot| slot.entry.subscriber_count())
    }

    /// Applies `updater` to the entry of `key`, creating the entry if needed, then notifies the key's subscribers.
    ///
    /// The updater runs under the store lock and must not call back into the store; listeners may.
    pub fn set<F>(&self, key: &QueryKey, updater: F)
    where
        F: FnOnce(&mut CacheEntry<V, E>),
    {
        let notice = {
            let mut slots = self.shared.slots.lock();
            let slot = slots.entry(key.clone()).or_insert_with(|| self.new_slot());
            updater(&mut slot.entry);
            Notice::collect(key, slot)
        };

        if let Some(notice) = notice {
            notice.deliver();
        }
    }

    /// Registers `listener` for changes of `key`, leaving the entry's freshness and retention windows alone.
    pub fn subscribe<L>(&self, key: &QueryKey, listener: L) -> Subscription<V, E>
    where
        L: Fn(&QueryKey, &CacheEntry<V, E>) + Send + Sync + 'static,
    {
        self.register(key, None, Arc::new(listener))
    }

    /// Registers `listener` for changes of `key`. The entry adopts the subscriber's freshness window and keeps the
    /// longest retention window requested so far.
    pub fn subscribe_with<L>(&self, key: &QueryKey, options: &QueryOptions, listener: L) -> Subscription<V, E>
    where
        L: Fn(&QueryKey, &CacheEntry<V, E>) + Send + Sync + 'static,
    {
        self.register(key, Some(options), Arc::new(listener))
    }

    fn register(&self, key: &QueryKey, options: Option<&QueryOptions>, listener: Listener<V, E>) -> Subscription<V, E> {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let mut slots = self.shared.slots.lock();
        let slot = self.slot_with(&mut slots, key, options);
        slot.entry.add_subscriber();
        slot.unused_since = None;
        slot.listeners.push((id, listener));

        trace!(key = %key, subscribers = slot.entry.subscriber_count(), "subscribed");

        Subscription {
            shared: Arc::downgrade(&self.shared),
            key: key.clone(),
            id,
            active: true,
        }
    }

    /// Creates the entry if it is missing and records the caller's freshness and retention windows.
    pub(crate) fn touch(&self, key: &QueryKey, options: &QueryOptions) {
        let mut slots = self.shared.slots.lock();
        let slot = self.slot_with(&mut slots, key, Some(options));
        slot.mark_read();
    }

    // A new slot takes the retention window of the options as is; an existing one only ever extends its window.
    fn slot_with<'a>(
        &self,
        slots: &'a mut HashMap<QueryKey, Slot<V, E>>,
        key: &QueryKey,
        options: Option<&QueryOptions>,
    ) -> &'a mut Slot<V, E> {
        let slot = match slots.entry(key.clone()) {
            hash_map::Entry::Occupied(occupied) => {
                let slot = occupied.into_mut();
                if let Some(options) = options {
                    slot.entry.extend_gc_time(options.gc_time());
                }
                slot
            }
            hash_map::Entry::Vacant(vacant) => {
                let gc_time = options.map_or(self.shared.default_gc_time, |options| options.gc_time());
                vacant.insert(Slot::new(gc_time))
            }
        };
        if let Some(options) = options {
            slot.entry.set_stale_time(options.stale_time());
        }
        slot
    }

    /// Marks every entry matched by `filter` as stale, keeping its data, and returns the matched keys.
    pub fn invalidate(&self, filter: &KeyFilter) -> Vec<QueryKey> {
        let (keys, notices) = {
            let mut slots = self.shared.slots.lock();
            let mut keys = Vec::new();
            let mut notices = Vec::new();
            for (key, slot) in slots.iter_mut().filter(|(key, _)| filter.matches(key)) {
                slot.entry.invalidate();
                keys.push(key.clone());
                notices.extend(Notice::collect(key, slot));
            }
            (keys, notices)
        };

        debug!(filter = %filter, matched = keys.len(), "invalidated");

        for notice in notices {
            notice.deliver();
        }

        keys
    }

    /// Removes entries that have had no subscribers for longer than their retention window. Entries with a fetch in
    /// flight are kept.
    pub fn evict_unused(&self) -> usize {
        let now = Instant::now();
        let mut slots = self.shared.slots.lock();
        let before = slots.len();
        slots.retain(|key, slot| {
            let evict = slot.is_evictable(now);
            if evict {
                trace!(key = %key, "evicting unused entry");
            }
            !evict
        });
        let evicted = before - slots.len();
        if evicted > 0 {
            debug!(evicted, remaining = slots.len(), "evicted unused entries");
        }
        evicted
    }

    /// Drops every entry. Outstanding subscriptions are detached and results of fetches still in flight are
    /// discarded on arrival.
    pub fn clear(&self) {
        let dropped = std::mem::take(&mut *self.shared.slots.lock());
        debug!(entries = dropped.len(), "cache cleared");
        // Slots, and their listeners, are dropped here, outside of the lock.
        drop(dropped);
    }

    /// Remembers how to refetch `key`, so that invalidation can refresh it for its subscribers.
    pub(crate) fn set_fetcher(&self, key: &QueryKey, fetcher: Arc<dyn Fetcher<V, E>>) {
        if let Some(slot) = self.shared.slots.lock().get_mut(key) {
            slot.fetcher = Some(fetcher);
        }
    }

    /// Ticket of the fetch currently in flight for `key`, if any.
    pub(crate) fn pending(&self, key: &QueryKey) -> Option<FetchTicket> {
        let slots = self.shared.slots.lock();
        let slot = slots.get(key)?;
        slot.in_flight.map(|id| FetchTicket {
            id,
            settled: slot.settled.subscribe(),
        })
    }

    /// Starts, joins or supersedes a fetch of `key`. When a new fetch is issued the entry switches to
    /// [`Fetching`](crate::entry::QueryStatus::Fetching) and subscribers are notified; the caller must run the
    /// returned job and report its outcome through [`settle`](Self::settle).
    pub(crate) fn begin_fetch(
        &self,
        key: &QueryKey,
        fetcher: Option<Arc<dyn Fetcher<V, E>>>,
        mode: FetchMode,
    ) -> FetchStart<V, E> {
        let (start, notice) = {
            let mut slots = self.shared.slots.lock();
            let slot = slots.entry(key.clone()).or_insert_with(|| self.new_slot());

            if let Some(fetcher) = fetcher {
                slot.fetcher = Some(fetcher);
            }

            match (slot.in_flight, mode) {
                (Some(id), FetchMode::Join) => {
                    let ticket = FetchTicket {
                        id,
                        settled: slot.settled.subscribe(),
                    };
                    return FetchStart::Joined(ticket);
                }
                _ => {
                    let Some(fetcher) = slot.fetcher.clone()
                    else {
                        return FetchStart::NoFetcher;
                    };

                    let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
                    if let Some(previous) = slot.in_flight.replace(id) {
                        debug!(key = %key, previous, id, "superseding in-flight fetch");
                    }
                    slot.entry.begin_fetch();

                    let ticket = FetchTicket {
                        id,
                        settled: slot.settled.subscribe(),
                    };
                    let job = FetchJob {
                        key: key.clone(),
                        id,
                        fetcher,
                    };
                    (FetchStart::Issued(ticket, job), Notice::collect(key, slot))
                }
            }
        };

        if let Some(notice) = notice {
            notice.deliver();
        }

        start
    }

    /// Applies the outcome of fetch `id`. Returns `false` when the result was discarded because the fetch had been
    /// superseded or the entry is gone.
    pub(crate) fn settle(&self, key: &QueryKey, id: u64, outcome: Result<V, E>) -> bool {
        let notice = {
            let mut slots = self.shared.slots.lock();
            let Some(slot) = slots.get_mut(key)
            else {
                debug!(key = %key, id, "entry is gone, dropping fetch result");
                return false;
            };

            if slot.in_flight != Some(id) {
                debug!(key = %key, id, current = ?slot.in_flight, "dropping result of superseded fetch");
                return false;
            }

            match outcome {
                Ok(data) => slot.entry.succeed(data),
                Err(err) => slot.entry.fail(err),
            }
            slot.in_flight = None;
            slot.mark_read();
            slot.settled.send_replace(id);

            Notice::collect(key, slot)
        };

        if let Some(notice) = notice {
            notice.deliver();
        }

        true
    }

    /// Releases fetch `id` that ended without an outcome, e.g. because its fetcher panicked. Waiters are woken and
    /// the entry leaves [`Fetching`](crate::entry::QueryStatus::Fetching) marked stale, so that the next read fetches
    /// again. Returns `false` if the fetch had already been superseded or the entry is gone.
    pub(crate) fn abandon(&self, key: &QueryKey, id: u64) -> bool {
        let notice = {
            let mut slots = self.shared.slots.lock();
            let Some(slot) = slots.get_mut(key)
            else {
                return false;
            };
            if slot.in_flight != Some(id) {
                return false;
            }

            slot.entry.abandon_fetch();
            slot.in_flight = None;
            slot.mark_read();
            slot.settled.send_replace(id);

            Notice::collect(key, slot)
        };

        if let Some(notice) = notice {
            notice.deliver();
        }

        true
    }
}

/// Non-owning handle used by background tasks so that they end once the store is dropped.
pub(crate) struct WeakCacheStore<V, E> {
    shared: Weak<Shared<V, E>>,
}

impl<V, E> WeakCacheStore<V, E> {
    pub(crate) fn upgrade(&self) -> Option<CacheStore<V, E>> {
        self.shared.upgrade().map(|shared| CacheStore { shared })
    }
}

/// Registration handle returned by [`CacheStore::subscribe`]. Dropping it unsubscribes.
#[must_use = "dropping a subscription unsubscribes immediately"]
pub struct Subscription<V, E> {
    shared: Weak<Shared<V, E>>,
    key:    QueryKey,
    id:     u64,
    active: bool,
}

impl<V, E> Subscription<V, E> {
    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !std::mem::replace(&mut self.active, false) {
            return;
        }
        let Some(shared) = self.shared.upgrade()
        else {
            return;
        };

        let removed = {
            let mut slots = shared.slots.lock();
            let Some(slot) = slots.get_mut(&self.key)
            else {
                return;
            };
            let Some(pos) = slot.listeners.iter().position(|(id, _)| *id == self.id)
            else {
                // The store was cleared since we subscribed; this registration no longer exists.
                return;
            };
            let removed = slot.listeners.remove(pos);
            if slot.entry.remove_subscriber() == 0 {
                slot.unused_since = Some(Instant::now());
            }
            trace!(key = %self.key, subscribers = slot.entry.subscriber_count(), "unsubscribed");
            removed
        };

        // The listener may own resources whose drop should not happen under the lock.
        drop(removed);
    }
}

impl<V, E> Drop for Subscription<V, E> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<V, E> Debug for Subscription<V, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .field("id", &self.id)
            .field("active", &self.active)
            .finish()
    }
}

impl<V, E> Debug for CacheStore<V, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("entries", &self.shared.slots.lock().len())
            .finish()
    }
}
