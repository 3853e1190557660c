use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::instrument;
use tracing::warn;
use tracing::Instrument;

use crate::cache::CacheStore;
use crate::cache::FetchJob;
use crate::cache::FetchStart;
use crate::cache::FetchTicket;
use crate::cache::Subscription;
use crate::entry::CacheEntry;
use crate::entry::QueryStatus;
use crate::error::QueryError;
use crate::key::KeyFilter;
use crate::key::QueryKey;
use crate::traits::Fetcher;
use crate::types::FetchMode;
use crate::types::FetchStats;
use crate::types::QueryOptions;

/// Coordinates fetches on top of a [`CacheStore`].
///
/// For every key at most one fetch is in flight at a time: concurrent readers join it instead of issuing their own.
/// When a fetch is superseded, by invalidation or an explicit refetch, only the most recently issued one is allowed
/// to settle the entry.
///
/// Fetches run on spawned tokio tasks, so the client must be used from within a tokio runtime.
pub struct QueryClient<V, E> {
    store: CacheStore<V, E>,
    stats: Arc<Mutex<FetchStats>>,
}

impl<V, E> Clone for QueryClient<V, E> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            stats: Arc::clone(&self.stats),
        }
    }
}

impl<V, E> Default for QueryClient<V, E>
where
    V: Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V, E> QueryClient<V, E>
where
    V: Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::with_store(CacheStore::new())
    }

    pub fn with_store(store: CacheStore<V, E>) -> Self {
        Self {
            store,
            stats: Arc::new(Mutex::new(FetchStats::default())),
        }
    }

    pub fn store(&self) -> &CacheStore<V, E> {
        &self.store
    }

    pub fn stats(&self) -> FetchStats {
        *self.stats.lock()
    }

    /// Mounts an observer of `key`.
    ///
    /// Unless the query is disabled, the observer subscribes to the entry and a fetch is started when the entry has
    /// no data or its data is stale. A fetch already in flight is joined.
    pub fn watch<F>(&self, key: QueryKey, fetcher: F, options: QueryOptions) -> QueryObserver<V, E>
    where
        F: Fetcher<V, E>,
    {
        self.watch_shared(key, Arc::new(fetcher), options)
    }

    pub fn watch_shared(
        &self,
        key: QueryKey,
        fetcher: Arc<dyn Fetcher<V, E>>,
        options: QueryOptions,
    ) -> QueryObserver<V, E> {
        QueryObserver::mount(self.clone(), key, fetcher, options)
    }

    /// Resolves `key` once: fresh cached data is returned as is, otherwise a fetch is started or joined and its
    /// outcome returned. The entry is cached even though nobody subscribes to it.
    pub async fn fetch_query<F>(&self, key: &QueryKey, fetcher: F, options: QueryOptions) -> Result<Arc<V>, QueryError<E>>
    where
        F: Fetcher<V, E>,
    {
        self.fetch_query_shared(key, Arc::new(fetcher), options).await
    }

    #[instrument(level = "debug", skip(self, fetcher, options), fields(key = %key))]
    pub async fn fetch_query_shared(
        &self,
        key: &QueryKey,
        fetcher: Arc<dyn Fetcher<V, E>>,
        options: QueryOptions,
    ) -> Result<Arc<V>, QueryError<E>> {
        if !options.enabled() {
            return Err(QueryError::Disabled(key.clone()));
        }

        self.store.touch(key, &options);

        if let Some(data) = self.fresh_data(key) {
            self.stats.lock().cache_hits += 1;
            self.store.set_fetcher(key, fetcher);
            debug!("served from cache");
            return Ok(data);
        }

        let Some(ticket) = self.request_fetch(key, Some(fetcher), FetchMode::Join)
        else {
            return Err(QueryError::Removed(key.clone()));
        };
        if !ticket.wait().await {
            return Err(QueryError::Removed(key.clone()));
        }

        self.settled_outcome(key).await
    }

    /// Re-runs the stored fetcher of `key`, superseding any fetch in flight, and waits for the outcome. Returns
    /// `None` if the key has never been fetched through this client.
    pub async fn refetch(&self, key: &QueryKey) -> Option<CacheEntry<V, E>> {
        let ticket = self.request_fetch(key, None, FetchMode::Supersede)?;
        ticket.wait().await;
        self.store.get(key)
    }

    /// Reads cached data without fetching.
    pub fn get_query_data(&self, key: &QueryKey) -> Option<Arc<V>> {
        self.store.get(key).and_then(|entry| entry.data().cloned())
    }

    /// Writes `data` into the cache as a successful, freshly fetched result.
    pub fn set_query_data(&self, key: &QueryKey, data: V) {
        self.store.set(key, |entry| entry.succeed(data));
    }

    /// Marks every entry matched by any of `filters` stale and refetches those that have subscribers. Returns the
    /// matched keys.
    pub fn invalidate(&self, filters: &[KeyFilter]) -> Vec<QueryKey> {
        let mut keys = filters
            .iter()
            .flat_map(|filter| self.store.invalidate(filter))
            .collect::<Vec<_>>();
        keys.sort();
        keys.dedup();

        for key in &keys {
            if self.store.subscriber_count(key) > 0 {
                self.request_fetch(key, None, FetchMode::Supersede);
            }
        }

        keys
    }

    /// Awaits a write and, if it succeeded, invalidates `filters`. A failed write leaves the cache untouched.
    pub async fn mutate<O, ME, Fut>(&self, mutation: Fut, filters: &[KeyFilter]) -> Result<O, ME>
    where
        Fut: Future<Output = Result<O, ME>>,
    {
        let output = mutation.await?;
        let invalidated = self.invalidate(filters);
        debug!(invalidated = invalidated.len(), "mutation succeeded");
        Ok(output)
    }

    /// Empties the cache. Observers keep existing but see idle state until remounted.
    pub fn clear(&self) {
        self.store.clear();
    }

    /// Starts a background task evicting unused entries every `interval`. The task ends on its own once the store
    /// is dropped.
    pub fn spawn_gc(&self, interval: Duration) -> JoinHandle<()> {
        let store = self.store.weak();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade()
                else {
                    debug!("cache store dropped, stopping eviction");
                    break;
                };
                store.evict_unused();
            }
        })
    }

    fn fresh_data(&self, key: &QueryKey) -> Option<Arc<V>> {
        let entry = self.store.get(key)?;
        if entry.is_stale() {
            return None;
        }
        entry.data().cloned()
    }

    // Outcome of the last applied fetch, following any fetch that was issued meanwhile.
    async fn settled_outcome(&self, key: &QueryKey) -> Result<Arc<V>, QueryError<E>> {
        loop {
            let entry = self.store.get(key).ok_or_else(|| QueryError::Removed(key.clone()))?;
            match entry.status() {
                QueryStatus::Success => {
                    return entry.data().cloned().ok_or_else(|| QueryError::Removed(key.clone()));
                }
                QueryStatus::Error => {
                    if let Some(err) = entry.error() {
                        return Err(QueryError::Fetch(err.clone()));
                    }
                    return Err(QueryError::Removed(key.clone()));
                }
                QueryStatus::Fetching | QueryStatus::Idle => {
                    let Some(ticket) = self.store.pending(key)
                    else {
                        return Err(QueryError::Abandoned(key.clone()));
                    };
                    if !ticket.wait().await {
                        return Err(QueryError::Removed(key.clone()));
                    }
                }
            }
        }
    }

    fn request_fetch(&self, key: &QueryKey, fetcher: Option<Arc<dyn Fetcher<V, E>>>, mode: FetchMode) -> Option<FetchTicket> {
        match self.store.begin_fetch(key, fetcher, mode) {
            FetchStart::Issued(ticket, job) => {
                self.stats.lock().issued += 1;
                self.spawn_fetch(job);
                Some(ticket)
            }
            FetchStart::Joined(ticket) => {
                self.stats.lock().joined += 1;
                debug!(key = %key, id = ticket.id, "joined in-flight fetch");
                Some(ticket)
            }
            FetchStart::NoFetcher => {
                debug!(key = %key, "no fetcher registered, nothing to fetch");
                None
            }
        }
    }

    fn spawn_fetch(&self, job: FetchJob<V, E>) {
        let store = self.store.clone();
        let stats = Arc::clone(&self.stats);
        let span = tracing::debug_span!("fetch", key = %job.key, id = job.id);

        tokio::spawn(
            async move {
                let FetchJob { key, id, fetcher } = job;
                debug!("fetching");
                // The fetcher runs in a task of its own so that a panic in it still releases the key.
                let run = tokio::spawn({
                    let key = key.clone();
                    async move { fetcher.fetch(&key).await }.in_current_span()
                });
                match run.await {
                    Ok(outcome) => {
                        if !store.settle(&key, id, outcome) {
                            stats.lock().discarded += 1;
                        }
                    }
                    Err(err) => {
                        warn!(error = %err, "fetch ended without a result");
                        store.abandon(&key, id);
                        stats.lock().abandoned += 1;
                    }
                }
            }
            .instrument(span),
        );
    }
}

impl<V, E> Debug for QueryClient<V, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryClient")
            .field("store", &self.store)
            .field("stats", &*self.stats.lock())
            .finish()
    }
}

/// A mounted interest in one query.
///
/// Dropping the observer, or calling [`unmount`](Self::unmount), releases its subscription. The entry stays cached
/// until its retention window runs out.
pub struct QueryObserver<V, E> {
    client:       QueryClient<V, E>,
    key:          QueryKey,
    options:      QueryOptions,
    fetcher:      Arc<dyn Fetcher<V, E>>,
    subscription: Option<Subscription<V, E>>,
    changes:      watch::Receiver<u64>,
}

impl<V, E> QueryObserver<V, E>
where
    V: Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn mount(client: QueryClient<V, E>, key: QueryKey, fetcher: Arc<dyn Fetcher<V, E>>, options: QueryOptions) -> Self {
        let (notify, changes) = watch::channel(0u64);

        if !options.enabled() {
            debug!(key = %key, "query disabled, not subscribing");
            return Self {
                client,
                key,
                options,
                fetcher,
                subscription: None,
                changes,
            };
        }

        let subscription = client.store.subscribe_with(&key, &options, move |_, _| {
            notify.send_modify(|version| *version = version.wrapping_add(1));
        });

        if client.fresh_data(&key).is_some() {
            client.stats.lock().cache_hits += 1;
            client.store.set_fetcher(&key, Arc::clone(&fetcher));
        }
        else {
            client.request_fetch(&key, Some(Arc::clone(&fetcher)), FetchMode::Join);
        }

        Self {
            client,
            key,
            options,
            fetcher,
            subscription: Some(subscription),
            changes,
        }
    }

    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    pub fn options(&self) -> QueryOptions {
        self.options
    }

    pub fn is_enabled(&self) -> bool {
        self.subscription.is_some()
    }

    /// Current state of the query. A disabled query always reports an idle entry, as does a query whose entry was
    /// dropped by [`QueryClient::clear`].
    pub fn state(&self) -> CacheEntry<V, E> {
        if self.subscription.is_none() {
            return CacheEntry::idle();
        }
        self.client.store.get(&self.key).unwrap_or_else(CacheEntry::idle)
    }

    /// Waits for the next change notification. Returns `false` if no notification can arrive anymore.
    pub async fn changed(&mut self) -> bool {
        self.changes.changed().await.is_ok()
    }

    /// Waits until no fetch of the key is in flight and returns the resulting state.
    pub async fn settled(&self) -> CacheEntry<V, E> {
        if self.subscription.is_some() {
            while let Some(ticket) = self.client.store.pending(&self.key) {
                if !ticket.wait().await {
                    break;
                }
            }
        }
        self.state()
    }

    /// Fetches again regardless of freshness. The new fetch supersedes any fetch already in flight.
    pub async fn refetch(&self) -> CacheEntry<V, E> {
        if self.subscription.is_none() {
            return CacheEntry::idle();
        }
        if let Some(ticket) = self
            .client
            .request_fetch(&self.key, Some(Arc::clone(&self.fetcher)), FetchMode::Supersede)
        {
            ticket.wait().await;
        }
        self.state()
    }

    pub fn unmount(self) {
        drop(self);
    }
}

impl<V, E> Debug for QueryObserver<V, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryObserver")
            .field("key", &self.key)
            .field("options", &self.options)
            .field("mounted", &self.subscription.is_some())
            .finish()
    }
}
