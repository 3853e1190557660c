use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::types::DEFAULT_GC_TIME;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    Idle,
    Fetching,
    Success,
    Error,
}

/// Snapshot of a cached query result.
///
/// The cache store owns the authoritative copy; everything handed out to callers and listeners is a cheap clone with
/// the payload behind an `Arc`.
pub struct CacheEntry<V, E> {
    data:             Option<Arc<V>>,
    error:            Option<E>,
    status:           QueryStatus,
    fetched_at:       Option<Instant>,
    stale_time:       Duration,
    gc_time:          Duration,
    subscriber_count: usize,
    invalidated:      bool,
}

impl<V, E> CacheEntry<V, E> {
    pub(crate) fn new(stale_time: Duration, gc_time: Duration) -> Self {
        Self {
            data: None,
            error: None,
            status: QueryStatus::Idle,
            fetched_at: None,
            stale_time,
            gc_time,
            subscriber_count: 0,
            invalidated: false,
        }
    }

    /// What a disabled query reports.
    pub fn idle() -> Self {
        Self::new(Duration::ZERO, DEFAULT_GC_TIME)
    }

    pub fn data(&self) -> Option<&Arc<V>> {
        self.data.as_ref()
    }

    pub fn error(&self) -> Option<&E> {
        self.error.as_ref()
    }

    pub fn status(&self) -> QueryStatus {
        self.status
    }

    pub fn fetched_at(&self) -> Option<Instant> {
        self.fetched_at
    }

    pub fn stale_time(&self) -> Duration {
        self.stale_time
    }

    pub fn gc_time(&self) -> Duration {
        self.gc_time
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriber_count
    }

    pub fn is_invalidated(&self) -> bool {
        self.invalidated
    }

    pub fn is_fetching(&self) -> bool {
        self.status == QueryStatus::Fetching
    }

    pub fn is_success(&self) -> bool {
        self.status == QueryStatus::Success
    }

    pub fn is_error(&self) -> bool {
        self.status == QueryStatus::Error
    }

    /// True until the first fetch has produced data.
    pub fn is_loading(&self) -> bool {
        self.data.is_none() && self.status == QueryStatus::Fetching
    }

    pub fn is_stale(&self) -> bool {
        self.is_stale_at(Instant::now())
    }

    pub fn is_stale_at(&self, now: Instant) -> bool {
        match self.fetched_at {
            _ if self.invalidated => true,
            Some(fetched_at) => now.saturating_duration_since(fetched_at) >= self.stale_time,
            None => true,
        }
    }

    /// Stores a successful result. Clears the error and the invalidation mark.
    pub fn succeed(&mut self, data: V) {
        self.succeed_shared(Arc::new(data));
    }

    pub(crate) fn succeed_shared(&mut self, data: Arc<V>) {
        self.data = Some(data);
        self.error = None;
        self.status = QueryStatus::Success;
        self.fetched_at = Some(Instant::now());
        self.invalidated = false;
    }

    /// Stores a failed result. Previously fetched data stays readable.
    pub fn fail(&mut self, error: E) {
        self.error = Some(error);
        self.status = QueryStatus::Error;
    }

    pub(crate) fn begin_fetch(&mut self) {
        self.status = QueryStatus::Fetching;
    }

    // Falls back to the state before the fetch began, as far as it can be told from the entry.
    pub(crate) fn abandon_fetch(&mut self) {
        self.status = match (&self.error, &self.data) {
            (Some(_), _) => QueryStatus::Error,
            (None, Some(_)) => QueryStatus::Success,
            (None, None) => QueryStatus::Idle,
        };
        self.invalidated = true;
    }

    pub(crate) fn invalidate(&mut self) {
        self.invalidated = true;
    }

    pub(crate) fn set_stale_time(&mut self, stale_time: Duration) {
        self.stale_time = stale_time;
    }

    pub(crate) fn extend_gc_time(&mut self, gc_time: Duration) {
        self.gc_time = self.gc_time.max(gc_time);
    }

    pub(crate) fn add_subscriber(&mut self) {
        self.subscriber_count += 1;
    }

    pub(crate) fn remove_subscriber(&mut self) -> usize {
        self.subscriber_count = self.subscriber_count.saturating_sub(1);
        self.subscriber_count
    }
}

impl<V, E> Clone for CacheEntry<V, E>
where
    E: Clone,
{
    fn clone(&self) -> Self {
        Self {
            data:             self.data.clone(),
            error:            self.error.clone(),
            status:           self.status,
            fetched_at:       self.fetched_at,
            stale_time:       self.stale_time,
            gc_time:          self.gc_time,
            subscriber_count: self.subscriber_count,
            invalidated:      self.invalidated,
        }
    }
}

impl<V, E> Debug for CacheEntry<V, E>
where
    V: Debug,
    E: Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEntry")
            .field("status", &self.status)
            .field("data", &self.data)
            .field("error", &self.error)
            .field("fetched_at", &self.fetched_at)
            .field("stale_time", &self.stale_time)
            .field("subscriber_count", &self.subscriber_count)
            .field("invalidated", &self.invalidated)
            .finish()
    }
}
