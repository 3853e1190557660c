use std::time::Duration;

use fieldx::fxstruct;

/// Retention window applied when nobody asks for a different one.
pub const DEFAULT_GC_TIME: Duration = Duration::from_secs(5 * 60);

/// Per-subscription query settings.
///
/// ```ignore
/// let options = QueryOptions::builder()
///     .stale_time(Duration::from_secs(300))
///     .gc_time(Duration::from_secs(600))
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[fxstruct(no_new, builder, get(copy))]
pub struct QueryOptions {
    /// How long fetched data counts as fresh. Zero means every read is stale.
    #[fieldx(default(Duration::ZERO))]
    stale_time: Duration,

    /// How long an entry without subscribers is retained before it becomes evictable.
    #[fieldx(default(DEFAULT_GC_TIME))]
    gc_time: Duration,

    /// A disabled query neither subscribes nor fetches.
    #[fieldx(default(true))]
    enabled: bool,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self {
            stale_time: Duration::ZERO,
            gc_time:    DEFAULT_GC_TIME,
            enabled:    true,
        }
    }

    pub fn fresh_for(stale_time: Duration) -> Self {
        Self {
            stale_time,
            ..Self::new()
        }
    }

    pub fn retained_for(mut self, gc_time: Duration) -> Self {
        self.gc_time = gc_time;
        self
    }

    pub fn enabled_if(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// How a fetch request treats a fetch that is already in flight for the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// Join the in-flight fetch instead of issuing another one.
    Join,
    /// Issue a new fetch; the in-flight one loses its right to settle the entry.
    Supersede,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MutationStatus {
    #[default]
    Idle,
    Pending,
    Success,
    Error,
}

/// Counters of the query coordinator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchStats {
    /// Fetches actually handed to a fetcher.
    pub issued:     u64,
    /// Requests that joined a fetch already in flight.
    pub joined:     u64,
    /// Results dropped on arrival because a newer fetch had been issued or the entry was gone.
    pub discarded:  u64,
    /// Fetches that ended without a result, e.g. because the fetcher panicked.
    pub abandoned:  u64,
    /// Reads answered from fresh cached data.
    pub cache_hits: u64,
}

impl FetchStats {
    /// Share of fetch requests that were collapsed into an in-flight fetch.
    pub fn dedup_ratio(&self) -> f64 {
        let total = self.issued + self.joined;
        if total == 0 {
            0.0
        }
        else {
            self.joined as f64 / total as f64
        }
    }
}
