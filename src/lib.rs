//! # cafe-query
//!
//! Client-side data access for the coffee-shop storefront: a REST client for its backend and a query cache that
//! decides when data is fetched, shared between views, and refreshed after a write.
//!
//! # The Basics
//!
//! The crate is layered, leaves first:
//!
//! - [`HttpClient`] sends [`RequestDescriptor`]s produced by the [endpoint catalog](endpoint) with a bearer token
//!   taken from a [`TokenStore`]. A 401 response clears the token.
//! - [`CacheStore`] keeps one [`CacheEntry`] per [`QueryKey`], with subscriptions, invalidation and retention based
//!   eviction. It never suspends.
//! - [`QueryClient`] serves cached data, fetches stale or missing data in the background, collapses concurrent fetches
//!   of a key into one, and lets only the most recently issued fetch settle an entry.
//! - [`Mutation`] runs a write and, when it succeeds, invalidates the keys it declares. Invalidated keys that still
//!   have subscribers are refetched right away.
//! - [`Storefront`] ties it all together for the storefront's own resources: categories, posts (products) and the
//!   current user.
//!
//! The cache core is generic over the cached value and error types and can be used without the storefront layer:
//!
//! ```ignore
//! let client = QueryClient::<String, MyError>::new();
//! let observer = client.watch(
//!     query_key!["greeting", 1],
//!     |_key: QueryKey| async { Ok::<_, MyError>("hello".to_string()) },
//!     QueryOptions::fresh_for(Duration::from_secs(60)),
//! );
//! let state = observer.settled().await;
//! assert_eq!(state.data().map(|d| d.as_str()), Some("hello"));
//! ```
//!
//! # Freshness And Retention
//!
//! Data is fresh for the `stale_time` of the query that last subscribed to or fetched it. Reading fresh data never
//! touches the network; reading stale data returns it immediately and refreshes it in the background. Invalidation
//! makes data stale without dropping it, so views never flash empty.
//!
//! An entry nobody subscribes to is kept for its `gc_time` and then becomes evictable, see
//! [`CacheStore::evict_unused`] and [`QueryClient::spawn_gc`].
//!
//! # Concurrency
//!
//! Everything is `Send + Sync`. Fetches run as tokio tasks; the store lock is never held across an await point or
//! while listeners run, so listeners may call back into the store.

pub mod cache;
pub mod dashboard;
pub mod endpoint;
pub mod entry;
pub mod error;
pub mod http;
pub mod key;
pub mod mutation;
pub mod query;
pub mod schema;
pub mod storefront;
pub mod token;
pub mod traits;
pub mod types;

#[doc(inline)]
pub use cache::CacheStore;
#[doc(inline)]
pub use cache::Subscription;
#[doc(inline)]
pub use endpoint::Operation;
#[doc(inline)]
pub use endpoint::RequestDescriptor;
#[doc(inline)]
pub use entry::CacheEntry;
#[doc(inline)]
pub use error::ApiError;
#[doc(inline)]
pub use error::QueryError;
#[doc(inline)]
pub use http::HttpClient;
#[doc(inline)]
pub use http::HttpConfig;
#[doc(inline)]
pub use key::KeyFilter;
#[doc(inline)]
pub use key::QueryKey;
#[doc(inline)]
pub use mutation::Mutation;
#[doc(inline)]
pub use query::QueryClient;
#[doc(inline)]
pub use query::QueryObserver;
#[doc(inline)]
pub use storefront::Storefront;
#[doc(inline)]
pub use traits::Fetcher;
#[doc(inline)]
pub use traits::TokenStore;

pub mod prelude {
    pub use crate::cache::CacheStore;
    pub use crate::entry::CacheEntry;
    pub use crate::entry::QueryStatus;
    pub use crate::error::ApiError;
    pub use crate::error::QueryError;
    pub use crate::key::KeyFilter;
    pub use crate::key::KeyPart;
    pub use crate::key::QueryKey;
    pub use crate::mutation::Mutation;
    pub use crate::query::QueryClient;
    pub use crate::query::QueryObserver;
    pub use crate::query_key;
    pub use crate::traits::*;
    pub use crate::types::*;
}

/// Builds a [`QueryKey`](crate::key::QueryKey) from anything convertible into a
/// [`KeyPart`](crate::key::KeyPart).
///
/// ```ignore
/// let key = query_key!["posts", "category", 5];
/// ```
#[macro_export]
macro_rules! query_key {
    ($($part:expr),* $(,)?) => {
        $crate::key::QueryKey::new(vec![$($crate::key::KeyPart::from($part)),*])
    };
}
