use std::future::Future;

use async_trait::async_trait;

use crate::error::ApiError;
use crate::key::QueryKey;

/// Loads the value cached under a key. This is the only place the query coordinator suspends.
///
/// Any `Fn(QueryKey) -> impl Future<Output = Result<V, E>>` closure is a fetcher:
///
/// ```ignore
/// let fetcher = move |_key: QueryKey| {
///     let http = http.clone();
///     async move { http.send_json(&Operation::ListCategories.describe()?).await }
/// };
/// ```
#[async_trait]
pub trait Fetcher<V, E>: Send + Sync + 'static
where
    V: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    async fn fetch(&self, key: &QueryKey) -> Result<V, E>;
}

#[async_trait]
impl<V, E, F, Fut> Fetcher<V, E> for F
where
    V: Send + Sync + 'static,
    E: Send + Sync + 'static,
    F: Fn(QueryKey) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<V, E>> + Send + 'static,
{
    async fn fetch(&self, key: &QueryKey) -> Result<V, E> {
        (self)(key.clone()).await
    }
}

/// Performs a write against the backend.
#[async_trait]
pub trait MutationFn<I, O, E>: Send + Sync + 'static
where
    I: Send + 'static,
    O: Send + 'static,
    E: Send + 'static,
{
    async fn call(&self, input: I) -> Result<O, E>;
}

#[async_trait]
impl<I, O, E, F, Fut> MutationFn<I, O, E> for F
where
    I: Send + 'static,
    O: Send + 'static,
    E: Send + 'static,
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<O, E>> + Send + 'static,
{
    async fn call(&self, input: I) -> Result<O, E> {
        (self)(input).await
    }
}

/// Client-local persistent storage of the auth token.
pub trait TokenStore: Send + Sync + 'static {
    fn token(&self) -> Option<String>;
    fn store(&self, token: &str) -> Result<(), ApiError>;
    fn clear(&self);

    fn has_token(&self) -> bool {
        self.token().is_some()
    }
}
