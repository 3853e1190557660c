use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;

use crate::key::QueryKey;

/// Failure of a query as seen through the generic coordinator.
#[derive(Debug, Clone, Error)]
pub enum QueryError<E> {
    #[error("{0}")]
    Fetch(E),
    #[error("query {0} is disabled")]
    Disabled(QueryKey),
    #[error("query {0} was removed from the cache before its fetch settled")]
    Removed(QueryKey),
    /// The fetch ended without producing a result, e.g. because the fetcher panicked.
    #[error("fetch of query {0} ended without a result")]
    Abandoned(QueryKey),
}

impl<E> QueryError<E> {
    pub fn fetch_error(&self) -> Option<&E> {
        match self {
            Self::Fetch(err) => Some(err),
            _ => None,
        }
    }
}

/// Everything that can go wrong talking to the storefront backend.
///
/// Errors end up cached next to query results and are handed to every subscriber, hence `Clone` and the `Arc`
/// around foreign error types.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// No response was received.
    #[error("network error: {0}")]
    Network(Arc<reqwest::Error>),

    /// The backend rejected the credential. The stored token has already been cleared.
    #[error("unauthorized")]
    Unauthorized,

    #[error("validation failed: {message}")]
    Validation {
        message: String,
        errors:  BTreeMap<String, Vec<String>>,
    },

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// The response body does not match the schema of the endpoint.
    #[error("unexpected response from {context}: {reason}")]
    Schema { context: String, reason: String },

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("token storage: {0}")]
    Storage(String),

    #[error("configuration: {0}")]
    Config(String),

    #[error("query {0} was dropped before its result arrived")]
    Cancelled(String),

    #[error("query {0} is disabled")]
    Disabled(String),
}

impl ApiError {
    /// HTTP status of the response behind this error; `None` when no response was received.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Unauthorized => Some(401),
            Self::Validation { .. } => Some(422),
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized)
    }

    /// Errors for a single form field of a validation failure.
    pub fn field_errors(&self, field: &str) -> &[String] {
        match self {
            Self::Validation { errors, .. } => errors.get(field).map(Vec::as_slice).unwrap_or_default(),
            _ => &[],
        }
    }

    pub(crate) fn schema(context: impl Into<String>, reason: impl ToString) -> Self {
        Self::Schema {
            context: context.into(),
            reason:  reason.to_string(),
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(Arc::new(err))
    }
}

impl From<QueryError<ApiError>> for ApiError {
    fn from(err: QueryError<ApiError>) -> Self {
        match err {
            QueryError::Fetch(err) => err,
            QueryError::Disabled(key) => Self::Disabled(key.to_string()),
            QueryError::Removed(key) | QueryError::Abandoned(key) => Self::Cancelled(key.to_string()),
        }
    }
}
