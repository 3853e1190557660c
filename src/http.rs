use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use fieldx::fxstruct;
use reqwest::header::ACCEPT;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;
use tracing::instrument;
use tracing::trace;
use tracing::warn;
use url::Url;

use crate::endpoint::RequestDescriptor;
use crate::error::ApiError;
use crate::traits::TokenStore;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000/api";
pub const DEFAULT_USER_AGENT: &str = concat!("cafe-query/", env!("CARGO_PKG_VERSION"));

const JSON: &str = "application/json";

/// Connection settings of [`HttpClient`].
///
/// ```ignore
/// let config = HttpConfig::builder()
///     .base_url("https://shop.example/api")
///     .timeout(Some(Duration::from_secs(10)))
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone)]
#[fxstruct(no_new, builder, get(copy))]
pub struct HttpConfig {
    /// Request paths are appended to it verbatim. A trailing slash is tolerated.
    #[fieldx(builder(required, into), get(clone))]
    base_url: String,

    #[fieldx(builder(into), get(clone), default(DEFAULT_USER_AGENT.to_string()))]
    user_agent: String,

    /// Per-request timeout. Requests wait indefinitely when unset.
    #[fieldx(default(None))]
    timeout: Option<Duration>,
}

impl HttpConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url:   base_url.into(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout:    None,
        }
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Successful response with its body read into memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub body:   Vec<u8>,
}

impl Response {
    /// Parses the body into `T`. `context` names the request in the error when the body does not fit.
    pub fn json<T: DeserializeOwned>(&self, context: &str) -> Result<T, ApiError> {
        serde_json::from_slice(&self.body).map_err(|err| ApiError::schema(context, err))
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Deserialize)]
struct ValidationBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    errors:  BTreeMap<String, Vec<String>>,
}

/// JSON client of the storefront backend.
///
/// Attaches the stored token as a bearer credential. A 401 response clears the token before the error is returned,
/// so that the next request goes out anonymous.
pub struct HttpClient {
    client:   reqwest::Client,
    base_url: String,
    timeout:  Option<Duration>,
    tokens:   Arc<dyn TokenStore>,
}

impl HttpClient {
    pub fn new(config: &HttpConfig, tokens: Arc<dyn TokenStore>) -> Result<Self, ApiError> {
        let base_url = config.base_url();
        // Fail on a malformed base now rather than on the first request.
        Url::parse(&base_url)?;

        let client = reqwest::Client::builder()
            .user_agent(config.user_agent())
            .build()
            .map_err(|err| ApiError::Config(format!("cannot build HTTP client: {err}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout: config.timeout(),
            tokens,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn tokens(&self) -> &Arc<dyn TokenStore> {
        &self.tokens
    }

    /// Absolute URL of `request`, query string included.
    pub fn url(&self, request: &RequestDescriptor) -> Result<Url, ApiError> {
        let mut url = Url::parse(&format!("{}{}", self.base_url, request.path))?;
        if !request.query.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(request.query.iter().map(|(name, value)| (name.as_str(), value.as_str())));
        }
        Ok(url)
    }

    #[instrument(level = "debug", skip(self, request), fields(method = %request.method, path = %request.path))]
    pub async fn send(&self, request: &RequestDescriptor) -> Result<Response, ApiError> {
        let url = self.url(request)?;

        let mut builder = self
            .client
            .request(request.method.clone(), url)
            .header(CONTENT_TYPE, JSON)
            .header(ACCEPT, JSON);
        if let Some(token) = self.tokens.token() {
            builder = builder.bearer_auth(token);
        }
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let body = response.bytes().await?;
        trace!(status = status.as_u16(), bytes = body.len(), "response received");

        match status {
            StatusCode::UNAUTHORIZED => {
                warn!("request unauthorized, clearing stored token");
                self.tokens.clear();
                Err(ApiError::Unauthorized)
            }
            StatusCode::UNPROCESSABLE_ENTITY => Err(Self::validation_error(&body)),
            status if !status.is_success() => {
                debug!(status = status.as_u16(), "request failed");
                Err(ApiError::Http {
                    status: status.as_u16(),
                    body:   String::from_utf8_lossy(&body).into_owned(),
                })
            }
            status => Ok(Response {
                status: status.as_u16(),
                body:   body.to_vec(),
            }),
        }
    }

    /// Sends `request` and parses the response body into `T`.
    pub async fn send_json<T: DeserializeOwned>(&self, request: &RequestDescriptor) -> Result<T, ApiError> {
        self.send(request).await?.json(&request.path)
    }

    /// Sends `request`, ignoring the body of a successful response.
    pub async fn send_unit(&self, request: &RequestDescriptor) -> Result<(), ApiError> {
        self.send(request).await.map(|_| ())
    }

    fn validation_error(body: &[u8]) -> ApiError {
        match serde_json::from_slice::<ValidationBody>(body) {
            Ok(parsed) => ApiError::Validation {
                message: parsed.message.unwrap_or_else(|| "The given data was invalid.".to_string()),
                errors:  parsed.errors,
            },
            Err(_) => ApiError::Validation {
                message: String::from_utf8_lossy(body).into_owned(),
                errors:  BTreeMap::new(),
            },
        }
    }
}

impl Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .field("authenticated", &self.tokens.has_token())
            .finish()
    }
}
