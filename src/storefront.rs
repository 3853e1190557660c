//! The storefront's queries and mutations wired onto a query client.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;
use tracing::instrument;

use crate::dashboard::DashboardStats;
use crate::endpoint::routes;
use crate::endpoint::Operation;
use crate::error::ApiError;
use crate::http::HttpClient;
use crate::http::HttpConfig;
use crate::key::KeyFilter;
use crate::key::QueryKey;
use crate::mutation::Mutation;
use crate::query::QueryClient;
use crate::query::QueryObserver;
use crate::schema::ApiData;
use crate::schema::AuthResponse;
use crate::schema::Category;
use crate::schema::CategoryInput;
use crate::schema::Credentials;
use crate::schema::Post;
use crate::schema::PostFilter;
use crate::schema::PostInput;
use crate::schema::PostListing;
use crate::schema::Registration;
use crate::schema::User;
use crate::traits::Fetcher;
use crate::traits::TokenStore;
use crate::types::QueryOptions;

const MINUTE: Duration = Duration::from_secs(60);

/// Cache keys of the storefront queries.
pub mod keys {
    use crate::key::QueryKey;
    use crate::query_key;
    use crate::schema::PostFilter;

    pub fn categories() -> QueryKey {
        query_key!["categories"]
    }

    pub fn category(id: u64) -> QueryKey {
        query_key!["categories", id]
    }

    /// Common prefix of every post query.
    pub fn all_posts() -> QueryKey {
        query_key!["posts"]
    }

    pub fn posts(filter: &PostFilter) -> QueryKey {
        all_posts().with_params(filter.key_params())
    }

    pub fn post(id: u64) -> QueryKey {
        query_key!["posts", id]
    }

    pub fn featured_posts() -> QueryKey {
        query_key!["posts", "featured"]
    }

    pub fn low_stock_posts() -> QueryKey {
        query_key!["posts", "low-stock"]
    }

    pub fn posts_by_category(category_id: u64) -> QueryKey {
        query_key!["posts", "category", category_id]
    }

    pub fn posts_by_price_range(min: f64, max: f64) -> QueryKey {
        query_key!["posts", "price-range", min.to_string(), max.to_string()]
    }

    pub fn user() -> QueryKey {
        query_key!["user"]
    }
}

/// A read of the storefront API.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreQuery {
    Categories,
    Category(u64),
    Posts(PostFilter),
    Post(u64),
    FeaturedPosts,
    LowStockPosts,
    PostsByCategory(u64),
    PostsByPriceRange { min: f64, max: f64 },
    CurrentUser,
}

impl StoreQuery {
    pub fn key(&self) -> QueryKey {
        match self {
            Self::Categories => keys::categories(),
            Self::Category(id) => keys::category(*id),
            Self::Posts(filter) => keys::posts(filter),
            Self::Post(id) => keys::post(*id),
            Self::FeaturedPosts => keys::featured_posts(),
            Self::LowStockPosts => keys::low_stock_posts(),
            Self::PostsByCategory(id) => keys::posts_by_category(*id),
            Self::PostsByPriceRange { min, max } => keys::posts_by_price_range(*min, *max),
            Self::CurrentUser => keys::user(),
        }
    }

    pub fn operation(&self) -> Operation {
        match self {
            Self::Categories => Operation::ListCategories,
            Self::Category(id) => Operation::GetCategory(*id),
            Self::Posts(filter) => Operation::ListPosts(filter.clone()),
            Self::Post(id) => Operation::GetPost(*id),
            Self::FeaturedPosts => Operation::FeaturedPosts,
            Self::LowStockPosts => Operation::LowStockPosts,
            Self::PostsByCategory(id) => Operation::PostsByCategory(*id),
            Self::PostsByPriceRange { min, max } => Operation::PostsByPriceRange { min: *min, max: *max },
            Self::CurrentUser => Operation::CurrentUser,
        }
    }

    /// Freshness, retention and enablement of the query. The current user is only queried with a stored token.
    pub fn options(&self, tokens: &dyn TokenStore) -> QueryOptions {
        match self {
            Self::Categories => QueryOptions::fresh_for(5 * MINUTE).retained_for(10 * MINUTE),
            Self::Category(id) => QueryOptions::fresh_for(5 * MINUTE).enabled_if(*id != 0),
            Self::Posts(_) => QueryOptions::fresh_for(2 * MINUTE).retained_for(5 * MINUTE),
            Self::Post(id) => QueryOptions::fresh_for(2 * MINUTE).enabled_if(*id != 0),
            Self::FeaturedPosts => QueryOptions::fresh_for(3 * MINUTE),
            Self::LowStockPosts => QueryOptions::fresh_for(MINUTE),
            Self::PostsByCategory(id) => QueryOptions::fresh_for(2 * MINUTE).enabled_if(*id != 0),
            Self::PostsByPriceRange { min, max } => {
                QueryOptions::fresh_for(2 * MINUTE).enabled_if(*min != 0.0 && *max != 0.0)
            }
            Self::CurrentUser => QueryOptions::fresh_for(5 * MINUTE).enabled_if(tokens.has_token()),
        }
    }

    /// Runs the query against the backend, bypassing the cache.
    pub async fn load(&self, http: &HttpClient) -> Result<ApiData, ApiError> {
        let request = self.operation().describe()?;
        Ok(match self {
            Self::Categories => ApiData::Categories(http.send_json::<Vec<Category>>(&request).await?),
            Self::Category(_) => ApiData::Category(http.send_json::<Category>(&request).await?),
            Self::Post(_) => ApiData::Post(http.send_json::<Post>(&request).await?),
            Self::Posts(_)
            | Self::FeaturedPosts
            | Self::LowStockPosts
            | Self::PostsByCategory(_)
            | Self::PostsByPriceRange { .. } => ApiData::Posts(http.send_json::<PostListing>(&request).await?),
            Self::CurrentUser => ApiData::User(http.send_json::<User>(&request).await?),
        })
    }
}

struct StoreFetcher {
    http:  Arc<HttpClient>,
    query: StoreQuery,
}

#[async_trait]
impl Fetcher<ApiData, ApiError> for StoreFetcher {
    async fn fetch(&self, key: &QueryKey) -> Result<ApiData, ApiError> {
        debug!(key = %key, operation = self.query.operation().name(), "loading");
        self.query.load(&self.http).await
    }
}

/// Typed access to the storefront backend through a shared query cache.
#[derive(Clone)]
pub struct Storefront {
    http:   Arc<HttpClient>,
    client: QueryClient<ApiData, ApiError>,
}

impl Storefront {
    pub fn new(http: HttpClient) -> Self {
        Self::with_client(Arc::new(http), QueryClient::new())
    }

    pub fn with_client(http: Arc<HttpClient>, client: QueryClient<ApiData, ApiError>) -> Self {
        Self { http, client }
    }

    pub fn connect(config: &HttpConfig, tokens: Arc<dyn TokenStore>) -> Result<Self, ApiError> {
        Ok(Self::new(HttpClient::new(config, tokens)?))
    }

    pub fn http(&self) -> &Arc<HttpClient> {
        &self.http
    }

    pub fn client(&self) -> &QueryClient<ApiData, ApiError> {
        &self.client
    }

    pub fn options(&self, query: &StoreQuery) -> QueryOptions {
        query.options(self.http.tokens().as_ref())
    }

    fn fetcher(&self, query: &StoreQuery) -> Arc<dyn Fetcher<ApiData, ApiError>> {
        Arc::new(StoreFetcher {
            http:  Arc::clone(&self.http),
            query: query.clone(),
        })
    }

    /// Mounts an observer of `query`.
    pub fn watch(&self, query: StoreQuery) -> QueryObserver<ApiData, ApiError> {
        let options = self.options(&query);
        self.client.watch_shared(query.key(), self.fetcher(&query), options)
    }

    #[instrument(level = "debug", skip(self))]
    pub async fn fetch(&self, query: StoreQuery) -> Result<Arc<ApiData>, ApiError> {
        let options = self.options(&query);
        Ok(self
            .client
            .fetch_query_shared(&query.key(), self.fetcher(&query), options)
            .await?)
    }

    pub async fn categories(&self) -> Result<Vec<Category>, ApiError> {
        Ok(self.fetch(StoreQuery::Categories).await?.as_categories()?.to_vec())
    }

    pub async fn category(&self, id: u64) -> Result<Category, ApiError> {
        Ok(self.fetch(StoreQuery::Category(id)).await?.as_category()?.clone())
    }

    pub async fn posts(&self, filter: &PostFilter) -> Result<PostListing, ApiError> {
        Ok(self.fetch(StoreQuery::Posts(filter.clone())).await?.as_posts()?.clone())
    }

    pub async fn post(&self, id: u64) -> Result<Post, ApiError> {
        Ok(self.fetch(StoreQuery::Post(id)).await?.as_post()?.clone())
    }

    pub async fn featured_posts(&self) -> Result<Vec<Post>, ApiError> {
        self.post_items(StoreQuery::FeaturedPosts).await
    }

    pub async fn low_stock_posts(&self) -> Result<Vec<Post>, ApiError> {
        self.post_items(StoreQuery::LowStockPosts).await
    }

    pub async fn posts_by_category(&self, category_id: u64) -> Result<Vec<Post>, ApiError> {
        self.post_items(StoreQuery::PostsByCategory(category_id)).await
    }

    pub async fn posts_by_price_range(&self, min: f64, max: f64) -> Result<Vec<Post>, ApiError> {
        self.post_items(StoreQuery::PostsByPriceRange { min, max }).await
    }

    pub async fn current_user(&self) -> Result<User, ApiError> {
        Ok(self.fetch(StoreQuery::CurrentUser).await?.as_user()?.clone())
    }

    async fn post_items(&self, query: StoreQuery) -> Result<Vec<Post>, ApiError> {
        Ok(self.fetch(query).await?.as_posts()?.items().to_vec())
    }

    /// Loads everything the dashboard shows, concurrently.
    pub async fn dashboard(&self) -> Result<DashboardStats, ApiError> {
        let filter = PostFilter::default();
        let (posts, categories, featured, low_stock) = tokio::try_join!(
            self.posts(&filter),
            self.categories(),
            self.featured_posts(),
            self.low_stock_posts(),
        )?;
        Ok(DashboardStats::compute(&posts, &categories, featured, low_stock))
    }

    pub fn create_category(&self) -> Mutation<ApiData, ApiError, CategoryInput, Category> {
        let http = Arc::clone(&self.http);
        Mutation::new(self.client.clone(), move |input: CategoryInput| {
            let http = Arc::clone(&http);
            async move { http.send_json::<Category>(&Operation::CreateCategory(input).describe()?).await }
        })
        .invalidating(vec![KeyFilter::prefix(keys::categories())])
    }

    pub fn update_category(&self) -> Mutation<ApiData, ApiError, (u64, CategoryInput), Category> {
        let http = Arc::clone(&self.http);
        Mutation::new(self.client.clone(), move |(id, input): (u64, CategoryInput)| {
            let http = Arc::clone(&http);
            async move { http.send_json::<Category>(&Operation::UpdateCategory(id, input).describe()?).await }
        })
        .invalidating(vec![KeyFilter::prefix(keys::categories())])
        .invalidates(|(id, _), _| vec![KeyFilter::exact(keys::category(*id))])
    }

    pub fn delete_category(&self) -> Mutation<ApiData, ApiError, u64, ()> {
        let http = Arc::clone(&self.http);
        Mutation::new(self.client.clone(), move |id: u64| {
            let http = Arc::clone(&http);
            async move { http.send_unit(&Operation::DeleteCategory(id).describe()?).await }
        })
        .invalidating(vec![KeyFilter::prefix(keys::categories())])
    }

    pub fn create_post(&self) -> Mutation<ApiData, ApiError, PostInput, Post> {
        let http = Arc::clone(&self.http);
        Mutation::new(self.client.clone(), move |input: PostInput| {
            let http = Arc::clone(&http);
            async move { http.send_json::<Post>(&Operation::CreatePost(input).describe()?).await }
        })
        .invalidating(vec![
            KeyFilter::prefix(keys::all_posts()),
            KeyFilter::exact(keys::featured_posts()),
        ])
    }

    pub fn update_post(&self) -> Mutation<ApiData, ApiError, (u64, PostInput), Post> {
        let http = Arc::clone(&self.http);
        Mutation::new(self.client.clone(), move |(id, input): (u64, PostInput)| {
            let http = Arc::clone(&http);
            async move { http.send_json::<Post>(&Operation::UpdatePost(id, input).describe()?).await }
        })
        .invalidating(vec![
            KeyFilter::prefix(keys::all_posts()),
            KeyFilter::exact(keys::featured_posts()),
        ])
        .invalidates(|(id, _), _| vec![KeyFilter::exact(keys::post(*id))])
    }

    pub fn delete_post(&self) -> Mutation<ApiData, ApiError, u64, ()> {
        let http = Arc::clone(&self.http);
        Mutation::new(self.client.clone(), move |id: u64| {
            let http = Arc::clone(&http);
            async move { http.send_unit(&Operation::DeletePost(id).describe()?).await }
        })
        .invalidating(vec![
            KeyFilter::prefix(keys::all_posts()),
            KeyFilter::exact(keys::featured_posts()),
        ])
    }

    /// Logs in and stores the returned token. A response without a token fails the login.
    pub fn login(&self) -> Mutation<ApiData, ApiError, Credentials, AuthResponse> {
        let http = Arc::clone(&self.http);
        let tokens = Arc::clone(self.http.tokens());
        Mutation::new(self.client.clone(), move |credentials: Credentials| {
            let http = Arc::clone(&http);
            async move { http.send_json::<AuthResponse>(&Operation::Login(credentials).describe()?).await }
        })
        .on_success(move |_, _, response: &AuthResponse| {
            let token = response
                .token
                .as_deref()
                .ok_or_else(|| ApiError::schema(routes::LOGIN, "response carries no token"))?;
            tokens.store(token)
        })
        .invalidating(vec![KeyFilter::exact(keys::user())])
    }

    /// Registers an account, storing the token when the backend logs the new user in right away.
    pub fn register(&self) -> Mutation<ApiData, ApiError, Registration, AuthResponse> {
        let http = Arc::clone(&self.http);
        let tokens = Arc::clone(self.http.tokens());
        Mutation::new(self.client.clone(), move |registration: Registration| {
            let http = Arc::clone(&http);
            async move { http.send_json::<AuthResponse>(&Operation::Register(registration).describe()?).await }
        })
        .on_success(move |_, _, response: &AuthResponse| match &response.token {
            Some(token) => tokens.store(token),
            None => Ok(()),
        })
        .invalidating(vec![KeyFilter::exact(keys::user())])
    }

    /// Logs out, forgets the token and empties the cache. A session the backend already considers expired counts as
    /// logged out.
    pub fn logout(&self) -> Mutation<ApiData, ApiError, (), ()> {
        let http = Arc::clone(&self.http);
        let tokens = Arc::clone(self.http.tokens());
        Mutation::new(self.client.clone(), move |()| {
            let http = Arc::clone(&http);
            async move {
                match http.send_unit(&Operation::Logout.describe()?).await {
                    Ok(()) | Err(ApiError::Unauthorized) => Ok(()),
                    Err(err) => Err(err),
                }
            }
        })
        .on_success(move |client, _, _| {
            tokens.clear();
            client.clear();
            Ok(())
        })
    }
}

impl Debug for Storefront {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storefront")
            .field("http", &self.http)
            .field("client", &self.client)
            .finish()
    }
}
