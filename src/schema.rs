//! Response and request bodies of the storefront API.

use std::fmt;

use serde::de;
use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;

use crate::error::ApiError;
use crate::key::KeyPart;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id:          u64,
    pub name:        String,
    #[serde(default)]
    pub parent_id:   Option<u64>,
    #[serde(default)]
    pub description: Option<String>,
}

impl Category {
    /// Top-level category, i.e. one without a parent.
    pub fn is_main(&self) -> bool {
        self.parent_id.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryInput {
    pub name:      String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<u64>,
}

impl CategoryInput {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name:      name.into(),
            parent_id: None,
        }
    }

    pub fn under(mut self, parent_id: u64) -> Self {
        self.parent_id = Some(parent_id);
        self
    }
}

/// Embedded `{ "name": ... }` reference to a related record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedRef {
    #[serde(default)]
    pub id:   Option<u64>,
    pub name: String,
}

/// A product. The backend calls them posts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id:          u64,
    pub title:       String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(deserialize_with = "number_or_string")]
    pub price:       f64,
    pub quantity:    u32,
    #[serde(default)]
    pub category_id: Option<u64>,
    #[serde(default)]
    pub thumbnail:   Option<String>,
    #[serde(default)]
    pub category:    Option<NamedRef>,
    #[serde(default)]
    pub user:        Option<NamedRef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockLevel {
    OutOfStock,
    Low,
    InStock,
}

impl StockLevel {
    pub fn of(quantity: u32) -> Self {
        match quantity {
            0 => Self::OutOfStock,
            1..=10 => Self::Low,
            _ => Self::InStock,
        }
    }
}

impl fmt::Display for StockLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::OutOfStock => "Out of Stock",
            Self::Low => "Low Stock",
            Self::InStock => "In Stock",
        })
    }
}

impl Post {
    pub fn stock_level(&self) -> StockLevel {
        StockLevel::of(self.quantity)
    }

    pub fn inventory_value(&self) -> f64 {
        self.price * f64::from(self.quantity)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostInput {
    pub title:       String,
    pub description: String,
    pub price:       f64,
    pub quantity:    u32,
    pub category_id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail:   Option<String>,
}

/// Paginated listing as returned by `/posts`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub data:         Vec<T>,
    #[serde(default)]
    pub total:        Option<u64>,
    #[serde(default)]
    pub current_page: Option<u64>,
    #[serde(default)]
    pub last_page:    Option<u64>,
    #[serde(default)]
    pub per_page:     Option<u64>,
    #[serde(default)]
    pub from:         Option<u64>,
    #[serde(default)]
    pub to:           Option<u64>,
}

impl<T> Page<T> {
    /// Total number of records, falling back to the size of this page when the backend omits it.
    pub fn total_or_len(&self) -> u64 {
        self.total.unwrap_or(self.data.len() as u64)
    }
}

/// A post listing that may come either paginated or as a bare list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PostListing {
    Page(Page<Post>),
    List(Vec<Post>),
}

impl PostListing {
    pub fn items(&self) -> &[Post] {
        match self {
            Self::Page(page) => &page.data,
            Self::List(posts) => posts,
        }
    }

    pub fn into_items(self) -> Vec<Post> {
        match self {
            Self::Page(page) => page.data,
            Self::List(posts) => posts,
        }
    }

    pub fn total(&self) -> u64 {
        match self {
            Self::Page(page) => page.total_or_len(),
            Self::List(posts) => posts.len() as u64,
        }
    }
}

/// Filters of the `/posts` listing. Empty values count as absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PostFilter {
    pub category_id: Option<u64>,
    pub search:      Option<String>,
    pub min_price:   Option<f64>,
    pub max_price:   Option<f64>,
}

impl PostFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_category(mut self, category_id: u64) -> Self {
        self.category_id = Some(category_id);
        self
    }

    pub fn matching(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    pub fn priced_between(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min_price = min;
        self.max_price = max;
        self
    }

    fn present(&self) -> [(&'static str, Option<String>); 4] {
        [
            ("category_id", self.category_id.filter(|id| *id != 0).map(|id| id.to_string())),
            ("search", self.search.clone().filter(|s| !s.is_empty())),
            ("min_price", self.min_price.map(|p| p.to_string())),
            ("max_price", self.max_price.map(|p| p.to_string())),
        ]
    }

    /// Query string parameters, in a stable order, without the absent ones.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        self.present()
            .into_iter()
            .filter_map(|(name, value)| value.map(|v| (name.to_string(), v)))
            .collect()
    }

    /// Parameter map part of the cache key. Absent filters come out as `None` and are left out of the key; prices are
    /// keyed by their decimal text.
    pub fn key_params(&self) -> Vec<(&'static str, Option<KeyPart>)> {
        vec![
            ("category_id", self.category_id.filter(|id| *id != 0).map(KeyPart::from)),
            ("search", self.search.clone().filter(|s| !s.is_empty()).map(KeyPart::from)),
            ("min_price", self.min_price.map(|p| KeyPart::from(p.to_string()))),
            ("max_price", self.max_price.map(|p| KeyPart::from(p.to_string()))),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub email:    String,
    pub password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email:    email.into(),
            password: password.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    pub name:                  String,
    pub email:                 String,
    pub password:              String,
    pub password_confirmation: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id:    u64,
    pub name:  String,
    #[serde(default)]
    pub email: Option<String>,
}

/// Body of a login or registration response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResponse {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub user:  Option<User>,
}

/// Value type of the storefront cache: one variant per response schema.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiData {
    Categories(Vec<Category>),
    Category(Category),
    Posts(PostListing),
    Post(Post),
    User(User),
}

impl ApiData {
    fn kind(&self) -> &'static str {
        match self {
            Self::Categories(_) => "categories",
            Self::Category(_) => "category",
            Self::Posts(_) => "posts",
            Self::Post(_) => "post",
            Self::User(_) => "user",
        }
    }

    fn mismatch(&self, expected: &str) -> ApiError {
        ApiError::schema("cache", format!("expected {expected}, found {}", self.kind()))
    }

    pub fn as_categories(&self) -> Result<&[Category], ApiError> {
        match self {
            Self::Categories(categories) => Ok(categories),
            other => Err(other.mismatch("categories")),
        }
    }

    pub fn as_category(&self) -> Result<&Category, ApiError> {
        match self {
            Self::Category(category) => Ok(category),
            other => Err(other.mismatch("category")),
        }
    }

    pub fn as_posts(&self) -> Result<&PostListing, ApiError> {
        match self {
            Self::Posts(posts) => Ok(posts),
            other => Err(other.mismatch("posts")),
        }
    }

    pub fn as_post(&self) -> Result<&Post, ApiError> {
        match self {
            Self::Post(post) => Ok(post),
            other => Err(other.mismatch("post")),
        }
    }

    pub fn as_user(&self) -> Result<&User, ApiError> {
        match self {
            Self::User(user) => Ok(user),
            other => Err(other.mismatch("user")),
        }
    }
}

// Prices come as JSON numbers from some endpoints and as decimal strings from others.
fn number_or_string<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Price {
        Number(f64),
        Text(String),
    }

    match Price::deserialize(deserializer)? {
        Price::Number(price) => Ok(price),
        Price::Text(text) => text
            .trim()
            .parse::<f64>()
            .map_err(|err| de::Error::custom(format!("invalid price {text:?}: {err}"))),
    }
}
