//! The REST contract of the storefront backend.
//!
//! Every operation maps to a [`RequestDescriptor`] without touching the network, so the mapping can be inspected and
//! tested on its own.

use std::fmt::Display;

use reqwest::Method;
use serde::Serialize;
use serde_json::Value;

use crate::error::ApiError;
use crate::schema::CategoryInput;
use crate::schema::Credentials;
use crate::schema::PostFilter;
use crate::schema::PostInput;
use crate::schema::Registration;

pub mod routes {
    pub const LOGIN: &str = "/login";
    pub const REGISTER: &str = "/register";
    pub const USER: &str = "/user";
    pub const LOGOUT: &str = "/logout";

    pub const CATEGORIES: &str = "/categories";
    pub const CATEGORY: &str = "/categories/{id}";

    pub const POSTS: &str = "/posts";
    pub const POST: &str = "/posts/{id}";
    pub const FEATURED_POSTS: &str = "/posts/featured";
    pub const LOW_STOCK_POSTS: &str = "/posts/low-stock";
    pub const POSTS_BY_CATEGORY: &str = "/posts/category/{id}";
    pub const POSTS_BY_PRICE_RANGE: &str = "/posts/price-range";
}

/// Substitutes `{...}` placeholders of `template` with `args`, left to right. Placeholder names are ignored.
/// Surplus placeholders are left as is.
pub fn expand(template: &str, args: &[&dyn Display]) -> String {
    let mut out = String::with_capacity(template.len() + 8);
    let mut args = args.iter();
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        let Some(len) = rest[start..].find('}')
        else {
            break;
        };
        out.push_str(&rest[..start]);
        match args.next() {
            Some(arg) => out.push_str(&arg.to_string()),
            None => out.push_str(&rest[start..=start + len]),
        }
        rest = &rest[start + len + 1..];
    }
    out.push_str(rest);
    out
}

/// Everything needed to issue one request, relative to the API base URL.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
    pub method: Method,
    pub path:   String,
    /// Only parameters with a value; absent ones never make it here.
    pub query:  Vec<(String, String)>,
    pub body:   Option<Value>,
}

impl RequestDescriptor {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// Adds a query parameter unless `value` is `None`.
    pub fn param<T: ToString>(mut self, name: &str, value: Option<T>) -> Self {
        if let Some(value) = value {
            self.query.push((name.to_string(), value.to_string()));
        }
        self
    }

    /// Sets the JSON body from any serializable value.
    pub fn json<T: Serialize>(mut self, body: &T) -> Result<Self, ApiError> {
        self.body = Some(serde_json::to_value(body).map_err(|err| ApiError::schema(self.path.clone(), err))?);
        Ok(self)
    }
}

/// A logical operation of the storefront API.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    ListCategories,
    GetCategory(u64),
    CreateCategory(CategoryInput),
    UpdateCategory(u64, CategoryInput),
    DeleteCategory(u64),

    ListPosts(PostFilter),
    GetPost(u64),
    CreatePost(PostInput),
    UpdatePost(u64, PostInput),
    DeletePost(u64),
    FeaturedPosts,
    LowStockPosts,
    PostsByCategory(u64),
    PostsByPriceRange { min: f64, max: f64 },

    Login(Credentials),
    Register(Registration),
    Logout,
    CurrentUser,
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ListCategories => "list_categories",
            Self::GetCategory(_) => "get_category",
            Self::CreateCategory(_) => "create_category",
            Self::UpdateCategory(..) => "update_category",
            Self::DeleteCategory(_) => "delete_category",
            Self::ListPosts(_) => "list_posts",
            Self::GetPost(_) => "get_post",
            Self::CreatePost(_) => "create_post",
            Self::UpdatePost(..) => "update_post",
            Self::DeletePost(_) => "delete_post",
            Self::FeaturedPosts => "featured_posts",
            Self::LowStockPosts => "low_stock_posts",
            Self::PostsByCategory(_) => "posts_by_category",
            Self::PostsByPriceRange { .. } => "posts_by_price_range",
            Self::Login(_) => "login",
            Self::Register(_) => "register",
            Self::Logout => "logout",
            Self::CurrentUser => "current_user",
        }
    }

    /// Request of the operation. Fails only when a body cannot be serialized.
    pub fn describe(&self) -> Result<RequestDescriptor, ApiError> {
        Ok(match self {
            Self::ListCategories => RequestDescriptor::get(routes::CATEGORIES),
            Self::GetCategory(id) => RequestDescriptor::get(expand(routes::CATEGORY, &[id])),
            Self::CreateCategory(input) => RequestDescriptor::new(Method::POST, routes::CATEGORIES).json(input)?,
            Self::UpdateCategory(id, input) => {
                RequestDescriptor::new(Method::PUT, expand(routes::CATEGORY, &[id])).json(input)?
            }
            Self::DeleteCategory(id) => RequestDescriptor::new(Method::DELETE, expand(routes::CATEGORY, &[id])),

            Self::ListPosts(filter) => {
                let mut request = RequestDescriptor::get(routes::POSTS);
                request.query = filter.query_pairs();
                request
            }
            Self::GetPost(id) => RequestDescriptor::get(expand(routes::POST, &[id])),
            Self::CreatePost(input) => RequestDescriptor::new(Method::POST, routes::POSTS).json(input)?,
            Self::UpdatePost(id, input) => RequestDescriptor::new(Method::PUT, expand(routes::POST, &[id])).json(input)?,
            Self::DeletePost(id) => RequestDescriptor::new(Method::DELETE, expand(routes::POST, &[id])),
            Self::FeaturedPosts => RequestDescriptor::get(routes::FEATURED_POSTS),
            Self::LowStockPosts => RequestDescriptor::get(routes::LOW_STOCK_POSTS),
            Self::PostsByCategory(id) => RequestDescriptor::get(expand(routes::POSTS_BY_CATEGORY, &[id])),
            Self::PostsByPriceRange { min, max } => RequestDescriptor::get(routes::POSTS_BY_PRICE_RANGE)
                .param("min_price", Some(min))
                .param("max_price", Some(max)),

            Self::Login(credentials) => RequestDescriptor::new(Method::POST, routes::LOGIN).json(credentials)?,
            Self::Register(registration) => RequestDescriptor::new(Method::POST, routes::REGISTER).json(registration)?,
            Self::Logout => RequestDescriptor::new(Method::POST, routes::LOGOUT),
            Self::CurrentUser => RequestDescriptor::get(routes::USER),
        })
    }
}

/// Same as [`Operation::describe`].
pub fn describe(operation: &Operation) -> Result<RequestDescriptor, ApiError> {
    operation.describe()
}
