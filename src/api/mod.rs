//! Remote data API boundary.
//!
//! The backend is an opaque collaborator: this module defines the entity
//! models the offline core works with, the [`BookApi`] contract the cached
//! query layer fetches through, and a REST implementation over HTTP.
//!
//! Anything implementing [`BookApi`] can sit behind the cache policy,
//! which is how the integration tests drive the decision table with
//! scripted fakes.

mod rest;

pub use rest::RestBookApi;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from the remote data API.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Network-level failure (DNS, connection refused, TLS, timeout).
    #[error("network error fetching {url}: {source}")]
    Network {
        /// The endpoint that failed.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// HTTP error response (4xx client errors, 5xx server errors).
    #[error("HTTP {status} fetching {url}")]
    HttpStatus {
        /// The endpoint that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// Response body could not be decoded as the expected entity.
    #[error("failed to decode response from {url}: {source}")]
    Decode {
        /// The endpoint whose body failed to decode.
        url: String,
        /// The underlying decode error.
        #[source]
        source: reqwest::Error,
    },

    /// The configured base URL cannot be joined with an endpoint path.
    #[error("invalid API endpoint: {0}")]
    InvalidEndpoint(String),
}

impl ApiError {
    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }
}

/// Denormalized book metadata as served by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
    /// Backend-assigned book id.
    pub id: String,
    /// Display title.
    pub title: String,
    /// Author display name.
    pub author: String,
    /// Long-form description, when present.
    #[serde(default)]
    pub description: Option<String>,
    /// Slug of the category this book belongs to.
    #[serde(default)]
    pub category_slug: Option<String>,
    /// Download endpoint for the book file.
    #[serde(default)]
    pub file_url: Option<String>,
    /// Endpoint for the cover image.
    #[serde(default)]
    pub cover_url: Option<String>,
    /// View counter maintained by the backend.
    #[serde(default)]
    pub views: i64,
    /// Download counter maintained by the backend.
    #[serde(default)]
    pub downloads: i64,
}

/// A browsing category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    /// Backend-assigned category id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// URL-safe slug, used as the cache key suffix for per-category lists.
    pub slug: String,
    /// Short description, when present.
    #[serde(default)]
    pub description: Option<String>,
}

/// Remote query surface consumed by the cached query layer.
///
/// Every method is a plain fetch; caching, offline fallback and
/// invalidation live above this trait.
#[async_trait]
pub trait BookApi: Send + Sync {
    /// Fetches the full book list.
    async fn fetch_books(&self) -> Result<Vec<Book>, ApiError>;

    /// Fetches all categories.
    async fn fetch_categories(&self) -> Result<Vec<Category>, ApiError>;

    /// Fetches the editorially featured books.
    async fn fetch_featured(&self) -> Result<Vec<Book>, ApiError>;

    /// Fetches the most recently added books.
    async fn fetch_latest(&self) -> Result<Vec<Book>, ApiError>;

    /// Fetches the most viewed books.
    async fn fetch_most_viewed(&self) -> Result<Vec<Book>, ApiError>;

    /// Fetches the most downloaded books.
    async fn fetch_most_downloaded(&self) -> Result<Vec<Book>, ApiError>;

    /// Fetches the books in one category.
    async fn fetch_books_by_category(&self, slug: &str) -> Result<Vec<Book>, ApiError>;

    /// Fetches a single book by id. `Ok(None)` when the backend reports
    /// the id unknown.
    async fn fetch_book(&self, id: &str) -> Result<Option<Book>, ApiError>;
}
