//! REST implementation of the remote data API.
//!
//! Thin JSON-over-HTTP client against the backend's read endpoints. The
//! client is created once and reused so connection pooling applies across
//! queries and prefetch batches.

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};
use url::Url;

use super::{ApiError, Book, BookApi, Category};

/// Default request timeout for API fetches (10 seconds).
const REQUEST_TIMEOUT_SECS: u64 = 10;

/// JSON REST client for the backend's book and category endpoints.
#[derive(Debug, Clone)]
pub struct RestBookApi {
    client: Client,
    base_url: Url,
}

impl RestBookApi {
    /// Creates a client for the API rooted at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidEndpoint`] when `base_url` is not a
    /// valid absolute URL.
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        let base_url = Url::parse(base_url)
            .map_err(|_| ApiError::InvalidEndpoint(base_url.to_string()))?;
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|source| ApiError::Network {
                url: base_url.to_string(),
                source,
            })?;
        Ok(Self { client, base_url })
    }

    /// Creates a client reusing an existing reqwest `Client`.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidEndpoint`] when `base_url` is not a
    /// valid absolute URL.
    pub fn with_client(client: Client, base_url: &str) -> Result<Self, ApiError> {
        let base_url = Url::parse(base_url)
            .map_err(|_| ApiError::InvalidEndpoint(base_url.to_string()))?;
        Ok(Self { client, base_url })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        self.base_url
            .join(path)
            .map_err(|_| ApiError::InvalidEndpoint(path.to_string()))
    }

    #[instrument(level = "debug", skip(self))]
    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let url = self.endpoint(path)?;
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|source| ApiError::network(url.as_str(), source))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::http_status(url.as_str(), status.as_u16()));
        }

        debug!(url = %url, "API fetch ok");
        response
            .json::<T>()
            .await
            .map_err(|source| ApiError::Decode {
                url: url.to_string(),
                source,
            })
    }
}

#[async_trait]
impl BookApi for RestBookApi {
    async fn fetch_books(&self) -> Result<Vec<Book>, ApiError> {
        self.get_json("books").await
    }

    async fn fetch_categories(&self) -> Result<Vec<Category>, ApiError> {
        self.get_json("categories").await
    }

    async fn fetch_featured(&self) -> Result<Vec<Book>, ApiError> {
        self.get_json("books/featured").await
    }

    async fn fetch_latest(&self) -> Result<Vec<Book>, ApiError> {
        self.get_json("books/latest").await
    }

    async fn fetch_most_viewed(&self) -> Result<Vec<Book>, ApiError> {
        self.get_json("books/most-viewed").await
    }

    async fn fetch_most_downloaded(&self) -> Result<Vec<Book>, ApiError> {
        self.get_json("books/most-downloaded").await
    }

    async fn fetch_books_by_category(&self, slug: &str) -> Result<Vec<Book>, ApiError> {
        self.get_json(&format!("categories/{slug}/books")).await
    }

    async fn fetch_book(&self, id: &str) -> Result<Option<Book>, ApiError> {
        match self.get_json::<Book>(&format!("books/{id}")).await {
            Ok(book) => Ok(Some(book)),
            Err(ApiError::HttpStatus { status: 404, .. }) => Ok(None),
            Err(error) => Err(error),
        }
    }
}
