//! Storefront catalog client.
//!
//! Fetches one page of a storefront's public product listing:
//!
//! ```text
//! GET https://{origin}{endpoint}?limit={page_size}&page={n}
//! ```
//!
//! The response is expected to be a JSON object with a `products` array.
//! A response without that key counts as an empty page.
//!
//! # Examples
//!
//! ```no_run
//! use storecrawl_client::StorefrontClient;
//! use storecrawl_core::traits::CatalogClient;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = StorefrontClient::new()?;
//! let items = client.fetch_page("shop.example", "/products.json", 1, 250).await?;
//! println!("First page has {} products", items.len());
//! # Ok(())
//! # }
//! ```

use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use storecrawl_core::HttpConfig;
use storecrawl_core::error::AppError;
use storecrawl_core::traits::CatalogClient;
use tracing::debug;
use url::Url;

/// HTTP client for storefront `products.json` endpoints.
///
/// Cloning is cheap; clones share the connection pool.
#[derive(Clone)]
pub struct StorefrontClient {
    client: Client,
    timeout_secs: u64,
}

impl StorefrontClient {
    /// Creates a client with the default [`HttpConfig`].
    pub fn new() -> Result<Self, AppError> {
        Self::with_config(&HttpConfig::default())
    }

    /// Creates a client with custom timeout and headers.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if a header value is invalid.
    /// Returns `AppError::ClientError` if the HTTP client cannot be built.
    pub fn with_config(config: &HttpConfig) -> Result<Self, AppError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_str(&config.accept_language)
                .map_err(|e| AppError::ConfigError(format!("Invalid Accept-Language: {}", e)))?,
        );

        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .default_headers(headers)
            .timeout(config.timeout)
            .gzip(true)
            .build()
            .map_err(|e| AppError::ClientError(e.to_string()))?;

        Ok(Self {
            client,
            timeout_secs: config.timeout.as_secs(),
        })
    }

    /// Builds the URL of one catalog page.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if `origin` is not a valid host.
    pub fn page_url(
        origin: &str,
        endpoint: &str,
        page: u32,
        limit: usize,
    ) -> Result<Url, AppError> {
        let base = format!("https://{}{}", origin.trim().trim_end_matches('/'), endpoint);
        Url::parse_with_params(
            &base,
            &[("limit", limit.to_string()), ("page", page.to_string())],
        )
        .map_err(|e| AppError::ConfigError(format!("Invalid origin '{}': {}", origin, e)))
    }

    /// Maps a non-success status onto the fetch taxonomy.
    fn status_error(status: StatusCode, url: &Url) -> AppError {
        match status {
            StatusCode::NOT_FOUND | StatusCode::BAD_REQUEST => AppError::EndpointNotFound {
                status: status.as_u16(),
                url: url.to_string(),
            },
            StatusCode::UNAUTHORIZED => AppError::AuthRequired,
            StatusCode::TOO_MANY_REQUESTS => AppError::RateLimitExceeded,
            _ => AppError::ClientError(format!("HTTP {} from {}", status.as_u16(), url)),
        }
    }

    fn transport_error(&self, err: reqwest::Error, origin: &str) -> AppError {
        if err.is_timeout() {
            AppError::Timeout(self.timeout_secs)
        } else if err.is_connect() {
            AppError::NetworkError(format!("Cannot connect to {}: {}", origin, err))
        } else {
            AppError::ClientError(err.to_string())
        }
    }
}

/// Takes the `products` array out of a response body.
pub fn extract_products(body: Value) -> Vec<Value> {
    match body {
        Value::Object(mut map) => match map.remove("products") {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

impl CatalogClient for StorefrontClient {
    async fn fetch_page(
        &self,
        origin: &str,
        endpoint: &str,
        page: u32,
        limit: usize,
    ) -> Result<Vec<Value>, AppError> {
        let url = Self::page_url(origin, endpoint, page, limit)?;

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| self.transport_error(e, origin))?;

        let status = response.status();
        if !status.is_success() {
            debug!(origin, endpoint, page, status = status.as_u16(), "Non-success response");
            return Err(Self::status_error(status, &url));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| self.transport_error(e, origin))?;
        let body: Value = serde_json::from_slice(&bytes)
            .map_err(|e| AppError::InvalidPayload(format!("{} from {}", e, url)))?;

        Ok(extract_products(body))
    }
}
