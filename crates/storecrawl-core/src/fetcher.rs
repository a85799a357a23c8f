//! Per-origin pagination over a storefront's catalog endpoints.
//!
//! # Termination
//!
//! Pages are requested with a 1-based counter. After each page the loop
//! checks, in this order:
//!
//! 1. the page is empty → the endpoint is exhausted;
//! 2. the page starts with the same product id as the previous page → the
//!    origin ignores the `page` parameter, stop without keeping this page;
//! 3. the page is shorter than the requested size → it was the last one.
//!
//! There is no iteration cap beyond these three conditions.
//!
//! # Status handling
//!
//! 404/400 abandons the current endpoint and moves to the next candidate,
//! 401 abandons the whole origin, 429 waits a randomized backoff and retries
//! the same page (up to [`FetchConfig::max_rate_limit_retries`] times).
//! Everything else propagates to the caller.

use serde_json::Value;
use tokio::time::sleep;
use tracing::debug;

use crate::config::FetchConfig;
use crate::error::AppError;
use crate::models::{ProductRecord, leading_id};
use crate::progress::{CrawlEvent, CrawlReporter};
use crate::throttle::{RequestThrottle, jitter};
use crate::traits::CatalogClient;

/// Walks an origin's catalog endpoints and collects every product.
#[derive(Clone)]
pub struct PaginatedFetcher<C>
where
    C: CatalogClient,
{
    client: C,
    throttle: RequestThrottle,
    config: FetchConfig,
}

impl<C> PaginatedFetcher<C>
where
    C: CatalogClient,
{
    pub fn new(client: C, throttle: RequestThrottle, config: FetchConfig) -> Self {
        Self {
            client,
            throttle,
            config,
        }
    }

    /// Fetches the full product listing of one origin.
    ///
    /// # Returns
    ///
    /// The products of the first endpoint that yields any, in page order.
    /// An empty vector when endpoints exist but are all empty.
    ///
    /// # Errors
    ///
    /// - [`AppError::NotFound`] when every candidate endpoint answered 404/400
    /// - [`AppError::AuthRequired`] on HTTP 401, no further endpoint is tried
    /// - [`AppError::RateLimitExceeded`] when one page stayed rate limited past the retry ceiling
    /// - any other transport or decoding error from the client
    pub async fn fetch<R: CrawlReporter>(
        &self,
        origin: &str,
        reporter: &R,
    ) -> Result<Vec<ProductRecord>, AppError> {
        let mut any_endpoint_found = false;

        for endpoint in &self.config.endpoints {
            match self.fetch_endpoint(origin, endpoint, reporter).await {
                Ok(products) if !products.is_empty() => return Ok(products),
                Ok(_) => {
                    any_endpoint_found = true;
                    debug!(origin, endpoint = endpoint.as_str(), "Endpoint returned no products");
                }
                Err(AppError::EndpointNotFound { status, .. }) => {
                    debug!(origin, endpoint = endpoint.as_str(), status, "Endpoint not available");
                }
                Err(e) => return Err(e),
            }
        }

        if any_endpoint_found || self.config.endpoints.is_empty() {
            Ok(Vec::new())
        } else {
            Err(AppError::NotFound(origin.to_string()))
        }
    }

    /// Pages through one endpoint until a termination condition triggers.
    async fn fetch_endpoint<R: CrawlReporter>(
        &self,
        origin: &str,
        endpoint: &str,
        reporter: &R,
    ) -> Result<Vec<ProductRecord>, AppError> {
        let page_size = self.config.page_size;
        let mut collected = Vec::new();
        let mut previous_first: Option<i64> = None;
        let mut page: u32 = 1;

        loop {
            let items = self
                .fetch_page_with_backoff(origin, endpoint, page, reporter)
                .await?;

            reporter.report(CrawlEvent::PageFetched {
                origin,
                endpoint,
                page,
                items: items.len(),
            });

            if items.is_empty() {
                break;
            }

            let first = items.first().and_then(leading_id);
            if first.is_some() && first == previous_first {
                debug!(origin, endpoint, page, "Page repeats the previous one, stopping");
                break;
            }

            let count = items.len();
            collected.extend(validate_items(origin, items));
            previous_first = first;

            if count < page_size {
                break;
            }

            page += 1;
            let pause = jitter(self.config.page_delay_min, self.config.page_delay_max);
            if !pause.is_zero() {
                sleep(pause).await;
            }
        }

        Ok(collected)
    }

    /// Requests one page through the throttle, retrying the same page on 429.
    async fn fetch_page_with_backoff<R: CrawlReporter>(
        &self,
        origin: &str,
        endpoint: &str,
        page: u32,
        reporter: &R,
    ) -> Result<Vec<Value>, AppError> {
        let mut attempt: u32 = 0;

        loop {
            let result = {
                let _permit = self.throttle.acquire().await;
                self.client
                    .fetch_page(origin, endpoint, page, self.config.page_size)
                    .await
            };

            match result {
                Err(AppError::RateLimitExceeded) if attempt < self.config.max_rate_limit_retries => {
                    attempt += 1;
                    reporter.report(CrawlEvent::RateLimited {
                        origin,
                        page,
                        attempt,
                    });
                    let backoff = jitter(
                        self.config.rate_limit_backoff_min,
                        self.config.rate_limit_backoff_max,
                    );
                    if !backoff.is_zero() {
                        sleep(backoff).await;
                    }
                }
                other => return other,
            }
        }
    }
}

/// Turns raw page items into typed records, dropping items without an integer id.
fn validate_items(origin: &str, items: Vec<Value>) -> impl Iterator<Item = ProductRecord> + '_ {
    items
        .into_iter()
        .filter_map(move |item| match ProductRecord::from_value(item) {
            Ok(product) => Some(product),
            Err(e) => {
                debug!(origin, error = %e, "Dropping item without a valid id");
                None
            }
        })
}
