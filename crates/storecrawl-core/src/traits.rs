//! Trait definitions for external dependencies.
//!
//! This module defines traits that abstract over external dependencies
//! (storefront HTTP, the relational store, embedding providers), enabling:
//!
//! - **Testability**: scripted page sequences and in-memory stores in tests
//! - **Flexibility**: a different store or embedding backend without touching the pipeline
//! - **Decoupling**: crawl and persistence logic never see reqwest or sqlx types
//!
//! # Example
//!
//! ```
//! use storecrawl_core::traits::CatalogClient;
//!
//! async fn first_page<C: CatalogClient>(client: &C) -> usize {
//!     client
//!         .fetch_page("shop.example", "/products.json", 1, 250)
//!         .await
//!         .map(|items| items.len())
//!         .unwrap_or(0)
//! }
//! ```

use std::future::Future;

use serde_json::Value;

use crate::AppError;
use crate::models::{
    DomainSummary, ImageRow, OptionRow, OptionValueRow, PendingEmbedding, ProductRow, SnapshotRow,
    VariantRow,
};

/// Client for a storefront's public catalog endpoints.
pub trait CatalogClient: Send + Sync + Clone {
    /// Fetches one page of raw catalog items.
    ///
    /// # Arguments
    ///
    /// * `origin` - Storefront domain, e.g. `shop.example`
    /// * `endpoint` - Path of the catalog endpoint, e.g. `/products.json`
    /// * `page` - 1-based page number
    /// * `limit` - Requested page size
    ///
    /// # Returns
    ///
    /// The items of the response's `products` array, or an empty vector if
    /// the key is missing.
    ///
    /// # Errors
    ///
    /// HTTP 404/400 must surface as [`AppError::EndpointNotFound`], 401 as
    /// [`AppError::AuthRequired`] and 429 as [`AppError::RateLimitExceeded`];
    /// the pagination loop depends on these to pick its reaction.
    fn fetch_page(
        &self,
        origin: &str,
        endpoint: &str,
        page: u32,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<Value>, AppError>> + Send;
}

/// Store for normalized catalog rows.
///
/// Every `upsert_*` method must be idempotent on the entity's natural key:
/// writing the same rows twice leaves the same stored state. Implementations
/// return the number of rows affected.
pub trait ProductStore: Send + Sync + Clone {
    /// Upserts on (domain, product_id).
    fn upsert_products(
        &self,
        rows: &[ProductRow],
    ) -> impl Future<Output = Result<u64, AppError>> + Send;

    /// Appends snapshots. Existing (domain, product_id, fetched_at) rows are
    /// left untouched, never overwritten.
    fn insert_snapshots(
        &self,
        rows: &[SnapshotRow],
    ) -> impl Future<Output = Result<u64, AppError>> + Send;

    /// Upserts on (domain, variant_id).
    fn upsert_variants(
        &self,
        rows: &[VariantRow],
    ) -> impl Future<Output = Result<u64, AppError>> + Send;

    /// Upserts on (domain, image_id).
    fn upsert_images(&self, rows: &[ImageRow])
    -> impl Future<Output = Result<u64, AppError>> + Send;

    /// Upserts on (domain, product_id, name).
    fn upsert_options(
        &self,
        rows: &[OptionRow],
    ) -> impl Future<Output = Result<u64, AppError>> + Send;

    /// Upserts on (domain, product_id, option_name, position).
    fn upsert_option_values(
        &self,
        rows: &[OptionValueRow],
    ) -> impl Future<Output = Result<u64, AppError>> + Send;

    /// Upserts the per-domain aggregate on `domain`.
    fn upsert_domain_summary(
        &self,
        summary: &DomainSummary,
    ) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// Store access needed by the embedding backfill job.
///
/// Kept apart from [`ProductStore`] because the crawl never touches the
/// embedding column.
pub trait EmbeddingStore: Send + Sync + Clone {
    /// Products whose embedding is still NULL, ordered by (domain, product_id).
    ///
    /// Returns at most `limit` rows strictly after the `after` key, so a
    /// caller can page past rows it chose to skip.
    fn pending_embeddings(
        &self,
        after: Option<(&str, i64)>,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<PendingEmbedding>, AppError>> + Send;

    /// Writes vectors back, keyed by (domain, product_id).
    fn store_embeddings(
        &self,
        rows: &[(PendingEmbedding, Vec<f32>)],
    ) -> impl Future<Output = Result<u64, AppError>> + Send;
}

/// Provider for generating text embeddings.
pub trait EmbeddingProvider: Send + Sync + Clone {
    /// Returns the provider name for logging.
    fn name(&self) -> &'static str;

    /// Returns the embedding dimension.
    fn dimension(&self) -> usize;

    /// Generates one embedding per input text, in input order.
    fn generate_batch(
        &self,
        texts: &[String],
    ) -> impl Future<Output = Result<Vec<Vec<f32>>, AppError>> + Send;
}
