//! Batched, retrying, idempotent persistence of one origin's catalog.
//!
//! # Pipeline
//!
//! ```text
//! products ──normalize──▶ products / snapshots / variants / images / options / option_values
//!                              │
//!                              ├─ dedup by natural key (last occurrence wins)
//!                              ├─ chunk into `batch_size` rows
//!                              └─ upsert each chunk under the retry policy
//! ```
//!
//! The writer never returns an error. A batch that fails permanently, or
//! keeps failing past the attempt ceiling, is logged and counted in
//! [`PersistOutcome::lost_batches`]; the rest of the origin's rows and every
//! other origin are unaffected.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{error, warn};

use crate::config::WriterConfig;
use crate::error::AppError;
use crate::models::{
    DomainSummary, ImageRow, OptionRow, OptionValueRow, ProductRecord, ProductRow, ScrapingStatus,
    SnapshotRow, VariantRow,
};
use crate::traits::ProductStore;

// =============================================================================
// Failure classification
// =============================================================================

/// How a failed batch write should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistenceFailure {
    /// Timeout, dropped connection or anything unrecognized: retry with backoff.
    Transient,
    /// The store is shedding load: retry with backoff plus a cooldown.
    RateLimited,
    /// Schema or constraint mismatch: retrying cannot help, skip the batch.
    Fatal,
}

impl PersistenceFailure {
    /// Classifies an error returned by a [`ProductStore`].
    ///
    /// PostgreSQL errors are classified by SQLSTATE:
    ///
    /// | SQLSTATE            | Meaning                                          | Class         |
    /// |---------------------|--------------------------------------------------|---------------|
    /// | `21000`             | ON CONFLICT touched the same row twice           | `Fatal`       |
    /// | `42P10`             | no unique constraint matches the conflict target | `Fatal`       |
    /// | `42xxx`, `23xxx`    | other schema / integrity violations              | `Fatal`       |
    /// | `53300`, `53400`    | too many connections / configuration limit       | `RateLimited` |
    /// | anything else       |                                                  | `Transient`   |
    pub fn classify(error: &AppError) -> Self {
        match error {
            AppError::DatabaseError(sqlx::Error::Database(db)) => match db.code().as_deref() {
                Some("21000") | Some("42P10") => Self::Fatal,
                Some("53300") | Some("53400") => Self::RateLimited,
                Some(code) if code.starts_with("42") || code.starts_with("23") => Self::Fatal,
                _ => Self::from_message(db.message()),
            },
            AppError::RateLimitExceeded => Self::RateLimited,
            other if other.is_retryable() => Self::Transient,
            AppError::SerializationError(_) | AppError::ConfigError(_) => Self::Fatal,
            other => Self::from_message(&other.to_string()),
        }
    }

    fn from_message(message: &str) -> Self {
        let message = message.to_lowercase();
        if message.contains("cannot affect row a second time")
            || message.contains("no unique or exclusion constraint")
        {
            Self::Fatal
        } else if message.contains("rate limit") || message.contains("too many") {
            Self::RateLimited
        } else {
            Self::Transient
        }
    }
}

// =============================================================================
// Normalization
// =============================================================================

/// Keeps the last row for each key, at the position the key was first seen.
fn dedup_last_wins<T, K, F>(rows: Vec<T>, key: F) -> Vec<T>
where
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    let mut index: HashMap<K, usize> = HashMap::with_capacity(rows.len());
    let mut out: Vec<T> = Vec::with_capacity(rows.len());
    for row in rows {
        match index.get(&key(&row)) {
            Some(&i) => out[i] = row,
            None => {
                index.insert(key(&row), out.len());
                out.push(row);
            }
        }
    }
    out
}

/// Every row derived from one origin's products for one fetch cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedBatch {
    pub products: Vec<ProductRow>,
    pub snapshots: Vec<SnapshotRow>,
    pub variants: Vec<VariantRow>,
    pub images: Vec<ImageRow>,
    pub options: Vec<OptionRow>,
    pub option_values: Vec<OptionValueRow>,
}

impl NormalizedBatch {
    /// Flattens products into per-table rows stamped with `fetched_at`.
    ///
    /// Rows are deduplicated on each table's natural key within the batch.
    /// A later occurrence replaces an earlier one, so a single upsert
    /// statement never touches the same key twice.
    pub fn from_products(
        domain: &str,
        products: &[ProductRecord],
        fetched_at: DateTime<Utc>,
    ) -> Self {
        let mut batch = NormalizedBatch::default();

        for p in products {
            batch.products.push(ProductRow {
                domain: domain.to_string(),
                product_id: p.id,
                handle: p.handle.clone(),
                title: p.title.clone(),
                vendor: p.vendor.clone(),
                product_type: p.product_type.clone(),
                tags: p.tags.clone(),
                created_at: p.created_at,
                updated_at: p.updated_at,
                published_at: p.published_at,
                status: p.status.clone(),
                admin_graphql_api_id: p.admin_graphql_api_id.clone(),
                template_suffix: p.template_suffix.clone(),
                published_scope: p.published_scope.clone(),
                fetched_at,
                raw_json: p.raw.clone(),
            });

            batch.snapshots.push(SnapshotRow {
                domain: domain.to_string(),
                product_id: p.id,
                fetched_at,
                raw_json: p.raw.clone(),
            });

            for v in &p.variants {
                batch.variants.push(VariantRow {
                    domain: domain.to_string(),
                    variant_id: v.id,
                    product_id: p.id,
                    title: v.title.clone(),
                    sku: v.sku.clone(),
                    price: v.price,
                    compare_at_price: v.compare_at_price,
                    position: v.position,
                    inventory_policy: v.inventory_policy.clone(),
                    inventory_management: v.inventory_management.clone(),
                    inventory_quantity: v.inventory_quantity,
                    barcode: v.barcode.clone(),
                    weight: v.weight,
                    weight_unit: v.weight_unit.clone(),
                    requires_shipping: v.requires_shipping,
                    taxable: v.taxable,
                    option1: v.option1.clone(),
                    option2: v.option2.clone(),
                    option3: v.option3.clone(),
                    image_id: v.image_id,
                    created_at: v.created_at,
                    updated_at: v.updated_at,
                    fetched_at,
                    raw_json: v.raw.clone(),
                });
            }

            for img in &p.images {
                batch.images.push(ImageRow {
                    domain: domain.to_string(),
                    image_id: img.id,
                    product_id: p.id,
                    position: img.position,
                    src: img.src.clone(),
                    width: img.width,
                    height: img.height,
                    alt: img.alt.clone(),
                    created_at: img.created_at,
                    updated_at: img.updated_at,
                    fetched_at,
                    raw_json: img.raw.clone(),
                });
            }

            for opt in &p.options {
                let Some(name) = opt.name.clone() else {
                    continue;
                };
                batch.options.push(OptionRow {
                    domain: domain.to_string(),
                    product_id: p.id,
                    option_id: opt.id,
                    name: name.clone(),
                    position: opt.position,
                    fetched_at,
                    raw_json: opt.raw.clone(),
                });
                for (idx, value) in opt.values.iter().enumerate() {
                    batch.option_values.push(OptionValueRow {
                        domain: domain.to_string(),
                        product_id: p.id,
                        option_name: name.clone(),
                        position: idx as i32 + 1,
                        value: value.clone(),
                        fetched_at,
                    });
                }
            }
        }

        batch.products = dedup_last_wins(batch.products, |r| r.product_id);
        batch.snapshots = dedup_last_wins(batch.snapshots, |r| r.product_id);
        batch.variants = dedup_last_wins(batch.variants, |r| r.variant_id);
        batch.images = dedup_last_wins(batch.images, |r| r.image_id);
        batch.options = dedup_last_wins(batch.options, |r| (r.product_id, r.name.clone()));
        batch.option_values = dedup_last_wins(batch.option_values, |r| {
            (r.product_id, r.option_name.clone(), r.position)
        });
        batch
    }

    pub fn row_count(&self) -> usize {
        self.products.len()
            + self.snapshots.len()
            + self.variants.len()
            + self.images.len()
            + self.options.len()
            + self.option_values.len()
    }
}

impl DomainSummary {
    /// Aggregates one origin's fetched products.
    pub fn from_products(
        domain: &str,
        products: &[ProductRecord],
        fetched_at: DateTime<Utc>,
    ) -> Self {
        let vendors: HashSet<&str> = products
            .iter()
            .filter_map(|p| p.vendor.as_deref())
            .filter(|v| !v.is_empty())
            .collect();
        let product_types: BTreeSet<String> = products
            .iter()
            .filter_map(|p| p.product_type.clone())
            .filter(|t| !t.is_empty())
            .collect();
        let prices: Vec<f64> = products
            .iter()
            .flat_map(ProductRecord::prices)
            .filter(|p| p.is_finite())
            .collect();

        Self {
            domain: domain.to_string(),
            product_count: products.len() as i64,
            vendor_count: vendors.len() as i64,
            product_types: product_types.into_iter().collect(),
            price_range_min: prices.iter().copied().reduce(f64::min),
            price_range_max: prices.iter().copied().reduce(f64::max),
            scraping_status: if products.is_empty() {
                ScrapingStatus::Pending
            } else {
                ScrapingStatus::Active
            },
            last_fetched_at: fetched_at,
        }
    }
}

// =============================================================================
// Writer
// =============================================================================

/// Tables written by the writer, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Products,
    Snapshots,
    Variants,
    Images,
    Options,
    OptionValues,
    Domains,
}

impl Entity {
    pub fn table(&self) -> &'static str {
        match self {
            Entity::Products => "products",
            Entity::Snapshots => "product_snapshots",
            Entity::Variants => "variants",
            Entity::Images => "images",
            Entity::Options => "product_options",
            Entity::OptionValues => "option_values",
            Entity::Domains => "domains",
        }
    }
}

/// Result of persisting one origin.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistOutcome {
    pub rows_written: u64,
    pub committed_batches: usize,
    /// Batches skipped after a fatal error or after the last retry.
    pub lost_batches: usize,
}

impl PersistOutcome {
    pub fn is_complete(&self) -> bool {
        self.lost_batches == 0
    }
}

/// Writes normalized catalog rows through a [`ProductStore`].
///
/// Construct it once and share clones with every worker. Clones share the
/// write gate, so with `serialize_writes` enabled at most one batch is
/// being written at any time. The gate is held per attempt and released
/// during retry backoff.
pub struct BatchUpsertWriter<S>
where
    S: ProductStore,
{
    store: S,
    config: WriterConfig,
    gate: Arc<Mutex<()>>,
}

impl<S> Clone for BatchUpsertWriter<S>
where
    S: ProductStore,
{
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            config: self.config.clone(),
            gate: Arc::clone(&self.gate),
        }
    }
}

impl<S> BatchUpsertWriter<S>
where
    S: ProductStore,
{
    pub fn new(store: S) -> Self {
        Self::with_config(store, WriterConfig::default())
    }

    pub fn with_config(store: S, config: WriterConfig) -> Self {
        Self {
            store,
            config,
            gate: Arc::new(Mutex::new(())),
        }
    }

    /// Persists one origin's products, stamped with the current time.
    pub async fn upsert(&self, origin: &str, products: &[ProductRecord]) -> PersistOutcome {
        self.upsert_at(origin, products, Utc::now()).await
    }

    /// Persists one origin's products with an explicit fetch timestamp.
    ///
    /// Calling this twice with the same arguments leaves the store in the
    /// same state as calling it once.
    pub async fn upsert_at(
        &self,
        origin: &str,
        products: &[ProductRecord],
        fetched_at: DateTime<Utc>,
    ) -> PersistOutcome {
        let mut outcome = PersistOutcome::default();
        if products.is_empty() && !self.config.write_domain_summary {
            return outcome;
        }

        let batch = NormalizedBatch::from_products(origin, products, fetched_at);

        let store = &self.store;
        self.commit_chunks(origin, Entity::Products, &batch.products, &mut outcome, |c| {
            store.upsert_products(c)
        })
        .await;
        self.commit_chunks(origin, Entity::Snapshots, &batch.snapshots, &mut outcome, |c| {
            store.insert_snapshots(c)
        })
        .await;
        self.commit_chunks(origin, Entity::Variants, &batch.variants, &mut outcome, |c| {
            store.upsert_variants(c)
        })
        .await;
        self.commit_chunks(origin, Entity::Images, &batch.images, &mut outcome, |c| {
            store.upsert_images(c)
        })
        .await;
        self.commit_chunks(origin, Entity::Options, &batch.options, &mut outcome, |c| {
            store.upsert_options(c)
        })
        .await;
        self.commit_chunks(
            origin,
            Entity::OptionValues,
            &batch.option_values,
            &mut outcome,
            |c| store.upsert_option_values(c),
        )
        .await;

        if self.config.write_domain_summary {
            let summary = DomainSummary::from_products(origin, products, fetched_at);
            match self
                .with_retry(origin, Entity::Domains, 0, || {
                    store.upsert_domain_summary(&summary)
                })
                .await
            {
                Some(()) => {
                    outcome.rows_written += 1;
                    outcome.committed_batches += 1;
                }
                None => outcome.lost_batches += 1,
            }
        }

        outcome
    }

    /// Splits `rows` into `batch_size` chunks and commits each under the retry policy.
    async fn commit_chunks<'a, R, F, Fut>(
        &self,
        origin: &str,
        entity: Entity,
        rows: &'a [R],
        outcome: &mut PersistOutcome,
        op: F,
    ) where
        F: Fn(&'a [R]) -> Fut,
        Fut: Future<Output = Result<u64, AppError>>,
    {
        for (index, chunk) in rows.chunks(self.config.batch_size.max(1)).enumerate() {
            match self.with_retry(origin, entity, index, || op(chunk)).await {
                Some(affected) => {
                    outcome.rows_written += affected;
                    outcome.committed_batches += 1;
                }
                None => outcome.lost_batches += 1,
            }
        }
    }

    /// Runs one batch operation under the retry policy.
    ///
    /// Returns `None` when the batch is given up on.
    async fn with_retry<T, F, Fut>(
        &self,
        origin: &str,
        entity: Entity,
        batch_index: usize,
        mut op: F,
    ) -> Option<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let policy = &self.config.retry;
        let table = entity.table();
        let mut attempt: u32 = 1;

        loop {
            let result = {
                let _guard = if self.config.serialize_writes {
                    Some(self.gate.lock().await)
                } else {
                    None
                };
                op().await
            };
            let err = match result {
                Ok(value) => return Some(value),
                Err(e) => e,
            };

            let class = PersistenceFailure::classify(&err);
            if class == PersistenceFailure::Fatal {
                error!(
                    origin,
                    table,
                    batch = batch_index,
                    error = %err,
                    "Batch rejected by the store, skipping"
                );
                return None;
            }
            if attempt >= policy.max_attempts {
                error!(
                    origin,
                    table,
                    batch = batch_index,
                    attempts = attempt,
                    error = %err,
                    "Batch failed after retries, skipping"
                );
                return None;
            }

            let mut delay = policy.delay_for(attempt);
            if class == PersistenceFailure::RateLimited {
                delay += policy.rate_limit_cooldown;
            }
            warn!(
                origin,
                table,
                batch = batch_index,
                attempt,
                retry_in_ms = delay.as_millis() as u64,
                error = %err,
                "Batch write failed, retrying"
            );
            if !delay.is_zero() {
                sleep(delay).await;
            }
            attempt += 1;
        }
    }
}
