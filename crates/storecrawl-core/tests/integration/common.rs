//! Test utilities and mock implementations for integration tests.
//!
//! Provides a scripted storefront client and an in-memory product store
//! keyed exactly like the PostgreSQL schema, for testing the crawl pipeline
//! in isolation.

use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use storecrawl_core::models::{
    DomainSummary, ImageRow, OptionRow, OptionValueRow, ProductRow, SnapshotRow, VariantRow,
};
use storecrawl_core::traits::{CatalogClient, ProductStore};
use storecrawl_core::{
    AppError, CrawlConfig, FetchConfig, RetryPolicy, ThrottleConfig, WriterConfig,
};

pub const PRIMARY: &str = "/collections/all/products.json";
pub const FALLBACK: &str = "/products.json";

// =============================================================================
// Fixtures
// =============================================================================

/// `count` minimal products with consecutive ids starting at `first_id`.
pub fn products(first_id: i64, count: usize) -> Vec<Value> {
    (0..count as i64)
        .map(|i| {
            let id = first_id + i;
            json!({
                "id": id,
                "title": format!("Product {}", id),
                "vendor": "Acme",
                "product_type": "Shirts",
                "tags": ["summer"],
                "variants": [{"id": id * 10, "price": "19.99", "option1": "S"}],
                "images": [{"id": id * 100, "src": format!("https://cdn.example/{}.jpg", id)}],
                "options": [{"name": "Size", "position": 1, "values": ["S", "M"]}]
            })
        })
        .collect()
}

/// Crawl configuration with every pause disabled.
pub fn fast_crawl_config(permits: usize, max_parallelism: usize) -> CrawlConfig {
    CrawlConfig::default()
        .with_max_parallelism(max_parallelism)
        .with_fetch(FetchConfig::default().without_delays())
        .with_throttle(ThrottleConfig::unpaced(permits))
}

/// Writer configuration that retries without waiting.
pub fn fast_writer_config(max_attempts: u32) -> WriterConfig {
    WriterConfig::default().with_retry(RetryPolicy::immediate(max_attempts))
}

// =============================================================================
// MockCatalogClient
// =============================================================================

/// One scripted answer to a page request.
#[derive(Clone, Debug)]
pub enum Reply {
    Items(Vec<Value>),
    Status(u16),
}

type PageKey = (String, String, u32);

/// Storefront client serving scripted pages per (origin, endpoint, page).
///
/// Each request pops the next reply for its key; unscripted requests get an
/// empty page. Optional latency makes requests overlap so in-flight
/// concurrency can be measured.
#[derive(Clone, Default)]
pub struct MockCatalogClient {
    script: Arc<Mutex<HashMap<PageKey, VecDeque<Reply>>>>,
    calls: Arc<Mutex<Vec<PageKey>>>,
    latency: Duration,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: Arc<AtomicUsize>,
}

impl MockCatalogClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn reply(self, origin: &str, endpoint: &str, page: u32, reply: Reply) -> Self {
        self.script
            .lock()
            .unwrap()
            .entry((origin.to_string(), endpoint.to_string(), page))
            .or_default()
            .push_back(reply);
        self
    }

    pub fn page(self, origin: &str, endpoint: &str, page: u32, items: Vec<Value>) -> Self {
        self.reply(origin, endpoint, page, Reply::Items(items))
    }

    pub fn status(self, origin: &str, endpoint: &str, page: u32, status: u16) -> Self {
        self.reply(origin, endpoint, page, Reply::Status(status))
    }

    /// Scripts consecutive pages of the given sizes with non-overlapping ids.
    pub fn catalog(mut self, origin: &str, endpoint: &str, sizes: &[usize]) -> Self {
        let mut next_id = 1;
        for (i, size) in sizes.iter().enumerate() {
            self = self.page(origin, endpoint, i as u32 + 1, products(next_id, *size));
            next_id += *size as i64;
        }
        self
    }

    pub fn calls_for(&self, origin: &str) -> Vec<(String, u32)> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(o, _, _)| o == origin)
            .map(|(_, e, p)| (e.clone(), *p))
            .collect()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

impl CatalogClient for MockCatalogClient {
    async fn fetch_page(
        &self,
        origin: &str,
        endpoint: &str,
        page: u32,
        _limit: usize,
    ) -> Result<Vec<Value>, AppError> {
        let key = (origin.to_string(), endpoint.to_string(), page);
        self.calls.lock().unwrap().push(key.clone());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let reply = self
            .script
            .lock()
            .unwrap()
            .get_mut(&key)
            .and_then(VecDeque::pop_front);

        let url = format!("https://{}{}?page={}", origin, endpoint, page);
        match reply {
            None => Ok(Vec::new()),
            Some(Reply::Items(items)) => Ok(items),
            Some(Reply::Status(status @ (400 | 404))) => {
                Err(AppError::EndpointNotFound { status, url })
            }
            Some(Reply::Status(401)) => Err(AppError::AuthRequired),
            Some(Reply::Status(429)) => Err(AppError::RateLimitExceeded),
            Some(Reply::Status(status)) => {
                Err(AppError::ClientError(format!("HTTP {} from {}", status, url)))
            }
        }
    }
}

// =============================================================================
// MockProductStore
// =============================================================================

/// Kind of failure injected for a domain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Injected {
    /// A pool timeout, retried by the writer.
    Transient,
    /// An ON CONFLICT cardinality violation, never retried.
    Fatal,
}

impl Injected {
    fn error(self) -> AppError {
        match self {
            Injected::Transient => AppError::DatabaseError(sqlx::Error::PoolTimedOut),
            Injected::Fatal => AppError::Generic(
                "ON CONFLICT DO UPDATE command cannot affect row a second time".to_string(),
            ),
        }
    }
}

#[derive(Default)]
struct Tables {
    products: HashMap<(String, i64), ProductRow>,
    snapshots: HashMap<(String, i64, DateTime<Utc>), SnapshotRow>,
    variants: HashMap<(String, i64), VariantRow>,
    images: HashMap<(String, i64), ImageRow>,
    options: HashMap<(String, i64, String), OptionRow>,
    option_values: HashMap<(String, i64, String, i32), OptionValueRow>,
    domains: HashMap<String, (DomainSummary, u32)>,
}

/// In-memory store keyed on each table's natural key.
///
/// Like PostgreSQL, a single batch touching the same key twice is rejected
/// with a cardinality error. Failures can be injected per domain.
#[derive(Clone, Default)]
pub struct MockProductStore {
    tables: Arc<Mutex<Tables>>,
    injected: Arc<Mutex<HashMap<String, (Injected, usize)>>>,
    calls: Arc<Mutex<HashMap<(String, &'static str), usize>>>,
    write_latency: Duration,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: Arc<AtomicUsize>,
}

impl MockProductStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_write_latency(mut self, latency: Duration) -> Self {
        self.write_latency = latency;
        self
    }

    /// Makes the next `times` writes for `domain` fail with `kind`.
    pub fn fail(self, domain: &str, kind: Injected, times: usize) -> Self {
        self.injected
            .lock()
            .unwrap()
            .insert(domain.to_string(), (kind, times));
        self
    }

    pub fn calls(&self, domain: &str, table: &'static str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(&(domain.to_string(), table))
            .copied()
            .unwrap_or(0)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn product_count(&self, domain: &str) -> usize {
        let tables = self.tables.lock().unwrap();
        tables.products.keys().filter(|(d, _)| d == domain).count()
    }

    pub fn product(&self, domain: &str, id: i64) -> Option<ProductRow> {
        let tables = self.tables.lock().unwrap();
        tables.products.get(&(domain.to_string(), id)).cloned()
    }

    pub fn image(&self, domain: &str, id: i64) -> Option<ImageRow> {
        let tables = self.tables.lock().unwrap();
        tables.images.get(&(domain.to_string(), id)).cloned()
    }

    pub fn domain(&self, domain: &str) -> Option<DomainSummary> {
        let tables = self.tables.lock().unwrap();
        tables.domains.get(domain).map(|(summary, _)| summary.clone())
    }

    pub fn successful_fetches(&self, domain: &str) -> u32 {
        let tables = self.tables.lock().unwrap();
        tables.domains.get(domain).map_or(0, |(_, fetches)| *fetches)
    }

    /// Row counts in table order: products, snapshots, variants, images,
    /// options, option_values.
    pub fn counts(&self) -> [usize; 6] {
        let t = self.tables.lock().unwrap();
        [
            t.products.len(),
            t.snapshots.len(),
            t.variants.len(),
            t.images.len(),
            t.options.len(),
            t.option_values.len(),
        ]
    }

    async fn enter(&self, domain: &str, table: &'static str) -> Result<(), AppError> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry((domain.to_string(), table))
            .or_default() += 1;

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.write_latency.is_zero() {
            tokio::time::sleep(self.write_latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let mut injected = self.injected.lock().unwrap();
        if let Some((kind, remaining)) = injected.get_mut(domain)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(kind.error());
        }
        Ok(())
    }
}

/// Upserts rows into `map`, rejecting a batch that repeats a key.
fn upsert_unique<K, R>(
    map: &mut HashMap<K, R>,
    rows: &[R],
    key: impl Fn(&R) -> K,
) -> Result<u64, AppError>
where
    K: Eq + Hash + Clone,
    R: Clone,
{
    let mut seen = HashSet::new();
    if !rows.iter().all(|r| seen.insert(key(r))) {
        return Err(AppError::Generic(
            "ON CONFLICT DO UPDATE command cannot affect row a second time".to_string(),
        ));
    }
    for row in rows {
        map.insert(key(row), row.clone());
    }
    Ok(rows.len() as u64)
}

fn domain_of<R>(rows: &[R], domain: impl Fn(&R) -> &str) -> String {
    rows.first().map(|r| domain(r).to_string()).unwrap_or_default()
}

impl ProductStore for MockProductStore {
    async fn upsert_products(&self, rows: &[ProductRow]) -> Result<u64, AppError> {
        self.enter(&domain_of(rows, |r| &r.domain), "products").await?;
        let mut t = self.tables.lock().unwrap();
        upsert_unique(&mut t.products, rows, |r| (r.domain.clone(), r.product_id))
    }

    async fn insert_snapshots(&self, rows: &[SnapshotRow]) -> Result<u64, AppError> {
        self.enter(&domain_of(rows, |r| &r.domain), "product_snapshots")
            .await?;
        let mut t = self.tables.lock().unwrap();
        let mut inserted = 0;
        for row in rows {
            let key = (row.domain.clone(), row.product_id, row.fetched_at);
            if !t.snapshots.contains_key(&key) {
                t.snapshots.insert(key, row.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn upsert_variants(&self, rows: &[VariantRow]) -> Result<u64, AppError> {
        self.enter(&domain_of(rows, |r| &r.domain), "variants").await?;
        let mut t = self.tables.lock().unwrap();
        upsert_unique(&mut t.variants, rows, |r| (r.domain.clone(), r.variant_id))
    }

    async fn upsert_images(&self, rows: &[ImageRow]) -> Result<u64, AppError> {
        self.enter(&domain_of(rows, |r| &r.domain), "images").await?;
        let mut t = self.tables.lock().unwrap();
        upsert_unique(&mut t.images, rows, |r| (r.domain.clone(), r.image_id))
    }

    async fn upsert_options(&self, rows: &[OptionRow]) -> Result<u64, AppError> {
        self.enter(&domain_of(rows, |r| &r.domain), "product_options")
            .await?;
        let mut t = self.tables.lock().unwrap();
        upsert_unique(&mut t.options, rows, |r| {
            (r.domain.clone(), r.product_id, r.name.clone())
        })
    }

    async fn upsert_option_values(&self, rows: &[OptionValueRow]) -> Result<u64, AppError> {
        self.enter(&domain_of(rows, |r| &r.domain), "option_values")
            .await?;
        let mut t = self.tables.lock().unwrap();
        upsert_unique(&mut t.option_values, rows, |r| {
            (r.domain.clone(), r.product_id, r.option_name.clone(), r.position)
        })
    }

    async fn upsert_domain_summary(&self, summary: &DomainSummary) -> Result<(), AppError> {
        self.enter(&summary.domain, "domains").await?;
        let mut t = self.tables.lock().unwrap();
        let stored = t.domains.get(&summary.domain);

        // Counted once per newer non-empty fetch, like the SQL upsert.
        let newer = stored.is_none_or(|(s, _)| summary.last_fetched_at > s.last_fetched_at);
        let mut fetches = stored.map_or(0, |(_, n)| *n);
        if newer && summary.product_count > 0 {
            fetches += 1;
        }
        let mut row = summary.clone();
        if let Some((s, _)) = stored {
            row.last_fetched_at = row.last_fetched_at.max(s.last_fetched_at);
        }

        t.domains.insert(summary.domain.clone(), (row, fetches));
        Ok(())
    }
}
