//! Integration tests for ProductRepository.
//!
//! These tests verify the repository layer against a real PostgreSQL database
//! with pgvector extension. Each test runs in an isolated container.

use chrono::{DateTime, TimeZone, Utc};
use sqlx::PgPool;
use storecrawl_core::error::AppError;
use storecrawl_core::{
    BatchUpsertWriter, DomainSummary, EmbedConfig, EmbeddingBackfillService, EmbeddingProvider,
    NormalizedBatch, PersistenceFailure, ProductRecord, WriterConfig,
};
use storecrawl_db::ProductRepository;

use crate::integration::common::{
    count, random_vector, sample_item, sample_records, setup_test_db, table_state,
};

const ENTITY_TABLES: [&str; 7] = [
    "products",
    "product_snapshots",
    "variants",
    "images",
    "product_options",
    "option_values",
    "domains",
];

fn at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, hour, 0, 0).unwrap()
}

async fn successful_fetches(pool: &PgPool, domain: &str) -> i32 {
    let (n,): (i32,) =
        sqlx::query_as("SELECT successful_fetch_count FROM domains WHERE domain = $1")
            .bind(domain)
            .fetch_one(pool)
            .await
            .unwrap();
    n
}

/// Test 1: Verify product rows are inserted and then updated in place.
#[tokio::test]
async fn test_upsert_products_insert_then_update() {
    let (pool, _container) = setup_test_db().await;
    let repo = ProductRepository::new(pool.clone());

    let first = NormalizedBatch::from_products("a.example", &sample_records(1, 3), at(10));
    let written = repo
        .upsert_products(&first.products)
        .await
        .expect("insert should succeed");
    assert_eq!(written, 3);

    let renamed = ProductRecord::from_value(sample_item(2, "Renamed")).unwrap();
    let second = NormalizedBatch::from_products("a.example", &[renamed], at(11));
    repo.upsert_products(&second.products)
        .await
        .expect("update should succeed");

    assert_eq!(count(&pool, "products").await, 3, "no new row for a known key");

    let (title, tags, fetched_at): (Option<String>, Vec<String>, DateTime<Utc>) = sqlx::query_as(
        "SELECT title, tags, fetched_at FROM products WHERE domain = $1 AND product_id = $2",
    )
    .bind("a.example")
    .bind(2_i64)
    .fetch_one(&pool)
    .await
    .unwrap();

    assert_eq!(title.as_deref(), Some("Renamed"));
    assert_eq!(tags, vec!["linen".to_string(), "summer".to_string()]);
    assert_eq!(fetched_at, at(11));
}

/// Test 2: Verify the same product id on two domains yields two rows.
#[tokio::test]
async fn test_natural_key_includes_domain() {
    let (pool, _container) = setup_test_db().await;
    let repo = ProductRepository::new(pool.clone());

    let records = sample_records(1, 2);
    for domain in ["a.example", "b.example"] {
        let batch = NormalizedBatch::from_products(domain, &records, at(10));
        repo.upsert_products(&batch.products).await.unwrap();
        repo.upsert_variants(&batch.variants).await.unwrap();
    }

    assert_eq!(count(&pool, "products").await, 4);
    assert_eq!(count(&pool, "variants").await, 4);
}

/// Test 3: Verify snapshots are append-only.
///
/// Re-inserting an existing (domain, product_id, fetched_at) is a no-op and
/// must not overwrite the stored payload.
#[tokio::test]
async fn test_snapshots_are_append_only() {
    let (pool, _container) = setup_test_db().await;
    let repo = ProductRepository::new(pool.clone());

    let original = NormalizedBatch::from_products("a.example", &sample_records(1, 1), at(10));
    assert_eq!(repo.insert_snapshots(&original.snapshots).await.unwrap(), 1);

    let changed = ProductRecord::from_value(sample_item(1, "Changed")).unwrap();
    let replay = NormalizedBatch::from_products("a.example", &[changed.clone()], at(10));
    assert_eq!(
        repo.insert_snapshots(&replay.snapshots).await.unwrap(),
        0,
        "existing snapshot is left untouched"
    );

    let (title,): (Option<String>,) = sqlx::query_as(
        "SELECT raw_json->>'title' FROM product_snapshots WHERE domain = 'a.example' AND product_id = 1",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(title.as_deref(), Some("Product 1"));

    let next_cycle = NormalizedBatch::from_products("a.example", &[changed], at(11));
    assert_eq!(repo.insert_snapshots(&next_cycle.snapshots).await.unwrap(), 1);
    assert_eq!(count(&pool, "product_snapshots").await, 2);
}

/// Test 4: Verify the full writer pipeline is idempotent against PostgreSQL.
///
/// Every column of every entity table, including the domain summary, must be
/// unchanged by a replay of the same batch.
#[tokio::test]
async fn test_writer_upsert_is_idempotent() {
    let (pool, _container) = setup_test_db().await;
    let repo = ProductRepository::new(pool.clone());
    let writer = BatchUpsertWriter::with_config(repo.clone(), WriterConfig::default());
    let records = sample_records(1, 120);

    let first = writer.upsert_at("a.example", &records, at(10)).await;
    assert!(first.is_complete());
    let stats_once = repo.get_stats().await.unwrap();
    let mut state_once = Vec::new();
    for table in ENTITY_TABLES {
        state_once.push(table_state(&pool, table).await);
    }

    let second = writer.upsert_at("a.example", &records, at(10)).await;
    assert!(second.is_complete());
    let stats_twice = repo.get_stats().await.unwrap();

    assert_eq!(stats_once, stats_twice);
    for (table, before) in ENTITY_TABLES.iter().zip(&state_once) {
        assert_eq!(
            &table_state(&pool, table).await,
            before,
            "{} changed on replay",
            table
        );
    }

    assert_eq!(stats_twice.products, 120);
    assert_eq!(stats_twice.variants, 120);
    assert_eq!(stats_twice.images, 120);
    assert_eq!(stats_twice.option_values, 240);
    assert_eq!(stats_twice.snapshots, 120);
    assert_eq!(stats_twice.domains, 1);
    assert_eq!(count(&pool, "product_options").await, 120);

    assert_eq!(successful_fetches(&pool, "a.example").await, 1);
}

/// Test 5: Verify a batch touching one key twice is classified as fatal.
#[tokio::test]
async fn test_duplicate_key_in_batch_is_fatal() {
    let (pool, _container) = setup_test_db().await;
    let repo = ProductRepository::new(pool);

    let batch = NormalizedBatch::from_products("a.example", &sample_records(1, 1), at(10));
    let mut rows = batch.products.clone();
    rows.push(batch.products[0].clone());

    let err = repo
        .upsert_products(&rows)
        .await
        .expect_err("PostgreSQL rejects a row affected twice");

    assert!(matches!(err, AppError::DatabaseError(_)));
    assert_eq!(PersistenceFailure::classify(&err), PersistenceFailure::Fatal);
}

/// Test 6: Verify domain summaries count distinct successful fetches only.
///
/// An empty fetch and a replay of an already stored fetch leave the counter
/// where it was.
#[tokio::test]
async fn test_domain_summary_counts_successful_fetches() {
    let (pool, _container) = setup_test_db().await;
    let repo = ProductRepository::new(pool.clone());

    let records = sample_records(1, 4);
    let first = DomainSummary::from_products("a.example", &records, at(10));
    repo.upsert_domain_summary(&first).await.unwrap();
    assert_eq!(successful_fetches(&pool, "a.example").await, 1);

    repo.upsert_domain_summary(&first).await.unwrap();
    assert_eq!(
        successful_fetches(&pool, "a.example").await,
        1,
        "a replay does not count again"
    );

    let second = DomainSummary::from_products("a.example", &records, at(11));
    repo.upsert_domain_summary(&second).await.unwrap();
    assert_eq!(successful_fetches(&pool, "a.example").await, 2);

    let empty = DomainSummary::from_products("a.example", &[], at(12));
    repo.upsert_domain_summary(&empty).await.unwrap();
    repo.upsert_domain_summary(&empty).await.unwrap();

    let (product_count, status, min_price, last_fetched_at): (
        i64,
        String,
        Option<f64>,
        DateTime<Utc>,
    ) = sqlx::query_as(
        "SELECT product_count, scraping_status, price_range_min, last_fetched_at \
         FROM domains WHERE domain = 'a.example'",
    )
    .fetch_one(&pool)
    .await
    .unwrap();

    assert_eq!(product_count, 0);
    assert_eq!(status, "pending");
    assert_eq!(
        successful_fetches(&pool, "a.example").await,
        2,
        "the empty fetch does not count"
    );
    assert_eq!(min_price, None);
    assert_eq!(last_fetched_at, at(12));
    assert_eq!(count(&pool, "domains").await, 1);
}

/// Test 7: Verify pending embeddings are keyset-paged in key order.
#[tokio::test]
async fn test_pending_embeddings_pages_by_key() {
    let (pool, _container) = setup_test_db().await;
    let repo = ProductRepository::new(pool);

    for domain in ["b.example", "a.example"] {
        let batch = NormalizedBatch::from_products(domain, &sample_records(1, 3), at(10));
        repo.upsert_products(&batch.products).await.unwrap();
    }

    let first = repo.pending_embeddings(None, 4).await.unwrap();
    let keys: Vec<(&str, i64)> = first
        .iter()
        .map(|p| (p.domain.as_str(), p.product_id))
        .collect();
    assert_eq!(
        keys,
        vec![
            ("a.example", 1),
            ("a.example", 2),
            ("a.example", 3),
            ("b.example", 1)
        ]
    );
    assert_eq!(first[0].text, "Product 1");

    let rest = repo
        .pending_embeddings(Some(("b.example", 1)), 4)
        .await
        .unwrap();
    assert_eq!(rest.len(), 2);
    assert_eq!(rest[0].product_id, 2);
}

/// Test 8: Verify stored embeddings survive a re-crawl.
#[tokio::test]
async fn test_store_embeddings_and_recrawl_keeps_them() {
    let (pool, _container) = setup_test_db().await;
    let repo = ProductRepository::new(pool);

    let batch = NormalizedBatch::from_products("a.example", &sample_records(1, 2), at(10));
    repo.upsert_products(&batch.products).await.unwrap();

    let pending = repo.pending_embeddings(None, 10).await.unwrap();
    let rows: Vec<_> = pending
        .into_iter()
        .map(|p| (p, random_vector(384)))
        .collect();
    assert_eq!(repo.store_embeddings(&rows).await.unwrap(), 2);
    assert!(repo.pending_embeddings(None, 10).await.unwrap().is_empty());

    let again = NormalizedBatch::from_products("a.example", &sample_records(1, 2), at(11));
    repo.upsert_products(&again.products).await.unwrap();

    assert!(repo.pending_embeddings(None, 10).await.unwrap().is_empty());
    assert_eq!(repo.get_stats().await.unwrap().products_with_embeddings, 2);
}

#[derive(Clone)]
struct ConstantProvider;

impl EmbeddingProvider for ConstantProvider {
    fn name(&self) -> &'static str {
        "constant"
    }

    fn dimension(&self) -> usize {
        384
    }

    async fn generate_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
        Ok(texts.iter().map(|_| vec![0.5; 384]).collect())
    }
}

/// Test 9: Verify the backfill service fills every pending row.
#[tokio::test]
async fn test_backfill_service_against_postgres() {
    let (pool, _container) = setup_test_db().await;
    let repo = ProductRepository::new(pool);

    let batch = NormalizedBatch::from_products("a.example", &sample_records(1, 7), at(10));
    repo.upsert_products(&batch.products).await.unwrap();

    let service = EmbeddingBackfillService::new(repo.clone(), ConstantProvider);
    let config = EmbedConfig {
        batch_size: 3,
        ..EmbedConfig::default()
    };
    let stats = service.run(&config).await.unwrap();

    assert_eq!(stats.scanned, 7);
    assert_eq!(stats.embedded, 7);
    assert_eq!(stats.failed_batches, 0);
    assert_eq!(repo.get_stats().await.unwrap().products_with_embeddings, 7);
}

/// Test 10: Verify migrations can be applied twice.
#[tokio::test]
async fn test_migrations_are_rerunnable() {
    let (pool, _container) = setup_test_db().await;

    storecrawl_db::run_migrations(&pool)
        .await
        .expect("second run should be a no-op");

    let repo = ProductRepository::new(pool);
    repo.health_check().await.unwrap();
    assert_eq!(repo.get_stats().await.unwrap().products, 0);
}

/// Test 11: Verify the health check reports an unusable pool as retryable.
#[tokio::test]
async fn test_health_check_fails_on_closed_pool() {
    let (pool, _container) = setup_test_db().await;
    let repo = ProductRepository::new(pool.clone());
    repo.health_check().await.expect("open pool is healthy");

    pool.close().await;

    let err = repo
        .health_check()
        .await
        .expect_err("closed pool cannot be reached");
    assert!(err.is_retryable());
}
