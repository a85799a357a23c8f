//! Test utilities for integration tests.
//!
//! Provides helper functions to set up isolated PostgreSQL containers
//! with pgvector extension for each test.

use serde_json::{Value, json};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use storecrawl_core::ProductRecord;
use testcontainers::core::{ContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage, ImageExt};

/// Sets up a PostgreSQL container with pgvector and returns a migrated pool.
///
/// Uses the official pgvector/pgvector:pg16 image which includes the vector extension.
/// Each call creates a fresh, isolated database container. The container is
/// automatically cleaned up when the returned `ContainerAsync` is dropped.
///
/// # Returns
///
/// A tuple of (PgPool, ContainerAsync) - keep the container alive for the test duration.
pub async fn setup_test_db() -> (PgPool, ContainerAsync<GenericImage>) {
    let container = GenericImage::new("pgvector/pgvector", "pg16")
        .with_exposed_port(ContainerPort::Tcp(5432))
        .with_wait_for(WaitFor::message_on_stderr(
            "database system is ready to accept connections",
        ))
        .with_env_var("POSTGRES_PASSWORD", "postgres")
        .with_env_var("POSTGRES_DB", "postgres")
        .start()
        .await
        .expect("Failed to start PostgreSQL container");

    let host = container.get_host().await.expect("Failed to get host");
    let port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("Failed to get port");

    let connection_string = format!("postgresql://postgres:postgres@{}:{}/postgres", host, port);

    // Create connection pool with retry logic for container startup
    const MAX_RETRIES: u32 = 30;
    let mut retries = 0;
    let pool = loop {
        match PgPoolOptions::new()
            .max_connections(5)
            .connect(&connection_string)
            .await
        {
            Ok(pool) => break pool,
            Err(e) => {
                retries += 1;
                if retries >= MAX_RETRIES {
                    panic!(
                        "Failed to connect to database after {} retries: {}",
                        MAX_RETRIES, e
                    );
                }
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
        }
    };

    storecrawl_db::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");

    (pool, container)
}

/// Builds a raw catalog item the way a storefront returns it.
///
/// Each product gets one variant (`id * 10`), one image (`id * 100`) and a
/// `Size` option with two values.
pub fn sample_item(id: i64, title: &str) -> Value {
    json!({
        "id": id,
        "title": title,
        "handle": format!("product-{}", id),
        "vendor": "Acme",
        "product_type": "Shirts",
        "tags": ["linen", "summer"],
        "updated_at": "2025-02-10T09:30:00-05:00",
        "variants": [{
            "id": id * 10,
            "product_id": id,
            "title": "S",
            "price": "19.99",
            "option1": "S"
        }],
        "images": [{"id": id * 100, "position": 1, "src": format!("https://cdn.example/{}.jpg", id)}],
        "options": [{"id": id * 1000, "name": "Size", "position": 1, "values": ["S", "M"]}]
    })
}

/// Parsed records for ids `first_id..first_id + count`.
pub fn sample_records(first_id: i64, count: usize) -> Vec<ProductRecord> {
    (first_id..first_id + count as i64)
        .map(|id| {
            ProductRecord::from_value(sample_item(id, &format!("Product {}", id)))
                .expect("sample item has an id")
        })
        .collect()
}

/// Creates a random vector of the specified dimensions.
pub fn random_vector(dims: usize) -> Vec<f32> {
    use rand::Rng;
    let mut rng = rand::rng();
    (0..dims).map(|_| rng.random::<f32>()).collect()
}

/// Counts rows in a table.
pub async fn count(pool: &PgPool, table: &str) -> i64 {
    let query = format!("SELECT COUNT(*) FROM {}", table);
    let (n,): (i64,) = sqlx::query_as(&query)
        .fetch_one(pool)
        .await
        .expect("count query should succeed");
    n
}

/// Returns every row of `table` as one JSON array, in a stable order.
///
/// Two calls return the same text only if every column of every row matches.
pub async fn table_state(pool: &PgPool, table: &str) -> String {
    let query = format!(
        "SELECT COALESCE(jsonb_agg(to_jsonb(t) ORDER BY to_jsonb(t)::text), '[]'::jsonb)::text \
         FROM {} t",
        table
    );
    let (state,): (String,) = sqlx::query_as(&query)
        .fetch_one(pool)
        .await
        .expect("table state query should succeed");
    state
}
