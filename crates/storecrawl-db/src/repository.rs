//! Product repository for PostgreSQL with pgvector support.
//!
//! Every write is one multi-row statement built with [`QueryBuilder`]. Rows
//! are upserted on the entity's natural key with `ON CONFLICT ... DO UPDATE`,
//! so re-running a crawl converges on the same stored state. Snapshots are
//! the exception: they are append-only and an existing
//! (domain, product_id, fetched_at) row is never touched.
//!
//! Callers must not put two rows with the same key into one call; PostgreSQL
//! rejects that with a cardinality violation. `BatchUpsertWriter` dedups
//! before it gets here.

use pgvector::Vector;
use sqlx::types::Json;
use sqlx::{PgPool, Pool, Postgres, QueryBuilder};
use storecrawl_core::error::AppError;
use storecrawl_core::models::{
    DomainSummary, ImageRow, OptionRow, OptionValueRow, PendingEmbedding, ProductRow, SnapshotRow,
    StoreStats, VariantRow,
};

/// Repository for catalog persistence in PostgreSQL.
///
/// # Examples
///
/// ```no_run
/// use sqlx::postgres::PgPoolOptions;
/// use storecrawl_db::ProductRepository;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = PgPoolOptions::new()
///     .max_connections(5)
///     .connect("postgresql://localhost/storecrawl")
///     .await?;
///
/// let repo = ProductRepository::new(pool);
/// let stats = repo.get_stats().await?;
/// println!("{} products stored", stats.products);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ProductRepository {
    pool: Pool<Postgres>,
}

impl ProductRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Upserts product rows on (domain, product_id).
    ///
    /// The `embedding` column is left alone so a re-crawl does not discard
    /// vectors computed by the backfill job.
    pub async fn upsert_products(&self, rows: &[ProductRow]) -> Result<u64, AppError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO products (domain, product_id, handle, title, vendor, product_type, tags, \
             created_at, updated_at, published_at, status, admin_graphql_api_id, template_suffix, \
             published_scope, fetched_at, raw_json) ",
        );
        builder.push_values(rows, |mut b, row| {
            b.push_bind(row.domain.as_str())
                .push_bind(row.product_id)
                .push_bind(row.handle.as_deref())
                .push_bind(row.title.as_deref())
                .push_bind(row.vendor.as_deref())
                .push_bind(row.product_type.as_deref())
                .push_bind(row.tags.as_slice())
                .push_bind(row.created_at)
                .push_bind(row.updated_at)
                .push_bind(row.published_at)
                .push_bind(row.status.as_deref())
                .push_bind(row.admin_graphql_api_id.as_deref())
                .push_bind(row.template_suffix.as_deref())
                .push_bind(row.published_scope.as_deref())
                .push_bind(row.fetched_at)
                .push_bind(Json(&row.raw_json));
        });
        builder.push(
            r#"
            ON CONFLICT (domain, product_id) DO UPDATE SET
                handle = EXCLUDED.handle,
                title = EXCLUDED.title,
                vendor = EXCLUDED.vendor,
                product_type = EXCLUDED.product_type,
                tags = EXCLUDED.tags,
                created_at = EXCLUDED.created_at,
                updated_at = EXCLUDED.updated_at,
                published_at = EXCLUDED.published_at,
                status = EXCLUDED.status,
                admin_graphql_api_id = EXCLUDED.admin_graphql_api_id,
                template_suffix = EXCLUDED.template_suffix,
                published_scope = EXCLUDED.published_scope,
                fetched_at = EXCLUDED.fetched_at,
                raw_json = EXCLUDED.raw_json
            "#,
        );

        self.execute(builder).await
    }

    /// Appends snapshot rows; duplicates of an existing key are ignored.
    pub async fn insert_snapshots(&self, rows: &[SnapshotRow]) -> Result<u64, AppError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO product_snapshots (domain, product_id, fetched_at, raw_json) ",
        );
        builder.push_values(rows, |mut b, row| {
            b.push_bind(row.domain.as_str())
                .push_bind(row.product_id)
                .push_bind(row.fetched_at)
                .push_bind(Json(&row.raw_json));
        });
        builder.push(" ON CONFLICT (domain, product_id, fetched_at) DO NOTHING");

        self.execute(builder).await
    }

    /// Upserts variant rows on (domain, variant_id).
    pub async fn upsert_variants(&self, rows: &[VariantRow]) -> Result<u64, AppError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO variants (domain, variant_id, product_id, title, sku, price, \
             compare_at_price, position, inventory_policy, inventory_management, \
             inventory_quantity, barcode, weight, weight_unit, requires_shipping, taxable, \
             option1, option2, option3, image_id, created_at, updated_at, fetched_at, raw_json) ",
        );
        builder.push_values(rows, |mut b, row| {
            b.push_bind(row.domain.as_str())
                .push_bind(row.variant_id)
                .push_bind(row.product_id)
                .push_bind(row.title.as_deref())
                .push_bind(row.sku.as_deref())
                .push_bind(row.price)
                .push_bind(row.compare_at_price)
                .push_bind(row.position)
                .push_bind(row.inventory_policy.as_deref())
                .push_bind(row.inventory_management.as_deref())
                .push_bind(row.inventory_quantity)
                .push_bind(row.barcode.as_deref())
                .push_bind(row.weight)
                .push_bind(row.weight_unit.as_deref())
                .push_bind(row.requires_shipping)
                .push_bind(row.taxable)
                .push_bind(row.option1.as_deref())
                .push_bind(row.option2.as_deref())
                .push_bind(row.option3.as_deref())
                .push_bind(row.image_id)
                .push_bind(row.created_at)
                .push_bind(row.updated_at)
                .push_bind(row.fetched_at)
                .push_bind(Json(&row.raw_json));
        });
        builder.push(
            r#"
            ON CONFLICT (domain, variant_id) DO UPDATE SET
                product_id = EXCLUDED.product_id,
                title = EXCLUDED.title,
                sku = EXCLUDED.sku,
                price = EXCLUDED.price,
                compare_at_price = EXCLUDED.compare_at_price,
                position = EXCLUDED.position,
                inventory_policy = EXCLUDED.inventory_policy,
                inventory_management = EXCLUDED.inventory_management,
                inventory_quantity = EXCLUDED.inventory_quantity,
                barcode = EXCLUDED.barcode,
                weight = EXCLUDED.weight,
                weight_unit = EXCLUDED.weight_unit,
                requires_shipping = EXCLUDED.requires_shipping,
                taxable = EXCLUDED.taxable,
                option1 = EXCLUDED.option1,
                option2 = EXCLUDED.option2,
                option3 = EXCLUDED.option3,
                image_id = EXCLUDED.image_id,
                created_at = EXCLUDED.created_at,
                updated_at = EXCLUDED.updated_at,
                fetched_at = EXCLUDED.fetched_at,
                raw_json = EXCLUDED.raw_json
            "#,
        );

        self.execute(builder).await
    }

    /// Upserts image rows on (domain, image_id).
    pub async fn upsert_images(&self, rows: &[ImageRow]) -> Result<u64, AppError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO images (domain, image_id, product_id, position, src, width, height, alt, \
             created_at, updated_at, fetched_at, raw_json) ",
        );
        builder.push_values(rows, |mut b, row| {
            b.push_bind(row.domain.as_str())
                .push_bind(row.image_id)
                .push_bind(row.product_id)
                .push_bind(row.position)
                .push_bind(row.src.as_deref())
                .push_bind(row.width)
                .push_bind(row.height)
                .push_bind(row.alt.as_deref())
                .push_bind(row.created_at)
                .push_bind(row.updated_at)
                .push_bind(row.fetched_at)
                .push_bind(Json(&row.raw_json));
        });
        builder.push(
            r#"
            ON CONFLICT (domain, image_id) DO UPDATE SET
                product_id = EXCLUDED.product_id,
                position = EXCLUDED.position,
                src = EXCLUDED.src,
                width = EXCLUDED.width,
                height = EXCLUDED.height,
                alt = EXCLUDED.alt,
                created_at = EXCLUDED.created_at,
                updated_at = EXCLUDED.updated_at,
                fetched_at = EXCLUDED.fetched_at,
                raw_json = EXCLUDED.raw_json
            "#,
        );

        self.execute(builder).await
    }

    /// Upserts option rows on (domain, product_id, name).
    pub async fn upsert_options(&self, rows: &[OptionRow]) -> Result<u64, AppError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO product_options (domain, product_id, name, option_id, position, \
             fetched_at, raw_json) ",
        );
        builder.push_values(rows, |mut b, row| {
            b.push_bind(row.domain.as_str())
                .push_bind(row.product_id)
                .push_bind(row.name.as_str())
                .push_bind(row.option_id)
                .push_bind(row.position)
                .push_bind(row.fetched_at)
                .push_bind(Json(&row.raw_json));
        });
        builder.push(
            r#"
            ON CONFLICT (domain, product_id, name) DO UPDATE SET
                option_id = EXCLUDED.option_id,
                position = EXCLUDED.position,
                fetched_at = EXCLUDED.fetched_at,
                raw_json = EXCLUDED.raw_json
            "#,
        );

        self.execute(builder).await
    }

    /// Upserts option values on (domain, product_id, option_name, position).
    pub async fn upsert_option_values(&self, rows: &[OptionValueRow]) -> Result<u64, AppError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO option_values (domain, product_id, option_name, position, value, \
             fetched_at) ",
        );
        builder.push_values(rows, |mut b, row| {
            b.push_bind(row.domain.as_str())
                .push_bind(row.product_id)
                .push_bind(row.option_name.as_str())
                .push_bind(row.position)
                .push_bind(row.value.as_str())
                .push_bind(row.fetched_at);
        });
        builder.push(
            r#"
            ON CONFLICT (domain, product_id, option_name, position) DO UPDATE SET
                value = EXCLUDED.value,
                fetched_at = EXCLUDED.fetched_at
            "#,
        );

        self.execute(builder).await
    }

    /// Upserts the per-domain aggregate row.
    ///
    /// `successful_fetch_count` grows by one only when the summary reports at
    /// least one product and is newer than the stored `last_fetched_at`, so
    /// replaying the same summary leaves the row unchanged.
    pub async fn upsert_domain_summary(&self, summary: &DomainSummary) -> Result<(), AppError> {
        let fetched_once: i32 = if summary.product_count > 0 { 1 } else { 0 };

        sqlx::query(
            r#"
            INSERT INTO domains (
                domain, product_count, vendor_count, product_types,
                price_range_min, price_range_max, scraping_status,
                successful_fetch_count, last_fetched_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (domain) DO UPDATE SET
                product_count = EXCLUDED.product_count,
                vendor_count = EXCLUDED.vendor_count,
                product_types = EXCLUDED.product_types,
                price_range_min = EXCLUDED.price_range_min,
                price_range_max = EXCLUDED.price_range_max,
                scraping_status = EXCLUDED.scraping_status,
                successful_fetch_count = CASE
                    WHEN EXCLUDED.last_fetched_at > domains.last_fetched_at
                        THEN domains.successful_fetch_count + EXCLUDED.successful_fetch_count
                    ELSE domains.successful_fetch_count
                END,
                last_fetched_at = GREATEST(domains.last_fetched_at, EXCLUDED.last_fetched_at)
            "#,
        )
        .bind(&summary.domain)
        .bind(summary.product_count)
        .bind(summary.vendor_count)
        .bind(&summary.product_types)
        .bind(summary.price_range_min)
        .bind(summary.price_range_max)
        .bind(summary.scraping_status.as_str())
        .bind(fetched_once)
        .bind(summary.last_fetched_at)
        .execute(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;

        Ok(())
    }

    /// Returns products still lacking an embedding, keyset-paged on
    /// (domain, product_id).
    ///
    /// # Arguments
    ///
    /// * `after` - Exclusive lower bound, or `None` to start from the beginning
    /// * `limit` - Maximum number of rows
    pub async fn pending_embeddings(
        &self,
        after: Option<(&str, i64)>,
        limit: usize,
    ) -> Result<Vec<PendingEmbedding>, AppError> {
        let (after_domain, after_id) = match after {
            Some((domain, id)) => (Some(domain), Some(id)),
            None => (None, None),
        };

        let rows: Vec<PendingRow> = sqlx::query_as(
            r#"
            SELECT domain, product_id, COALESCE(title, '') AS text
            FROM products
            WHERE embedding IS NULL
              AND ($1::text IS NULL OR (domain, product_id) > ($1::text, $2::bigint))
            ORDER BY domain, product_id
            LIMIT $3
            "#,
        )
        .bind(after_domain)
        .bind(after_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;

        Ok(rows
            .into_iter()
            .map(|row| PendingEmbedding {
                domain: row.domain,
                product_id: row.product_id,
                text: row.text,
            })
            .collect())
    }

    /// Writes embeddings back in a single UPDATE keyed by (domain, product_id).
    ///
    /// Only the `embedding` column is touched.
    pub async fn store_embeddings(
        &self,
        rows: &[(PendingEmbedding, Vec<f32>)],
    ) -> Result<u64, AppError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let domains: Vec<&str> = rows.iter().map(|(p, _)| p.domain.as_str()).collect();
        let product_ids: Vec<i64> = rows.iter().map(|(p, _)| p.product_id).collect();
        let vectors: Vec<Vector> = rows
            .iter()
            .map(|(_, v)| Vector::from(v.clone()))
            .collect();

        let result = sqlx::query(
            r#"
            UPDATE products AS p
            SET embedding = u.embedding
            FROM UNNEST($1::text[], $2::bigint[], $3::vector[]) AS u(domain, product_id, embedding)
            WHERE p.domain = u.domain AND p.product_id = u.product_id
            "#,
        )
        .bind(&domains)
        .bind(&product_ids)
        .bind(&vectors)
        .execute(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;

        Ok(result.rows_affected())
    }

    /// Checks database connectivity.
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(AppError::DatabaseError)?;
        Ok(())
    }

    /// Returns row counts per table.
    pub async fn get_stats(&self) -> Result<StoreStats, AppError> {
        let row: StatsRow = sqlx::query_as(
            r#"
            SELECT
                (SELECT COUNT(*) FROM products) AS products,
                (SELECT COUNT(*) FROM variants) AS variants,
                (SELECT COUNT(*) FROM images) AS images,
                (SELECT COUNT(*) FROM option_values) AS option_values,
                (SELECT COUNT(*) FROM product_snapshots) AS snapshots,
                (SELECT COUNT(*) FROM domains) AS domains,
                (SELECT COUNT(embedding) FROM products) AS with_embeddings
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;

        Ok(StoreStats {
            products: row.products.unwrap_or(0),
            variants: row.variants.unwrap_or(0),
            images: row.images.unwrap_or(0),
            option_values: row.option_values.unwrap_or(0),
            snapshots: row.snapshots.unwrap_or(0),
            domains: row.domains.unwrap_or(0),
            products_with_embeddings: row.with_embeddings.unwrap_or(0),
        })
    }

    async fn execute(&self, mut builder: QueryBuilder<'_, Postgres>) -> Result<u64, AppError> {
        let result = builder
            .build()
            .execute(&self.pool)
            .await
            .map_err(AppError::DatabaseError)?;
        Ok(result.rows_affected())
    }
}

/// Helper struct for deserializing stats query results
#[derive(sqlx::FromRow)]
struct StatsRow {
    products: Option<i64>,
    variants: Option<i64>,
    images: Option<i64>,
    option_values: Option<i64>,
    snapshots: Option<i64>,
    domains: Option<i64>,
    with_embeddings: Option<i64>,
}

#[derive(sqlx::FromRow)]
struct PendingRow {
    domain: String,
    product_id: i64,
    text: String,
}

// =============================================================================
// Trait Implementation: ProductStore
// =============================================================================

impl storecrawl_core::traits::ProductStore for ProductRepository {
    async fn upsert_products(&self, rows: &[ProductRow]) -> Result<u64, AppError> {
        ProductRepository::upsert_products(self, rows).await
    }

    async fn insert_snapshots(&self, rows: &[SnapshotRow]) -> Result<u64, AppError> {
        ProductRepository::insert_snapshots(self, rows).await
    }

    async fn upsert_variants(&self, rows: &[VariantRow]) -> Result<u64, AppError> {
        ProductRepository::upsert_variants(self, rows).await
    }

    async fn upsert_images(&self, rows: &[ImageRow]) -> Result<u64, AppError> {
        ProductRepository::upsert_images(self, rows).await
    }

    async fn upsert_options(&self, rows: &[OptionRow]) -> Result<u64, AppError> {
        ProductRepository::upsert_options(self, rows).await
    }

    async fn upsert_option_values(&self, rows: &[OptionValueRow]) -> Result<u64, AppError> {
        ProductRepository::upsert_option_values(self, rows).await
    }

    async fn upsert_domain_summary(&self, summary: &DomainSummary) -> Result<(), AppError> {
        ProductRepository::upsert_domain_summary(self, summary).await
    }
}

// =============================================================================
// Trait Implementation: EmbeddingStore
// =============================================================================

impl storecrawl_core::traits::EmbeddingStore for ProductRepository {
    async fn pending_embeddings(
        &self,
        after: Option<(&str, i64)>,
        limit: usize,
    ) -> Result<Vec<PendingEmbedding>, AppError> {
        ProductRepository::pending_embeddings(self, after, limit).await
    }

    async fn store_embeddings(
        &self,
        rows: &[(PendingEmbedding, Vec<f32>)],
    ) -> Result<u64, AppError> {
        ProductRepository::store_embeddings(self, rows).await
    }
}
