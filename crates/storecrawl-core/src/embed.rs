//! Embedding backfill for stored product titles.
//!
//! Reads products whose `embedding` column is still NULL, embeds their
//! titles in batches and writes the vectors back keyed by
//! (domain, product_id). No other column is touched, so the job can run
//! while a crawl is upserting the same rows.

use tracing::{debug, info, warn};

use crate::config::EmbedConfig;
use crate::error::AppError;
use crate::models::PendingEmbedding;
use crate::traits::{EmbeddingProvider, EmbeddingStore};

/// Counters for one backfill run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackfillStats {
    /// Pending rows read from the store.
    pub scanned: usize,
    /// Rows whose embedding was written.
    pub embedded: u64,
    /// Batches skipped after a provider or store failure.
    pub failed_batches: usize,
}

/// Service filling the `embedding` column of stored products.
pub struct EmbeddingBackfillService<S, E>
where
    S: EmbeddingStore,
    E: EmbeddingProvider,
{
    store: S,
    provider: E,
}

impl<S, E> Clone for EmbeddingBackfillService<S, E>
where
    S: EmbeddingStore,
    E: EmbeddingProvider,
{
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            provider: self.provider.clone(),
        }
    }
}

impl<S, E> EmbeddingBackfillService<S, E>
where
    S: EmbeddingStore,
    E: EmbeddingProvider,
{
    pub fn new(store: S, provider: E) -> Self {
        Self { store, provider }
    }

    /// Embeds every pending product once.
    ///
    /// A batch that fails is logged and skipped; its rows stay NULL and are
    /// picked up by the next run. The run stops early after
    /// [`EmbedConfig::max_consecutive_failures`] failed batches in a row.
    ///
    /// # Errors
    ///
    /// Only a failure to read pending rows is returned.
    pub async fn run(&self, config: &EmbedConfig) -> Result<BackfillStats, AppError> {
        let batch_size = config.batch_size.max(1);
        let mut stats = BackfillStats::default();
        let mut cursor: Option<(String, i64)> = None;
        let mut consecutive_failures = 0;

        info!(
            provider = self.provider.name(),
            dimension = self.provider.dimension(),
            batch_size,
            "Starting embedding backfill"
        );

        loop {
            let after = cursor.as_ref().map(|(d, id)| (d.as_str(), *id));
            let batch = self.store.pending_embeddings(after, batch_size).await?;
            let Some(last) = batch.last() else {
                break;
            };
            cursor = Some((last.domain.clone(), last.product_id));
            stats.scanned += batch.len();

            match self.embed_batch(batch).await {
                Ok(written) => {
                    stats.embedded += written;
                    consecutive_failures = 0;
                    debug!(written, total = stats.embedded, "Embedding batch stored");
                }
                Err(e) => {
                    stats.failed_batches += 1;
                    consecutive_failures += 1;
                    warn!(error = %e, "Embedding batch failed, skipping");
                    if consecutive_failures >= config.max_consecutive_failures {
                        warn!(
                            consecutive_failures,
                            "Too many consecutive failures, stopping backfill"
                        );
                        break;
                    }
                }
            }
        }

        info!(
            scanned = stats.scanned,
            embedded = stats.embedded,
            failed_batches = stats.failed_batches,
            "Embedding backfill finished"
        );
        Ok(stats)
    }

    async fn embed_batch(&self, batch: Vec<PendingEmbedding>) -> Result<u64, AppError> {
        let texts: Vec<String> = batch.iter().map(|p| p.text.clone()).collect();
        let vectors = self.provider.generate_batch(&texts).await?;

        if vectors.len() != batch.len() {
            return Err(AppError::Generic(format!(
                "Embedding count mismatch: expected {}, got {}",
                batch.len(),
                vectors.len()
            )));
        }
        let dimension = self.provider.dimension();
        if let Some(bad) = vectors.iter().find(|v| v.len() != dimension) {
            return Err(AppError::Generic(format!(
                "Embedding dimension mismatch: expected {}, got {}",
                dimension,
                bad.len()
            )));
        }

        let rows: Vec<(PendingEmbedding, Vec<f32>)> = batch.into_iter().zip(vectors).collect();
        self.store.store_embeddings(&rows).await
    }
}
