//! Crawl orchestration across many origins.
//!
//! # Architecture
//!
//! The [`CrawlOrchestrator`] is generic over two traits:
//! - [`CatalogClient`] - for storefront HTTP access
//! - [`ProductStore`] - for persistence (optional, see below)
//!
//! Each origin is one task: fetch → record in [`RunStats`] → persist.
//! Tasks run on a bounded pool of `min(max_parallelism, origins)` slots;
//! outbound requests across all tasks are additionally gated by one shared
//! [`RequestThrottle`], so a task may hold a slot while it waits for a permit.
//!
//! # Degraded mode
//!
//! Without a writer the crawl still runs and still produces a full
//! [`RunReport`]; nothing is persisted.
//!
//! # Cancellation
//!
//! When the `CancellationToken` fires, origins that have not started yet are
//! skipped. In-flight origins get [`CrawlConfig::grace_period`] to finish;
//! whatever is still running after that is dropped and reported as neither
//! succeeded nor failed.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use futures::stream::{self, StreamExt};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::CrawlConfig;
use crate::error::AppError;
use crate::fetcher::PaginatedFetcher;
use crate::models::ProductRecord;
use crate::progress::{CrawlEvent, CrawlReporter, SilentReporter};
use crate::stats::{RunReport, RunStats};
use crate::throttle::RequestThrottle;
use crate::traits::{CatalogClient, ProductStore};
use crate::writer::BatchUpsertWriter;

/// Runs a crawl over a list of origins.
pub struct CrawlOrchestrator<C, S>
where
    C: CatalogClient,
    S: ProductStore,
{
    fetcher: PaginatedFetcher<C>,
    writer: Option<BatchUpsertWriter<S>>,
    config: CrawlConfig,
}

impl<C, S> CrawlOrchestrator<C, S>
where
    C: CatalogClient,
    S: ProductStore,
{
    /// Creates an orchestrator with default configuration.
    ///
    /// # Arguments
    ///
    /// * `client` - Storefront client shared by every task
    /// * `writer` - Persistence target, or `None` for fetch-only runs
    pub fn new(client: C, writer: Option<BatchUpsertWriter<S>>) -> Self {
        Self::with_config(client, writer, CrawlConfig::default())
    }

    /// Creates an orchestrator with custom configuration.
    pub fn with_config(
        client: C,
        writer: Option<BatchUpsertWriter<S>>,
        config: CrawlConfig,
    ) -> Self {
        let throttle = RequestThrottle::new(&config.throttle);
        let fetcher = PaginatedFetcher::new(client, throttle, config.fetch.clone());
        Self {
            fetcher,
            writer,
            config,
        }
    }

    /// Crawls every origin once, silently.
    pub async fn run(&self, origins: &[String]) -> RunReport {
        self.run_cancellable(origins, &SilentReporter, CancellationToken::new())
            .await
    }

    /// Crawls every origin once, with progress reporting and interrupt support.
    ///
    /// Never fails: every origin-level error is caught and recorded in the
    /// returned report.
    pub async fn run_cancellable<R: CrawlReporter>(
        &self,
        origins: &[String],
        reporter: &R,
        cancel_token: CancellationToken,
    ) -> RunReport {
        let started = Instant::now();
        let stats = RunStats::new();
        let dispatched = AtomicUsize::new(0);
        let workers = self.config.worker_count(origins.len());

        reporter.report(CrawlEvent::RunStarted {
            origins: origins.len(),
            workers,
        });

        let interrupted = {
            let work = stream::iter(origins)
                .map(|origin| {
                    let stats = &stats;
                    let dispatched = &dispatched;
                    let cancel_token = &cancel_token;
                    async move {
                        if cancel_token.is_cancelled() {
                            return;
                        }
                        dispatched.fetch_add(1, Ordering::SeqCst);
                        self.process_origin(origin, stats, reporter).await;
                    }
                })
                .buffer_unordered(workers)
                .for_each(|_| async {});
            tokio::pin!(work);

            tokio::select! {
                biased;
                _ = cancel_token.cancelled() => {
                    let pending = origins.len().saturating_sub(dispatched.load(Ordering::SeqCst));
                    reporter.report(CrawlEvent::Interrupted { pending });
                    tokio::select! {
                        _ = &mut work => {}
                        _ = sleep(self.config.grace_period) => {
                            debug!("Grace period elapsed with origins still in flight");
                        }
                    }
                    true
                }
                _ = &mut work => false,
            }
        };

        let not_dispatched = origins
            .len()
            .saturating_sub(dispatched.load(Ordering::SeqCst));
        let mut report = stats.into_report(started.elapsed());
        report.interrupted = interrupted;
        report.not_dispatched = not_dispatched;

        reporter.report(CrawlEvent::RunFinished { report: &report });
        report
    }

    /// One origin's task. All errors end here.
    async fn process_origin<R: CrawlReporter>(
        &self,
        origin: &str,
        stats: &RunStats,
        reporter: &R,
    ) {
        reporter.report(CrawlEvent::OriginStarted { origin });

        let products = match self.fetcher.fetch(origin, reporter).await {
            Ok(products) => products,
            Err(AppError::NotFound(_)) => {
                debug!(origin, "No catalog endpoint, recording zero products");
                Vec::new()
            }
            Err(e) => {
                let reason = e.failure_reason();
                stats.record_failure(origin, reason.as_str());
                reporter.report(CrawlEvent::OriginFailed {
                    origin,
                    reason: &reason,
                });
                return;
            }
        };

        self.complete_origin(origin, products, stats, reporter).await;
    }

    async fn complete_origin<R: CrawlReporter>(
        &self,
        origin: &str,
        products: Vec<ProductRecord>,
        stats: &RunStats,
        reporter: &R,
    ) {
        let count = products.len();
        let to_persist = self
            .writer
            .as_ref()
            .map(|writer| (writer, products.clone()));

        let running_total = stats.record_success(origin, products);
        reporter.report(CrawlEvent::OriginCompleted {
            origin,
            products: count,
            running_total,
        });

        if let Some((writer, products)) = to_persist {
            let outcome = writer.upsert(origin, &products).await;
            reporter.report(CrawlEvent::OriginPersisted {
                origin,
                outcome: &outcome,
            });
        }
    }
}
