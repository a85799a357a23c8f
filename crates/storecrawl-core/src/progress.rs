//! Progress reporting for crawl runs.
//!
//! Services emit [`CrawlEvent`]s instead of logging directly so the CLI can
//! print through `tracing` while tests stay quiet.

use tracing::{debug, info, warn};

use crate::stats::RunReport;
use crate::writer::PersistOutcome;

// =============================================================================
// Crawl Events
// =============================================================================

/// Events emitted during a crawl run.
#[derive(Debug, Clone)]
pub enum CrawlEvent<'a> {
    /// The run is about to dispatch origins.
    RunStarted { origins: usize, workers: usize },
    /// A worker picked up an origin.
    OriginStarted { origin: &'a str },
    /// One page came back from an origin.
    PageFetched {
        origin: &'a str,
        endpoint: &'a str,
        page: u32,
        items: usize,
    },
    /// The origin answered 429 and the page will be retried.
    RateLimited {
        origin: &'a str,
        page: u32,
        attempt: u32,
    },
    /// An origin was fetched successfully (possibly with zero products).
    OriginCompleted {
        origin: &'a str,
        products: usize,
        running_total: usize,
    },
    /// An origin failed and was recorded as such.
    OriginFailed { origin: &'a str, reason: &'a str },
    /// An origin's rows went through the writer.
    OriginPersisted {
        origin: &'a str,
        outcome: &'a PersistOutcome,
    },
    /// An interrupt stopped dispatch of new origins.
    Interrupted { pending: usize },
    /// All dispatched origins are done.
    RunFinished { report: &'a RunReport },
}

// =============================================================================
// Reporter Trait
// =============================================================================

/// Trait for reporting crawl events.
pub trait CrawlReporter: Send + Sync {
    /// Called when a crawl event occurs.
    ///
    /// The default implementation does nothing (silent mode).
    fn report(&self, event: CrawlEvent<'_>) {
        let _ = event;
    }
}

/// Silent reporter that ignores all events.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentReporter;

impl CrawlReporter for SilentReporter {}

/// Tracing-based reporter for CLI logging.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl CrawlReporter for TracingReporter {
    fn report(&self, event: CrawlEvent<'_>) {
        match event {
            CrawlEvent::RunStarted { origins, workers } => {
                info!(origins, workers, "Starting crawl");
            }
            CrawlEvent::OriginStarted { origin } => {
                debug!(origin, "Fetching products");
            }
            CrawlEvent::PageFetched {
                origin,
                endpoint,
                page,
                items,
            } => {
                debug!(origin, endpoint, page, items, "Page fetched");
            }
            CrawlEvent::RateLimited {
                origin,
                page,
                attempt,
            } => {
                warn!(origin, page, attempt, "Rate limited, backing off");
            }
            CrawlEvent::OriginCompleted {
                origin,
                products,
                running_total,
            } => {
                info!(
                    origin,
                    products, running_total, "Fetched {} products from {}", products, origin
                );
            }
            CrawlEvent::OriginFailed { origin, reason } => {
                warn!(origin, reason, "Origin failed");
            }
            CrawlEvent::OriginPersisted { origin, outcome } => {
                if outcome.lost_batches > 0 {
                    warn!(
                        origin,
                        rows = outcome.rows_written,
                        lost_batches = outcome.lost_batches,
                        "Persisted with lost batches"
                    );
                } else {
                    debug!(origin, rows = outcome.rows_written, "Persisted");
                }
            }
            CrawlEvent::Interrupted { pending } => {
                warn!(pending, "Interrupted, no further origins will be dispatched");
            }
            CrawlEvent::RunFinished { report } => {
                info!(
                    attempted = report.attempted,
                    succeeded = report.succeeded,
                    failed = report.failed_count(),
                    products = report.products.len(),
                    "Crawl finished in {:.2}s",
                    report.elapsed.as_secs_f64()
                );
            }
        }
    }
}
