//! Storecrawl Core - Domain types, crawl pipeline, and services.
//!
//! This crate provides the core functionality for Storecrawl, including:
//!
//! - **Domain models**: [`ProductRecord`], the normalized row types, [`DomainSummary`]
//! - **Pipeline**: [`PaginatedFetcher`], [`RequestThrottle`], [`RunStats`],
//!   [`BatchUpsertWriter`] and the [`CrawlOrchestrator`] that ties them together
//! - **Collaborators**: [`EmbeddingBackfillService`] and the [`ProductDump`] exporter
//! - **Traits**: [`CatalogClient`], [`ProductStore`], [`EmbeddingStore`],
//!   [`EmbeddingProvider`] for dependency injection
//! - **Progress reporting**: [`CrawlReporter`] trait for decoupled logging/UI
//!
//! # Architecture
//!
//! This crate never touches HTTP or SQL directly. Business logic is
//! decoupled from I/O through traits:
//!
//! - [`CatalogClient`] - abstracts storefront page fetching (e.g., reqwest)
//! - [`ProductStore`] - abstracts persistence (e.g., PostgreSQL)
//! - [`EmbeddingProvider`] - abstracts embedding generation (e.g., Hugging Face)
//!
//! # Example
//!
//! ```ignore
//! use storecrawl_core::{BatchUpsertWriter, CrawlOrchestrator, TracingReporter};
//! use tokio_util::sync::CancellationToken;
//!
//! let writer = BatchUpsertWriter::new(repo);
//! let orchestrator = CrawlOrchestrator::new(client, Some(writer));
//! let report = orchestrator
//!     .run_cancellable(&origins, &TracingReporter, CancellationToken::new())
//!     .await;
//! println!("{} products from {} origins", report.total_products(), report.succeeded);
//! ```

pub mod config;
pub mod embed;
pub mod error;
pub mod export;
pub mod fetcher;
pub mod models;
pub mod orchestrator;
pub mod origins;
pub mod progress;
pub mod stats;
pub mod throttle;
pub mod traits;
pub mod writer;

// Configuration
pub use config::{
    CrawlConfig, DEFAULT_ENDPOINTS, DEFAULT_PAGE_SIZE, DbConfig, EmbedConfig, FetchConfig,
    HttpConfig, RetryPolicy, ThrottleConfig, WriterConfig,
};

// Error handling
pub use error::AppError;

// Domain models
pub use models::{
    DomainSummary, ImageRecord, ImageRow, OptionRecord, OptionRow, OptionValueRow,
    PendingEmbedding, ProductRecord, ProductRow, ScrapingStatus, SnapshotRow, StoreStats,
    VariantRecord, VariantRow,
};

// Run statistics
pub use stats::{CollectedProduct, FailedOrigin, RunReport, RunStats};

// Progress reporting
pub use progress::{CrawlEvent, CrawlReporter, SilentReporter, TracingReporter};

// Traits for dependency injection
pub use traits::{CatalogClient, EmbeddingProvider, EmbeddingStore, ProductStore};

// Services (generic over trait implementations)
pub use embed::{BackfillStats, EmbeddingBackfillService};
pub use export::ProductDump;
pub use fetcher::PaginatedFetcher;
pub use orchestrator::CrawlOrchestrator;
pub use origins::read_origins;
pub use throttle::{RequestThrottle, ThrottlePermit};
pub use writer::{BatchUpsertWriter, NormalizedBatch, PersistOutcome, PersistenceFailure};
