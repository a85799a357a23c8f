//! Configuration types for storecrawl components.
//!
//! Every knob has a default matching the behaviour operators expect from a
//! plain `storecrawl crawl` run. The CLI overrides a handful of them from
//! flags and environment variables; the rest are only reachable from code.

use std::time::Duration;

/// Catalog endpoints tried in priority order on each origin.
pub const DEFAULT_ENDPOINTS: &[&str] = &["/collections/all/products.json", "/products.json"];

/// Largest page the storefront endpoints accept.
pub const DEFAULT_PAGE_SIZE: usize = 250;

/// Database connection pool configuration.
pub struct DbConfig {
    pub max_connections: u32,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self { max_connections: 5 }
    }
}

/// HTTP client configuration for storefront requests.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout: Duration,
    pub user_agent: String,
    pub accept_language: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
                .to_string(),
            accept_language: "en-US,en;q=0.9".to_string(),
        }
    }
}

/// Pagination behaviour for a single origin.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Endpoint paths tried in order until one yields products.
    pub endpoints: Vec<String>,
    /// Value sent as the `limit` query parameter.
    pub page_size: usize,
    /// Lower bound of the pause between two successful pages.
    pub page_delay_min: Duration,
    /// Upper bound of the pause between two successful pages.
    pub page_delay_max: Duration,
    /// Lower bound of the backoff after an HTTP 429.
    pub rate_limit_backoff_min: Duration,
    /// Upper bound of the backoff after an HTTP 429.
    pub rate_limit_backoff_max: Duration,
    /// How many times one page is retried after HTTP 429 before the origin
    /// is failed with [`crate::AppError::RateLimitExceeded`].
    pub max_rate_limit_retries: u32,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            endpoints: DEFAULT_ENDPOINTS.iter().map(|s| s.to_string()).collect(),
            page_size: DEFAULT_PAGE_SIZE,
            page_delay_min: Duration::from_millis(500),
            page_delay_max: Duration::from_millis(1500),
            rate_limit_backoff_min: Duration::from_secs(5),
            rate_limit_backoff_max: Duration::from_secs(10),
            max_rate_limit_retries: 5,
        }
    }
}

impl FetchConfig {
    /// Disables every pause. Intended for tests and local replays.
    pub fn without_delays(mut self) -> Self {
        self.page_delay_min = Duration::ZERO;
        self.page_delay_max = Duration::ZERO;
        self.rate_limit_backoff_min = Duration::ZERO;
        self.rate_limit_backoff_max = Duration::ZERO;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_endpoints<I, T>(mut self, endpoints: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.endpoints = endpoints.into_iter().map(Into::into).collect();
        self
    }
}

/// Global outbound request gate.
#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    /// Number of requests allowed in flight across all origins.
    pub permits: usize,
    pub jitter_min: Duration,
    pub jitter_max: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            permits: 2,
            jitter_min: Duration::from_millis(500),
            jitter_max: Duration::from_millis(1500),
        }
    }
}

impl ThrottleConfig {
    /// A throttle with the given permit count and no pacing delay.
    pub fn unpaced(permits: usize) -> Self {
        Self {
            permits: permits.max(1),
            jitter_min: Duration::ZERO,
            jitter_max: Duration::ZERO,
        }
    }
}

/// Retry schedule applied around each persistence batch.
///
/// Attempt `n` (1-based) that fails transiently is followed by a wait of
/// `base_delay * 2^(n-1)` capped at `max_delay`. Rate-limit failures add
/// `rate_limit_cooldown` on top.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub rate_limit_cooldown: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            rate_limit_cooldown: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// No waits between attempts. Intended for tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            rate_limit_cooldown: Duration::ZERO,
        }
    }

    /// Backoff to wait after the given failed attempt (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(2_u32.pow(exp))
            .min(self.max_delay)
    }
}

/// Batch writer configuration.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Rows per upsert statement, per entity table.
    pub batch_size: usize,
    pub retry: RetryPolicy,
    /// Hold one lock around each batch write attempt so no two statements
    /// reach the store handle at once. The lock is released while a failed
    /// batch waits out its backoff. Turn this off when the store is backed by
    /// a connection pool that tolerates concurrent use.
    pub serialize_writes: bool,
    /// Refresh the per-domain summary row after each origin.
    pub write_domain_summary: bool,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            retry: RetryPolicy::default(),
            serialize_writes: true,
            write_domain_summary: true,
        }
    }
}

impl WriterConfig {
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_serialized_writes(mut self, serialize: bool) -> Self {
        self.serialize_writes = serialize;
        self
    }
}

/// Top-level crawl run configuration.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    /// Upper bound on origins processed concurrently.
    pub max_parallelism: usize,
    /// Time in-flight origins get to finish after an interrupt.
    pub grace_period: Duration,
    pub fetch: FetchConfig,
    pub throttle: ThrottleConfig,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            max_parallelism: 32,
            grace_period: Duration::from_secs(2),
            fetch: FetchConfig::default(),
            throttle: ThrottleConfig::default(),
        }
    }
}

impl CrawlConfig {
    pub fn with_max_parallelism(mut self, workers: usize) -> Self {
        self.max_parallelism = workers.max(1);
        self
    }

    pub fn with_fetch(mut self, fetch: FetchConfig) -> Self {
        self.fetch = fetch;
        self
    }

    pub fn with_throttle(mut self, throttle: ThrottleConfig) -> Self {
        self.throttle = throttle;
        self
    }

    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    /// Worker pool size for a list of `origin_count` origins.
    pub fn worker_count(&self, origin_count: usize) -> usize {
        self.max_parallelism.min(origin_count).max(1)
    }
}

/// Embedding backfill configuration.
#[derive(Debug, Clone)]
pub struct EmbedConfig {
    /// Titles sent per embedding request and per UPDATE statement.
    pub batch_size: usize,
    /// Failed batches in a row after which the run gives up.
    pub max_consecutive_failures: usize,
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self {
            batch_size: 512,
            max_consecutive_failures: 3,
        }
    }
}
