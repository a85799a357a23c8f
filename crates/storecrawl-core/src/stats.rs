//! Run-level statistics shared by every worker of a crawl.
//!
//! All counters and collections live behind a single lock so a reader never
//! observes a product list that disagrees with the success counter.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde_json::Value;
use uuid::Uuid;

use crate::models::ProductRecord;

/// A product together with the origin it was fetched from.
#[derive(Debug, Clone)]
pub struct CollectedProduct {
    pub domain: String,
    pub record: ProductRecord,
}

impl CollectedProduct {
    /// The raw payload with a `"domain"` key added, as written to the dump.
    pub fn annotated(&self) -> Value {
        let mut value = self.record.raw.clone();
        if let Value::Object(map) = &mut value {
            map.insert("domain".to_string(), Value::String(self.domain.clone()));
        }
        value
    }
}

/// An origin that could not be fetched, with a short reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedOrigin {
    pub origin: String,
    pub reason: String,
}

#[derive(Debug, Default)]
struct Inner {
    attempted: usize,
    succeeded: Vec<String>,
    failed: Vec<FailedOrigin>,
    products: Vec<CollectedProduct>,
}

/// Thread-safe aggregator of per-origin outcomes.
#[derive(Debug, Default)]
pub struct RunStats {
    inner: Mutex<Inner>,
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panicking worker must not take the whole report down with it.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Records a fetched origin and returns the running product total.
    pub fn record_success(&self, origin: &str, products: Vec<ProductRecord>) -> usize {
        let mut inner = self.lock();
        inner.attempted += 1;
        inner.succeeded.push(origin.to_string());
        inner
            .products
            .extend(products.into_iter().map(|record| CollectedProduct {
                domain: origin.to_string(),
                record,
            }));
        inner.products.len()
    }

    /// Records a failed origin.
    pub fn record_failure(&self, origin: &str, reason: impl Into<String>) {
        let mut inner = self.lock();
        inner.attempted += 1;
        inner.failed.push(FailedOrigin {
            origin: origin.to_string(),
            reason: reason.into(),
        });
    }

    /// Consistent copy of the current state.
    pub fn snapshot(&self, elapsed: Duration) -> RunReport {
        let inner = self.lock();
        RunReport {
            run_id: Uuid::new_v4(),
            attempted: inner.attempted,
            succeeded: inner.succeeded.len(),
            succeeded_origins: inner.succeeded.clone(),
            failed: inner.failed.clone(),
            products: inner.products.clone(),
            elapsed,
            interrupted: false,
            not_dispatched: 0,
        }
    }

    /// Consumes the aggregator into the final report without copying products.
    pub fn into_report(self, elapsed: Duration) -> RunReport {
        let inner = self
            .inner
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        RunReport {
            run_id: Uuid::new_v4(),
            attempted: inner.attempted,
            succeeded: inner.succeeded.len(),
            succeeded_origins: inner.succeeded,
            failed: inner.failed,
            products: inner.products,
            elapsed,
            interrupted: false,
            not_dispatched: 0,
        }
    }
}

/// Final outcome of a crawl run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    /// Origins that were fetched to completion or failure.
    pub attempted: usize,
    pub succeeded: usize,
    pub succeeded_origins: Vec<String>,
    pub failed: Vec<FailedOrigin>,
    /// Every product fetched in this run, in completion order.
    pub products: Vec<CollectedProduct>,
    pub elapsed: Duration,
    /// An interrupt stopped dispatch before every origin was attempted.
    pub interrupted: bool,
    /// Origins never started because of the interrupt.
    pub not_dispatched: usize,
}

impl RunReport {
    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    pub fn total_products(&self) -> usize {
        self.products.len()
    }

    /// Share of attempted origins that succeeded, in percent.
    pub fn success_rate(&self) -> f64 {
        if self.attempted == 0 {
            0.0
        } else {
            self.succeeded as f64 / self.attempted as f64 * 100.0
        }
    }

    /// The run counts as successful unless every attempted origin failed.
    pub fn is_success(&self) -> bool {
        self.attempted == 0 || self.succeeded > 0
    }

    pub fn failed_origins(&self) -> impl Iterator<Item = &str> {
        self.failed.iter().map(|f| f.origin.as_str())
    }
}
