//! Global admission gate for outbound storefront requests.
//!
//! The worker pool decides how many origins are processed at once; the
//! throttle decides how many HTTP requests are actually in flight across all
//! of them. A worker may therefore hold its slot while it waits here.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::sleep;

use crate::config::ThrottleConfig;

/// Random duration in `[min, max]`. Returns `min` when the range is empty.
pub fn jitter(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    let secs = rand::rng().random_range(min.as_secs_f64()..=max.as_secs_f64());
    Duration::from_secs_f64(secs)
}

/// Bounded set of request permits shared by every worker.
///
/// Cloning is cheap and every clone draws from the same permits.
#[derive(Clone)]
pub struct RequestThrottle {
    permits: Arc<Semaphore>,
    jitter_min: Duration,
    jitter_max: Duration,
}

impl RequestThrottle {
    pub fn new(config: &ThrottleConfig) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(config.permits.max(1))),
            jitter_min: config.jitter_min,
            jitter_max: config.jitter_max,
        }
    }

    /// Waits for a free permit, then sleeps for a random pacing interval.
    ///
    /// The permit is held for as long as the returned guard lives, so it is
    /// given back on every exit path of the caller, including `?` and panics.
    pub async fn acquire(&self) -> ThrottlePermit {
        // The semaphore is never closed.
        let permit = Arc::clone(&self.permits).acquire_owned().await.ok();
        let pause = jitter(self.jitter_min, self.jitter_max);
        if !pause.is_zero() {
            sleep(pause).await;
        }
        ThrottlePermit { _permit: permit }
    }

    #[cfg(test)]
    fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

/// RAII guard returned by [`RequestThrottle::acquire`]. Dropping it releases the permit.
pub struct ThrottlePermit {
    _permit: Option<OwnedSemaphorePermit>,
}
