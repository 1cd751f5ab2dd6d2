use std::num::NonZeroU32;
use std::sync::Arc;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};

/// Type alias for the governor rate limiter.
type GovernorRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Proactive request pacing shared by every credential in the process.
///
/// The per-credential budget gate only reacts to what the API reports; this
/// limiter additionally keeps bursts under the secondary rate limits GitHub
/// applies to rapid sequences of requests.
#[derive(Clone)]
pub struct ApiPacer {
    inner: Arc<GovernorRateLimiter>,
}

impl ApiPacer {
    /// Create a pacer allowing `requests_per_second` (0 is treated as 1).
    pub fn new(requests_per_second: u32) -> Self {
        let rps = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
        Self {
            inner: Arc::new(RateLimiter::direct(Quota::per_second(rps))),
        }
    }

    /// Wait until another request may be sent.
    pub async fn wait(&self) {
        self.inner.until_ready().await;
    }
}

impl std::fmt::Debug for ApiPacer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiPacer").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pacer_admits_first_request_immediately() {
        let pacer = ApiPacer::new(5);
        let start = std::time::Instant::now();
        pacer.wait().await;
        assert!(start.elapsed() < std::time::Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_pacer_zero_rate_falls_back_to_one() {
        let pacer = ApiPacer::new(0);
        pacer.wait().await;
    }
}
