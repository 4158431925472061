//! Request rate limiting for embedding providers.
//!
//! A token bucket refilled at a steady rate: up to `burst` calls go through
//! immediately, after which calls are spaced at `requests_per_second`. One
//! batch call costs one token regardless of how many texts it carries.

use async_trait::async_trait;
use parking_lot::Mutex;
use ragstore_core::{EmbedError, EmbeddingProvider};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket limiter.
pub struct RateLimiter {
    rate: f64,
    burst: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// `requests_per_second` must be positive and finite. A zero `burst` is
    /// treated as one.
    pub fn new(requests_per_second: f64, burst: usize) -> Result<Self, EmbedError> {
        if !requests_per_second.is_finite() || requests_per_second <= 0.0 {
            return Err(EmbedError::RateLimited(format!(
                "requests per second must be positive, got {requests_per_second}"
            )));
        }
        let burst = burst.max(1) as f64;
        Ok(Self {
            rate: requests_per_second,
            burst,
            bucket: Mutex::new(Bucket {
                tokens: burst,
                last_refill: Instant::now(),
            }),
        })
    }

    /// Take a token now, or report how long until one is available.
    fn try_take(&self) -> Result<(), Duration> {
        let mut bucket = self.bucket.lock();
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate).min(self.burst);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            Err(Duration::from_secs_f64((1.0 - bucket.tokens) / self.rate))
        }
    }

    /// Wait for a token. Cancellation wins over the wait.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<(), EmbedError> {
        loop {
            if cancel.is_cancelled() {
                return Err(EmbedError::Cancelled);
            }
            let wait = match self.try_take() {
                Ok(()) => return Ok(()),
                Err(wait) => wait,
            };
            tokio::select! {
                () = cancel.cancelled() => return Err(EmbedError::Cancelled),
                () = tokio::time::sleep(wait) => {}
            }
        }
    }
}

/// Embedding provider wrapper that limits the request rate.
pub struct RateLimitedEmbeddingProvider {
    provider: Arc<dyn EmbeddingProvider>,
    limiter: RateLimiter,
}

impl RateLimitedEmbeddingProvider {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        requests_per_second: f64,
        burst: usize,
    ) -> Result<Self, EmbedError> {
        Ok(Self {
            provider,
            limiter: RateLimiter::new(requests_per_second, burst)?,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for RateLimitedEmbeddingProvider {
    fn dimensions(&self) -> usize {
        self.provider.dimensions()
    }

    async fn generate_embedding(
        &self,
        cancel: &CancellationToken,
        text: &str,
    ) -> Result<Vec<f32>, EmbedError> {
        self.limiter.acquire(cancel).await?;
        self.provider.generate_embedding(cancel, text).await
    }

    async fn generate_embeddings(
        &self,
        cancel: &CancellationToken,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>, EmbedError> {
        self.limiter.acquire(cancel).await?;
        self.provider.generate_embeddings(cancel, texts).await
    }
}
