//! Token-bucket rate limiter for outbound calls.
//!
//! One limiter is shared by every sender of a service. The bucket starts
//! full, refills continuously at `refill_per_sec` tokens per second and
//! never holds more than `capacity` tokens. All accounting happens under a
//! single mutex; waiting happens outside of it.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::error::AcquireError;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// A token bucket shared by all outbound senders.
#[derive(Debug)]
pub struct RateLimiter {
    capacity: f64,
    refill_per_sec: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// Creates a full bucket.
    ///
    /// `capacity` is clamped to at least one token and `refill_per_sec` to a
    /// small positive rate so a limiter can always make progress.
    pub fn new(capacity: u32, refill_per_sec: f64) -> Self {
        let capacity = f64::from(capacity.max(1));
        Self {
            capacity,
            refill_per_sec: refill_per_sec.max(f64::MIN_POSITIVE),
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Takes a token if one is available right now.
    pub fn try_acquire(&self) -> bool {
        self.take().is_ok()
    }

    /// Waits for a token.
    ///
    /// Returns [`AcquireError::Cancelled`] if `cancel` fires first; no token
    /// is consumed in that case.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<(), AcquireError> {
        loop {
            if cancel.is_cancelled() {
                return Err(AcquireError::Cancelled);
            }

            let wait = match self.take() {
                Ok(()) => return Ok(()),
                Err(wait) => wait,
            };

            trace!(wait_ms = wait.as_millis() as u64, "Waiting for rate limiter token");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AcquireError::Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Returns the whole tokens currently available.
    pub fn available(&self) -> u32 {
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket);
        bucket.tokens.floor() as u32
    }

    /// Returns the bucket capacity.
    pub fn capacity(&self) -> u32 {
        self.capacity as u32
    }

    /// Consumes one token, or returns how long until one is available.
    fn take(&self) -> Result<(), Duration> {
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket);

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            return Ok(());
        }

        let missing = 1.0 - bucket.tokens;
        let secs = missing / self.refill_per_sec;
        // Round up to the next millisecond so a wake-up never finds 0.999 tokens.
        let millis = (secs * 1000.0).ceil().max(1.0);
        Err(Duration::from_millis(millis as u64))
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(bucket.last_refill);
        if elapsed.is_zero() {
            return;
        }
        bucket.tokens =
            (bucket.tokens + elapsed.as_secs_f64() * self.refill_per_sec).min(self.capacity);
        bucket.last_refill = now;
    }
}
