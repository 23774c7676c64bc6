//! Token bucket with adjustable rate.
//!
//! Continuous refill: tokens accrue at `rate` per second up to `burst`.
//! Rate changes apply on the next refill computation and wake parked
//! waiters so they re-evaluate; in-flight waits are never interrupted with
//! an error. A non-positive rate parks waiters until the rate becomes
//! positive again or the caller's cancellation token fires.

use latch_commons::{Error, ErrorKind, Result};
use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

struct BucketState {
    rate: f64,
    burst: f64,
    tokens: f64,
    last: Instant,
}

impl BucketState {
    fn refill(&mut self, now: Instant) {
        if self.rate > 0.0 {
            let elapsed = now.duration_since(self.last).as_secs_f64();
            self.tokens = (self.tokens + elapsed * self.rate).min(self.burst);
        }
        self.last = now;
    }
}

/// Token bucket shared between a limiter and its adapters.
pub struct TokenBucket {
    state: Mutex<BucketState>,
    updated: tokio::sync::Notify,
}

impl TokenBucket {
    /// Creates a full bucket with the given sustained rate and burst size.
    pub fn new(rate: i64, burst: i64) -> Self {
        Self {
            state: Mutex::new(BucketState {
                rate: rate as f64,
                burst: burst as f64,
                tokens: burst as f64,
                last: Instant::now(),
            }),
            updated: tokio::sync::Notify::new(),
        }
    }

    /// Updates the sustained rate, waking parked waiters.
    pub fn set_rate(&self, rate: i64) {
        {
            let mut state = self.state.lock();
            let now = Instant::now();
            state.refill(now);
            state.rate = rate as f64;
        }
        self.updated.notify_waiters();
    }

    /// Updates both rate and burst, waking parked waiters.
    pub fn set_params(&self, rate: i64, burst: i64) {
        {
            let mut state = self.state.lock();
            let now = Instant::now();
            state.refill(now);
            state.rate = rate as f64;
            state.burst = burst as f64;
            state.tokens = state.tokens.min(state.burst);
        }
        self.updated.notify_waiters();
    }

    /// Current sustained rate, floored to whole tokens per second.
    pub fn rate(&self) -> i64 {
        self.state.lock().rate as i64
    }

    /// Current burst size.
    pub fn burst(&self) -> i64 {
        self.state.lock().burst as i64
    }

    /// Acquires `n` tokens, blocking until they are available or `token`
    /// cancels.
    ///
    /// Fails *invalid-argument* when `n` exceeds the burst size (the
    /// request could never be satisfied).
    pub async fn wait_n(&self, token: &CancellationToken, n: i64) -> Result<()> {
        if token.is_cancelled() {
            return Err(Error::new("rate limiter wait cancelled"));
        }
        loop {
            // Register for updates before inspecting state, so a rate
            // change between the check and the park is not missed.
            let updated = self.updated.notified();

            let wait = {
                let mut state = self.state.lock();
                let now = Instant::now();
                state.refill(now);
                if (n as f64) > state.burst {
                    return Err(Error::wrap(
                        ErrorKind::InvalidArgument,
                        format!("requested {n} tokens exceeds burst {}", state.burst),
                    ));
                }
                if state.tokens >= n as f64 {
                    state.tokens -= n as f64;
                    return Ok(());
                }
                if state.rate <= 0.0 {
                    // Parked until the rate becomes positive.
                    None
                } else {
                    Some(Duration::from_secs_f64(
                        (n as f64 - state.tokens) / state.rate,
                    ))
                }
            };

            match wait {
                None => {
                    tokio::select! {
                        _ = token.cancelled() => {
                            return Err(Error::new("rate limiter wait cancelled"));
                        }
                        _ = updated => {}
                    }
                }
                Some(duration) => {
                    tokio::select! {
                        _ = token.cancelled() => {
                            return Err(Error::new("rate limiter wait cancelled"));
                        }
                        _ = tokio::time::sleep(duration) => {}
                        _ = updated => {}
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_full_bucket_grants_immediately() {
        let bucket = TokenBucket::new(10, 5);
        let token = CancellationToken::new();
        let start = Instant::now();
        bucket.wait_n(&token, 5).await.unwrap();
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_wait_exceeding_burst_fails() {
        let bucket = TokenBucket::new(10, 5);
        let token = CancellationToken::new();
        let err = bucket.wait_n(&token, 6).await.unwrap_err();
        assert!(err.is_invalid_argument());
    }

    #[tokio::test]
    async fn test_refill_paces_acquisitions() {
        let bucket = TokenBucket::new(100, 10);
        let token = CancellationToken::new();

        bucket.wait_n(&token, 10).await.unwrap();
        let start = Instant::now();
        bucket.wait_n(&token, 10).await.unwrap();
        // Ten tokens at 100/s is ~100ms of refill.
        assert!(start.elapsed() >= Duration::from_millis(80));
    }

    #[tokio::test]
    async fn test_zero_rate_parks_until_rate_set() {
        let bucket = std::sync::Arc::new(TokenBucket::new(0, 10));
        let token = CancellationToken::new();

        bucket.wait_n(&token, 10).await.unwrap(); // initial burst allowance

        let waiter = {
            let bucket = bucket.clone();
            let token = token.clone();
            tokio::spawn(async move { bucket.wait_n(&token, 5).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!waiter.is_finished());

        bucket.set_rate(1000);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_wait() {
        let bucket = std::sync::Arc::new(TokenBucket::new(0, 10));
        let token = CancellationToken::new();
        bucket.wait_n(&token, 10).await.unwrap();

        let waiter = {
            let bucket = bucket.clone();
            let token = token.clone();
            tokio::spawn(async move { bucket.wait_n(&token, 1).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();

        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_err());
    }
}
