//! Named limiter with usage reference counting.

use crate::bucket::TokenBucket;
use crate::manager::ManagerInner;
use latch_commons::Result;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Weak};
use tokio_util::sync::CancellationToken;

/// A named token-bucket limiter registered with a [`crate::LimitManager`].
///
/// The nominal rate is what the caller requested; the bucket's current rate
/// is the dynamically allocated share while the limiter is active. Usage is
/// reference-counted: the first `set_in_use(true)` and the last
/// `set_in_use(false)` notify the manager, which rebalances the shared
/// budget across the active set.
pub struct Limiter {
    pub(crate) mgr: Weak<ManagerInner>,
    pub(crate) key: String,
    // Mutated only under the manager's lock; read anywhere.
    pub(crate) nominal: AtomicI64,
    pub(crate) burst: AtomicI64,
    pub(crate) bucket: TokenBucket,
    usage: Mutex<i64>,
}

impl std::fmt::Debug for Limiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Limiter")
            .field("key", &self.key)
            .field("nominal", &self.nominal.load(Ordering::Relaxed))
            .field("burst", &self.burst.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Limiter {
    pub(crate) fn new(mgr: Weak<ManagerInner>, key: &str, rate: i64, burst: i64) -> Arc<Self> {
        Arc::new(Self {
            mgr,
            key: key.to_string(),
            nominal: AtomicI64::new(rate),
            burst: AtomicI64::new(burst),
            bucket: TokenBucket::new(rate, burst),
            usage: Mutex::new(0),
        })
    }

    /// The registry key of this limiter.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The configured sustained rate.
    pub fn nominal_rate(&self) -> i64 {
        self.nominal.load(Ordering::Relaxed)
    }

    /// The configured burst size.
    pub fn burst(&self) -> i64 {
        self.burst.load(Ordering::Relaxed)
    }

    /// The dynamically allocated rate currently applied to the bucket.
    pub fn effective_rate(&self) -> i64 {
        self.bucket.rate()
    }

    /// Increments or decrements the usage count, notifying the manager on
    /// the idle/active transitions so the shared budget is rebalanced.
    pub fn set_in_use(&self, in_use: bool) {
        let mgr = self
            .mgr
            .upgrade()
            .expect("limiter outlived its manager");
        let (notify, activate) = {
            let mut usage = self.usage.lock();
            if in_use {
                *usage += 1;
            } else {
                *usage -= 1;
            }
            if *usage <= 0 {
                (true, false)
            } else if *usage == 1 {
                (true, true)
            } else {
                (false, false)
            }
        };
        if notify {
            mgr.update_in_use(&self.key, activate);
        }
    }

    /// Acquires `n` tokens from the bucket, blocking as needed.
    pub async fn wait_n(&self, token: &CancellationToken, n: i64) -> Result<()> {
        self.bucket.wait_n(token, n).await
    }
}
