//! Limit manager: registry, budget, and rebalancing.
//!
//! One mutex covers the limiter map, the active set and the budget; every
//! recomputation happens under that lock. Scaling rule for the active set
//! `A` with budget `B` and `S = sum of nominal rates over A`:
//!
//! - active limiter: `effective = max(1, floor(nominal * B / S))`, or `0`
//!   when `B <= 0`
//! - inactive limiter: `effective = nominal`

use crate::limiter::Limiter;
use crate::reader::RateLimitedReader;
use crate::writer::RateLimitedWriter;
use latch_commons::{Error, ErrorKind, Result};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

pub(crate) struct ManagerState {
    budget: i64,
    committed: i64,
    limiters: HashMap<String, Arc<Limiter>>,
    in_use: HashSet<String>,
}

pub(crate) struct ManagerInner {
    state: Mutex<ManagerState>,
}

impl ManagerInner {
    /// Marks a limiter active or idle and reapportions the budget across
    /// the currently active set.
    pub(crate) fn update_in_use(&self, key: &str, activate: bool) {
        let mut state = self.state.lock();
        if activate {
            state.in_use.insert(key.to_string());
        } else {
            state.in_use.remove(key);
            // A deactivated limiter falls back to its nominal rate.
            if let Some(limiter) = state.limiters.get(key) {
                limiter.bucket.set_rate(limiter.nominal.load(Ordering::Relaxed));
            }
            if state.in_use.is_empty() {
                return;
            }
        }
        Self::rebalance(&state);
    }

    /// Scales each active limiter in proportion to its nominal rate so the
    /// shared budget is fully consumed while honouring the global ceiling.
    fn rebalance(state: &ManagerState) {
        if state.in_use.is_empty() {
            return;
        }
        let sum_active: i64 = state
            .in_use
            .iter()
            .filter_map(|key| state.limiters.get(key))
            .map(|l| l.nominal.load(Ordering::Relaxed))
            .sum();
        if sum_active <= 0 {
            return;
        }
        for key in &state.in_use {
            let Some(limiter) = state.limiters.get(key) else {
                continue;
            };
            let effective = if state.budget <= 0 {
                0
            } else {
                ((limiter.nominal.load(Ordering::Relaxed) * state.budget) / sum_active).max(1)
            };
            limiter.bucket.set_rate(effective);
        }
    }
}

/// Registry of named limiters sharing one aggregate rate budget.
pub struct LimitManager {
    inner: Arc<ManagerInner>,
}

impl LimitManager {
    /// Constructs a manager with the specified aggregate rate budget.
    pub fn new(budget: i64) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                state: Mutex::new(ManagerState {
                    budget,
                    committed: 0,
                    limiters: HashMap::new(),
                    in_use: HashSet::new(),
                }),
            }),
        }
    }

    /// Registers a new limiter with the given sustained rate and burst.
    ///
    /// Fails *invalid-argument* on `burst < 1` and *already-exists* on a
    /// duplicate key (use [`Self::ensure_limiter`] to upsert).
    pub fn new_limiter(&self, key: &str, rate: i64, burst: i64) -> Result<Arc<Limiter>> {
        if burst < 1 {
            return Err(Error::wrap(ErrorKind::InvalidArgument, "burst must be >= 1"));
        }
        let mut state = self.inner.state.lock();
        if state.limiters.contains_key(key) {
            return Err(Error::wrap(
                ErrorKind::AlreadyExists,
                format!("limiter {key:?} already exists"),
            ));
        }
        let limiter = Limiter::new(Arc::downgrade(&self.inner), key, rate, burst);
        state.limiters.insert(key.to_string(), limiter.clone());
        // TODO: surface committed-vs-budget oversubscription to callers.
        state.committed += rate;
        Ok(limiter)
    }

    /// Registers the limiter or updates its parameters if it exists.
    ///
    /// New parameters take effect on the next token acquisition; waiters
    /// are woken to re-evaluate but never interrupted.
    pub fn ensure_limiter(&self, key: &str, rate: i64, burst: i64) -> Result<Arc<Limiter>> {
        if burst < 1 {
            return Err(Error::wrap(ErrorKind::InvalidArgument, "burst must be >= 1"));
        }
        let mut state = self.inner.state.lock();
        if let Some(limiter) = state.limiters.get(key).cloned() {
            let previous = limiter.nominal.swap(rate, Ordering::Relaxed);
            limiter.burst.store(burst, Ordering::Relaxed);
            state.committed += rate - previous;
            if state.in_use.contains(key) {
                ManagerInner::rebalance(&state);
                // Burst still needs applying; rebalance only touches rate.
                limiter.bucket.set_params(limiter.bucket.rate(), burst);
            } else {
                limiter.bucket.set_params(rate, burst);
            }
            return Ok(limiter);
        }
        let limiter = Limiter::new(Arc::downgrade(&self.inner), key, rate, burst);
        state.limiters.insert(key.to_string(), limiter.clone());
        state.committed += rate;
        Ok(limiter)
    }

    /// Removes a limiter from the registry.
    ///
    /// Fails *not-found* when the key is unknown. Adapters still holding
    /// the limiter keep their current allocation but no longer participate
    /// in rebalancing.
    pub fn remove_limiter(&self, key: &str) -> Result<()> {
        let mut state = self.inner.state.lock();
        let Some(limiter) = state.limiters.remove(key) else {
            return Err(Error::wrap(
                ErrorKind::NotFound,
                format!("limiter {key:?} not found"),
            ));
        };
        state.committed -= limiter.nominal.load(Ordering::Relaxed);
        state.in_use.remove(key);
        ManagerInner::rebalance(&state);
        Ok(())
    }

    /// Replaces the aggregate budget and rebalances the active set.
    pub fn set_rate(&self, budget: i64) {
        let mut state = self.inner.state.lock();
        state.budget = budget;
        ManagerInner::rebalance(&state);
    }

    /// Looks up a registered limiter. Fails *not-found* when absent.
    pub fn limiter(&self, key: &str) -> Result<Arc<Limiter>> {
        self.inner
            .state
            .lock()
            .limiters
            .get(key)
            .cloned()
            .ok_or_else(|| Error::wrap(ErrorKind::NotFound, format!("limiter {key:?} not found")))
    }

    /// Wraps a streaming reader with the named limiter, marking it in use
    /// until the reader is closed or dropped.
    pub fn wrap_reader<R>(
        &self,
        token: CancellationToken,
        key: &str,
        reader: R,
    ) -> Result<RateLimitedReader<R>>
    where
        R: AsyncRead + Unpin,
    {
        let limiter = self.limiter(key)?;
        limiter.set_in_use(true);
        Ok(RateLimitedReader::new(token, reader, limiter))
    }

    /// Wraps a streaming writer with the named limiter, marking it in use
    /// until the writer is closed or dropped. Writes are chunked at burst
    /// size and flushed between chunks.
    pub fn wrap_writer<W>(
        &self,
        token: CancellationToken,
        key: &str,
        writer: W,
    ) -> Result<RateLimitedWriter<W>>
    where
        W: AsyncWrite + Unpin,
    {
        let limiter = self.limiter(key)?;
        limiter.set_in_use(true);
        Ok(RateLimitedWriter::new(token, writer, limiter))
    }
}
