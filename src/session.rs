use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::time::{sleep, Instant};
use tracing::trace;

use crate::provider::{GeocodeResult, LookupFailure};
use crate::strategy::normalize_query;

/// Run-scoped mutable state shared by every pipeline in one batch: the
/// resolution cache, the call budget and the rate-limiter clock.
pub struct ResolverSession {
    cache: ResolutionCache,
    budget: CallBudget,
    rate_limiter: RateLimiter,
}

impl ResolverSession {
    pub fn new(max_calls: usize, min_interval: Duration) -> Self {
        Self {
            cache: ResolutionCache::default(),
            budget: CallBudget::new(max_calls),
            rate_limiter: RateLimiter::new(min_interval),
        }
    }

    pub fn cache(&self) -> &ResolutionCache {
        &self.cache
    }

    pub fn budget(&self) -> &CallBudget {
        &self.budget
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CachedOutcome {
    Success(GeocodeResult),
    Failure(LookupFailure),
}

#[derive(Default)]
struct CacheMaps {
    successes: HashMap<String, GeocodeResult>,
    failures: HashMap<String, LookupFailure>,
}

/// Successes and known failures keyed by normalized query. The first
/// outcome recorded for a query is the only one ever kept.
#[derive(Default)]
pub struct ResolutionCache {
    maps: Mutex<CacheMaps>,
    in_flight: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    hits: AtomicUsize,
}

impl ResolutionCache {
    /// Serializes resolution of one normalized query, so a concurrent
    /// duplicate waits for the first attempt and then reads its outcome.
    pub async fn lock_query(&self, query: &str) -> QueryGuard<'_> {
        let key = normalize_query(query);
        let lock = {
            let mut in_flight = self.in_flight.lock();
            Arc::clone(in_flight.entry(key.clone()).or_default())
        };
        let guard = lock.lock_owned().await;
        QueryGuard {
            key,
            in_flight: &self.in_flight,
            guard: Some(guard),
        }
    }

    /// Queries currently locked or waited on.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }

    pub fn get(&self, query: &str) -> Option<CachedOutcome> {
        let key = normalize_query(query);
        let maps = self.maps.lock();
        let outcome = if let Some(result) = maps.successes.get(&key) {
            Some(CachedOutcome::Success(result.clone()))
        } else {
            maps.failures
                .get(&key)
                .map(|failure| CachedOutcome::Failure(failure.clone()))
        };
        if outcome.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
        outcome
    }

    pub fn record_success(&self, query: &str, result: GeocodeResult) -> bool {
        let key = normalize_query(query);
        let mut maps = self.maps.lock();
        if maps.failures.contains_key(&key) || maps.successes.contains_key(&key) {
            trace!(query = %key, "cache already holds an outcome; keeping the first");
            return false;
        }
        maps.successes.insert(key, result);
        true
    }

    pub fn record_failure(&self, query: &str, failure: LookupFailure) -> bool {
        let key = normalize_query(query);
        let mut maps = self.maps.lock();
        if maps.failures.contains_key(&key) || maps.successes.contains_key(&key) {
            trace!(query = %key, "cache already holds an outcome; keeping the first");
            return false;
        }
        maps.failures.insert(key, failure);
        true
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn success_count(&self) -> usize {
        self.maps.lock().successes.len()
    }

    pub fn failure_count(&self) -> usize {
        self.maps.lock().failures.len()
    }
}

/// Held while one query is being resolved. The lock entry is dropped from
/// the session once nobody else is waiting on it.
pub struct QueryGuard<'a> {
    key: String,
    in_flight: &'a Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for QueryGuard<'_> {
    fn drop(&mut self) {
        // map lock first: no new waiter can clone the entry in between
        let mut in_flight = self.in_flight.lock();
        self.guard.take();
        let unused = in_flight
            .get(&self.key)
            .map(|lock| Arc::strong_count(lock) == 1)
            .unwrap_or(false);
        if unused {
            in_flight.remove(&self.key);
        }
    }
}

/// Ceiling on outbound lookups for one run.
pub struct CallBudget {
    max_calls: usize,
    used: AtomicUsize,
}

impl CallBudget {
    pub fn new(max_calls: usize) -> Self {
        Self {
            max_calls,
            used: AtomicUsize::new(0),
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.used() >= self.max_calls
    }

    /// Claims one unit. Fails without side effects once the ceiling is hit,
    /// so concurrent callers can never push `used` past `max_calls`.
    pub fn try_reserve(&self) -> bool {
        self.used
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                (used < self.max_calls).then_some(used + 1)
            })
            .is_ok()
    }

    pub fn used(&self) -> usize {
        self.used.load(Ordering::SeqCst)
    }

    pub fn max_calls(&self) -> usize {
        self.max_calls
    }

    pub fn remaining(&self) -> usize {
        self.max_calls.saturating_sub(self.used())
    }
}

/// Global minimum spacing between outbound calls. The lock is held across
/// the sleep, which serializes issuance across every waiting task.
pub struct RateLimiter {
    min_interval: Duration,
    last_call: AsyncMutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_call: AsyncMutex::new(None),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    pub async fn wait(&self) {
        let mut guard = self.last_call.lock().await;
        if let Some(prev) = *guard {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                let delay = self.min_interval - elapsed;
                trace!(?delay, "rate limiting outbound geocode call");
                sleep(delay).await;
            }
        }
        *guard = Some(Instant::now());
    }
}
