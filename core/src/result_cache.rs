//! Result cache: memoises named query outputs for the life of the process.
//!
//! Key   = (query name, ordered canonical parameters).
//! Value = the computed result, shared as `Arc<T>`.
//!
//! RULES:
//!   - No expiry. Entries live until `clear()` or process exit.
//!   - At most one computation in flight per key: concurrent callers with
//!     the same key wait on that key's slot and then read the stored value.
//!   - Errors are never cached; the next caller recomputes.
//!   - A cancelled render never commits its result.
//!   - A slot left empty by an error or cancellation is dropped from the map
//!     once no other caller is waiting on it.

use crate::{
    error::{MetricsError, MetricsResult},
    query::{QueryParams, TimeBucket},
};
use chrono::NaiveDate;
use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Mutex, MutexGuard, TryLockError,
};

// ── Keys ─────────────────────────────────────────────────────────────────────

/// Canonical string form of a cache parameter.
pub trait CacheParam {
    fn canonical(&self) -> String;
}

impl CacheParam for NaiveDate {
    fn canonical(&self) -> String {
        self.format("%Y-%m-%d").to_string()
    }
}

impl CacheParam for TimeBucket {
    fn canonical(&self) -> String {
        self.as_str().to_string()
    }
}

impl CacheParam for &str {
    fn canonical(&self) -> String {
        (*self).to_string()
    }
}

impl CacheParam for String {
    fn canonical(&self) -> String {
        self.clone()
    }
}

impl CacheParam for usize {
    fn canonical(&self) -> String {
        self.to_string()
    }
}

impl CacheParam for f64 {
    fn canonical(&self) -> String {
        // `{:?}` keeps enough digits to round-trip.
        format!("{self:?}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct CacheKey {
    query:  String,
    params: Vec<String>,
}

impl CacheKey {
    pub fn new(query: &str) -> Self {
        Self { query: query.to_string(), params: Vec::new() }
    }

    pub fn param(mut self, value: impl CacheParam) -> Self {
        self.params.push(value.canonical());
        self
    }

    /// Bucket, start and end, in that order.
    pub fn params(self, params: &QueryParams) -> Self {
        self.param(params.time_bucket)
            .param(params.start_date)
            .param(params.end_date)
    }

    pub fn query(&self) -> &str {
        &self.query
    }
}

// ── Cancellation ─────────────────────────────────────────────────────────────

/// Shared flag set when a render is abandoned.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ── Cache ────────────────────────────────────────────────────────────────────

type Stored = Arc<dyn Any + Send + Sync>;
type Slot = Arc<Mutex<Option<Stored>>>;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct CacheStats {
    pub hits:      u64,
    pub misses:    u64,
    /// Keys holding a stored value.
    pub entries:   usize,
    /// Keys with a computation running or waiting.
    pub in_flight: usize,
}

#[derive(Default)]
pub struct ResultCache {
    slots:  Mutex<HashMap<CacheKey, Slot>>,
    hits:   AtomicU64,
    misses: AtomicU64,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached value for `key`, or run `compute` and store its result.
    pub fn get_or_compute<T, F>(
        &self,
        key: CacheKey,
        cancel: Option<&CancelToken>,
        compute: F,
    ) -> MetricsResult<Arc<T>>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> MetricsResult<T>,
    {
        let slot: Slot = {
            let mut slots = lock(&self.slots);
            let slot = slots.entry(key.clone()).or_default();
            Arc::clone(slot)
        };
        let mut stored = lock(&slot);

        if let Some(value) = stored.as_ref() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            log::debug!("cache hit: {} {:?}", key.query, key.params);
            return Arc::clone(value)
                .downcast::<T>()
                .map_err(|_| MetricsError::CacheTypeMismatch { query: key.query.clone() });
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        if cancel.is_some_and(CancelToken::is_cancelled) {
            drop(stored);
            self.release_empty(&key, slot);
            return Err(MetricsError::Cancelled);
        }
        log::debug!("cache miss: {} {:?}", key.query, key.params);

        let value = match compute() {
            Ok(value) => Arc::new(value),
            Err(e) => {
                drop(stored);
                self.release_empty(&key, slot);
                return Err(e);
            }
        };
        if cancel.is_some_and(CancelToken::is_cancelled) {
            log::debug!("render cancelled; not caching {}", key.query);
            drop(stored);
            self.release_empty(&key, slot);
            return Ok(value);
        }
        *stored = Some(Arc::clone(&value) as Stored);
        Ok(value)
    }

    /// Remove an unfilled slot. The map's handle plus `slot` are the only
    /// references when nobody else is waiting; a waiter keeps it alive and
    /// takes over the computation.
    fn release_empty(&self, key: &CacheKey, slot: Slot) {
        let mut slots = lock(&self.slots);
        let unshared = slots.get(key).is_some_and(|s| Arc::ptr_eq(s, &slot))
            && Arc::strong_count(&slot) == 2;
        if unshared {
            slots.remove(key);
        }
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        let Some(slot) = lock(&self.slots).get(key).cloned() else {
            return false;
        };
        let filled = lock(&slot).is_some();
        filled
    }

    pub fn stats(&self) -> CacheStats {
        let slots = lock(&self.slots);
        let entries = slots
            .values()
            .filter(|slot| match slot.try_lock() {
                Ok(stored) => stored.is_some(),
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().is_some(),
                // Held by a running computation, so not filled yet.
                Err(TryLockError::WouldBlock) => false,
            })
            .count();
        CacheStats {
            hits:      self.hits.load(Ordering::Relaxed),
            misses:    self.misses.load(Ordering::Relaxed),
            entries,
            in_flight: slots.len() - entries,
        }
    }

    /// Drop every entry. Counters are kept.
    pub fn clear(&self) {
        lock(&self.slots).clear();
    }
}

/// A panic inside `compute` poisons only a slot that was never filled,
/// so the data behind a poisoned lock is still consistent.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
