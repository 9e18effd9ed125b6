//! Request cache with in-flight coalescing.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use super::CacheKey;

/// A cached value and its expiry.
#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

/// An upstream fetch currently in flight and how many callers await it.
///
/// A fetch is only driven while some caller awaits it. When every waiter
/// has gone away the entry is kept for late joiners until the next sweep.
struct PendingRequest<V, E> {
    id: u64,
    fut: Shared<BoxFuture<'static, Result<V, E>>>,
    waiters: usize,
}

struct State<V, E> {
    entries: HashMap<CacheKey, CacheEntry<V>>,
    pending: HashMap<CacheKey, PendingRequest<V, E>>,
    next_id: u64,
}

/// Counts one caller out of a pending fetch when its wait ends or is dropped.
struct WaiterGuard<V, E> {
    inner: Weak<Inner<V, E>>,
    key: CacheKey,
    id: u64,
}

impl<V, E> Drop for WaiterGuard<V, E> {
    fn drop(&mut self) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let mut state = inner.lock();
        if let Some(pending) = state.pending.get_mut(&self.key) {
            if pending.id == self.id {
                pending.waiters = pending.waiters.saturating_sub(1);
            }
        }
    }
}

struct Inner<V, E> {
    state: Mutex<State<V, E>>,
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
}

/// Cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Callers that joined an in-flight fetch instead of starting one.
    pub coalesced: u64,
    /// Live (unexpired) entries.
    pub entries: usize,
    /// Fetches currently in flight with at least one waiter.
    pub pending: usize,
}

/// TTL key/value cache for upstream responses.
///
/// Cloning is cheap and clones share the same storage.
pub struct RequestCache<V, E> {
    inner: Arc<Inner<V, E>>,
}

impl<V, E> Clone for RequestCache<V, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V, E> Default for RequestCache<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V, E> RequestCache<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    entries: HashMap::new(),
                    pending: HashMap::new(),
                    next_id: 0,
                }),
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                coalesced: AtomicU64::new(0),
            }),
        }
    }

    /// Look up a live entry. Expired entries are evicted on the way.
    pub fn get(&self, key: &CacheKey) -> Option<V> {
        let mut state = self.inner.lock();
        let value = state.lookup(key, Instant::now());
        if value.is_some() {
            self.inner.hits.fetch_add(1, Ordering::Relaxed);
        }
        value
    }

    /// Insert a value that stays live for `ttl`. A zero TTL stores nothing.
    pub fn put(&self, key: CacheKey, value: V, ttl: Duration) {
        self.inner.lock().insert(key, value, ttl);
    }

    /// Return the cached value, or run `fetch` exactly once across all
    /// concurrent callers for the same key.
    ///
    /// Callers arriving while a fetch for `key` is in flight await that fetch
    /// and receive its result, success or failure. Only successes are cached.
    /// `fetch` is not invoked at all on a hit or a coalesced wait.
    pub async fn get_or_fetch<F, Fut>(&self, key: CacheKey, ttl: Duration, fetch: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let (shared, id) = {
            let mut state = self.inner.lock();

            if let Some(value) = state.lookup(&key, Instant::now()) {
                self.inner.hits.fetch_add(1, Ordering::Relaxed);
                trace!(key = %key, "cache hit");
                return Ok(value);
            }

            if let Some(pending) = state.pending.get_mut(&key) {
                pending.waiters += 1;
                self.inner.coalesced.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, waiters = pending.waiters, "joining in-flight fetch");
                (pending.fut.clone(), pending.id)
            } else {
                self.inner.misses.fetch_add(1, Ordering::Relaxed);
                trace!(key = %key, "cache miss");

                // Completion bookkeeping lives inside the shared future so it
                // runs no matter which waiter ends up driving it.
                let weak = Arc::downgrade(&self.inner);
                let completion_key = key.clone();
                let fut = async move {
                    let result = fetch().await;
                    if let Some(inner) = weak.upgrade() {
                        inner.lock().complete(completion_key, &result, ttl);
                    }
                    result
                }
                .boxed()
                .shared();

                let id = state.next_id;
                state.next_id += 1;
                state.pending.insert(
                    key.clone(),
                    PendingRequest {
                        id,
                        fut: fut.clone(),
                        waiters: 1,
                    },
                );
                (fut, id)
            }
        };

        let _waiter = WaiterGuard {
            inner: Arc::downgrade(&self.inner),
            key,
            id,
        };
        shared.await
    }

    /// Remove every expired entry and every pending fetch nobody awaits
    /// any more. Returns how many were dropped.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut state = self.inner.lock();
        let before = state.entries.len() + state.pending.len();
        state.entries.retain(|_, entry| entry.expires_at > now);
        state.pending.retain(|key, pending| {
            if pending.waiters == 0 {
                debug!(key = %key, "Dropping abandoned in-flight fetch");
            }
            pending.waiters > 0
        });
        before - state.entries.len() - state.pending.len()
    }

    /// Drop all cached entries. In-flight fetches are left alone.
    pub fn clear(&self) {
        self.inner.lock().entries.clear();
        debug!("Request cache cleared");
    }

    pub fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let state = self.inner.lock();
        CacheStats {
            hits: self.inner.hits.load(Ordering::Relaxed),
            misses: self.inner.misses.load(Ordering::Relaxed),
            coalesced: self.inner.coalesced.load(Ordering::Relaxed),
            entries: state
                .entries
                .values()
                .filter(|entry| entry.expires_at > now)
                .count(),
            pending: state
                .pending
                .values()
                .filter(|pending| pending.waiters > 0)
                .count(),
        }
    }

    /// Periodically sweep expired entries until the cache is dropped.
    ///
    /// A zero interval is raised to one second.
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let weak: Weak<Inner<V, E>> = Arc::downgrade(&self.inner);
        let interval = if interval.is_zero() {
            warn!("Cache sweep interval is zero, using 1s");
            Duration::from_secs(1)
        } else {
            interval
        };
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let cache = RequestCache { inner };
                let removed = cache.sweep();
                if removed > 0 {
                    debug!("Swept {} expired cache entries", removed);
                }
            }
        })
    }
}

impl<V, E> Inner<V, E> {
    fn lock(&self) -> MutexGuard<'_, State<V, E>> {
        // The state holds no invariants a panicking holder could break
        // halfway, so a poisoned lock is still usable.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<V: Clone, E> State<V, E> {
    fn lookup(&mut self, key: &CacheKey, now: Instant) -> Option<V> {
        match self.entries.get(key) {
            Some(entry) if entry.expires_at > now => Some(entry.value.clone()),
            Some(_) => {
                self.entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn insert(&mut self, key: CacheKey, value: V, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }
        let expires_at = Instant::now() + ttl;
        self.entries.insert(key, CacheEntry { value, expires_at });
    }

    fn complete(&mut self, key: CacheKey, result: &Result<V, E>, ttl: Duration) {
        // Entry insert and pending removal happen under one lock so a new
        // caller sees either the in-flight fetch or the cached value.
        if let Ok(value) = result {
            self.insert(key.clone(), value.clone(), ttl);
        }
        self.pending.remove(&key);
    }
}
