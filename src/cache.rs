//! Aggregation Cache - memoized profiles and histograms
//!
//! Keyed by (filter fingerprint, dataset generation, column, artifact kind).
//! A key being computed owns an in-flight slot; concurrent requests for it
//! serialize on that slot, so the first one computes and the rest read its
//! result. In-flight slots are never evicted. Finished artifacts move into an
//! LRU scoped to the current generation and are dropped en masse when a new
//! dataset is loaded.

use crate::profiler::{ColumnProfile, Histogram};
use crate::Result;
use log::debug;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Default number of cached artifacts
pub const DEFAULT_CACHE_CAPACITY: usize = 256;

/// Cache settings; `capacity == 0` disables caching like `enabled == false`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Profile,
    Histogram,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub fingerprint: u64,
    pub generation: u64,
    pub column: String,
    pub kind: ArtifactKind,
}

/// Cached profiler output
#[derive(Debug, Clone)]
pub enum Artifact {
    Profile(Arc<ColumnProfile>),
    Histogram(Arc<Histogram>),
}

impl Artifact {
    pub fn kind(&self) -> ArtifactKind {
        match self {
            Self::Profile(_) => ArtifactKind::Profile,
            Self::Histogram(_) => ArtifactKind::Histogram,
        }
    }
}

/// Hit/miss counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
}

/// Empty until the computation for its key completes
type Slot = Arc<Mutex<Option<Artifact>>>;

struct CacheState {
    generation: u64,
    entries: LruCache<CacheKey, Artifact>,
    /// Keys being computed; outside the LRU so capacity cannot evict them
    in_flight: HashMap<CacheKey, Slot>,
}

pub struct AggregationCache {
    /// `None` when caching is disabled
    state: Option<Mutex<CacheState>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // Slots hold either nothing or a complete artifact, so a poisoned lock
    // still guards consistent data.
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl AggregationCache {
    pub fn new(config: &CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.capacity).filter(|_| config.enabled);
        Self {
            state: capacity.map(|cap| {
                Mutex::new(CacheState {
                    generation: 0,
                    entries: LruCache::new(cap),
                    in_flight: HashMap::new(),
                })
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn disabled() -> Self {
        Self::new(&CacheConfig {
            enabled: false,
            capacity: 0,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.state.is_some()
    }

    /// Drop every entry and accept keys of `generation` only
    pub fn begin_generation(&self, generation: u64) {
        if let Some(state) = &self.state {
            let mut state = lock(state);
            let dropped = state.entries.len();
            state.entries.clear();
            state.in_flight.clear();
            state.generation = generation;
            debug!(
                "cache generation {}: {} entries invalidated",
                generation, dropped
            );
        }
    }

    /// Cached profile of `column` under the filter state `fingerprint`
    pub fn profile<F>(
        &self,
        fingerprint: u64,
        generation: u64,
        column: &str,
        compute: F,
    ) -> Result<Arc<ColumnProfile>>
    where
        F: FnOnce() -> Result<ColumnProfile>,
    {
        let key = CacheKey {
            fingerprint,
            generation,
            column: column.to_string(),
            kind: ArtifactKind::Profile,
        };
        match self.get_or_compute(key, || compute().map(|p| Artifact::Profile(Arc::new(p))))? {
            Artifact::Profile(profile) => Ok(profile),
            Artifact::Histogram(_) => unreachable!("profile key holds a histogram"),
        }
    }

    /// Cached histogram of `column` under the filter state `fingerprint`
    pub fn histogram<F>(
        &self,
        fingerprint: u64,
        generation: u64,
        column: &str,
        compute: F,
    ) -> Result<Arc<Histogram>>
    where
        F: FnOnce() -> Result<Histogram>,
    {
        let key = CacheKey {
            fingerprint,
            generation,
            column: column.to_string(),
            kind: ArtifactKind::Histogram,
        };
        match self.get_or_compute(key, || compute().map(|h| Artifact::Histogram(Arc::new(h))))? {
            Artifact::Histogram(histogram) => Ok(histogram),
            Artifact::Profile(_) => unreachable!("histogram key holds a profile"),
        }
    }

    /// Return the artifact for `key`, computing it at most once per key.
    ///
    /// Errors are returned to the caller and never stored; a waiter on the
    /// failed slot takes over the computation. Keys from a superseded
    /// generation are computed without being stored.
    fn get_or_compute<F>(&self, key: CacheKey, compute: F) -> Result<Artifact>
    where
        F: FnOnce() -> Result<Artifact>,
    {
        let Some(state) = &self.state else {
            return compute();
        };

        let slot = {
            let mut state = lock(state);
            if key.generation != state.generation {
                drop(state);
                debug!(
                    "{:?} for '{}' from superseded generation {}; not cached",
                    key.kind, key.column, key.generation
                );
                return compute();
            }
            if let Some(artifact) = state.entries.get(&key) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(artifact.clone());
            }
            Arc::clone(
                state
                    .in_flight
                    .entry(key.clone())
                    .or_insert_with(|| Arc::new(Mutex::new(None))),
            )
        };

        // Lock order: slot, then state. The state lock is never held while
        // waiting on a slot.
        let mut guard = lock(&slot);
        if let Some(artifact) = guard.as_ref() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(artifact.clone());
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(
            "cache miss: {:?} for '{}' (filter {:016x})",
            key.kind, key.column, key.fingerprint
        );
        let result = compute();

        let mut state = lock(state);
        let owns_slot = state
            .in_flight
            .get(&key)
            .is_some_and(|current| Arc::ptr_eq(current, &slot));
        match result {
            Ok(artifact) => {
                *guard = Some(artifact.clone());
                if owns_slot {
                    state.in_flight.remove(&key);
                    if let Some((evicted, _)) = state.entries.push(key.clone(), artifact.clone()) {
                        if evicted != key {
                            self.evictions.fetch_add(1, Ordering::Relaxed);
                            debug!("evicted {:?} for '{}'", evicted.kind, evicted.column);
                        }
                    }
                }
                Ok(artifact)
            }
            Err(e) => {
                // Waiters hold their own clones; keep the slot for them
                if owns_slot && Arc::strong_count(&slot) == 2 {
                    state.in_flight.remove(&key);
                }
                Err(e)
            }
        }
    }

    /// Completed entry for `key`, if any, without touching recency
    pub fn peek(&self, key: &CacheKey) -> Option<Artifact> {
        lock(self.state.as_ref()?).entries.peek(key).cloned()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: self
                .state
                .as_ref()
                .map_or(0, |state| lock(state).entries.len()),
        }
    }
}

impl Default for AggregationCache {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}
