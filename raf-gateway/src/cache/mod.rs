//! Memoization cache for scoring results
//!
//! Entries live in key-hashed shards, each behind its own `RwLock`, so
//! lookups and populations for different keys do not contend. Recency order
//! for LRU eviction is kept separately behind one global `Mutex` that is only
//! held for bookkeeping.
//!
//! Lock order is always shard → recency. Evicted entries are removed from
//! their shard after the recency lock is released, and only if the shard
//! still holds the same generation (a re-population in between wins).

mod flight;
mod key;

pub use flight::{FlightGuard, FlightRegistry};
pub use key::{canonical_encoding, CacheKey};

use raf_common::ResultRow;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::error::GatewayError;

const SHARD_COUNT: usize = 16;

/// Result rows shared between the cache and responses
pub type CachedRows = Arc<Vec<ResultRow>>;

/// Time source for entry expiry
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall-clock time
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Manually advanced clock for tests
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset_ms: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset_ms: AtomicU64::new(0),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.offset_ms
            .fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + Duration::from_millis(self.offset_ms.load(Ordering::SeqCst))
    }
}

/// Internal lock poisoned by a panicking holder
#[derive(Debug, Error)]
#[error("cache {0} lock poisoned")]
pub struct CacheError(&'static str);

impl From<CacheError> for GatewayError {
    fn from(err: CacheError) -> Self {
        GatewayError::CacheCorruption(err.to_string())
    }
}

#[derive(Clone)]
struct Entry {
    rows: CachedRows,
    generation: u64,
    inserted_at: Instant,
}

#[derive(Default)]
struct Recency {
    /// tick → key, oldest first
    order: BTreeMap<u64, CacheKey>,
    /// key → (tick, generation)
    index: HashMap<CacheKey, (u64, u64)>,
    next_tick: u64,
}

impl Recency {
    fn touch(&mut self, key: &CacheKey, generation: u64) {
        let tick = self.next_tick;
        self.next_tick += 1;
        if let Some((old_tick, _)) = self.index.insert(key.clone(), (tick, generation)) {
            self.order.remove(&old_tick);
        }
        self.order.insert(tick, key.clone());
    }

    fn remove(&mut self, key: &CacheKey) {
        if let Some((tick, _)) = self.index.remove(key) {
            self.order.remove(&tick);
        }
    }

    fn pop_oldest(&mut self) -> Option<(CacheKey, u64)> {
        let (_, key) = self.order.pop_first()?;
        let (_, generation) = self.index.remove(&key)?;
        Some((key, generation))
    }

    fn clear(&mut self) {
        self.order.clear();
        self.index.clear();
    }
}

/// Counters since startup
#[derive(Debug, Default)]
struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

/// Point-in-time copy of the cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub entries: usize,
}

/// Bounded LRU cache of scoring results with optional TTL
pub struct MemoizationCache {
    shards: Vec<RwLock<HashMap<CacheKey, Entry>>>,
    recency: Mutex<Recency>,
    capacity: usize,
    ttl: Option<Duration>,
    clock: Arc<dyn Clock>,
    next_generation: AtomicU64,
    stats: CacheStats,
}

impl MemoizationCache {
    /// Cache holding at most `capacity` entries (minimum 1), expiring after `ttl`
    pub fn new(capacity: usize, ttl: Option<Duration>) -> Self {
        Self::with_clock(capacity, ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(capacity: usize, ttl: Option<Duration>, clock: Arc<dyn Clock>) -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| RwLock::new(HashMap::new())).collect(),
            recency: Mutex::new(Recency::default()),
            capacity: capacity.max(1),
            ttl,
            clock,
            next_generation: AtomicU64::new(0),
            stats: CacheStats::default(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn shard(&self, key: &CacheKey) -> &RwLock<HashMap<CacheKey, Entry>> {
        // Keys are digests, so any byte is uniformly distributed
        &self.shards[key.as_bytes()[0] as usize % SHARD_COUNT]
    }

    fn is_expired(&self, entry: &Entry) -> bool {
        match self.ttl {
            Some(ttl) => self.clock.now().saturating_duration_since(entry.inserted_at) >= ttl,
            None => false,
        }
    }

    /// Cached rows for `key`, marking it most recently used.
    ///
    /// Expired entries are removed and reported as a miss.
    pub fn lookup(&self, key: &CacheKey) -> Result<Option<CachedRows>, CacheError> {
        self.find(key, true)
    }

    /// [`lookup`](Self::lookup) for a key whose miss was already counted.
    ///
    /// Hits and expirations are still recorded.
    pub fn recheck(&self, key: &CacheKey) -> Result<Option<CachedRows>, CacheError> {
        self.find(key, false)
    }

    fn find(&self, key: &CacheKey, count_miss: bool) -> Result<Option<CachedRows>, CacheError> {
        let shard = self.shard(key);
        let found = {
            let entries = shard.read().map_err(|_| CacheError("shard"))?;
            match entries.get(key) {
                Some(entry) if !self.is_expired(entry) => {
                    let mut recency = self.recency.lock().map_err(|_| CacheError("recency"))?;
                    if recency
                        .index
                        .get(key)
                        .is_some_and(|(_, generation)| *generation == entry.generation)
                    {
                        recency.touch(key, entry.generation);
                    }
                    Some(Ok(entry.rows.clone()))
                }
                Some(entry) => Some(Err(entry.generation)),
                None => None,
            }
        };

        match found {
            Some(Ok(rows)) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(rows))
            }
            Some(Err(generation)) => {
                let mut entries = shard.write().map_err(|_| CacheError("shard"))?;
                if entries.get(key).is_some_and(|e| e.generation == generation) {
                    entries.remove(key);
                    self.recency
                        .lock()
                        .map_err(|_| CacheError("recency"))?
                        .remove(key);
                    self.stats.expirations.fetch_add(1, Ordering::Relaxed);
                }
                self.count_miss(count_miss);
                Ok(None)
            }
            None => {
                self.count_miss(count_miss);
                Ok(None)
            }
        }
    }

    fn count_miss(&self, enabled: bool) {
        if enabled {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Store `rows` under `key`, evicting least-recently-used entries beyond capacity
    pub fn populate(&self, key: CacheKey, rows: CachedRows) -> Result<(), CacheError> {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let entry = Entry {
            rows,
            generation,
            inserted_at: self.clock.now(),
        };

        let victims = {
            let mut entries = self.shard(&key).write().map_err(|_| CacheError("shard"))?;
            entries.insert(key.clone(), entry);

            let mut recency = self.recency.lock().map_err(|_| CacheError("recency"))?;
            recency.touch(&key, generation);

            let mut victims = Vec::new();
            while recency.index.len() > self.capacity {
                match recency.pop_oldest() {
                    Some(victim) => victims.push(victim),
                    None => break,
                }
            }
            victims
        };

        for (victim, generation) in victims {
            let mut entries = self.shard(&victim).write().map_err(|_| CacheError("shard"))?;
            if entries.get(&victim).is_some_and(|e| e.generation == generation) {
                entries.remove(&victim);
                self.stats.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }

        Ok(())
    }

    /// Drop the entry for `key`, if any
    pub fn invalidate(&self, key: &CacheKey) -> Result<bool, CacheError> {
        let mut entries = self.shard(key).write().map_err(|_| CacheError("shard"))?;
        let removed = entries.remove(key).is_some();
        self.recency
            .lock()
            .map_err(|_| CacheError("recency"))?
            .remove(key);
        Ok(removed)
    }

    /// Drop every entry and reset any poisoned lock. Returns the number removed.
    pub fn clear(&self) -> usize {
        let mut removed = 0;
        let mut guards: Vec<_> = self
            .shards
            .iter()
            .map(|shard| shard.write().unwrap_or_else(|poisoned| poisoned.into_inner()))
            .collect();
        for entries in guards.iter_mut() {
            removed += entries.len();
            entries.clear();
        }

        self.recency
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
        drop(guards);

        for shard in &self.shards {
            shard.clear_poison();
        }
        self.recency.clear_poison();

        removed
    }

    /// Number of live entries (expired entries count until looked up)
    pub fn len(&self) -> usize {
        self.recency
            .lock()
            .map(|recency| recency.index.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            evictions: self.stats.evictions.load(Ordering::Relaxed),
            expirations: self.stats.expirations.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }
}
