//! Memoized computation pipeline
//!
//! Per request: validate → key → cache lookup. On a miss the key's flight
//! guard is taken and the cache re-checked, then one transactional scope runs
//! stage → invoke → commit, and the rows are memoized. A staging or
//! invocation failure rolls the scope back, invalidates the cache per the
//! configured policy and retries the whole scope once.

use raf_common::config::{InvalidationPolicy, TomlConfig};
use raf_common::{ProcessRequest, ResultRow};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::cache::{
    CacheError, CacheKey, CacheStatsSnapshot, CachedRows, FlightRegistry, MemoizationCache,
};
use crate::engine::{BatchStager, ComputationInvoker, ScoringBackend, ScoringSession};
use crate::error::GatewayError;

/// First attempt plus one retry
const MAX_ATTEMPTS: u32 = 2;

/// Whether the rows were served from the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CacheStatus {
    #[serde(rename = "Cache hit")]
    Hit,
    #[serde(rename = "Cache miss")]
    Miss,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "Cache hit",
            CacheStatus::Miss => "Cache miss",
        }
    }
}

/// Successful result of one request
#[derive(Debug, Clone)]
pub struct Outcome {
    pub cache_status: CacheStatus,
    pub rows: CachedRows,
    pub key: CacheKey,
    /// Computations run for this request (0 on a hit)
    pub attempts: u32,
}

/// Composes key building, cache, staging and invocation
pub struct Orchestrator {
    backend: Arc<dyn ScoringBackend>,
    cache: MemoizationCache,
    flights: FlightRegistry,
    stager: BatchStager,
    invoker: ComputationInvoker,
    policy: InvalidationPolicy,
}

impl Orchestrator {
    pub fn new(
        backend: Arc<dyn ScoringBackend>,
        cache: MemoizationCache,
        stager: BatchStager,
        invoker: ComputationInvoker,
        policy: InvalidationPolicy,
    ) -> Self {
        Self {
            backend,
            cache,
            flights: FlightRegistry::new(),
            stager,
            invoker,
            policy,
        }
    }

    /// Orchestrator with cache, batching and timeout taken from configuration
    pub fn from_config(backend: Arc<dyn ScoringBackend>, config: &TomlConfig) -> Self {
        Self::new(
            backend,
            MemoizationCache::new(config.cache.capacity, config.cache.ttl()),
            BatchStager::new(config.staging.batch_size),
            ComputationInvoker::new(config.routine.timeout()),
            config.cache.invalidation,
        )
    }

    pub fn cache(&self) -> &MemoizationCache {
        &self.cache
    }

    pub fn cache_stats(&self) -> CacheStatsSnapshot {
        self.cache.stats()
    }

    /// Serve `request` from cache or compute it
    pub async fn process(&self, request: &ProcessRequest) -> Result<Outcome, GatewayError> {
        request.validate().map_err(|e| match e {
            raf_common::Error::InvalidInput(msg) => GatewayError::Validation(msg),
            other => GatewayError::Validation(other.to_string()),
        })?;

        let key = CacheKey::from_request(request);

        if let Some(rows) = self.cached(&key, MemoizationCache::lookup) {
            debug!("Cache hit for {}", key.short());
            return Ok(Self::hit(key, rows));
        }

        let _flight = self.flights.acquire(&key).await;

        // A concurrent build for the same key may have finished while we waited
        if let Some(rows) = self.cached(&key, MemoizationCache::recheck) {
            debug!("Cache hit for {} after waiting on in-flight build", key.short());
            return Ok(Self::hit(key, rows));
        }

        let mut attempt = 1;
        loop {
            match self.compute(request).await {
                Ok(rows) => {
                    let rows: CachedRows = Arc::new(rows);
                    if let Err(e) = self.cache.populate(key.clone(), rows.clone()) {
                        warn!("Could not memoize {}: {}; clearing cache", key.short(), e);
                        self.cache.clear();
                    }
                    debug!("Cache stats: {:?}", self.cache.stats());
                    return Ok(Outcome {
                        cache_status: CacheStatus::Miss,
                        rows,
                        key,
                        attempts: attempt,
                    });
                }
                Err(e) if e.is_retryable() && attempt < MAX_ATTEMPTS => {
                    warn!(
                        "Attempt {} for {} failed: {}; invalidating cache and retrying",
                        attempt,
                        key.short(),
                        e
                    );
                    self.invalidate_after_failure(&key);
                    attempt += 1;
                }
                Err(e) if e.is_retryable() => {
                    error!("Computation for {} failed after {} attempts: {}", key.short(), attempt, e);
                    return Err(GatewayError::Exhausted {
                        attempts: attempt,
                        source: Box::new(e),
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn hit(key: CacheKey, rows: CachedRows) -> Outcome {
        Outcome {
            cache_status: CacheStatus::Hit,
            rows,
            key,
            attempts: 0,
        }
    }

    /// Cache read through `find` that treats a corrupted cache as empty
    fn cached(
        &self,
        key: &CacheKey,
        find: fn(&MemoizationCache, &CacheKey) -> Result<Option<CachedRows>, CacheError>,
    ) -> Option<CachedRows> {
        match find(&self.cache, key) {
            Ok(rows) => rows,
            Err(e) => {
                let err = GatewayError::from(e);
                warn!("{}; clearing cache", err);
                self.cache.clear();
                None
            }
        }
    }

    fn invalidate_after_failure(&self, key: &CacheKey) {
        match self.policy {
            InvalidationPolicy::ClearAll => {
                let removed = self.cache.clear();
                info!("Cleared {} cached results after failure", removed);
            }
            InvalidationPolicy::KeyOnly => {
                if let Err(e) = self.cache.invalidate(key) {
                    warn!("Invalidating {} failed: {}; clearing cache", key.short(), e);
                    self.cache.clear();
                }
            }
        }
    }

    /// One transactional scope: stage, invoke, commit
    async fn compute(&self, request: &ProcessRequest) -> Result<Vec<ResultRow>, GatewayError> {
        let mut session = self.backend.begin().await.map_err(GatewayError::Staging)?;

        match self.stage_and_invoke(session.as_mut(), request).await {
            Ok(rows) => {
                session.commit().await.map_err(GatewayError::Staging)?;
                Ok(rows)
            }
            Err(e) => {
                if let Err(rollback) = session.rollback().await {
                    warn!("Rollback failed: {}", rollback);
                }
                Err(e)
            }
        }
    }

    async fn stage_and_invoke(
        &self,
        session: &mut dyn ScoringSession,
        request: &ProcessRequest,
    ) -> Result<Vec<ResultRow>, GatewayError> {
        let report = self
            .stager
            .stage(session, &request.memberships, &request.diagnoses)
            .await?;
        info!(
            "Staged {} membership rows in {} batches and {} diagnosis rows in {} batches",
            report.membership_rows,
            report.membership_batches,
            report.diagnosis_rows,
            report.diagnosis_batches
        );

        self.invoker.invoke(session, request.dos_year).await
    }
}
