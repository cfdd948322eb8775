//! Per-key build serialization (singleflight)
//!
//! Callers that miss the cache take the key's flight guard before computing.
//! A second caller for the same key waits on the guard, then finds the entry
//! already populated. Different keys use different locks and never wait on
//! each other; the registry map lock is only held to look up or retire a slot.

use super::CacheKey;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Slot = Arc<AsyncMutex<()>>;

/// Registry of in-flight computations, one slot per key
#[derive(Default)]
pub struct FlightRegistry {
    slots: Mutex<HashMap<CacheKey, Slot>>,
}

/// Exclusive right to build one key; released on drop
pub struct FlightGuard<'a> {
    registry: &'a FlightRegistry,
    key: CacheKey,
    slot: Slot,
    guard: Option<OwnedMutexGuard<()>>,
}

impl FlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // Every critical section is a single map operation, so a poisoned map
    // is still consistent.
    fn slots(&self) -> MutexGuard<'_, HashMap<CacheKey, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait until no other caller is building `key`, then claim it
    pub async fn acquire(&self, key: &CacheKey) -> FlightGuard<'_> {
        let slot = self
            .slots()
            .entry(key.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();

        let guard = slot.clone().lock_owned().await;

        FlightGuard {
            registry: self,
            key: key.clone(),
            slot,
            guard: Some(guard),
        }
    }

    /// Number of keys with a holder or waiters
    pub fn in_flight(&self) -> usize {
        self.slots().len()
    }
}

impl FlightGuard<'_> {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());

        // Remaining references: the map's and ours. Anything more is a waiter
        // that will reuse the slot.
        let mut slots = self.registry.slots();
        if Arc::strong_count(&self.slot) == 2 {
            slots.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use raf_common::ProcessRequest;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn key(year: i32) -> CacheKey {
        CacheKey::from_request(&ProcessRequest {
            dos_year: year,
            memberships: vec![],
            diagnoses: vec![],
        })
    }

    #[tokio::test]
    async fn test_slot_retired_after_release() {
        let registry = FlightRegistry::new();
        {
            let guard = registry.acquire(&key(2023)).await;
            assert_eq!(guard.key(), &key(2023));
            assert_eq!(registry.in_flight(), 1);
        }
        assert_eq!(registry.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let registry = FlightRegistry::new();
        let _a = registry.acquire(&key(2023)).await;

        let b = tokio::time::timeout(Duration::from_millis(200), registry.acquire(&key(2024))).await;
        assert!(b.is_ok(), "Different key should not wait");
        assert_eq!(registry.in_flight(), 2);
    }

    #[tokio::test]
    async fn test_same_key_is_exclusive() {
        let registry = Arc::new(FlightRegistry::new());
        let active = Arc::new(AtomicUsize::new(0));
        let max_active = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            let active = active.clone();
            let max_active = max_active.clone();
            handles.push(tokio::spawn(async move {
                let _guard = registry.acquire(&key(2023)).await;
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                max_active.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_active.load(Ordering::SeqCst), 1);
        assert_eq!(registry.in_flight(), 0);
    }
}
