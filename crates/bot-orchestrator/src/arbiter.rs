//! Store-resident, time-windowed mutex spacing order submissions across all
//! workers.
//!
//! Every acquisition draws a fresh wait from the configured range and grants
//! only if at least that long has passed since the last granted order. The
//! timestamp is written on grant, before the order goes out, to shrink the
//! window in which two workers polling in lockstep both see a stale lock.
//!
//! # Known race
//!
//! On a store without compare-and-set (such as
//! [`FileStore`](hedge_bot_core::FileStore)) the read and the write are
//! separate operations, so two workers can still both pass the check. That
//! is accepted, not detected. On a store that reports compare-and-set support
//! the grant is a conditional write against the observed timestamp and the
//! arbiter is an exact mutex.

use hedge_bot_core::{keys, CasOutcome, CoordinationStore, MsRange, StoreError};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

pub struct GlobalOrderArbiter {
    store: Arc<dyn CoordinationStore>,
    rng: Mutex<StdRng>,
}

impl GlobalOrderArbiter {
    #[must_use]
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self {
            store,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Deterministic wait draws, for tests and replay.
    #[must_use]
    pub fn with_seed(store: Arc<dyn CoordinationStore>, seed: u64) -> Self {
        Self {
            store,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Draws a wait from `range`, inclusive on both ends.
    pub fn draw_wait(&self, range: MsRange) -> u64 {
        let (lo, hi) = if range.is_valid() {
            (range.min_ms, range.max_ms)
        } else {
            (range.max_ms, range.min_ms)
        };
        self.rng.lock().gen_range(lo..=hi)
    }

    /// Timestamp (ms) of the last granted acquisition, if any.
    ///
    /// # Errors
    /// Returns an error if the store read fails.
    pub async fn last_acquired(&self) -> Result<Option<i64>, StoreError> {
        Ok(self
            .store
            .get(keys::GLOBAL_ORDER_LOCK)
            .await?
            .as_ref()
            .and_then(Value::as_i64))
    }

    /// Tries to take the global order slot at `now_ms`.
    ///
    /// Returns `false` without writing anything when the freshly drawn wait
    /// has not elapsed since the last grant.
    ///
    /// # Errors
    /// Returns an error if the store read or write fails.
    pub async fn try_acquire(&self, now_ms: i64, interval: MsRange) -> Result<bool, StoreError> {
        let observed = self.store.get(keys::GLOBAL_ORDER_LOCK).await?;
        let last = observed.as_ref().and_then(Value::as_i64).unwrap_or(0);

        let wait = i64::try_from(self.draw_wait(interval)).unwrap_or(i64::MAX);
        let elapsed = now_ms.saturating_sub(last);
        if elapsed < wait {
            debug!("Global order lock held: {}ms elapsed, {}ms required", elapsed, wait);
            return Ok(false);
        }

        let stamp = Value::from(now_ms);
        match self
            .store
            .compare_and_set(keys::GLOBAL_ORDER_LOCK, observed.as_ref(), stamp.clone())
            .await?
        {
            CasOutcome::Swapped => Ok(true),
            CasOutcome::Conflict => {
                debug!("Global order lock taken by another worker");
                Ok(false)
            }
            CasOutcome::Unsupported => {
                self.store.set(keys::GLOBAL_ORDER_LOCK, stamp).await?;
                Ok(true)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use hedge_bot_core::MemoryStore;
    use serde_json::json;

    /// Store without compare-and-set, like a file store.
    #[derive(Default)]
    struct PlainStore(MemoryStore);

    #[async_trait]
    impl CoordinationStore for PlainStore {
        async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
            self.0.get(key).await
        }
        async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
            self.0.set(key, value).await
        }
        async fn remove(&self, key: &str) -> Result<(), StoreError> {
            self.0.remove(key).await
        }
    }

    /// Reads return a stale lock while another worker already moved it.
    struct StaleReadStore {
        inner: MemoryStore,
        stale: Value,
    }

    #[async_trait]
    impl CoordinationStore for StaleReadStore {
        async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
            if key == keys::GLOBAL_ORDER_LOCK {
                return Ok(Some(self.stale.clone()));
            }
            self.inner.get(key).await
        }
        async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
            self.inner.set(key, value).await
        }
        async fn remove(&self, key: &str) -> Result<(), StoreError> {
            self.inner.remove(key).await
        }
        async fn compare_and_set(
            &self,
            key: &str,
            expected: Option<&Value>,
            new: Value,
        ) -> Result<CasOutcome, StoreError> {
            self.inner.compare_and_set(key, expected, new).await
        }
    }

    const INTERVAL: MsRange = MsRange::new(1_000, 3_000);

    #[tokio::test]
    async fn test_first_acquire_on_empty_store_grants_and_stamps() {
        let store = Arc::new(MemoryStore::new());
        let arbiter = GlobalOrderArbiter::with_seed(store.clone(), 1);

        assert!(arbiter.try_acquire(1_700_000_000_000, INTERVAL).await.unwrap());
        assert_eq!(arbiter.last_acquired().await.unwrap(), Some(1_700_000_000_000));
    }

    #[tokio::test]
    async fn test_immediate_second_acquire_is_denied() {
        for store in [
            Arc::new(MemoryStore::new()) as Arc<dyn CoordinationStore>,
            Arc::new(PlainStore::default()) as Arc<dyn CoordinationStore>,
        ] {
            let arbiter = GlobalOrderArbiter::with_seed(store, 7);
            let now = 1_700_000_000_000;

            assert!(arbiter.try_acquire(now, INTERVAL).await.unwrap());
            assert!(!arbiter.try_acquire(now, INTERVAL).await.unwrap());
            assert!(!arbiter.try_acquire(now + 999, INTERVAL).await.unwrap());
            // A denied attempt leaves the lock alone.
            assert_eq!(arbiter.last_acquired().await.unwrap(), Some(now));
        }
    }

    #[tokio::test]
    async fn test_acquire_after_max_interval_always_grants() {
        let store = Arc::new(MemoryStore::new());
        let arbiter = GlobalOrderArbiter::with_seed(store, 3);
        let mut now = 1_700_000_000_000;

        assert!(arbiter.try_acquire(now, INTERVAL).await.unwrap());
        for _ in 0..20 {
            now += 3_000;
            assert!(arbiter.try_acquire(now, INTERVAL).await.unwrap());
        }
        assert_eq!(arbiter.last_acquired().await.unwrap(), Some(now));
    }

    #[tokio::test]
    async fn test_wait_is_drawn_fresh_each_call() {
        let store = Arc::new(MemoryStore::new());
        let arbiter = GlobalOrderArbiter::with_seed(store.clone(), 42);
        let range = MsRange::new(0, 10_000);

        let mut granted = 0;
        let mut denied = 0;
        for _ in 0..100 {
            store.set(keys::GLOBAL_ORDER_LOCK, json!(0)).await.unwrap();
            if arbiter.try_acquire(5_000, range).await.unwrap() {
                granted += 1;
            } else {
                denied += 1;
            }
        }

        assert!(granted > 0, "some draws fall at or below 5s");
        assert!(denied > 0, "some draws fall above 5s");
    }

    #[tokio::test]
    async fn test_cas_store_rejects_grant_on_stale_observation() {
        let inner = MemoryStore::new();
        inner.set(keys::GLOBAL_ORDER_LOCK, json!(50_000)).await.unwrap();
        let store = Arc::new(StaleReadStore {
            inner,
            stale: json!(0),
        });
        let arbiter = GlobalOrderArbiter::with_seed(store.clone(), 9);

        // The stale read says the lock is ancient, but the conditional write
        // sees the other worker's stamp and backs off.
        assert!(!arbiter.try_acquire(60_000, INTERVAL).await.unwrap());
        assert_eq!(store.inner.get(keys::GLOBAL_ORDER_LOCK).await.unwrap(), Some(json!(50_000)));
    }

    #[tokio::test]
    async fn test_plain_store_grant_overwrites_lock() {
        let store = Arc::new(PlainStore::default());
        store.set(keys::GLOBAL_ORDER_LOCK, json!(10_000)).await.unwrap();
        let arbiter = GlobalOrderArbiter::with_seed(store.clone(), 5);

        assert!(arbiter.try_acquire(20_000, INTERVAL).await.unwrap());
        assert_eq!(store.get(keys::GLOBAL_ORDER_LOCK).await.unwrap(), Some(json!(20_000)));
    }

    #[test]
    fn test_draw_wait_stays_in_range_and_tolerates_inverted_range() {
        let arbiter = GlobalOrderArbiter::with_seed(Arc::new(MemoryStore::new()), 11);

        for _ in 0..200 {
            let wait = arbiter.draw_wait(INTERVAL);
            assert!((1_000..=3_000).contains(&wait));
        }
        let wait = arbiter.draw_wait(MsRange::new(500, 100));
        assert!((100..=500).contains(&wait));
        assert_eq!(arbiter.draw_wait(MsRange::fixed(0)), 0);
    }
}
