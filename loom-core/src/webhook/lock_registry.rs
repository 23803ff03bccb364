//! Per-(strategy_id, symbol) lock registry (C8), acquired before any DB
//! state is mutated by a webhook (spec.md §4.8, §5). Same
//! `DashMap<Key, Arc<Mutex<()>>>` idiom as C5's bucket locks, capped in
//! size since a webhook can name an arbitrary symbol.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::timeout;
use tracing::warn;
use uuid::Uuid;

use crate::error::WebhookError;

pub type LockKey = (Uuid, String);

const SLOW_ACQUIRE_WARNING: Duration = Duration::from_secs(5);

pub struct WebhookLockRegistry {
    locks: DashMap<LockKey, Arc<Mutex<()>>>,
    max_locks: usize,
    acquire_timeout: Duration,
}

impl WebhookLockRegistry {
    pub fn new(max_locks: usize, acquire_timeout: Duration) -> Self {
        Self {
            locks: DashMap::new(),
            max_locks,
            acquire_timeout,
        }
    }

    fn entry_for(&self, key: LockKey) -> Result<Arc<Mutex<()>>, WebhookError> {
        if let Some(existing) = self.locks.get(&key) {
            return Ok(existing.clone());
        }
        if self.locks.len() >= self.max_locks {
            return Err(WebhookError::LockRegistryFull(self.max_locks));
        }
        Ok(self
            .locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone())
    }

    /// Acquires every key in deterministic sorted order (spec.md §4.8
    /// deadlock avoidance, §8 scenario 5), warning past 5s and failing
    /// past the configured timeout.
    pub async fn acquire_sorted(&self, mut keys: Vec<LockKey>) -> Result<Vec<OwnedMutexGuard<()>>, WebhookError> {
        keys.sort();
        keys.dedup();

        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            let mutex = self.entry_for(key.clone())?;
            let started = tokio::time::Instant::now();
            let guard = timeout(self.acquire_timeout, mutex.lock_owned())
                .await
                .map_err(|_| WebhookError::LockTimeout(self.acquire_timeout))?;
            let waited = started.elapsed();
            if waited > SLOW_ACQUIRE_WARNING {
                warn!(
                    strategy_id = %key.0,
                    symbol = %key.1,
                    waited_secs = waited.as_secs(),
                    "webhook lock acquisition slow"
                );
            }
            guards.push(guard);
        }
        Ok(guards)
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    /// Removes entries nobody currently holds a guard for. Without this,
    /// the map only ever grows — every distinct (strategy, symbol) pair
    /// seen over the process lifetime would count against `max_locks`,
    /// not the concurrently-held locks the cap is meant to bound
    /// (spec.md §5 "a global cap bounds memory").
    pub fn sweep_idle(&self) -> usize {
        let idle: Vec<LockKey> = self
            .locks
            .iter()
            .filter(|entry| Arc::strong_count(entry.value()) == 1)
            .map(|entry| entry.key().clone())
            .collect();
        let mut removed = 0;
        for key in idle {
            // Re-check under the shard's removal lock: a concurrent
            // `entry_for` may have cloned the Arc between our scan and now.
            if self.locks.remove_if(&key, |_, v| Arc::strong_count(v) == 1).is_some() {
                removed += 1;
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquires_and_releases_distinct_keys() {
        let registry = WebhookLockRegistry::new(10, Duration::from_secs(1));
        let strategy = Uuid::new_v4();
        let guards = registry
            .acquire_sorted(vec![(strategy, "BTC/USDT".to_string()), (strategy, "ETH/USDT".to_string())])
            .await
            .unwrap();
        assert_eq!(guards.len(), 2);
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn sorts_keys_for_deadlock_avoidance() {
        let registry = WebhookLockRegistry::new(10, Duration::from_secs(1));
        let strategy = Uuid::new_v4();
        let first = registry
            .acquire_sorted(vec![(strategy, "ETH/USDT".to_string()), (strategy, "BTC/USDT".to_string())])
            .await
            .unwrap();
        drop(first);
        // A second acquisition requesting the same keys in the opposite
        // order must still succeed without deadlocking, since both calls
        // sort internally before acquiring.
        let second = registry
            .acquire_sorted(vec![(strategy, "BTC/USDT".to_string()), (strategy, "ETH/USDT".to_string())])
            .await
            .unwrap();
        assert_eq!(second.len(), 2);
    }

    #[tokio::test]
    async fn rejects_past_registry_cap() {
        let registry = WebhookLockRegistry::new(1, Duration::from_secs(1));
        let strategy = Uuid::new_v4();
        let _first = registry.acquire_sorted(vec![(strategy, "BTC/USDT".to_string())]).await.unwrap();
        let err = registry
            .acquire_sorted(vec![(strategy, "ETH/USDT".to_string())])
            .await
            .unwrap_err();
        assert!(matches!(err, WebhookError::LockRegistryFull(1)));
    }
}
