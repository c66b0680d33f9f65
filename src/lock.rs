//! Ordered, timeout-bounded locking over (entity, currency) keys
//!
//! Multi-key operations sort and dedup their key set before acquisition, so
//! two transactions contending on overlapping sets always take the shared
//! keys in the same order and cannot deadlock. Waiters on one key are served
//! FIFO (tokio mutex fairness). A timeout covers the whole acquisition and
//! never leaves partial keys held: dropping the already-taken guards releases
//! them before the error returns.
//!
//! Locks are non-reentrant; an operation must compute its full key set up
//! front.

use crate::types::LockKey;
use crate::{Error, Result};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::{timeout, Instant};

/// Scoped guard over one or more keys
///
/// All keys release when the guard drops, on every exit path.
pub struct LockGuard {
    guards: Vec<OwnedMutexGuard<()>>,
}

impl LockGuard {
    /// Number of keys held
    pub fn len(&self) -> usize {
        self.guards.len()
    }

    /// Whether no keys are held
    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("held_keys", &self.guards.len())
            .finish()
    }
}

/// Per-key mutual exclusion
#[derive(Debug)]
pub struct LockManager {
    locks: DashMap<LockKey, Arc<Mutex<()>>>,
    default_timeout: Duration,
}

impl LockManager {
    /// Create manager with the given default acquisition timeout
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            locks: DashMap::new(),
            default_timeout,
        }
    }

    /// Acquire all keys with the default timeout
    pub async fn acquire_all(&self, keys: &[LockKey]) -> Result<LockGuard> {
        self.acquire_all_with_timeout(keys, self.default_timeout).await
    }

    /// Acquire all keys, bounding the total wait
    ///
    /// Keys are sorted and deduplicated before acquisition. On timeout the
    /// partially acquired guards drop and `LockTimeout` is returned.
    pub async fn acquire_all_with_timeout(
        &self,
        keys: &[LockKey],
        total_timeout: Duration,
    ) -> Result<LockGuard> {
        let mut sorted: Vec<LockKey> = keys.to_vec();
        sorted.sort();
        sorted.dedup();

        let deadline = Instant::now() + total_timeout;
        let mut guards = Vec::with_capacity(sorted.len());

        for key in sorted {
            let lock = self
                .locks
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone();

            let remaining = deadline.saturating_duration_since(Instant::now());
            match timeout(remaining, lock.lock_owned()).await {
                Ok(guard) => guards.push(guard),
                Err(_) => {
                    // `guards` drops here, releasing everything taken so far.
                    return Err(Error::LockTimeout(format!(
                        "{}/{} not acquired within {:?}",
                        key.0, key.1, total_timeout
                    )));
                }
            }
        }

        Ok(LockGuard { guards })
    }

    /// Number of keys that have ever been locked
    pub fn known_keys(&self) -> usize {
        self.locks.len()
    }
}
