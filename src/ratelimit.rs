//! Sliding-window rate limiting per (entity, currency) key
//!
//! Each key tracks the timestamps of its recent operations. On every check
//! the window is pruned, the remaining count compared against the limit, and
//! the new timestamp appended — one atomic step under the key's map entry.

use crate::types::{CurrencyCode, EntityId, LockKey};
use crate::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Operation limit over a trailing window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    /// Maximum operations per window
    pub max_ops: u32,

    /// Window duration (seconds)
    pub window_secs: u64,
}

impl RateLimit {
    /// Limit with the default 60s window
    pub fn per_minute(max_ops: u32) -> Self {
        Self {
            max_ops,
            window_secs: 60,
        }
    }
}

/// Sliding-window operation counter
pub struct RateLimiter {
    // Map: (entity, currency) -> operation timestamps, oldest first
    windows: DashMap<LockKey, VecDeque<DateTime<Utc>>>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("tracked_keys", &self.windows.len())
            .finish()
    }
}

impl RateLimiter {
    /// Create new rate limiter
    pub fn new() -> Self {
        Self {
            windows: DashMap::new(),
        }
    }

    /// Check and record one operation for the key
    ///
    /// Fails with `RateLimited` without recording when the window is full.
    pub fn check(&self, entity: &EntityId, currency: &CurrencyCode, limit: &RateLimit) -> Result<()> {
        self.check_at(entity, currency, limit, Utc::now())
    }

    fn check_at(
        &self,
        entity: &EntityId,
        currency: &CurrencyCode,
        limit: &RateLimit,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let window_start = now - Duration::seconds(limit.window_secs as i64);

        let mut entry = self
            .windows
            .entry((entity.clone(), currency.clone()))
            .or_default();
        let window = entry.value_mut();

        while window.front().is_some_and(|t| *t < window_start) {
            window.pop_front();
        }

        if window.len() >= limit.max_ops as usize {
            return Err(Error::RateLimited(format!(
                "{}/{}: {} operations in the last {}s (max {})",
                entity,
                currency,
                window.len(),
                limit.window_secs,
                limit.max_ops
            )));
        }

        window.push_back(now);
        Ok(())
    }

    /// Drop all recorded operations for a key
    pub fn reset(&self, entity: &EntityId, currency: &CurrencyCode) {
        self.windows.remove(&(entity.clone(), currency.clone()));
    }

    /// Number of keys with recorded operations
    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> (EntityId, CurrencyCode) {
        (EntityId::new("alice"), CurrencyCode::new("gold"))
    }

    #[test]
    fn test_limit_rejects_excess_in_window() {
        let limiter = RateLimiter::new();
        let (entity, currency) = key();
        let limit = RateLimit::per_minute(3);
        let now = Utc::now();

        for i in 0..3 {
            let at = now + Duration::milliseconds(i);
            assert!(limiter.check_at(&entity, &currency, &limit, at).is_ok());
        }

        let result = limiter.check_at(&entity, &currency, &limit, now + Duration::seconds(1));
        assert!(matches!(result, Err(Error::RateLimited(_))));
    }

    #[test]
    fn test_rejected_operation_not_recorded() {
        let limiter = RateLimiter::new();
        let (entity, currency) = key();
        let limit = RateLimit::per_minute(1);
        let now = Utc::now();

        assert!(limiter.check_at(&entity, &currency, &limit, now).is_ok());
        assert!(limiter.check_at(&entity, &currency, &limit, now).is_err());

        // The rejected attempt left no trace: after the window elapses the
        // next operation succeeds on the first try.
        let later = now + Duration::seconds(61);
        assert!(limiter.check_at(&entity, &currency, &limit, later).is_ok());
    }

    #[test]
    fn test_window_elapse_admits_again() {
        let limiter = RateLimiter::new();
        let (entity, currency) = key();
        let limit = RateLimit {
            max_ops: 2,
            window_secs: 10,
        };
        let now = Utc::now();

        assert!(limiter.check_at(&entity, &currency, &limit, now).is_ok());
        assert!(limiter
            .check_at(&entity, &currency, &limit, now + Duration::seconds(1))
            .is_ok());
        assert!(limiter
            .check_at(&entity, &currency, &limit, now + Duration::seconds(2))
            .is_err());

        // First timestamp falls out of the window.
        assert!(limiter
            .check_at(&entity, &currency, &limit, now + Duration::seconds(11))
            .is_ok());
    }

    #[test]
    fn test_keys_independent() {
        let limiter = RateLimiter::new();
        let limit = RateLimit::per_minute(1);
        let now = Utc::now();

        let alice = EntityId::new("alice");
        let bob = EntityId::new("bob");
        let gold = CurrencyCode::new("gold");

        assert!(limiter.check_at(&alice, &gold, &limit, now).is_ok());
        assert!(limiter.check_at(&bob, &gold, &limit, now).is_ok());
        assert!(limiter.check_at(&alice, &gold, &limit, now).is_err());
    }

    #[test]
    fn test_reset() {
        let limiter = RateLimiter::new();
        let (entity, currency) = key();
        let limit = RateLimit::per_minute(1);

        limiter.check(&entity, &currency, &limit).unwrap();
        assert_eq!(limiter.tracked_keys(), 1);

        limiter.reset(&entity, &currency);
        assert_eq!(limiter.tracked_keys(), 0);
        assert!(limiter.check(&entity, &currency, &limit).is_ok());
    }
}
