//! Temporary gain multipliers per (entity, currency)
//!
//! A multiplier scales the delta of Increase operations only. Expiry is
//! lazy: an expired entry reads as factor 1 and is purged by the read.

use crate::balance::validate_amount;
use crate::types::{CurrencyCode, EntityId, LockKey};
use crate::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Active multiplier for one (entity, currency) pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiplierState {
    /// Multiplicative factor applied to Increase deltas
    pub factor: Decimal,

    /// Expiry instant; `None` means permanent until cleared
    pub expires_at: Option<DateTime<Utc>>,
}

impl MultiplierState {
    fn expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Multiplier storage
pub struct MultiplierManager {
    entries: DashMap<LockKey, MultiplierState>,
}

impl std::fmt::Debug for MultiplierManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiplierManager")
            .field("active_entries", &self.entries.len())
            .finish()
    }
}

impl MultiplierManager {
    /// Create empty manager
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Set a multiplier; `duration = None` makes it permanent until cleared
    pub fn set(
        &self,
        entity: &EntityId,
        currency: &CurrencyCode,
        factor: Decimal,
        duration: Option<Duration>,
    ) -> Result<()> {
        validate_amount(factor)?;
        if factor <= Decimal::ZERO {
            return Err(Error::InvalidNumber(format!(
                "multiplier factor must be positive, got {}",
                factor
            )));
        }

        let expires_at = duration.map(|d| Utc::now() + d);
        self.entries.insert(
            (entity.clone(), currency.clone()),
            MultiplierState { factor, expires_at },
        );

        tracing::debug!(%entity, %currency, %factor, ?expires_at, "Multiplier set");
        Ok(())
    }

    /// Effective factor: 1 when absent or expired; expired entries are purged
    pub fn effective(&self, entity: &EntityId, currency: &CurrencyCode) -> Decimal {
        self.effective_at(entity, currency, Utc::now())
    }

    fn effective_at(&self, entity: &EntityId, currency: &CurrencyCode, now: DateTime<Utc>) -> Decimal {
        let key = (entity.clone(), currency.clone());

        if let Some(state) = self.entries.get(&key) {
            if !state.expired_at(now) {
                return state.factor;
            }
        } else {
            return Decimal::ONE;
        }

        // Expired: purge as a side effect of the read.
        self.entries.remove_if(&key, |_, state| state.expired_at(now));
        Decimal::ONE
    }

    /// Current state, if present and unexpired
    pub fn get(&self, entity: &EntityId, currency: &CurrencyCode) -> Option<MultiplierState> {
        let now = Utc::now();
        self.entries
            .get(&(entity.clone(), currency.clone()))
            .filter(|state| !state.expired_at(now))
            .map(|state| state.value().clone())
    }

    /// Remove the multiplier for one pair
    pub fn clear(&self, entity: &EntityId, currency: &CurrencyCode) {
        self.entries.remove(&(entity.clone(), currency.clone()));
    }

    /// Remove every multiplier held by the entity
    pub fn clear_all(&self, entity: &EntityId) {
        self.entries.retain(|key, _| &key.0 != entity);
    }
}

impl Default for MultiplierManager {
    fn default() -> Self {
        Self::new()
    }
}
