//! Per-entity, per-currency balance storage
//!
//! Balances are exact decimals; `Decimal` cannot represent NaN or infinity,
//! so numeric validity reduces to the magnitude bound checked by
//! [`validate_amount`]. Accounts materialize lazily: an entity that never
//! touched a currency reads the currency's initial value.
//!
//! Mutation happens only through the engine while it holds the key's lock.

use crate::registry::CurrencyConfig;
use crate::types::{CurrencyCode, EntityId, LockKey};
use crate::{Error, Result};
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// Largest accepted magnitude for any balance or operand
pub fn max_magnitude() -> Decimal {
    Decimal::from(9_000_000_000_000_000_i64)
}

/// Validate a value against the safe magnitude bound
pub fn validate_amount(value: Decimal) -> Result<()> {
    if value.abs() > max_magnitude() {
        return Err(Error::InvalidNumber(format!(
            "{} exceeds safe magnitude bound ±{}",
            value,
            max_magnitude()
        )));
    }
    Ok(())
}

/// Balance storage
#[derive(Debug)]
pub struct BalanceStore {
    balances: DashMap<LockKey, Decimal>,
}

impl BalanceStore {
    /// Create empty store
    pub fn new() -> Self {
        Self {
            balances: DashMap::new(),
        }
    }

    /// Current balance, defaulting to the currency's initial value
    pub fn get(&self, entity: &EntityId, currency: &CurrencyCode, config: &CurrencyConfig) -> Decimal {
        self.balances
            .get(&(entity.clone(), currency.clone()))
            .map(|v| *v)
            // Bounds may have tightened since registration; defaults clamp on read.
            .unwrap_or_else(|| config.clamp(config.initial_value))
    }

    /// Validate, enforce bounds, and store a new balance
    ///
    /// Returns the stored value (clamped under `Clamp` policy).
    pub fn apply(
        &self,
        entity: &EntityId,
        currency: &CurrencyCode,
        new_value: Decimal,
        config: &CurrencyConfig,
    ) -> Result<Decimal> {
        validate_amount(new_value)?;
        let stored = config.enforce(new_value)?;
        self.balances
            .insert((entity.clone(), currency.clone()), stored);
        Ok(stored)
    }

    /// Write a balance back without validation (rollback path, lock held)
    pub(crate) fn restore(&self, entity: &EntityId, currency: &CurrencyCode, value: Decimal) {
        self.balances
            .insert((entity.clone(), currency.clone()), value);
    }

    /// Whether the entity has ever touched the currency
    pub fn touched(&self, entity: &EntityId, currency: &CurrencyCode) -> bool {
        self.balances
            .contains_key(&(entity.clone(), currency.clone()))
    }

    /// Entities with a materialized balance in the currency
    pub fn holders_of(&self, currency: &CurrencyCode) -> Vec<EntityId> {
        self.balances
            .iter()
            .filter(|entry| &entry.key().1 == currency)
            .map(|entry| entry.key().0.clone())
            .collect()
    }

    /// Materialized balances of one entity, per currency
    pub fn snapshot(&self, entity: &EntityId) -> BTreeMap<CurrencyCode, Decimal> {
        self.balances
            .iter()
            .filter(|entry| &entry.key().0 == entity)
            .map(|entry| (entry.key().1.clone(), *entry.value()))
            .collect()
    }
}

impl Default for BalanceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::BoundPolicy;

    fn alice() -> EntityId {
        EntityId::new("alice")
    }

    fn gold() -> CurrencyCode {
        CurrencyCode::new("gold")
    }

    #[test]
    fn test_get_defaults_to_initial_value() {
        let store = BalanceStore::new();
        let config = CurrencyConfig {
            initial_value: Decimal::from(100),
            ..Default::default()
        };

        assert_eq!(store.get(&alice(), &gold(), &config), Decimal::from(100));
        assert!(!store.touched(&alice(), &gold()));
    }

    #[test]
    fn test_apply_clamps_to_cap() {
        let store = BalanceStore::new();
        let config = CurrencyConfig {
            cap: Some(Decimal::from(1000)),
            ..Default::default()
        };

        let stored = store
            .apply(&alice(), &gold(), Decimal::from(1050), &config)
            .unwrap();
        assert_eq!(stored, Decimal::from(1000));
        assert_eq!(store.get(&alice(), &gold(), &config), Decimal::from(1000));
    }

    #[test]
    fn test_apply_clamps_to_minimum() {
        let store = BalanceStore::new();
        let config = CurrencyConfig {
            minimum: Some(Decimal::ZERO),
            ..Default::default()
        };

        let stored = store
            .apply(&alice(), &gold(), Decimal::from(-25), &config)
            .unwrap();
        assert_eq!(stored, Decimal::ZERO);
    }

    #[test]
    fn test_apply_reject_policy() {
        let store = BalanceStore::new();
        let config = CurrencyConfig {
            cap: Some(Decimal::from(1000)),
            bound_policy: BoundPolicy::Reject,
            ..Default::default()
        };

        let result = store.apply(&alice(), &gold(), Decimal::from(1050), &config);
        assert!(matches!(result, Err(Error::InvalidNumber(_))));
        // Nothing stored on rejection.
        assert!(!store.touched(&alice(), &gold()));
    }

    #[test]
    fn test_magnitude_bound() {
        let store = BalanceStore::new();
        let config = CurrencyConfig::default();

        let over = max_magnitude() + Decimal::ONE;
        assert!(matches!(
            store.apply(&alice(), &gold(), over, &config),
            Err(Error::InvalidNumber(_))
        ));
        assert!(store.apply(&alice(), &gold(), max_magnitude(), &config).is_ok());
    }

    #[test]
    fn test_holders_and_snapshot() {
        let store = BalanceStore::new();
        let config = CurrencyConfig::default();
        let xp = CurrencyCode::new("xp");

        store.apply(&alice(), &gold(), Decimal::from(10), &config).unwrap();
        store.apply(&alice(), &xp, Decimal::from(20), &config).unwrap();
        store
            .apply(&EntityId::new("bob"), &gold(), Decimal::from(30), &config)
            .unwrap();

        let mut holders = store.holders_of(&gold());
        holders.sort();
        assert_eq!(holders, vec![alice(), EntityId::new("bob")]);

        let snapshot = store.snapshot(&alice());
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[&gold()], Decimal::from(10));
        assert_eq!(snapshot[&xp], Decimal::from(20));
    }
}
