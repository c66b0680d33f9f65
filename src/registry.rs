//! Per-currency configuration registry
//!
//! Registry state is process-scoped and guarded by its own lock, independent
//! of per-account locks. Bound changes (`set_cap` / `set_minimum`) only
//! update configuration here; the engine owns the account sweep that follows.

use crate::balance::validate_amount;
use crate::ratelimit::RateLimit;
use crate::types::CurrencyCode;
use crate::{Error, Result};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Numeric/display kind of a currency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Representation {
    /// Whole units only (coins, tokens); fractional results truncate on write
    Whole,
    /// Fractional amounts allowed
    Fractional,
}

/// Bound enforcement policy for values leaving `[minimum, cap]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoundPolicy {
    /// Clamp the result to the violated bound
    Clamp,
    /// Reject the operation with `InvalidNumber`
    Reject,
}

/// Configuration of one registered currency
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrencyConfig {
    /// Balance for entities that never touched this currency
    pub initial_value: Decimal,

    /// Upper bound, if any
    pub cap: Option<Decimal>,

    /// Lower bound, if any
    pub minimum: Option<Decimal>,

    /// Numeric representation
    pub representation: Representation,

    /// What to do when an operation result leaves the bounds
    pub bound_policy: BoundPolicy,

    /// Per-currency operation limit; overrides the engine default
    pub rate_limit: Option<RateLimit>,
}

impl Default for CurrencyConfig {
    fn default() -> Self {
        Self {
            initial_value: Decimal::ZERO,
            cap: None,
            minimum: None,
            representation: Representation::Fractional,
            bound_policy: BoundPolicy::Clamp,
            rate_limit: None,
        }
    }
}

impl CurrencyConfig {
    /// Clamp a value into `[minimum, cap]`
    pub fn clamp(&self, value: Decimal) -> Decimal {
        let mut v = value;
        if let Some(cap) = self.cap {
            if v > cap {
                v = cap;
            }
        }
        if let Some(min) = self.minimum {
            if v < min {
                v = min;
            }
        }
        v
    }

    /// Whether a value lies within the configured bounds
    pub fn in_bounds(&self, value: Decimal) -> bool {
        self.clamp(value) == value
    }

    /// Apply representation and bound policy to a proposed value
    ///
    /// `Whole` currencies truncate fractional results first. Returns the
    /// value to store under `Clamp`, or `InvalidNumber` under `Reject` when
    /// the value is out of range.
    pub fn enforce(&self, value: Decimal) -> Result<Decimal> {
        let value = match self.representation {
            Representation::Whole => value.trunc(),
            Representation::Fractional => value,
        };
        match self.bound_policy {
            BoundPolicy::Clamp => Ok(self.clamp(value)),
            BoundPolicy::Reject => {
                if self.in_bounds(value) {
                    Ok(value)
                } else {
                    Err(Error::InvalidNumber(format!(
                        "{} outside configured bounds [{:?}, {:?}]",
                        value, self.minimum, self.cap
                    )))
                }
            }
        }
    }

    fn validate(&self) -> Result<()> {
        validate_amount(self.initial_value).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        if let Some(cap) = self.cap {
            validate_amount(cap).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        }
        if let Some(min) = self.minimum {
            validate_amount(min).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        }

        if let (Some(cap), Some(min)) = (self.cap, self.minimum) {
            if cap < min {
                return Err(Error::InvalidConfig(format!(
                    "cap {} is below minimum {}",
                    cap, min
                )));
            }
        }

        if !self.in_bounds(self.initial_value) {
            return Err(Error::InvalidConfig(format!(
                "initial value {} outside bounds [{:?}, {:?}]",
                self.initial_value, self.minimum, self.cap
            )));
        }

        if let Some(limit) = &self.rate_limit {
            if limit.max_ops == 0 || limit.window_secs == 0 {
                return Err(Error::InvalidConfig(
                    "rate limit requires max_ops >= 1 and window_secs >= 1".to_string(),
                ));
            }
        }

        Ok(())
    }
}

/// Registry of currency configurations
#[derive(Debug)]
pub struct CurrencyRegistry {
    currencies: RwLock<HashMap<CurrencyCode, CurrencyConfig>>,
}

impl CurrencyRegistry {
    /// Create empty registry
    pub fn new() -> Self {
        Self {
            currencies: RwLock::new(HashMap::new()),
        }
    }

    /// Register a currency
    pub fn register(&self, code: CurrencyCode, config: CurrencyConfig) -> Result<()> {
        config.validate()?;

        let mut currencies = self.currencies.write();
        if currencies.contains_key(&code) {
            return Err(Error::CurrencyAlreadyRegistered(code.to_string()));
        }

        tracing::info!(currency = %code, "Registered currency");
        currencies.insert(code, config);
        Ok(())
    }

    /// Unregister a currency; in-flight operations on it fail `CurrencyNotFound`
    pub fn unregister(&self, code: &CurrencyCode) -> Result<CurrencyConfig> {
        let removed = self
            .currencies
            .write()
            .remove(code)
            .ok_or_else(|| Error::CurrencyNotFound(code.to_string()))?;

        tracing::info!(currency = %code, "Unregistered currency");
        Ok(removed)
    }

    /// Get a currency's configuration
    pub fn get(&self, code: &CurrencyCode) -> Result<CurrencyConfig> {
        self.currencies
            .read()
            .get(code)
            .cloned()
            .ok_or_else(|| Error::CurrencyNotFound(code.to_string()))
    }

    /// Whether the currency is registered
    pub fn contains(&self, code: &CurrencyCode) -> bool {
        self.currencies.read().contains_key(code)
    }

    /// Registered currency codes
    pub fn list(&self) -> Vec<CurrencyCode> {
        self.currencies.read().keys().cloned().collect()
    }

    /// Update the cap; the engine sweeps accounts afterwards
    pub(crate) fn set_cap(&self, code: &CurrencyCode, cap: Option<Decimal>) -> Result<CurrencyConfig> {
        self.update(code, |config| {
            config.cap = cap;
        })
    }

    /// Update the minimum; the engine sweeps accounts afterwards
    pub(crate) fn set_minimum(
        &self,
        code: &CurrencyCode,
        minimum: Option<Decimal>,
    ) -> Result<CurrencyConfig> {
        self.update(code, |config| {
            config.minimum = minimum;
        })
    }

    fn update(
        &self,
        code: &CurrencyCode,
        apply: impl FnOnce(&mut CurrencyConfig),
    ) -> Result<CurrencyConfig> {
        let mut currencies = self.currencies.write();
        let config = currencies
            .get_mut(code)
            .ok_or_else(|| Error::CurrencyNotFound(code.to_string()))?;

        let mut updated = config.clone();
        apply(&mut updated);
        // New bounds pass the same magnitude check as at registration; the
        // sweep writes them into balances unvalidated.
        if let Some(cap) = updated.cap {
            validate_amount(cap).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        }
        if let Some(min) = updated.minimum {
            validate_amount(min).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        }
        // The stored initial value may fall outside new bounds; defaults for
        // untouched entities clamp on read, so only validate bound ordering.
        if let (Some(cap), Some(min)) = (updated.cap, updated.minimum) {
            if cap < min {
                return Err(Error::InvalidConfig(format!(
                    "cap {} is below minimum {}",
                    cap, min
                )));
            }
        }

        *config = updated.clone();
        Ok(updated)
    }
}

impl Default for CurrencyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gold() -> CurrencyCode {
        CurrencyCode::new("gold")
    }

    #[test]
    fn test_register_and_get() {
        let registry = CurrencyRegistry::new();
        let config = CurrencyConfig {
            initial_value: Decimal::from(100),
            cap: Some(Decimal::from(1000)),
            ..Default::default()
        };

        registry.register(gold(), config).unwrap();
        let fetched = registry.get(&gold()).unwrap();
        assert_eq!(fetched.initial_value, Decimal::from(100));
        assert_eq!(fetched.cap, Some(Decimal::from(1000)));
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let registry = CurrencyRegistry::new();
        registry.register(gold(), CurrencyConfig::default()).unwrap();

        let result = registry.register(gold(), CurrencyConfig::default());
        assert!(matches!(result, Err(Error::CurrencyAlreadyRegistered(_))));
    }

    #[test]
    fn test_cap_below_minimum_rejected() {
        let registry = CurrencyRegistry::new();
        let config = CurrencyConfig {
            cap: Some(Decimal::from(10)),
            minimum: Some(Decimal::from(20)),
            initial_value: Decimal::from(15),
            ..Default::default()
        };

        let result = registry.register(gold(), config);
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_initial_value_out_of_bounds_rejected() {
        let registry = CurrencyRegistry::new();
        let config = CurrencyConfig {
            initial_value: Decimal::from(5000),
            cap: Some(Decimal::from(1000)),
            ..Default::default()
        };

        let result = registry.register(gold(), config);
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_unregister_makes_currency_unknown() {
        let registry = CurrencyRegistry::new();
        registry.register(gold(), CurrencyConfig::default()).unwrap();
        registry.unregister(&gold()).unwrap();

        assert!(matches!(registry.get(&gold()), Err(Error::CurrencyNotFound(_))));
        assert!(matches!(
            registry.unregister(&gold()),
            Err(Error::CurrencyNotFound(_))
        ));
    }

    #[test]
    fn test_set_cap_validates_against_minimum() {
        let registry = CurrencyRegistry::new();
        let config = CurrencyConfig {
            minimum: Some(Decimal::ZERO),
            ..Default::default()
        };
        registry.register(gold(), config).unwrap();

        assert!(registry.set_cap(&gold(), Some(Decimal::from(500))).is_ok());
        assert!(matches!(
            registry.set_cap(&gold(), Some(Decimal::from(-1))),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_enforce_reject_policy() {
        let config = CurrencyConfig {
            cap: Some(Decimal::from(100)),
            bound_policy: BoundPolicy::Reject,
            ..Default::default()
        };

        assert_eq!(config.enforce(Decimal::from(50)).unwrap(), Decimal::from(50));
        assert!(matches!(
            config.enforce(Decimal::from(150)),
            Err(Error::InvalidNumber(_))
        ));
    }

    #[test]
    fn test_bound_update_magnitude_checked() {
        let registry = CurrencyRegistry::new();
        registry.register(gold(), CurrencyConfig::default()).unwrap();

        let huge = Decimal::from(10_000_000_000_000_000_u64);
        assert!(matches!(
            registry.set_minimum(&gold(), Some(huge)),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            registry.set_cap(&gold(), Some(huge)),
            Err(Error::InvalidConfig(_))
        ));

        // Configuration unchanged after the rejected updates.
        let config = registry.get(&gold()).unwrap();
        assert!(config.cap.is_none());
        assert!(config.minimum.is_none());
    }

    #[test]
    fn test_whole_representation_truncates() {
        let config = CurrencyConfig {
            representation: Representation::Whole,
            ..Default::default()
        };

        assert_eq!(config.enforce(Decimal::new(109, 1)).unwrap(), Decimal::from(10));
        assert_eq!(config.enforce(Decimal::new(-109, 1)).unwrap(), Decimal::from(-10));
    }

    #[test]
    fn test_clamp() {
        let config = CurrencyConfig {
            cap: Some(Decimal::from(100)),
            minimum: Some(Decimal::from(10)),
            initial_value: Decimal::from(10),
            ..Default::default()
        };

        assert_eq!(config.clamp(Decimal::from(150)), Decimal::from(100));
        assert_eq!(config.clamp(Decimal::from(5)), Decimal::from(10));
        assert_eq!(config.clamp(Decimal::from(50)), Decimal::from(50));
    }
}
