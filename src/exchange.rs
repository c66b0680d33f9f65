//! Directional currency conversion rates
//!
//! Rates are asymmetric by design: setting gold→gems says nothing about
//! gems→gold. Guarded independently of per-account locks.

use crate::balance::validate_amount;
use crate::types::CurrencyCode;
use crate::{Error, Result};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::HashMap;

/// Conversion rate table
#[derive(Debug)]
pub struct ExchangeTable {
    rates: RwLock<HashMap<(CurrencyCode, CurrencyCode), Decimal>>,
}

impl ExchangeTable {
    /// Create empty table
    pub fn new() -> Self {
        Self {
            rates: RwLock::new(HashMap::new()),
        }
    }

    /// Set the rate for one direction; rate must be positive and in range
    pub fn set_rate(&self, from: CurrencyCode, to: CurrencyCode, rate: Decimal) -> Result<()> {
        validate_amount(rate).map_err(|e| Error::InvalidRate(e.to_string()))?;
        if rate <= Decimal::ZERO {
            return Err(Error::InvalidRate(format!(
                "{}→{}: rate must be positive, got {}",
                from, to, rate
            )));
        }

        self.rates.write().insert((from, to), rate);
        Ok(())
    }

    /// Look up the rate for one direction
    pub fn rate(&self, from: &CurrencyCode, to: &CurrencyCode) -> Result<Decimal> {
        self.rates
            .read()
            .get(&(from.clone(), to.clone()))
            .copied()
            .ok_or_else(|| Error::ExchangeRateNotSet(format!("{}→{}", from, to)))
    }

    /// Remove the rate for one direction
    pub fn remove_rate(&self, from: &CurrencyCode, to: &CurrencyCode) -> bool {
        self.rates.write().remove(&(from.clone(), to.clone())).is_some()
    }
}

impl Default for ExchangeTable {
    fn default() -> Self {
        Self::new()
    }
}
