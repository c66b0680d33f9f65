//! Core types for the economy ledger
//!
//! All types are designed for:
//! - Plain serde serialization (snapshots for the persistence collaborator)
//! - Exact arithmetic (Decimal for balances)
//! - Memory safety (no unsafe code)

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Balance-holding principal (player id, account id, ...)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(String);

impl EntityId {
    /// Create new entity ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Named currency key, unique while registered
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CurrencyCode(String);

impl CurrencyCode {
    /// Create new currency code
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lock key: one (entity, currency) pair
///
/// The derived `Ord` (entity first, then currency) is the total order used
/// for deadlock-free multi-key acquisition.
pub type LockKey = (EntityId, CurrencyCode);

/// Kind of committed balance operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationKind {
    /// Balance replaced with the given value
    Set,
    /// Balance increased by the given delta (multiplier applies)
    Increase,
    /// Balance decreased by the given delta
    Decrease,
    /// Balance multiplied by the given factor
    Multiply,
    /// Balance divided by the given divisor
    Divide,
    /// Cost leg of an atomic transaction
    TransactionCost,
    /// Reward leg of an atomic transaction
    TransactionReward,
}

impl OperationKind {
    /// Whether this kind may be requested directly through `modify`
    pub fn is_direct(&self) -> bool {
        !matches!(self, OperationKind::TransactionCost | OperationKind::TransactionReward)
    }
}

/// Immutable record of one committed operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Unique record ID (UUIDv7 for time-ordering)
    pub record_id: Uuid,

    /// Commit timestamp
    pub timestamp: DateTime<Utc>,

    /// Entity whose balance changed
    pub entity: EntityId,

    /// Currency affected
    pub currency: CurrencyCode,

    /// Operation kind
    pub kind: OperationKind,

    /// Requested amount (delta, factor, or set value, pre-multiplier)
    pub amount: Decimal,

    /// Balance before commit
    pub old_balance: Decimal,

    /// Balance after commit
    pub new_balance: Decimal,

    /// Caller-supplied source tag
    pub source: Option<String>,
}

impl TransactionRecord {
    /// Build a record stamped with the current time
    pub fn now(
        entity: EntityId,
        currency: CurrencyCode,
        kind: OperationKind,
        amount: Decimal,
        old_balance: Decimal,
        new_balance: Decimal,
        source: Option<String>,
    ) -> Self {
        Self {
            record_id: Uuid::now_v7(),
            timestamp: Utc::now(),
            entity,
            currency,
            kind,
            amount,
            old_balance,
            new_balance,
            source,
        }
    }
}

/// Committed balance change, published to in-process subscribers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Entity whose balance changed
    pub entity: EntityId,

    /// Currency affected
    pub currency: CurrencyCode,

    /// Balance before commit
    pub old_balance: Decimal,

    /// Balance after commit
    pub new_balance: Decimal,

    /// Commit timestamp
    pub timestamp: DateTime<Utc>,
}
