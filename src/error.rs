//! Error types for the economy ledger

use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
///
/// Every variant is recoverable and carries a human-readable reason.
/// Mutating calls either succeed or return one of these before (or after
/// rolling back) any state change.
#[derive(Error, Debug)]
pub enum Error {
    /// Currency configuration rejected (cap < minimum, initial out of bounds, ...)
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Currency name already taken
    #[error("Currency already registered: {0}")]
    CurrencyAlreadyRegistered(String),

    /// Currency is not (or no longer) registered
    #[error("Currency not found: {0}")]
    CurrencyNotFound(String),

    /// Value failed numeric validation (magnitude bound, overflow)
    #[error("Invalid number: {0}")]
    InvalidNumber(String),

    /// A cost exceeds the current balance; names the first deficient currency
    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),

    /// A before-hook vetoed the operation
    #[error("Hook rejected: {0}")]
    HookRejected(String),

    /// Sliding-window operation limit reached
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Lock set could not be acquired within the timeout
    #[error("Lock timeout: {0}")]
    LockTimeout(String),

    /// Operand invalid for the requested operation (e.g. divide by zero)
    #[error("Invalid operand: {0}")]
    InvalidOperand(String),

    /// No conversion rate configured for the requested direction
    #[error("Exchange rate not set: {0}")]
    ExchangeRateNotSet(String),

    /// Conversion rate rejected (non-positive or out of range)
    #[error("Invalid rate: {0}")]
    InvalidRate(String),

    /// Task join failure; surfaced only by `batch` when a spawned
    /// operation panics or is cancelled before producing an outcome
    #[error("Concurrency error: {0}")]
    Concurrency(String),
}
