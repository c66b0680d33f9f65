//! Economy Core
//!
//! In-process multi-currency ledger for virtual economies.
//!
//! # Architecture
//!
//! - **Single authority**: one engine instance owns all balances in process
//! - **Exact arithmetic**: balances are `Decimal`, never floating point
//! - **Atomic transactions**: multi-currency cost/reward blocks commit fully
//!   or not at all, with rollback on mid-commit failure
//! - **Deadlock-free locking**: per-(entity, currency) locks taken in sorted
//!   order with a total acquisition timeout
//!
//! # Invariants
//!
//! - Balances stay within each currency's configured `[minimum, cap]`
//! - A failed operation leaves no observable state change
//! - History records only committed operations, bounded per entity
//! - Rejected (rate-limited, vetoed, unaffordable) operations leave no trace

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod balance;
pub mod config;
pub mod engine;
pub mod error;
pub mod exchange;
pub mod history;
pub mod hooks;
pub mod lock;
pub mod metrics;
pub mod multiplier;
pub mod ratelimit;
pub mod registry;
pub mod sink;
pub mod types;

// Re-exports
pub use config::Config;
pub use engine::{BatchOperation, BatchOutcome, TransactionEngine};
pub use error::{Error, Result};
pub use exchange::ExchangeTable;
pub use hooks::{Hook, HookContext, HookFuture, HookPipeline};
pub use multiplier::MultiplierState;
pub use ratelimit::RateLimit;
pub use registry::{BoundPolicy, CurrencyConfig, CurrencyRegistry, Representation};
pub use sink::{NullReplicationSink, ObservabilitySink, ReplicationSink, TracingObservabilitySink};
pub use types::{
    ChangeEvent, CurrencyCode, EntityId, LockKey, OperationKind, TransactionRecord,
};
