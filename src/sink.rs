//! External collaborator interfaces
//!
//! The core consumes these; it never awaits or retries through them.

use crate::types::{CurrencyCode, EntityId};
use crate::Error;
use rust_decimal::Decimal;

/// Receives committed balance changes for replication to remote viewers
///
/// Fire-and-forget: the core does not await delivery and ignores failures.
pub trait ReplicationSink: Send + Sync {
    /// One committed balance change
    fn notify(&self, entity: &EntityId, currency: &CurrencyCode, old_balance: Decimal, new_balance: Decimal);
}

/// Receives diagnostics the core never surfaces to callers
pub trait ObservabilitySink: Send + Sync {
    /// An after-hook returned an error post-commit
    fn after_hook_failure(&self, entity: &EntityId, currency: &CurrencyCode, reason: &str);

    /// A mutating operation aborted before (or after rolling back) any commit
    fn operation_aborted(&self, entity: &EntityId, error: &Error);
}

/// Replication sink that drops every notification
#[derive(Debug, Default)]
pub struct NullReplicationSink;

impl ReplicationSink for NullReplicationSink {
    fn notify(&self, _: &EntityId, _: &CurrencyCode, _: Decimal, _: Decimal) {}
}

/// Observability sink that logs through `tracing`
#[derive(Debug, Default)]
pub struct TracingObservabilitySink;

impl ObservabilitySink for TracingObservabilitySink {
    fn after_hook_failure(&self, entity: &EntityId, currency: &CurrencyCode, reason: &str) {
        tracing::error!(%entity, %currency, reason, "After-hook failed post-commit");
    }

    fn operation_aborted(&self, entity: &EntityId, error: &Error) {
        tracing::warn!(%entity, %error, "Operation aborted");
    }
}
