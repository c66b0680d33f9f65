//! Ordered before/after hook pipeline
//!
//! Before-hooks validate a proposed balance and may veto it; the first
//! rejection aborts the operation and skips the rest. After-hooks observe
//! committed values; their failures are routed to the observability sink and
//! never propagate to the caller, since the operation already committed.
//!
//! Hooks are async. The engine snapshots the registered list before
//! awaiting, so registration never blocks behind a slow hook.

use crate::sink::ObservabilitySink;
use crate::types::{CurrencyCode, EntityId};
use crate::{Error, Result};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Values handed to a hook
#[derive(Debug, Clone)]
pub struct HookContext {
    /// Entity whose balance is changing
    pub entity: EntityId,

    /// Currency affected
    pub currency: CurrencyCode,

    /// Balance before the operation
    pub old_balance: Decimal,

    /// Proposed (before-hooks) or committed (after-hooks) balance
    pub new_balance: Decimal,

    /// Caller-supplied source tag
    pub source: Option<String>,
}

/// Boxed future returned by hooks
pub type HookFuture = Pin<Box<dyn Future<Output = std::result::Result<(), String>> + Send>>;

/// A hook: accepts the context, resolves to accept (`Ok`) or a reason string
pub type Hook = Arc<dyn Fn(HookContext) -> HookFuture + Send + Sync>;

/// Ordered hook chain
pub struct HookPipeline {
    before: RwLock<Vec<Hook>>,
    after: RwLock<Vec<Hook>>,
}

impl std::fmt::Debug for HookPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookPipeline")
            .field("before", &self.before.read().len())
            .field("after", &self.after.read().len())
            .finish()
    }
}

impl HookPipeline {
    /// Create empty pipeline
    pub fn new() -> Self {
        Self {
            before: RwLock::new(Vec::new()),
            after: RwLock::new(Vec::new()),
        }
    }

    /// Append a synchronous before-hook
    pub fn add_before<F>(&self, hook: F)
    where
        F: Fn(&HookContext) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        self.add_before_async(wrap_sync(hook));
    }

    /// Append an async before-hook
    pub fn add_before_async(&self, hook: Hook) {
        self.before.write().push(hook);
    }

    /// Append a synchronous after-hook
    pub fn add_after<F>(&self, hook: F)
    where
        F: Fn(&HookContext) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        self.add_after_async(wrap_sync(hook));
    }

    /// Append an async after-hook
    pub fn add_after_async(&self, hook: Hook) {
        self.after.write().push(hook);
    }

    /// Run before-hooks in order; first rejection aborts with `HookRejected`
    pub async fn run_before(&self, ctx: &HookContext) -> Result<()> {
        let hooks: Vec<Hook> = self.before.read().clone();

        for hook in hooks {
            if let Err(reason) = hook(ctx.clone()).await {
                return Err(Error::HookRejected(reason));
            }
        }

        Ok(())
    }

    /// Run after-hooks in order; failures go to the sink, never to the caller
    pub async fn run_after(&self, ctx: &HookContext, sink: &dyn ObservabilitySink) {
        let hooks: Vec<Hook> = self.after.read().clone();

        for hook in hooks {
            if let Err(reason) = hook(ctx.clone()).await {
                sink.after_hook_failure(&ctx.entity, &ctx.currency, &reason);
            }
        }
    }
}

impl Default for HookPipeline {
    fn default() -> Self {
        Self::new()
    }
}

fn wrap_sync<F>(hook: F) -> Hook
where
    F: Fn(&HookContext) -> std::result::Result<(), String> + Send + Sync + 'static,
{
    Arc::new(move |ctx: HookContext| {
        let result = hook(&ctx);
        Box::pin(async move { result }) as HookFuture
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn ctx() -> HookContext {
        HookContext {
            entity: EntityId::new("alice"),
            currency: CurrencyCode::new("gold"),
            old_balance: Decimal::from(100),
            new_balance: Decimal::from(150),
            source: None,
        }
    }

    /// Sink that counts after-hook failures
    #[derive(Default)]
    struct CountingSink {
        failures: AtomicU32,
    }

    impl ObservabilitySink for CountingSink {
        fn after_hook_failure(&self, _: &EntityId, _: &CurrencyCode, _: &str) {
            self.failures.fetch_add(1, Ordering::SeqCst);
        }

        fn operation_aborted(&self, _: &EntityId, _: &Error) {}
    }

    #[tokio::test]
    async fn test_empty_pipeline_accepts() {
        let pipeline = HookPipeline::new();
        assert!(pipeline.run_before(&ctx()).await.is_ok());
    }

    #[tokio::test]
    async fn test_first_rejection_skips_rest() {
        let pipeline = HookPipeline::new();
        let later_calls = Arc::new(AtomicU32::new(0));

        pipeline.add_before(|_| Ok(()));
        pipeline.add_before(|_| Err("balance too high".to_string()));

        let calls = later_calls.clone();
        pipeline.add_before(move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let result = pipeline.run_before(&ctx()).await;
        match result {
            Err(Error::HookRejected(reason)) => assert_eq!(reason, "balance too high"),
            other => panic!("expected HookRejected, got {:?}", other),
        }
        assert_eq!(later_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_async_before_hook() {
        let pipeline = HookPipeline::new();
        pipeline.add_before_async(Arc::new(|ctx: HookContext| {
            Box::pin(async move {
                tokio::task::yield_now().await;
                if ctx.new_balance > Decimal::from(1000) {
                    Err("over limit".to_string())
                } else {
                    Ok(())
                }
            }) as HookFuture
        }));

        assert!(pipeline.run_before(&ctx()).await.is_ok());

        let mut big = ctx();
        big.new_balance = Decimal::from(5000);
        assert!(matches!(
            pipeline.run_before(&big).await,
            Err(Error::HookRejected(_))
        ));
    }

    #[tokio::test]
    async fn test_after_hook_failures_isolated() {
        let pipeline = HookPipeline::new();
        let sink = CountingSink::default();
        let ran_second = Arc::new(AtomicU32::new(0));

        pipeline.add_after(|_| Err("replication lagging".to_string()));
        let ran = ran_second.clone();
        pipeline.add_after(move |_| {
            ran.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        // No error surfaces; the failure is reported and the chain continues.
        pipeline.run_after(&ctx(), &sink).await;
        assert_eq!(sink.failures.load(Ordering::SeqCst), 1);
        assert_eq!(ran_second.load(Ordering::SeqCst), 1);
    }
}
