//! Transaction engine
//!
//! This module ties registry, balances, multipliers, rate limiting, locking,
//! hooks, history, and exchange rates into the high-level ledger API.
//!
//! Every mutating operation follows the same shape: acquire the sorted key
//! set, validate (before-hooks, rate limit, numeric checks), commit, then run
//! after-hooks, append history, and publish the change. Multi-currency
//! transactions split this into an awaitable validation phase and an
//! await-free commit phase, so a cancelled caller can only observe
//! nothing-applied or everything-applied (after rollback, nothing-applied).
//! The post-commit sequence runs on a spawned task owning the lock guard;
//! cancellation cannot leave a committed mutation unrecorded.
//!
//! # Example
//!
//! ```no_run
//! use economy_core::{Config, CurrencyCode, CurrencyConfig, EntityId, TransactionEngine};
//! use rust_decimal::Decimal;
//!
//! #[tokio::main]
//! async fn main() -> economy_core::Result<()> {
//!     let engine = TransactionEngine::new(Config::default())?;
//!
//!     let gold = CurrencyCode::new("gold");
//!     engine.register_currency(gold.clone(), CurrencyConfig::default())?;
//!
//!     let alice = EntityId::new("alice");
//!     let balance = engine.increase(&alice, &gold, Decimal::from(50), None).await?;
//!     assert_eq!(balance, Decimal::from(50));
//!
//!     Ok(())
//! }
//! ```

use crate::{
    balance::{validate_amount, BalanceStore},
    exchange::ExchangeTable,
    history::HistoryLog,
    hooks::{HookContext, HookPipeline},
    lock::{LockGuard, LockManager},
    metrics::Metrics,
    multiplier::MultiplierManager,
    ratelimit::{RateLimit, RateLimiter},
    registry::{CurrencyConfig, CurrencyRegistry},
    sink::{NullReplicationSink, ObservabilitySink, ReplicationSink, TracingObservabilitySink},
    types::{ChangeEvent, CurrencyCode, EntityId, LockKey, OperationKind, TransactionRecord},
    Config, Error, Result,
};
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinSet;

/// One operation of a batch
#[derive(Debug, Clone)]
pub enum BatchOperation {
    /// Single-currency modification
    Modify {
        /// Entity whose balance changes
        entity: EntityId,
        /// Currency affected
        currency: CurrencyCode,
        /// Operation kind (direct kinds only)
        kind: OperationKind,
        /// Requested amount
        amount: Decimal,
        /// Caller-supplied source tag
        source: Option<String>,
    },
    /// Atomic multi-currency transaction
    Transaction {
        /// Entity whose balances change
        entity: EntityId,
        /// Cost set (deducted)
        costs: BTreeMap<CurrencyCode, Decimal>,
        /// Reward set (added)
        rewards: BTreeMap<CurrencyCode, Decimal>,
        /// Caller-supplied source tag
        source: Option<String>,
    },
}

/// Result payload of one batch operation
#[derive(Debug, Clone)]
pub enum BatchOutcome {
    /// New balance after a modification
    Balance(Decimal),
    /// Final balances of all currencies involved in a transaction
    Balances(BTreeMap<CurrencyCode, Decimal>),
}

/// Planned step of a multi-currency transaction
struct PlannedStep {
    currency: CurrencyCode,
    kind: OperationKind,
    amount: Decimal,
    old: Decimal,
    proposed: Decimal,
}

/// Main ledger interface
pub struct TransactionEngine {
    registry: CurrencyRegistry,
    balances: BalanceStore,
    multipliers: MultiplierManager,
    rate_limiter: RateLimiter,
    locks: LockManager,
    hooks: Arc<HookPipeline>,
    history: Arc<HistoryLog>,
    rates: ExchangeTable,
    replication: Arc<dyn ReplicationSink>,
    observability: Arc<dyn ObservabilitySink>,
    events: broadcast::Sender<ChangeEvent>,
    metrics: Metrics,
    config: Config,
}

impl std::fmt::Debug for TransactionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionEngine")
            .field("currencies", &self.registry.list().len())
            .field("config", &self.config)
            .finish()
    }
}

impl TransactionEngine {
    /// Create engine with configuration
    pub fn new(config: Config) -> Result<Self> {
        let metrics = Metrics::new()
            .map_err(|e| Error::InvalidConfig(format!("metrics registry: {}", e)))?;
        let (events, _) = broadcast::channel(config.events.buffer.max(1));

        tracing::info!(
            service = %config.service_name,
            version = %config.service_version,
            "Engine created"
        );

        Ok(Self {
            registry: CurrencyRegistry::new(),
            balances: BalanceStore::new(),
            multipliers: MultiplierManager::new(),
            rate_limiter: RateLimiter::new(),
            locks: LockManager::new(Duration::from_millis(config.locking.acquire_timeout_ms)),
            hooks: Arc::new(HookPipeline::new()),
            history: Arc::new(HistoryLog::new(config.history.capacity)),
            rates: ExchangeTable::new(),
            replication: Arc::new(NullReplicationSink),
            observability: Arc::new(TracingObservabilitySink),
            events,
            metrics,
            config,
        })
    }

    /// Set the replication sink
    pub fn with_replication_sink(mut self, sink: Arc<dyn ReplicationSink>) -> Self {
        self.replication = sink;
        self
    }

    /// Set the observability sink
    pub fn with_observability_sink(mut self, sink: Arc<dyn ObservabilitySink>) -> Self {
        self.observability = sink;
        self
    }

    // ---- registration & configuration -----------------------------------

    /// Register a currency
    pub fn register_currency(&self, code: CurrencyCode, config: CurrencyConfig) -> Result<()> {
        self.registry.register(code, config)
    }

    /// Unregister a currency; subsequent operations on it fail `CurrencyNotFound`
    pub fn unregister_currency(&self, code: &CurrencyCode) -> Result<CurrencyConfig> {
        self.registry.unregister(code)
    }

    /// Currency registry (read access)
    pub fn registry(&self) -> &CurrencyRegistry {
        &self.registry
    }

    /// Hook pipeline for registering before/after hooks
    pub fn hooks(&self) -> &HookPipeline {
        &self.hooks
    }

    /// Multiplier manager
    pub fn multipliers(&self) -> &MultiplierManager {
        &self.multipliers
    }

    /// Exchange rate table
    pub fn exchange_rates(&self) -> &ExchangeTable {
        &self.rates
    }

    /// Metrics collector
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Subscribe to committed change events
    ///
    /// The channel is lossy for slow subscribers; the core never blocks on it.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.events.subscribe()
    }

    /// Update a currency's cap, then sweep existing holders into range
    ///
    /// Returns the number of accounts whose balance was adjusted. The sweep
    /// takes one account lock at a time, never a global freeze.
    pub async fn set_cap(&self, currency: &CurrencyCode, cap: Option<Decimal>) -> Result<usize> {
        let config = self.registry.set_cap(currency, cap)?;
        self.sweep(currency, &config).await
    }

    /// Update a currency's minimum, then sweep existing holders into range
    pub async fn set_minimum(
        &self,
        currency: &CurrencyCode,
        minimum: Option<Decimal>,
    ) -> Result<usize> {
        let config = self.registry.set_minimum(currency, minimum)?;
        self.sweep(currency, &config).await
    }

    async fn sweep(&self, currency: &CurrencyCode, config: &CurrencyConfig) -> Result<usize> {
        let mut adjusted = 0;

        for entity in self.balances.holders_of(currency) {
            let key: LockKey = (entity.clone(), currency.clone());
            let _guard = self.locks.acquire_all(std::slice::from_ref(&key)).await?;

            let old = self.balances.get(&entity, currency, config);
            let clamped = config.clamp(old);
            if clamped == old {
                continue;
            }

            self.balances.restore(&entity, currency, clamped);
            self.history.append(TransactionRecord::now(
                entity.clone(),
                currency.clone(),
                OperationKind::Set,
                clamped,
                old,
                clamped,
                Some("bound-sweep".to_string()),
            ));
            self.emit(&entity, currency, old, clamped);
            adjusted += 1;
            // Lock released here before the next account is touched.
        }

        if adjusted > 0 {
            tracing::info!(%currency, adjusted, "Bound sweep adjusted accounts");
        }
        Ok(adjusted)
    }

    // ---- queries ---------------------------------------------------------

    /// Current balance (initial value if the entity never touched the currency)
    pub fn balance(&self, entity: &EntityId, currency: &CurrencyCode) -> Result<Decimal> {
        let config = self.registry.get(currency)?;
        Ok(self.balances.get(entity, currency, &config))
    }

    /// Most recent committed records for an entity, newest first
    pub fn history(&self, entity: &EntityId, limit: Option<usize>) -> Vec<TransactionRecord> {
        self.history.get(entity, limit)
    }

    // ---- single-currency modifications ------------------------------------

    /// Replace the balance with `value`
    pub async fn set(
        &self,
        entity: &EntityId,
        currency: &CurrencyCode,
        value: Decimal,
        source: Option<&str>,
    ) -> Result<Decimal> {
        self.modify(entity, currency, OperationKind::Set, value, source).await
    }

    /// Increase the balance by `delta` (multiplier applies)
    pub async fn increase(
        &self,
        entity: &EntityId,
        currency: &CurrencyCode,
        delta: Decimal,
        source: Option<&str>,
    ) -> Result<Decimal> {
        self.modify(entity, currency, OperationKind::Increase, delta, source).await
    }

    /// Decrease the balance by `delta`
    pub async fn decrease(
        &self,
        entity: &EntityId,
        currency: &CurrencyCode,
        delta: Decimal,
        source: Option<&str>,
    ) -> Result<Decimal> {
        self.modify(entity, currency, OperationKind::Decrease, delta, source).await
    }

    /// Multiply the balance by `factor`
    pub async fn multiply(
        &self,
        entity: &EntityId,
        currency: &CurrencyCode,
        factor: Decimal,
        source: Option<&str>,
    ) -> Result<Decimal> {
        self.modify(entity, currency, OperationKind::Multiply, factor, source).await
    }

    /// Divide the balance by `divisor`; zero fails `InvalidOperand`
    pub async fn divide(
        &self,
        entity: &EntityId,
        currency: &CurrencyCode,
        divisor: Decimal,
        source: Option<&str>,
    ) -> Result<Decimal> {
        self.modify(entity, currency, OperationKind::Divide, divisor, source).await
    }

    /// Apply one direct modification and return the committed balance
    pub async fn modify(
        &self,
        entity: &EntityId,
        currency: &CurrencyCode,
        kind: OperationKind,
        amount: Decimal,
        source: Option<&str>,
    ) -> Result<Decimal> {
        let started = std::time::Instant::now();
        let result = self.modify_inner(entity, currency, kind, amount, source).await;
        self.metrics.record_duration(started.elapsed().as_secs_f64());

        match &result {
            Ok(_) => self.metrics.record_operation(),
            Err(error) => self.note_abort(entity, error),
        }
        result
    }

    async fn modify_inner(
        &self,
        entity: &EntityId,
        currency: &CurrencyCode,
        kind: OperationKind,
        amount: Decimal,
        source: Option<&str>,
    ) -> Result<Decimal> {
        if !kind.is_direct() {
            return Err(Error::InvalidOperand(format!(
                "{:?} is not a direct modification",
                kind
            )));
        }
        validate_amount(amount)?;
        if kind == OperationKind::Divide && amount.is_zero() {
            return Err(Error::InvalidOperand("divide by zero".to_string()));
        }

        let key: LockKey = (entity.clone(), currency.clone());
        let guard = self.locks.acquire_all(std::slice::from_ref(&key)).await?;

        // Config read under the lock: an unregistration racing this call
        // fails cleanly with CurrencyNotFound.
        let config = self.registry.get(currency)?;
        let old = self.balances.get(entity, currency, &config);
        let proposed = self.propose(entity, currency, kind, amount, old)?;

        let ctx = HookContext {
            entity: entity.clone(),
            currency: currency.clone(),
            old_balance: old,
            new_balance: proposed,
            source: source.map(str::to_string),
        };
        self.hooks.run_before(&ctx).await?;

        if let Some(limit) = self.effective_limit(&config) {
            self.rate_limiter.check(entity, currency, &limit)?;
        }

        let stored = self.balances.apply(entity, currency, proposed, &config)?;

        let record = TransactionRecord::now(
            entity.clone(),
            currency.clone(),
            kind,
            amount,
            old,
            stored,
            source.map(str::to_string),
        );

        // Committed. The tail task owns the guard and always runs to
        // completion, even if the caller drops this future mid-await.
        let tail = self.spawn_post_commit(guard, source.map(str::to_string), vec![record]);
        let _ = tail.await;

        tracing::debug!(%entity, %currency, ?kind, %amount, %old, %stored, "Committed modification");
        Ok(stored)
    }

    fn propose(
        &self,
        entity: &EntityId,
        currency: &CurrencyCode,
        kind: OperationKind,
        amount: Decimal,
        old: Decimal,
    ) -> Result<Decimal> {
        let overflow =
            || Error::InvalidNumber(format!("arithmetic overflow on {:?} {}", kind, amount));

        match kind {
            OperationKind::Set => Ok(amount),
            OperationKind::Increase => {
                let factor = self.multipliers.effective(entity, currency);
                let delta = amount.checked_mul(factor).ok_or_else(overflow)?;
                old.checked_add(delta).ok_or_else(overflow)
            }
            OperationKind::Decrease => old.checked_sub(amount).ok_or_else(overflow),
            OperationKind::Multiply => old.checked_mul(amount).ok_or_else(overflow),
            OperationKind::Divide => old.checked_div(amount).ok_or_else(overflow),
            OperationKind::TransactionCost | OperationKind::TransactionReward => Err(
                Error::InvalidOperand(format!("{:?} is not a direct modification", kind)),
            ),
        }
    }

    // ---- multi-currency operations ----------------------------------------

    /// Whether the entity can cover every cost right now
    ///
    /// Takes the cost keys' locks for a consistent read; mutates nothing and
    /// appends no history.
    pub async fn can_afford(
        &self,
        entity: &EntityId,
        costs: &BTreeMap<CurrencyCode, Decimal>,
    ) -> Result<bool> {
        validate_amounts(costs)?;

        let keys: Vec<LockKey> = costs.keys().map(|c| (entity.clone(), c.clone())).collect();
        let _guard = self.locks.acquire_all(&keys).await?;

        for (currency, amount) in costs {
            let config = self.registry.get(currency)?;
            if self.balances.get(entity, currency, &config) < *amount {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Deduct every cost atomically, or nothing
    ///
    /// Fails `InsufficientFunds` naming the first deficient currency (in
    /// currency order) with no partial deduction.
    pub async fn deduct_multiple(
        &self,
        entity: &EntityId,
        costs: &BTreeMap<CurrencyCode, Decimal>,
        source: Option<&str>,
    ) -> Result<BTreeMap<CurrencyCode, Decimal>> {
        self.transaction(entity, costs, &BTreeMap::new(), source).await
    }

    /// Apply a cost set and a reward set as one atomic block
    ///
    /// Returns the final balances of every involved currency. If a commit
    /// step fails after earlier steps mutated state, every applied step is
    /// rolled back before the error returns.
    pub async fn transaction(
        &self,
        entity: &EntityId,
        costs: &BTreeMap<CurrencyCode, Decimal>,
        rewards: &BTreeMap<CurrencyCode, Decimal>,
        source: Option<&str>,
    ) -> Result<BTreeMap<CurrencyCode, Decimal>> {
        let started = std::time::Instant::now();
        let result = self.transaction_inner(entity, costs, rewards, source).await;
        self.metrics.record_duration(started.elapsed().as_secs_f64());

        match &result {
            Ok(_) => self.metrics.record_transaction(),
            Err(error) => self.note_abort(entity, error),
        }
        result
    }

    async fn transaction_inner(
        &self,
        entity: &EntityId,
        costs: &BTreeMap<CurrencyCode, Decimal>,
        rewards: &BTreeMap<CurrencyCode, Decimal>,
        source: Option<&str>,
    ) -> Result<BTreeMap<CurrencyCode, Decimal>> {
        validate_amounts(costs)?;
        validate_amounts(rewards)?;

        let union: BTreeSet<CurrencyCode> =
            costs.keys().chain(rewards.keys()).cloned().collect();
        let keys: Vec<LockKey> = union.iter().map(|c| (entity.clone(), c.clone())).collect();
        let guard = self.locks.acquire_all(&keys).await?;

        let mut configs: BTreeMap<CurrencyCode, CurrencyConfig> = BTreeMap::new();
        for currency in &union {
            configs.insert(currency.clone(), self.registry.get(currency)?);
        }

        let mut working: BTreeMap<CurrencyCode, Decimal> = union
            .iter()
            .map(|c| (c.clone(), self.balances.get(entity, c, &configs[c])))
            .collect();

        // Every cost must be affordable before anything is planned.
        for (currency, amount) in costs {
            if working[currency] < *amount {
                return Err(Error::InsufficientFunds(format!(
                    "{}: need {}, have {}",
                    currency, amount, working[currency]
                )));
            }
        }

        // Validation phase: plan steps and run before-hooks. Nothing has
        // mutated yet, so a rejection here aborts with no cleanup.
        let mut steps: Vec<PlannedStep> = Vec::with_capacity(costs.len() + rewards.len());
        let legs = costs
            .iter()
            .map(|(c, a)| (c, a, OperationKind::TransactionCost))
            .chain(
                rewards
                    .iter()
                    .map(|(c, a)| (c, a, OperationKind::TransactionReward)),
            );

        for (currency, amount, kind) in legs {
            let old = working[currency];
            let proposed = match kind {
                OperationKind::TransactionCost => old.checked_sub(*amount),
                _ => old.checked_add(*amount),
            }
            .ok_or_else(|| {
                Error::InvalidNumber(format!("arithmetic overflow on {} {}", currency, amount))
            })?;

            let ctx = HookContext {
                entity: entity.clone(),
                currency: currency.clone(),
                old_balance: old,
                new_balance: proposed,
                source: source.map(str::to_string),
            };
            self.hooks.run_before(&ctx).await?;

            working.insert(currency.clone(), proposed);
            steps.push(PlannedStep {
                currency: currency.clone(),
                kind,
                amount: *amount,
                old,
                proposed,
            });
        }

        // Commit phase: no await points. A dropped caller future can cancel
        // before this loop starts, never inside it.
        let mut applied: Vec<(CurrencyCode, Decimal)> = Vec::with_capacity(steps.len());
        let mut committed: Vec<TransactionRecord> = Vec::with_capacity(steps.len());

        for step in &steps {
            match self
                .balances
                .apply(entity, &step.currency, step.proposed, &configs[&step.currency])
            {
                Ok(stored) => {
                    applied.push((step.currency.clone(), step.old));
                    committed.push(TransactionRecord::now(
                        entity.clone(),
                        step.currency.clone(),
                        step.kind,
                        step.amount,
                        step.old,
                        stored,
                        source.map(str::to_string),
                    ));
                }
                Err(error) => {
                    // Undo every applied step, newest first, restoring the
                    // balances read when that step was planned.
                    for (currency, prior) in applied.iter().rev() {
                        self.balances.restore(entity, currency, *prior);
                    }
                    self.metrics.record_rollback();
                    tracing::warn!(%entity, %error, "Transaction rolled back");
                    return Err(error);
                }
            }
        }

        // Committed: the tail task handles after-hooks, history, and
        // notifications, surviving a cancelled caller.
        let mut finals = BTreeMap::new();
        for record in &committed {
            finals.insert(record.currency.clone(), record.new_balance);
        }
        let tail = self.spawn_post_commit(guard, source.map(str::to_string), committed);
        let _ = tail.await;

        tracing::debug!(
            %entity,
            costs = costs.len(),
            rewards = rewards.len(),
            "Committed transaction"
        );
        Ok(finals)
    }

    /// Convert `amount` of `from` into `to` at the configured rate
    ///
    /// Delegates to [`transaction`](Self::transaction) and inherits its
    /// atomicity and rollback.
    pub async fn exchange(
        &self,
        entity: &EntityId,
        from: &CurrencyCode,
        to: &CurrencyCode,
        amount: Decimal,
        source: Option<&str>,
    ) -> Result<BTreeMap<CurrencyCode, Decimal>> {
        let rate = self.rates.rate(from, to)?;
        validate_amount(amount)?;
        if amount <= Decimal::ZERO {
            return Err(Error::InvalidNumber(format!(
                "exchange amount must be positive, got {}",
                amount
            )));
        }

        let credited = amount.checked_mul(rate).ok_or_else(|| {
            Error::InvalidNumber(format!("{} * rate {} overflows", amount, rate))
        })?;

        let costs = BTreeMap::from([(from.clone(), amount)]);
        let rewards = BTreeMap::from([(to.clone(), credited)]);
        self.transaction(entity, &costs, &rewards, source).await
    }

    /// Run each operation independently; the batch as a whole is not atomic
    ///
    /// Operations on disjoint keys run concurrently; operations sharing a key
    /// serialize through the lock manager. Outcomes are returned in input
    /// order and one failure never rolls back the others.
    pub async fn batch(self: &Arc<Self>, operations: Vec<BatchOperation>) -> Vec<Result<BatchOutcome>> {
        let total = operations.len();
        let mut join_set = JoinSet::new();

        for (index, operation) in operations.into_iter().enumerate() {
            let engine = Arc::clone(self);
            join_set.spawn(async move { (index, engine.run_batch_operation(operation).await) });
        }

        let mut outcomes: Vec<Result<BatchOutcome>> = (0..total)
            .map(|_| Err(Error::Concurrency("batch task did not complete".to_string())))
            .collect();

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, outcome)) => outcomes[index] = outcome,
                Err(error) => tracing::error!(%error, "Batch task failed to join"),
            }
        }
        outcomes
    }

    async fn run_batch_operation(&self, operation: BatchOperation) -> Result<BatchOutcome> {
        match operation {
            BatchOperation::Modify {
                entity,
                currency,
                kind,
                amount,
                source,
            } => self
                .modify(&entity, &currency, kind, amount, source.as_deref())
                .await
                .map(BatchOutcome::Balance),
            BatchOperation::Transaction {
                entity,
                costs,
                rewards,
                source,
            } => self
                .transaction(&entity, &costs, &rewards, source.as_deref())
                .await
                .map(BatchOutcome::Balances),
        }
    }

    // ---- persistence collaborator interface --------------------------------

    /// Snapshot of every balance the entity has materialized
    pub async fn export(&self, entity: &EntityId) -> Result<BTreeMap<CurrencyCode, Decimal>> {
        let touched = self.balances.snapshot(entity);
        let keys: Vec<LockKey> = touched.keys().map(|c| (entity.clone(), c.clone())).collect();
        let _guard = self.locks.acquire_all(&keys).await?;

        // Re-read under the locks for a consistent snapshot.
        Ok(self.balances.snapshot(entity))
    }

    /// Restore balances from a snapshot
    ///
    /// Each value passes the same bound/type checks as a direct Set. Hooks
    /// and rate limits do not apply to snapshot restoration. All values are
    /// validated before any is written.
    pub async fn import(
        &self,
        entity: &EntityId,
        balances: &BTreeMap<CurrencyCode, Decimal>,
    ) -> Result<()> {
        let keys: Vec<LockKey> = balances.keys().map(|c| (entity.clone(), c.clone())).collect();
        let _guard = self.locks.acquire_all(&keys).await?;

        let mut planned = Vec::with_capacity(balances.len());
        for (currency, value) in balances {
            let config = self.registry.get(currency)?;
            validate_amount(*value)?;
            let stored = config.enforce(*value)?;
            let old = self.balances.get(entity, currency, &config);
            planned.push((currency.clone(), *value, old, stored));
        }

        for (currency, requested, old, stored) in planned {
            self.balances.restore(entity, &currency, stored);
            self.history.append(TransactionRecord::now(
                entity.clone(),
                currency.clone(),
                OperationKind::Set,
                requested,
                old,
                stored,
                Some("import".to_string()),
            ));
            self.emit(entity, &currency, old, stored);
        }
        Ok(())
    }

    // ---- internals ----------------------------------------------------------

    fn effective_limit(&self, config: &CurrencyConfig) -> Option<RateLimit> {
        config.rate_limit.or_else(|| {
            self.config.rate_limit.max_ops.map(|max_ops| RateLimit {
                max_ops,
                window_secs: self.config.rate_limit.window_secs,
            })
        })
    }

    /// Run the post-commit sequence on a task that owns the lock guard
    ///
    /// Once a balance mutated, its after-hooks, history entries, and change
    /// notifications must happen, and the key locks must stay held until the
    /// history append. A caller dropping its future cannot interrupt the
    /// spawned task, so a committed mutation is never left unrecorded.
    fn spawn_post_commit(
        &self,
        guard: LockGuard,
        source: Option<String>,
        records: Vec<TransactionRecord>,
    ) -> tokio::task::JoinHandle<()> {
        let hooks = Arc::clone(&self.hooks);
        let observability = Arc::clone(&self.observability);
        let history = Arc::clone(&self.history);
        let replication = Arc::clone(&self.replication);
        let events = self.events.clone();

        tokio::spawn(async move {
            for record in &records {
                let ctx = HookContext {
                    entity: record.entity.clone(),
                    currency: record.currency.clone(),
                    old_balance: record.old_balance,
                    new_balance: record.new_balance,
                    source: source.clone(),
                };
                hooks.run_after(&ctx, observability.as_ref()).await;
            }

            history.append_all(records.iter().cloned());
            drop(guard);

            // Notifications go out after the locks release.
            for record in &records {
                replication.notify(
                    &record.entity,
                    &record.currency,
                    record.old_balance,
                    record.new_balance,
                );
                let _ = events.send(ChangeEvent {
                    entity: record.entity.clone(),
                    currency: record.currency.clone(),
                    old_balance: record.old_balance,
                    new_balance: record.new_balance,
                    timestamp: record.timestamp,
                });
            }
        })
    }

    fn note_abort(&self, entity: &EntityId, error: &Error) {
        match error {
            Error::RateLimited(_) => self.metrics.record_rate_limited(),
            Error::LockTimeout(_) => self.metrics.record_lock_timeout(),
            _ => {}
        }
        self.observability.operation_aborted(entity, error);
    }

    fn emit(&self, entity: &EntityId, currency: &CurrencyCode, old: Decimal, new: Decimal) {
        self.replication.notify(entity, currency, old, new);
        // Fire-and-forget: a send error only means nobody is subscribed.
        let _ = self.events.send(ChangeEvent {
            entity: entity.clone(),
            currency: currency.clone(),
            old_balance: old,
            new_balance: new,
            timestamp: Utc::now(),
        });
    }
}

fn validate_amounts(amounts: &BTreeMap<CurrencyCode, Decimal>) -> Result<()> {
    for (currency, amount) in amounts {
        validate_amount(*amount)?;
        if *amount <= Decimal::ZERO {
            return Err(Error::InvalidNumber(format!(
                "amount for {} must be positive, got {}",
                currency, amount
            )));
        }
    }
    Ok(())
}
