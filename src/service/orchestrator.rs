//! Rebalance Orchestrator
//!
//! Drives the control loop. Two triggers feed it:
//!
//! - **Snapshot path** ([`RebalanceOrchestrator::handle_balance_update`]):
//!   analyze the snapshot, pick at most one candidate, gate it on recent
//!   failures, probe the bridge and create a `Pending` operation.
//! - **Tick path** ([`RebalanceOrchestrator::process_pending_operations`]):
//!   purge old records and execute the oldest `Pending` operation.
//!
//! Both paths run under the store's single-flight lock and never propagate an
//! error; every failure is logged and reported as an outcome.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::analyzer::BalanceAnalyzer;
use crate::bridge::RebalanceExecutor;
use crate::config::{ConfigHandle, ServiceConfig};
use crate::decision::{DecisionMaker, RebalanceDecision};
use crate::error::RebalanceError;
use crate::failures::FailureTracker;
use crate::snapshot::AggregateBalance;
use crate::store::{OperationStore, RebalanceOperation};

/// Result of handling one snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotOutcome {
    /// `global.enabled` is false
    Disabled,
    /// Another execution holds the processing lock
    Busy,
    /// The previous operation started less than `cooldown_period_ms` ago
    CoolingDown,
    /// Total portfolio value is below `min_rebalance_usd_value`
    BelowMinimum,
    /// Nothing worth moving
    NoCandidate,
    /// A recent tracked failure blocks this candidate
    Blocked(RebalanceDecision),
    /// The bridge rejected the candidate (amount or route)
    Rejected {
        decision: RebalanceDecision,
        reason: String,
    },
    /// Pricing or the fee probe failed for a transient reason
    ProbeFailed(String),
    /// A `Pending` operation was created
    Created(RebalanceOperation),
}

/// Result of one execution tick.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// No `Pending` operation
    Idle,
    /// Another execution holds the processing lock
    Busy,
    Completed(RebalanceOperation),
    Failed(RebalanceOperation),
    /// The store rejected a transition; the cycle was abandoned
    Aborted(String),
}

/// Owns the control loop and its collaborators.
pub struct RebalanceOrchestrator {
    config: ConfigHandle,
    store: Arc<OperationStore>,
    failures: Arc<FailureTracker>,
    executor: Arc<dyn RebalanceExecutor>,
    analyzer: BalanceAnalyzer,
    decision_maker: DecisionMaker,
    latest_snapshot: RwLock<Option<Arc<AggregateBalance>>>,
    tick_interval: Duration,
    retention: Duration,
}

impl RebalanceOrchestrator {
    /// Creates an orchestrator.
    ///
    /// # Arguments
    ///
    /// * `config` - Hot-reloadable rebalance config, read once per pass
    /// * `service` - Tick interval and operation retention
    /// * `store` - Operation records and the single-flight lock
    /// * `failures` - Recently rejected candidates
    /// * `executor` - Bridge execution backend
    pub fn new(
        config: ConfigHandle,
        service: &ServiceConfig,
        store: Arc<OperationStore>,
        failures: Arc<FailureTracker>,
        executor: Arc<dyn RebalanceExecutor>,
    ) -> Self {
        Self {
            config,
            store,
            failures,
            executor,
            analyzer: BalanceAnalyzer::new(),
            decision_maker: DecisionMaker::new(),
            latest_snapshot: RwLock::new(None),
            tick_interval: Duration::from_millis(service.tick_interval_ms),
            retention: Duration::from_millis(service.operation_retention_ms),
        }
    }

    pub fn store(&self) -> &Arc<OperationStore> {
        &self.store
    }

    /// The most recent snapshot seen by the snapshot path.
    pub async fn latest_snapshot(&self) -> Option<Arc<AggregateBalance>> {
        self.latest_snapshot.read().await.clone()
    }

    // =========================================================================
    // Snapshot path
    // =========================================================================

    /// Handles a new balance snapshot.
    ///
    /// Creates at most one `Pending` operation. Tracked bridge rejections
    /// are recorded in the failure tracker instead.
    pub async fn handle_balance_update(&self, snapshot: Arc<AggregateBalance>) -> SnapshotOutcome {
        *self.latest_snapshot.write().await = Some(snapshot.clone());

        let config = self.config.current();
        let global = &config.global;
        if !global.enabled {
            debug!("Rebalancing disabled, ignoring snapshot");
            return SnapshotOutcome::Disabled;
        }

        let Some(_guard) = self.store.try_acquire_processing_lock() else {
            debug!("Rebalance in progress, ignoring snapshot");
            return SnapshotOutcome::Busy;
        };

        if !self
            .store
            .has_cooldown_elapsed(Duration::from_millis(global.cooldown_period_ms))
            .await
        {
            debug!("Cooldown active, ignoring snapshot");
            return SnapshotOutcome::CoolingDown;
        }

        if snapshot.total_balance < global.min_rebalance_usd_value {
            debug!(
                "Total balance ${:.2} below minimum rebalance value ${:.2}",
                snapshot.total_balance, global.min_rebalance_usd_value
            );
            return SnapshotOutcome::BelowMinimum;
        }

        let analysis = self.analyzer.analyze(&snapshot, &config);
        debug!(
            "Balance analysis: {} deficit(s), {} surplus(es)",
            analysis.deficits.len(),
            analysis.surpluses.len()
        );

        let decision = match self.decision_maker.decide(&analysis, &snapshot, &config) {
            Ok(Some(decision)) => decision,
            Ok(None) => return SnapshotOutcome::NoCandidate,
            Err(e) => {
                warn!("Failed to size rebalance: {}", e);
                return SnapshotOutcome::ProbeFailed(e.to_string());
            }
        };

        if self
            .failures
            .has_recent_failed_attempt(
                decision.source_chain_id,
                decision.destination_chain_id,
                decision.token,
                &snapshot,
            )
            .await
        {
            info!(
                "Skipping {} -> {} ({}): recent failure with unchanged balances",
                decision.source_chain_id, decision.destination_chain_id, decision.token
            );
            return SnapshotOutcome::Blocked(decision);
        }

        if let Err(e) = self
            .executor
            .get_rebalance_fee_estimate(
                decision.source_chain_id,
                decision.destination_chain_id,
                decision.token,
                decision.amount_raw,
            )
            .await
        {
            return self.handle_probe_error(decision, e, &snapshot).await;
        }

        let operation = self
            .store
            .create(
                decision.source_chain_id,
                decision.destination_chain_id,
                decision.token,
                decision.amount_raw,
                decision.amount_usd,
            )
            .await;
        self.store.touch_cooldown().await;
        SnapshotOutcome::Created(operation)
    }

    async fn handle_probe_error(
        &self,
        decision: RebalanceDecision,
        error: RebalanceError,
        snapshot: &AggregateBalance,
    ) -> SnapshotOutcome {
        if !error.is_feasibility_rejection() {
            warn!(
                "Fee probe for {} -> {} ({}) failed: {}",
                decision.source_chain_id, decision.destination_chain_id, decision.token, error
            );
            return SnapshotOutcome::ProbeFailed(error.to_string());
        }

        warn!(
            "Bridge rejected {} -> {} ({} {}, ${:.2}): {}",
            decision.source_chain_id,
            decision.destination_chain_id,
            decision.amount_raw,
            decision.token,
            decision.amount_usd,
            error
        );
        self.failures
            .add_failed_attempt(
                decision.source_chain_id,
                decision.destination_chain_id,
                decision.token,
                decision.amount_raw,
                error.failure_reason(),
                snapshot,
            )
            .await;

        SnapshotOutcome::Rejected {
            decision,
            reason: error.to_string(),
        }
    }

    // =========================================================================
    // Tick path
    // =========================================================================

    /// Purges old records and executes the oldest `Pending` operation.
    pub async fn process_pending_operations(&self) -> TickOutcome {
        self.store.clear_old_operations(self.retention).await;

        let Some(_guard) = self.store.try_acquire_processing_lock() else {
            debug!("Rebalance in progress, skipping tick");
            return TickOutcome::Busy;
        };

        let Some(operation) = self.store.get_next_pending_operation().await else {
            return TickOutcome::Idle;
        };

        if let Err(e) = self.store.mark_processing(&operation.id).await {
            error!("Failed to start operation {}: {}", operation.id, e);
            return TickOutcome::Aborted(e.to_string());
        }

        info!(
            "Executing rebalance {}: {} {} from {} to {}",
            operation.id,
            operation.amount,
            operation.token,
            operation.source_chain_id,
            operation.destination_chain_id
        );

        let result = self
            .executor
            .rebalance(
                operation.source_chain_id,
                operation.destination_chain_id,
                operation.token,
                operation.amount,
            )
            .await;

        match result {
            Ok(tx_hash) => match self.store.mark_completed(&operation.id, &tx_hash).await {
                Ok(completed) => {
                    info!("Rebalance {} completed (tx {})", completed.id, tx_hash);
                    TickOutcome::Completed(completed)
                }
                Err(e) => {
                    error!("Failed to complete operation {}: {}", operation.id, e);
                    TickOutcome::Aborted(e.to_string())
                }
            },
            Err(e) => {
                warn!("Rebalance {} failed: {}", operation.id, e);
                self.record_execution_failure(&operation, &e).await;
                match self.store.mark_failed(&operation.id, &e.to_string()).await {
                    Ok(failed) => TickOutcome::Failed(failed),
                    Err(store_error) => {
                        error!("Failed to mark operation {} failed: {}", operation.id, store_error);
                        TickOutcome::Aborted(store_error.to_string())
                    }
                }
            }
        }
    }

    async fn record_execution_failure(&self, operation: &RebalanceOperation, error: &RebalanceError) {
        let reason = error.failure_reason();
        if !reason.is_tracked() {
            return;
        }
        let Some(snapshot) = self.latest_snapshot().await else {
            warn!(
                "No snapshot available to record failed operation {}",
                operation.id
            );
            return;
        };
        self.failures
            .add_failed_attempt(
                operation.source_chain_id,
                operation.destination_chain_id,
                operation.token,
                operation.amount,
                reason,
                &snapshot,
            )
            .await;
    }

    // =========================================================================
    // Service loop
    // =========================================================================

    /// Service loop: react to snapshot changes and tick until `shutdown` resolves.
    ///
    /// The first tick fires immediately. Snapshots are most-recent-wins: a
    /// snapshot replaced before it was handled is never seen.
    pub async fn run(
        &self,
        mut snapshots: watch::Receiver<Option<Arc<AggregateBalance>>>,
        shutdown: impl Future<Output = ()>,
    ) {
        info!(
            "Starting rebalance orchestrator (tick interval: {:?})",
            self.tick_interval
        );

        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        let initial = snapshots.borrow_and_update().clone();
        if let Some(snapshot) = initial {
            let outcome = self.handle_balance_update(snapshot).await;
            debug!("Snapshot outcome: {:?}", outcome);
        }

        let mut feed_open = true;
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Rebalance orchestrator shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let outcome = self.process_pending_operations().await;
                    debug!("Tick outcome: {:?}", outcome);
                }
                changed = snapshots.changed(), if feed_open => {
                    if changed.is_err() {
                        warn!("Balance snapshot feed closed");
                        feed_open = false;
                        continue;
                    }
                    let latest = snapshots.borrow_and_update().clone();
                    if let Some(snapshot) = latest {
                        let outcome = self.handle_balance_update(snapshot).await;
                        debug!("Snapshot outcome: {:?}", outcome);
                    }
                }
            }
        }
    }
}
