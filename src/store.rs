//! Operation Store
//!
//! Owns every rebalance operation record, the single-flight processing lock
//! and the cooldown clock. Operation transitions follow a fixed state machine:
//!
//! ```text
//! Pending --(picked up)--> Processing --(submitted)--> Completed
//!                          Processing --(error)------> Failed
//! Pending --(cancel)--> Cancelled
//! ```
//!
//! Any other transition is rejected with `RebalanceError::IllegalTransition`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::chains::{ChainId, TokenSymbol};
use crate::error::{RebalanceError, Result};

/// Capacity of the operation event channel; lagging observers skip old events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Lifecycle state of a rebalance operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl OperationStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OperationStatus::Completed | OperationStatus::Failed | OperationStatus::Cancelled
        )
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: OperationStatus) -> bool {
        matches!(
            (self, next),
            (OperationStatus::Pending, OperationStatus::Processing)
                | (OperationStatus::Pending, OperationStatus::Cancelled)
                | (OperationStatus::Processing, OperationStatus::Completed)
                | (OperationStatus::Processing, OperationStatus::Failed)
        )
    }
}

/// A single cross-chain move of funds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RebalanceOperation {
    pub id: String,
    pub source_chain_id: ChainId,
    pub destination_chain_id: ChainId,
    pub token: TokenSymbol,
    /// Amount in the token's smallest unit
    #[serde(with = "crate::snapshot::u128_string")]
    pub amount: u128,
    pub usd_value: f64,
    pub status: OperationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub tx_hash: Option<String>,
    pub error: Option<String>,
}

/// Point-in-time notification for push-based observers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "operation", rename_all = "lowercase")]
pub enum OperationEvent {
    Created(RebalanceOperation),
    Processing(RebalanceOperation),
    Completed(RebalanceOperation),
    Failed(RebalanceOperation),
    Cancelled(RebalanceOperation),
}

impl OperationEvent {
    fn for_status(operation: RebalanceOperation) -> Self {
        match operation.status {
            OperationStatus::Pending => OperationEvent::Created(operation),
            OperationStatus::Processing => OperationEvent::Processing(operation),
            OperationStatus::Completed => OperationEvent::Completed(operation),
            OperationStatus::Failed => OperationEvent::Failed(operation),
            OperationStatus::Cancelled => OperationEvent::Cancelled(operation),
        }
    }

    /// Lowercase event name, as used in the serialized `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            OperationEvent::Created(_) => "created",
            OperationEvent::Processing(_) => "processing",
            OperationEvent::Completed(_) => "completed",
            OperationEvent::Failed(_) => "failed",
            OperationEvent::Cancelled(_) => "cancelled",
        }
    }

    pub fn operation(&self) -> &RebalanceOperation {
        match self {
            OperationEvent::Created(op)
            | OperationEvent::Processing(op)
            | OperationEvent::Completed(op)
            | OperationEvent::Failed(op)
            | OperationEvent::Cancelled(op) => op,
        }
    }
}

/// Holds the processing lock; releases it when dropped.
#[must_use = "the processing lock is released as soon as the guard is dropped"]
pub struct ProcessingGuard<'a> {
    store: &'a OperationStore,
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.store.release_processing_lock();
    }
}

/// In-memory owner of operations, the processing lock and the cooldown clock.
pub struct OperationStore {
    /// Operations in creation order (oldest first)
    operations: RwLock<Vec<RebalanceOperation>>,
    processing: AtomicBool,
    last_operation_started: RwLock<Option<DateTime<Utc>>>,
    events: broadcast::Sender<OperationEvent>,
}

impl OperationStore {
    pub fn new() -> Self {
        let (events, _receiver) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            operations: RwLock::new(Vec::new()),
            processing: AtomicBool::new(false),
            last_operation_started: RwLock::new(None),
            events,
        }
    }

    /// Creates a new `Pending` operation with a fresh id.
    pub async fn create(
        &self,
        source: ChainId,
        destination: ChainId,
        token: TokenSymbol,
        amount: u128,
        usd_value: f64,
    ) -> RebalanceOperation {
        let now = Utc::now();
        let operation = RebalanceOperation {
            id: Uuid::new_v4().to_string(),
            source_chain_id: source,
            destination_chain_id: destination,
            token,
            amount,
            usd_value,
            status: OperationStatus::Pending,
            created_at: now,
            updated_at: now,
            completed_at: None,
            tx_hash: None,
            error: None,
        };

        self.operations.write().await.push(operation.clone());
        info!(
            "Created rebalance operation {}: {} {} ({:.2} USD) {} -> {}",
            operation.id, amount, token, usd_value, source, destination
        );
        self.publish(operation.clone());
        operation
    }

    /// The oldest `Pending` operation, if any.
    pub async fn get_next_pending_operation(&self) -> Option<RebalanceOperation> {
        self.operations
            .read()
            .await
            .iter()
            .find(|op| op.status == OperationStatus::Pending)
            .cloned()
    }

    pub async fn get_operation(&self, id: &str) -> Option<RebalanceOperation> {
        self.operations
            .read()
            .await
            .iter()
            .find(|op| op.id == id)
            .cloned()
    }

    /// All operations, oldest first.
    pub async fn get_operations(&self) -> Vec<RebalanceOperation> {
        self.operations.read().await.clone()
    }

    /// Subscribes to operation events.
    pub fn subscribe(&self) -> broadcast::Receiver<OperationEvent> {
        self.events.subscribe()
    }

    // =========================================================================
    // Single-flight lock
    // =========================================================================

    /// Attempts to take the processing lock without waiting.
    ///
    /// Returns `None` immediately if another execution holds it.
    pub fn try_acquire_processing_lock(&self) -> Option<ProcessingGuard<'_>> {
        self.processing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| {
                debug!("Acquired rebalance processing lock");
                ProcessingGuard { store: self }
            })
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::Acquire)
    }

    fn release_processing_lock(&self) {
        self.processing.store(false, Ordering::Release);
        debug!("Released rebalance processing lock");
    }

    // =========================================================================
    // Cooldown
    // =========================================================================

    /// Whether at least `period` has passed since the last operation started.
    /// Always `true` before the first operation.
    pub async fn has_cooldown_elapsed(&self, period: Duration) -> bool {
        match *self.last_operation_started.read().await {
            None => true,
            Some(started) => {
                let elapsed = (Utc::now() - started).to_std().unwrap_or(Duration::ZERO);
                elapsed >= period
            }
        }
    }

    /// Restarts the cooldown clock from now.
    pub async fn touch_cooldown(&self) {
        *self.last_operation_started.write().await = Some(Utc::now());
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    /// `Pending -> Processing`.
    pub async fn mark_processing(&self, id: &str) -> Result<RebalanceOperation> {
        self.transition(id, OperationStatus::Processing, |_| {}).await
    }

    /// `Processing -> Completed`, recording the deposit transaction hash.
    pub async fn mark_completed(&self, id: &str, tx_hash: &str) -> Result<RebalanceOperation> {
        self.transition(id, OperationStatus::Completed, |op| {
            op.tx_hash = Some(tx_hash.to_string());
            op.completed_at = Some(op.updated_at);
        })
        .await
    }

    /// `Processing -> Failed`, recording the error message.
    pub async fn mark_failed(&self, id: &str, error: &str) -> Result<RebalanceOperation> {
        self.transition(id, OperationStatus::Failed, |op| {
            op.error = Some(error.to_string());
            op.completed_at = Some(op.updated_at);
        })
        .await
    }

    /// `Pending -> Cancelled`. Any other source state is rejected.
    pub async fn cancel_operation(&self, id: &str, reason: &str) -> Result<RebalanceOperation> {
        let operation = self
            .transition(id, OperationStatus::Cancelled, |op| {
                op.error = Some(reason.to_string());
                op.completed_at = Some(op.updated_at);
            })
            .await?;
        info!("Cancelled rebalance operation {}: {}", id, reason);
        Ok(operation)
    }

    async fn transition(
        &self,
        id: &str,
        next: OperationStatus,
        apply: impl FnOnce(&mut RebalanceOperation),
    ) -> Result<RebalanceOperation> {
        let updated = {
            let mut operations = self.operations.write().await;
            let operation = operations
                .iter_mut()
                .find(|op| op.id == id)
                .ok_or_else(|| RebalanceError::OperationNotFound(id.to_string()))?;

            if !operation.status.can_transition_to(next) {
                warn!(
                    "Rejected transition of operation {}: {:?} -> {:?}",
                    id, operation.status, next
                );
                return Err(RebalanceError::IllegalTransition {
                    id: id.to_string(),
                    from: operation.status,
                    to: next,
                });
            }

            operation.status = next;
            operation.updated_at = Utc::now();
            apply(operation);
            operation.clone()
        };

        self.publish(updated.clone());
        Ok(updated)
    }

    // =========================================================================
    // Retention
    // =========================================================================

    /// Removes terminal operations last updated more than `max_age` ago.
    /// Pending and processing operations are never removed.
    pub async fn clear_old_operations(&self, max_age: Duration) -> usize {
        let max_age = chrono::Duration::from_std(max_age).unwrap_or_else(|_| chrono::Duration::weeks(52));
        let cutoff = Utc::now() - max_age;

        let mut operations = self.operations.write().await;
        let before = operations.len();
        operations.retain(|op| !(op.status.is_terminal() && op.updated_at < cutoff));
        let removed = before - operations.len();
        if removed > 0 {
            info!("Cleared {} old rebalance operation(s)", removed);
        }
        removed
    }

    fn publish(&self, operation: RebalanceOperation) {
        // No receivers is fine: observers are optional.
        let _ = self.events.send(OperationEvent::for_status(operation));
    }
}

impl Default for OperationStore {
    fn default() -> Self {
        Self::new()
    }
}
