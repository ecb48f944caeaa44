//! Rebalancer service modules
//!
//! The orchestrator ties the analyzer, decision maker, failure tracker,
//! operation store and bridge adapter into one control loop.

pub mod orchestrator;

pub use orchestrator::{RebalanceOrchestrator, SnapshotOutcome, TickOutcome};
