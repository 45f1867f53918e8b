//! Application layer containing the batch orchestration engine.
//!
//! `PayoutOrchestrator` is the entry point: it persists submitted batches, fans
//! each payout out to a `tokio` task gated by a shared semaphore, waits for all
//! of them to settle and hands the final state to a supervised notification
//! pool.

pub mod locks;
pub mod notifications;
pub mod orchestrator;
pub mod shutdown;
pub mod workflow;
