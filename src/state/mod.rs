//! Durable completion state for orchestration runs.
//!
//! The ledger records which tasks have completed successfully so a repeated
//! invocation can skip finished work instead of redoing it.

mod ledger;

pub use ledger::StateStore;
