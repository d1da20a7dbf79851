//! Task execution: the single-task sequencer and the dependency-gated
//! batch runner that drives it.

mod runner;
mod sequencer;

pub use runner::{BatchRunner, DependencyRunner, RunSummary};
pub use sequencer::Sequencer;
