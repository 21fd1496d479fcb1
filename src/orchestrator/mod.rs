//! The controlled iterative repair loop and its run-scoped state.

pub mod benchmark;
pub mod loop_controller;
pub mod shared_state;
pub mod snapshot;

pub use loop_controller::{Orchestrator, RunResult};
pub use shared_state::SharedState;
pub use snapshot::{SnapshotPredicate, WorkspaceSnapshot};
