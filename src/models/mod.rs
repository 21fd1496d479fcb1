pub mod analysis;
pub mod execution;
pub mod plan;
pub mod repair;
pub mod test_results;

pub use analysis::RootCauseAnalysis;
pub use execution::{ExecutionResult, ToolOutcome};
pub use plan::PlannerOutput;
pub use repair::{RepairAttempt, RepairOutcome};
pub use test_results::{CollectionSubtype, FailureType, TestResults};
