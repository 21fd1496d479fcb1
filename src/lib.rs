pub mod analysis;
pub mod config;
pub mod llm;
pub mod models;
pub mod orchestrator;
pub mod phases;
pub mod server;
pub mod slug;
pub mod workspace;

// Re-export main types
pub use config::Config;
pub use llm::{HttpLlmClient, LlmClient, Role};
pub use models::{
    ExecutionResult, FailureType, PlannerOutput, RepairAttempt, RepairOutcome, RootCauseAnalysis,
    TestResults,
};
pub use orchestrator::{Orchestrator, RunResult, SharedState};
pub use phases::{Decision, RepairPhase};
