//! Phase roles of the repair loop and the shared types they exchange.

pub mod critic;
pub mod executor;
pub mod gates;
pub mod json_utils;
pub mod mediator;
pub mod planner;

pub use critic::{Critic, CritiqueFeedback, RiskLevel};
pub use executor::Executor;
pub use mediator::{Mediator, MAX_RETRIES_PER_TASK, MAX_TOTAL_ITERATIONS};
pub use planner::Planner;

use std::fmt;

use serde::{Deserialize, Serialize};

/// Phase of the repair state machine. Initial phase is `Reproduce`;
/// terminal exits happen only through a Success or Fail decision.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RepairPhase {
    Reproduce,
    RepairAnalyze,
    RepairPatch,
    Validate,
}

impl RepairPhase {
    /// The phase an ADVANCE decision moves into, if any.
    pub fn next(self) -> Option<RepairPhase> {
        match self {
            RepairPhase::Reproduce => Some(RepairPhase::RepairAnalyze),
            RepairPhase::RepairAnalyze => Some(RepairPhase::RepairPatch),
            RepairPhase::RepairPatch => Some(RepairPhase::Validate),
            RepairPhase::Validate => None,
        }
    }

    pub fn is_repair_phase(self) -> bool {
        matches!(self, RepairPhase::RepairAnalyze | RepairPhase::RepairPatch)
    }

    /// Tools the executor may run in this phase. The analysis phase runs
    /// no tools at all.
    pub fn allowed_tools(self) -> &'static [&'static str] {
        match self {
            RepairPhase::Reproduce => {
                &["read_file", "run_tests", "grep", "list_files", "file_tree"]
            }
            RepairPhase::RepairAnalyze => &[],
            RepairPhase::RepairPatch => &[
                "read_file",
                "replace_in_file",
                "write_file",
                "grep",
                "list_files",
                "file_tree",
            ],
            RepairPhase::Validate => &["run_tests"],
        }
    }
}

impl fmt::Display for RepairPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RepairPhase::Reproduce => "REPRODUCE",
            RepairPhase::RepairAnalyze => "REPAIR_ANALYZE",
            RepairPhase::RepairPatch => "REPAIR_PATCH",
            RepairPhase::Validate => "VALIDATE",
        };
        f.write_str(name)
    }
}

/// Decision emitted by the mediator after each execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Success { reason: String },
    Fail { reason: String },
    Advance,
    Retry,
    Replan { reason: String },
}

impl Decision {
    pub fn success(reason: impl Into<String>) -> Self {
        Decision::Success {
            reason: reason.into(),
        }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Decision::Fail {
            reason: reason.into(),
        }
    }

    pub fn replan(reason: impl Into<String>) -> Self {
        Decision::Replan {
            reason: reason.into(),
        }
    }
}
