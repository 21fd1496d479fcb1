//! Phase-aware arbitration over execution results.
//!
//! The mediator is a pure function over (execution, critique, state); it
//! performs no IO and never mutates the shared state. Hard caps live here
//! and cannot be bypassed by the model.

use crate::models::ExecutionResult;
use crate::orchestrator::SharedState;
use crate::phases::{CritiqueFeedback, Decision, RepairPhase};

/// Hard cap on loop iterations for one run.
pub const MAX_TOTAL_ITERATIONS: u32 = 20;

/// Retries allowed on one task before a replan fires.
pub const MAX_RETRIES_PER_TASK: u32 = 3;

pub struct Mediator;

impl Mediator {
    /// Decide how the loop proceeds after one execution. The critique is
    /// advisory; none of its numeric attributes influence the decision.
    pub fn decide(
        exec: &ExecutionResult,
        _critique: &CritiqueFeedback,
        state: &SharedState,
    ) -> Decision {
        if state.total_iterations >= MAX_TOTAL_ITERATIONS {
            return Decision::fail("Maximum iterations exceeded");
        }

        if exec.has_errors() && !exec.tests_were_run() {
            if state.current_phase == RepairPhase::RepairPatch {
                return Self::patch_error_ladder(exec, state);
            }
            return if state.attempts_on_current_task >= MAX_RETRIES_PER_TASK {
                Decision::replan("tool errors exhausted the retry budget")
            } else {
                Decision::Retry
            };
        }

        match state.current_phase {
            RepairPhase::Reproduce => Self::decide_reproduce(exec, state),
            RepairPhase::RepairAnalyze => Self::decide_analyze(state),
            RepairPhase::RepairPatch => Self::decide_patch(exec, state),
            RepairPhase::Validate => Self::decide_validate(exec),
        }
    }

    /// Escalation ladder for patch-phase tool errors. A hallucinated
    /// search block replans immediately; an ambiguous one gets a single
    /// retry before the replan.
    fn patch_error_ladder(exec: &ExecutionResult, state: &SharedState) -> Decision {
        let error = exec
            .last_error()
            .or(state.last_tool_error.as_deref())
            .unwrap_or_default();

        if state.attempts_on_current_task >= MAX_RETRIES_PER_TASK {
            return Decision::replan("patch attempts exhausted the retry budget");
        }
        if error.contains("not found") {
            return Decision::replan("Search block not found: the diagnosis references content that does not exist");
        }
        if error.contains("multiple times") {
            return if state.consecutive_tool_errors >= 2 {
                Decision::replan("search block matched multiple times twice in a row")
            } else {
                Decision::Retry
            };
        }
        Decision::Retry
    }

    fn decide_reproduce(exec: &ExecutionResult, state: &SharedState) -> Decision {
        if !exec.tests_were_run() {
            return if state.attempts_on_current_task >= MAX_RETRIES_PER_TASK {
                Decision::replan("reproduction never reached the test runner")
            } else {
                Decision::Retry
            };
        }
        if exec.test_results.failed() {
            return Decision::Advance;
        }
        // tests pass
        if !state.failure_observed {
            return Decision::success("no repair needed");
        }
        if state.repair_history.is_empty() {
            // a pass right after an observed failure, with nothing patched,
            // is suspicious; look again
            return Decision::Retry;
        }
        Decision::success("failure resolved by a recorded repair")
    }

    fn decide_analyze(state: &SharedState) -> Decision {
        if state.has_valid_root_cause_analysis() {
            return Decision::Advance;
        }
        if state.attempts_on_current_task >= MAX_RETRIES_PER_TASK {
            let reason = state
                .last_root_cause_analysis
                .as_ref()
                .and_then(|rca| rca.invalid_reason.clone())
                .unwrap_or_else(|| "no diagnosis produced".to_string());
            return Decision::replan(format!("analysis invalid: {reason}"));
        }
        Decision::Retry
    }

    fn decide_patch(exec: &ExecutionResult, state: &SharedState) -> Decision {
        if !exec.modified_files.is_empty() {
            return Decision::Advance;
        }
        if state.attempts_on_current_task >= MAX_RETRIES_PER_TASK {
            return Decision::replan("no patch was applied within the retry budget");
        }
        Decision::Retry
    }

    /// Validation never advances; it either closes the run or sends the
    /// loop back to reproduction.
    fn decide_validate(exec: &ExecutionResult) -> Decision {
        if !exec.tests_were_run() {
            return Decision::Retry;
        }
        if exec.test_results.all_passed() {
            return Decision::success("all tests pass after the patch");
        }
        Decision::replan("tests still failing after the patch")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RepairAttempt, RepairOutcome, RootCauseAnalysis, TestResults, ToolOutcome};
    use crate::phases::critic::CritiqueFeedback;

    fn critique() -> CritiqueFeedback {
        CritiqueFeedback::heuristic_only("n/a")
    }

    fn exec_with_tests(exit: i32, output: &str) -> ExecutionResult {
        let mut exec = ExecutionResult::no_tools("task");
        exec.test_results = TestResults::from_run(exit, output);
        exec.tool_outcomes.push(ToolOutcome {
            tool: "run_tests".into(),
            exit_code: exit,
            output: output.into(),
        });
        exec
    }

    fn recorded_attempt() -> RepairAttempt {
        RepairAttempt {
            index: 1,
            outcome: RepairOutcome::ValidateFailed,
            patch_summary: "src/a.py".into(),
            search_block: None,
            diagnosis_summary: "d".into(),
            fix_strategy: "f".into(),
            validation_failure_subtype: None,
            validation_failure_line: None,
            validation_failure_reason: None,
        }
    }

    #[test]
    fn test_iteration_cap_wins_over_everything() {
        let mut state = SharedState::new("goal");
        state.total_iterations = MAX_TOTAL_ITERATIONS;
        let exec = exec_with_tests(0, "ok");
        assert!(matches!(
            Mediator::decide(&exec, &critique(), &state),
            Decision::Fail { .. }
        ));
    }

    #[test]
    fn test_reproduce_advances_on_failing_tests() {
        let state = SharedState::new("goal");
        let exec = exec_with_tests(1, "FAILED t.py::x");
        assert_eq!(Mediator::decide(&exec, &critique(), &state), Decision::Advance);
    }

    #[test]
    fn test_reproduce_success_without_observed_failure() {
        let state = SharedState::new("goal");
        let exec = exec_with_tests(0, "1 passed");
        match Mediator::decide(&exec, &critique(), &state) {
            Decision::Success { reason } => assert!(reason.contains("no repair needed")),
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[test]
    fn test_reproduce_retries_unexpected_pass_without_repair() {
        let mut state = SharedState::new("goal");
        state.failure_observed = true;
        let exec = exec_with_tests(0, "1 passed");
        assert_eq!(Mediator::decide(&exec, &critique(), &state), Decision::Retry);
    }

    #[test]
    fn test_reproduce_success_after_recorded_repair() {
        let mut state = SharedState::new("goal");
        state.failure_observed = true;
        state.add_repair_attempt(recorded_attempt());
        let exec = exec_with_tests(0, "1 passed");
        assert!(matches!(
            Mediator::decide(&exec, &critique(), &state),
            Decision::Success { .. }
        ));
    }

    #[test]
    fn test_reproduce_retry_then_replan_when_tests_never_run() {
        let mut state = SharedState::new("goal");
        let exec = ExecutionResult::no_tools("task");
        state.attempts_on_current_task = 1;
        assert_eq!(Mediator::decide(&exec, &critique(), &state), Decision::Retry);
        state.attempts_on_current_task = MAX_RETRIES_PER_TASK;
        assert!(matches!(
            Mediator::decide(&exec, &critique(), &state),
            Decision::Replan { .. }
        ));
    }

    #[test]
    fn test_analyze_advances_only_on_valid_analysis() {
        let mut state = SharedState::new("goal");
        state.current_phase = RepairPhase::RepairAnalyze;
        let exec = ExecutionResult::no_tools("task");

        state.attempts_on_current_task = 1;
        assert_eq!(Mediator::decide(&exec, &critique(), &state), Decision::Retry);

        let mut rca = RootCauseAnalysis::invalid_sentinel("bad");
        state.last_root_cause_analysis = Some(rca.clone());
        state.attempts_on_current_task = MAX_RETRIES_PER_TASK;
        match Mediator::decide(&exec, &critique(), &state) {
            Decision::Replan { reason } => assert!(reason.contains("bad")),
            other => panic!("expected replan, got {other:?}"),
        }

        rca.valid = true;
        state.last_root_cause_analysis = Some(rca);
        assert_eq!(Mediator::decide(&exec, &critique(), &state), Decision::Advance);
    }

    #[test]
    fn test_patch_advances_on_modified_files() {
        let mut state = SharedState::new("goal");
        state.current_phase = RepairPhase::RepairPatch;
        let mut exec = ExecutionResult::no_tools("task");
        exec.modified_files.push("src/a.py".into());
        assert_eq!(Mediator::decide(&exec, &critique(), &state), Decision::Advance);
    }

    #[test]
    fn test_patch_ladder_not_found_replans_immediately() {
        let mut state = SharedState::new("goal");
        state.current_phase = RepairPhase::RepairPatch;
        state.attempts_on_current_task = 1;
        let mut exec = ExecutionResult::no_tools("task");
        exec.tool_outcomes.push(ToolOutcome::error(
            "replace_in_file",
            "Search block not found in src/a.py",
        ));
        assert!(matches!(
            Mediator::decide(&exec, &critique(), &state),
            Decision::Replan { .. }
        ));
    }

    #[test]
    fn test_patch_ladder_ambiguous_retries_once_then_replans() {
        let mut state = SharedState::new("goal");
        state.current_phase = RepairPhase::RepairPatch;
        state.attempts_on_current_task = 1;
        let mut exec = ExecutionResult::no_tools("task");
        exec.tool_outcomes.push(ToolOutcome::error(
            "replace_in_file",
            "search block found multiple times in src/a.py",
        ));

        state.consecutive_tool_errors = 1;
        assert_eq!(Mediator::decide(&exec, &critique(), &state), Decision::Retry);

        state.consecutive_tool_errors = 2;
        assert!(matches!(
            Mediator::decide(&exec, &critique(), &state),
            Decision::Replan { .. }
        ));
    }

    #[test]
    fn test_validate_never_advances() {
        let mut state = SharedState::new("goal");
        state.current_phase = RepairPhase::Validate;

        let not_run = ExecutionResult::no_tools("task");
        assert_eq!(Mediator::decide(&not_run, &critique(), &state), Decision::Retry);

        let passing = exec_with_tests(0, "1 passed");
        assert!(matches!(
            Mediator::decide(&passing, &critique(), &state),
            Decision::Success { .. }
        ));

        let failing = exec_with_tests(1, "FAILED t.py::x");
        assert!(matches!(
            Mediator::decide(&failing, &critique(), &state),
            Decision::Replan { .. }
        ));
    }

    #[test]
    fn test_failing_run_with_nonzero_exit_still_dispatches() {
        // the failing suite is a non-zero tool outcome, but tests ran, so
        // the reproduce logic sees the failure instead of the error ladder
        let state = SharedState::new("goal");
        let exec = exec_with_tests(1, "FAILED t.py::x");
        assert_eq!(Mediator::decide(&exec, &critique(), &state), Decision::Advance);
    }
}
