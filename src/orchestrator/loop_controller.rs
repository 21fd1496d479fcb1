//! The controlled iterative repair loop.
//!
//! One `run_task` call drives reproduction, diagnosis, patching, and
//! validation to a terminal success or failure, applying the mediator's
//! decisions and owning the workspace snapshot.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::llm::LlmClient;
use crate::models::{
    CollectionSubtype, ExecutionResult, FailureType, PlannerOutput, RepairAttempt, RepairOutcome,
};
use crate::phases::{Critic, Decision, Executor, Mediator, Planner, RepairPhase};
use crate::workspace::{TestRunner, Workspace};

use super::benchmark::{export_metadata, log_benchmark};
use super::shared_state::SharedState;
use super::snapshot::{SnapshotPredicate, WorkspaceSnapshot};

/// Consecutive replans tolerated before the run is declared unplannable.
const MAX_CONSECUTIVE_REPLANS: u32 = 3;

/// Regenerations allowed when a patch plan violates the lexeme invariant.
const PATCH_PLAN_RETRIES: u32 = 2;

/// Structured outcome of one run. The control plane returns this map
/// verbatim; it never surfaces an exception to the client.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub success: bool,
    pub total_iterations: u32,
    pub status: String,
    pub details: String,
}

pub struct Orchestrator {
    config: Config,
    workspace: Workspace,
    planner: Planner,
    executor: Executor,
    critic: Critic,
}

impl Orchestrator {
    pub fn new(config: Config, llm: Arc<dyn LlmClient>) -> Result<Self> {
        let workspace = Workspace::open(&config.workspace.path)?;
        let runner = TestRunner::new(
            config.executor.interpreter.clone(),
            std::time::Duration::from_secs(config.executor.test_timeout_secs),
        );
        Ok(Self {
            planner: Planner::new(llm.clone()),
            executor: Executor::new(llm.clone(), workspace.clone(), runner),
            critic: Critic::new(llm),
            workspace,
            config,
        })
    }

    /// Drive one goal to completion.
    pub async fn run_task(&self, goal: &str) -> Result<RunResult> {
        anyhow::ensure!(!goal.trim().is_empty(), "goal must not be empty");
        let started = Instant::now();
        let mut state = SharedState::new(goal.trim());
        let mut snapshot: Option<WorkspaceSnapshot> = None;
        let mut consecutive_replans = 0u32;

        info!(goal = %state.goal, "repair run starting");
        let initial = self.planner.generate_plan(&state).await?;
        state.set_plan(initial);

        loop {
            state.total_iterations += 1;

            let Some(task) = state.current_task().map(str::to_string) else {
                consecutive_replans += 1;
                if consecutive_replans >= MAX_CONSECUTIVE_REPLANS {
                    return Ok(self.finish(
                        &state,
                        false,
                        "Planner unable to generate valid plan",
                        started,
                    ));
                }
                warn!("plan ran out of tasks, revising");
                state.soft_reset();
                state.current_phase = RepairPhase::Reproduce;
                let revised = self.planner.revise_plan(&state).await?;
                state.set_plan(revised);
                continue;
            };

            state.attempts_on_current_task += 1;
            info!(
                iteration = state.total_iterations,
                phase = %state.current_phase,
                attempt = state.attempts_on_current_task,
                task = %task,
                "executing task"
            );

            let exec = self.executor.execute(&task, &mut state).await?;
            let critique = self.critic.analyze(&exec, &state).await?;
            let decision = Mediator::decide(&exec, &critique, &state);
            info!(?decision, "mediator decided");

            match decision {
                Decision::Success { reason } => {
                    return Ok(self.finish(&state, true, &reason, started));
                }
                Decision::Fail { reason } => {
                    return Ok(self.finish(&state, false, &reason, started));
                }
                Decision::Retry => continue,
                Decision::Advance => {
                    consecutive_replans = 0;
                    state.attempts_on_current_task = 0;
                    if let Some(result) = self.advance(&mut state, &mut snapshot, started).await? {
                        return Ok(result);
                    }
                }
                Decision::Replan { reason } => {
                    state.replan_count += 1;
                    consecutive_replans += 1;
                    warn!(%reason, replans = state.replan_count, "replanning");

                    if matches!(
                        state.current_phase,
                        RepairPhase::RepairAnalyze | RepairPhase::RepairPatch | RepairPhase::Validate
                    ) {
                        let attempt = build_repair_attempt(&state, &exec, &reason);
                        state.add_repair_attempt(attempt);
                    }

                    if let Some(snap) = snapshot.take() {
                        if let Err(err) = snap.restore(&self.workspace) {
                            error!(error = %err, "workspace restore failed");
                            return Ok(self.finish(
                                &state,
                                false,
                                &format!("workspace restore failed: {err:#}"),
                                started,
                            ));
                        }
                    }

                    if consecutive_replans >= MAX_CONSECUTIVE_REPLANS {
                        return Ok(self.finish(
                            &state,
                            false,
                            "Planner unable to generate valid plan",
                            started,
                        ));
                    }

                    state.clear_modified_files();
                    state.soft_reset();
                    state.current_phase = RepairPhase::Reproduce;
                    let revised = self.planner.revise_plan(&state).await?;
                    state.set_plan(revised);
                }
            }
        }
    }

    /// Apply the phase transition an ADVANCE decision implies. Returns a
    /// terminal result only when taking the snapshot fails.
    async fn advance(
        &self,
        state: &mut SharedState,
        snapshot: &mut Option<WorkspaceSnapshot>,
        started: Instant,
    ) -> Result<Option<RunResult>> {
        match state.current_phase {
            RepairPhase::Reproduce => {
                if snapshot.is_none() {
                    let predicate = SnapshotPredicate::new(
                        &self.config.snapshot,
                        state.failing_artifact.clone(),
                    );
                    match WorkspaceSnapshot::capture(&self.workspace, predicate) {
                        Ok(snap) => *snapshot = Some(snap),
                        Err(err) => {
                            error!(error = %err, "snapshot capture failed");
                            return Ok(Some(self.finish(
                                state,
                                false,
                                &format!("workspace snapshot failed: {err:#}"),
                                started,
                            )));
                        }
                    }
                }
                state.last_root_cause_analysis = None;
                state.current_phase = RepairPhase::RepairAnalyze;
                let plan = self.planner.generate_plan(state).await?;
                state.set_plan(plan);
            }
            RepairPhase::RepairAnalyze => {
                state.current_phase = RepairPhase::RepairPatch;
                let plan = self.patch_plan(state).await?;
                state.set_plan(plan);
            }
            RepairPhase::RepairPatch => {
                state.last_tool_error = None;
                state.consecutive_tool_errors = 0;
                state.current_phase = RepairPhase::Validate;
                let plan = self.planner.generate_plan(state).await?;
                state.set_plan(plan);
            }
            RepairPhase::Validate => {
                // table completeness: the mediator never advances out of
                // validation, but the transition is the next plan task
                state.current_task_index += 1;
            }
        }
        Ok(None)
    }

    /// Generate a patch plan that honors the lexeme invariant, retrying a
    /// bounded number of times before substituting the safe fallback.
    async fn patch_plan(&self, state: &SharedState) -> Result<PlannerOutput> {
        for round in 0..=PATCH_PLAN_RETRIES {
            let plan = self.planner.generate_plan(state).await?;
            if !plan.violates_patch_invariant() {
                return Ok(plan);
            }
            warn!(round, "patch plan violates the phase invariant, regenerating");
        }
        Ok(Planner::fallback_for_phase(RepairPhase::RepairPatch, state))
    }

    fn finish(
        &self,
        state: &SharedState,
        success: bool,
        status: &str,
        started: Instant,
    ) -> RunResult {
        let exit_code = if success { 0 } else { 1 };
        if let Err(err) = export_metadata(&self.workspace, state, exit_code) {
            warn!(error = %err, "failed to export run metadata");
        }
        log_benchmark(
            state,
            success,
            started.elapsed().as_secs_f64(),
            status,
        );

        let details = if success {
            if state.modified_files.is_empty() {
                "No files modified".to_string()
            } else {
                format!("Modified files: {}", state.modified_files.join(", "))
            }
        } else {
            format!(
                "phase {} after {} iterations, {} replans",
                state.current_phase, state.total_iterations, state.replan_count
            )
        };

        info!(success, %status, iterations = state.total_iterations, "repair run finished");
        RunResult {
            success,
            total_iterations: state.total_iterations,
            status: status.to_string(),
            details,
        }
    }
}

/// Capture the failed repair cycle from live state, before the soft reset
/// wipes the evidence.
fn build_repair_attempt(state: &SharedState, exec: &ExecutionResult, reason: &str) -> RepairAttempt {
    let rca = state.last_root_cause_analysis.as_ref();
    let outcome = classify_outcome(state, exec, reason);

    let patch_summary = if state.modified_files.is_empty() {
        "no files modified".to_string()
    } else {
        state.modified_files.join(", ")
    };

    let (validation_failure_subtype, validation_failure_line, validation_failure_reason) =
        if state.current_phase == RepairPhase::Validate {
            let subtype = state
                .last_test_results
                .as_ref()
                .map(|r| format!("{:?}", r.failure_type));
            let failure_reason = state
                .collection_failure_reason
                .clone()
                .or_else(|| {
                    state
                        .last_test_results
                        .as_ref()
                        .map(|r| r.error_snippet.clone())
                        .filter(|s| !s.is_empty())
                })
                .unwrap_or_else(|| reason.to_string());
            (subtype, state.failing_artifact_line, Some(failure_reason))
        } else {
            (None, None, Some(reason.to_string()))
        };

    RepairAttempt {
        index: state.replan_count as usize,
        outcome,
        patch_summary,
        search_block: rca.and_then(|r| r.proposed_search_block.clone()),
        diagnosis_summary: rca.map(|r| r.root_cause_summary.clone()).unwrap_or_default(),
        fix_strategy: rca.map(|r| r.minimal_fix_strategy.clone()).unwrap_or_default(),
        validation_failure_subtype,
        validation_failure_line,
        validation_failure_reason,
    }
}

fn classify_outcome(state: &SharedState, exec: &ExecutionResult, reason: &str) -> RepairOutcome {
    match state.current_phase {
        RepairPhase::RepairAnalyze => match &state.last_root_cause_analysis {
            Some(_) => RepairOutcome::AnalysisInvalid,
            None => RepairOutcome::AnalysisCapExceeded,
        },
        RepairPhase::RepairPatch => {
            let error = exec
                .last_error()
                .or(state.last_tool_error.as_deref())
                .unwrap_or(reason);
            if error.contains("not found") {
                RepairOutcome::SearchFailed
            } else if error.contains("multiple times") {
                RepairOutcome::SearchAmbiguous
            } else {
                RepairOutcome::NoPatch
            }
        }
        _ => {
            let syntax = state.collection_failure_subtype == Some(CollectionSubtype::SyntaxError)
                || state
                    .last_test_results
                    .as_ref()
                    .map(|r| r.failure_type == FailureType::SyntaxError)
                    .unwrap_or(false);
            if syntax {
                RepairOutcome::SyntaxError
            } else {
                RepairOutcome::ValidateFailed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RootCauseAnalysis, TestResults, ToolOutcome};

    #[test]
    fn test_classify_search_failures() {
        let mut state = SharedState::new("goal");
        state.current_phase = RepairPhase::RepairPatch;
        let mut exec = ExecutionResult::no_tools("t");
        exec.tool_outcomes.push(ToolOutcome::error(
            "replace_in_file",
            "Search block not found in src/a.py",
        ));
        assert_eq!(
            classify_outcome(&state, &exec, "replan"),
            RepairOutcome::SearchFailed
        );

        let mut exec = ExecutionResult::no_tools("t");
        exec.tool_outcomes.push(ToolOutcome::error(
            "replace_in_file",
            "search block found multiple times",
        ));
        assert_eq!(
            classify_outcome(&state, &exec, "replan"),
            RepairOutcome::SearchAmbiguous
        );
    }

    #[test]
    fn test_classify_validate_outcomes() {
        let mut state = SharedState::new("goal");
        state.current_phase = RepairPhase::Validate;
        state.set_last_test_results(TestResults::from_run(1, "E   SyntaxError: invalid syntax"));
        let exec = ExecutionResult::no_tools("t");
        assert_eq!(
            classify_outcome(&state, &exec, "replan"),
            RepairOutcome::SyntaxError
        );

        state.set_last_test_results(TestResults::from_run(1, "E   AssertionError: nope"));
        assert_eq!(
            classify_outcome(&state, &exec, "replan"),
            RepairOutcome::ValidateFailed
        );
    }

    #[test]
    fn test_classify_analysis_outcomes() {
        let mut state = SharedState::new("goal");
        state.current_phase = RepairPhase::RepairAnalyze;
        let exec = ExecutionResult::no_tools("t");

        assert_eq!(
            classify_outcome(&state, &exec, "replan"),
            RepairOutcome::AnalysisCapExceeded
        );

        state.last_root_cause_analysis = Some(RootCauseAnalysis::invalid_sentinel("bad json"));
        assert_eq!(
            classify_outcome(&state, &exec, "replan"),
            RepairOutcome::AnalysisInvalid
        );
    }

    #[test]
    fn test_repair_attempt_carries_diagnosis_fields() {
        let mut state = SharedState::new("goal");
        state.current_phase = RepairPhase::RepairPatch;
        state.replan_count = 2;
        state.add_modified_file("src/a.py");
        let mut rca = RootCauseAnalysis::invalid_sentinel("seed");
        rca.root_cause_summary = "wrong operator".into();
        rca.minimal_fix_strategy = "swap / for *".into();
        rca.proposed_search_block = Some("return a / b".into());
        state.last_root_cause_analysis = Some(rca);

        let exec = ExecutionResult::no_tools("t");
        let attempt = build_repair_attempt(&state, &exec, "no patch within budget");
        assert_eq!(attempt.index, 2);
        assert_eq!(attempt.patch_summary, "src/a.py");
        assert_eq!(attempt.diagnosis_summary, "wrong operator");
        assert_eq!(attempt.search_block.as_deref(), Some("return a / b"));
    }
}
