//! Phase-aware plan generation.
//!
//! Each phase gets its own prompt shape; whatever comes back is parsed
//! defensively and replaced with a phase-appropriate fallback when the
//! model produced nothing usable. Parsing never fails the loop.

use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use crate::llm::{LlmClient, Role};
use crate::models::repair::render_history;
use crate::models::PlannerOutput;
use crate::orchestrator::SharedState;
use crate::phases::RepairPhase;
use crate::workspace::tools::window_around_line;

use super::json_utils::parse_first_object;

/// Lines of raw failure output injected into the analysis prompt.
const FAILURE_OUTPUT_LINES: usize = 40;

pub struct Planner {
    llm: Arc<dyn LlmClient>,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// Generate a plan for the state's current phase. Malformed or empty
    /// responses are replaced by the phase fallback; only transport
    /// failures propagate.
    pub async fn generate_plan(&self, state: &SharedState) -> Result<PlannerOutput> {
        let prompt = self.build_prompt(state);
        let response = self
            .llm
            .generate(Role::Planner, &prompt, Role::Planner.canonical_temperature())
            .await?;
        Ok(self.parse_or_fallback(&response, state))
    }

    /// Replan after a failed cycle: same phase prompt plus the annotated
    /// previous diagnosis and the structured repair history, with the
    /// instruction that the first task re-runs the tests.
    pub async fn revise_plan(&self, state: &SharedState) -> Result<PlannerOutput> {
        let mut prompt = self.build_prompt(state);
        if let Some(rca) = &state.last_root_cause_analysis {
            if !rca.root_cause_summary.is_empty() {
                prompt.push_str(&format!(
                    "\n## Previous diagnosis (it led to a failed patch)\n\
                     artifact: {} line {}\n\
                     root cause: {}\n\
                     strategy: {}\n",
                    rca.artifact_path,
                    rca.artifact_line,
                    rca.root_cause_summary,
                    rca.minimal_fix_strategy
                ));
            }
        }
        let history: Vec<_> = state.repair_history.iter().cloned().collect();
        let rendered = render_history(&history);
        if !rendered.is_empty() {
            prompt.push_str("\n## ");
            prompt.push_str(&rendered);
        }
        prompt.push_str(
            "\nThe workspace has been restored to its original state. \
             The FIRST task of the new plan must re-run the test suite to \
             re-establish the failure before anything else.\n",
        );

        let response = self
            .llm
            .generate(Role::Planner, &prompt, Role::Planner.canonical_temperature())
            .await?;
        Ok(self.parse_or_fallback(&response, state))
    }

    fn parse_or_fallback(&self, response: &str, state: &SharedState) -> PlannerOutput {
        match parse_first_object::<PlannerOutput>(response) {
            Some(plan) if !plan.is_empty() => {
                info!(
                    phase = %state.current_phase,
                    steps = plan.steps.len(),
                    "plan generated"
                );
                plan
            }
            _ => {
                warn!(
                    phase = %state.current_phase,
                    "plan response unusable, substituting fallback"
                );
                Self::fallback_for_phase(state.current_phase, state)
            }
        }
    }

    /// The safe plan used when the model cannot produce a valid one.
    pub fn fallback_for_phase(phase: RepairPhase, state: &SharedState) -> PlannerOutput {
        match phase {
            RepairPhase::Reproduce => PlannerOutput::new(
                vec![
                    "List the project files to discover the structure".to_string(),
                    "Run the test suite and capture the failure output".to_string(),
                ],
                "fallback: discover, then observe the failure",
            ),
            RepairPhase::RepairAnalyze => PlannerOutput::new(
                vec![
                    "Produce a structured root-cause diagnosis of the observed failure \
                     as a single JSON object, using no tools"
                        .to_string(),
                ],
                "fallback: diagnose from the evidence already gathered",
            ),
            RepairPhase::RepairPatch => {
                let target = Self::patch_target(state);
                PlannerOutput::new(
                    vec![format!(
                        "Read {target} and apply the minimal fix with replace_in_file \
                         in the same response"
                    )],
                    "fallback: read the diagnosed artifact and patch it",
                )
            }
            RepairPhase::Validate => PlannerOutput::new(
                vec!["Run the test suite to check whether the failure is resolved".to_string()],
                "fallback: validate",
            ),
        }
    }

    /// The artifact a patch plan should target: the validated diagnosis
    /// when there is one, the analyzer's artifact otherwise.
    fn patch_target(state: &SharedState) -> String {
        state
            .last_root_cause_analysis
            .as_ref()
            .filter(|rca| rca.valid)
            .map(|rca| rca.artifact_path.clone())
            .or_else(|| state.failing_artifact.clone())
            .unwrap_or_else(|| "the failing source file".to_string())
    }

    fn build_prompt(&self, state: &SharedState) -> String {
        match state.current_phase {
            RepairPhase::Reproduce => self.build_reproduce_prompt(state),
            RepairPhase::RepairAnalyze => self.build_analyze_prompt(state),
            RepairPhase::RepairPatch => self.build_patch_prompt(state),
            RepairPhase::Validate => self.build_validate_prompt(state),
        }
    }

    fn build_reproduce_prompt(&self, state: &SharedState) -> String {
        let discovery_hint = if state.structure_discovered {
            "The project structure is already known; do not re-list it."
        } else {
            "The project structure is unknown; discover it before running anything."
        };
        format!(
            r#"Plan the reproduction of a reported software defect.

## Goal
{goal}

## Situation
{discovery_hint}

## Requirements
- Produce 1-3 short ordered steps that end with the test suite being run.
- Return ONLY a JSON object: {{"repair_steps": ["..."], "reasoning": "..."}}
"#,
            goal = state.goal,
        )
    }

    fn build_analyze_prompt(&self, state: &SharedState) -> String {
        let failure_output = state
            .last_test_results
            .as_ref()
            .map(|r| head_lines(&r.raw_output, FAILURE_OUTPUT_LINES))
            .unwrap_or_default();

        let artifact_context = match (&state.failing_artifact, state.failing_artifact_line) {
            (Some(artifact), Some(line)) => {
                format!("For context only: the failure analyzer points at {artifact} line {line}. Verify rather than assume.")
            }
            (Some(artifact), None) => {
                format!("For context only: the failure analyzer points at {artifact}. Verify rather than assume.")
            }
            _ => String::new(),
        };

        let file_window = state
            .failing_artifact
            .as_deref()
            .and_then(|a| state.cached_file(a))
            .map(|content| window_around_line(content, state.failing_artifact_line))
            .unwrap_or_default();

        let history: Vec<_> = state.repair_history.iter().cloned().collect();

        format!(
            r#"Plan the diagnosis of an observed test failure.

## Goal
{goal}

## Failure output (truncated)
{failure_output}

{artifact_context}

## Failing file excerpt
{file_window}

{history}## Requirements
- The plan is a single step instructing a structured diagnosis.
- The diagnosis step must use NO tools; all evidence is already above.
- The diagnosis will be a JSON object with fields: artifact_path,
  artifact_line, root_cause_summary, causal_explanation,
  minimal_fix_strategy, proposed_search_block, why_previous_attempts_failed.
- Return ONLY a JSON object: {{"repair_steps": ["..."], "reasoning": "..."}}
"#,
            goal = state.goal,
            history = render_history(&history),
        )
    }

    fn build_patch_prompt(&self, state: &SharedState) -> String {
        let target = match state
            .last_root_cause_analysis
            .as_ref()
            .filter(|rca| rca.valid)
        {
            Some(rca) => format!(
                "Repair target from the validated diagnosis:\n\
                 - artifact: {} line {}\n\
                 - root cause: {}\n\
                 - fix strategy: {}",
                rca.artifact_path, rca.artifact_line, rca.root_cause_summary, rca.minimal_fix_strategy
            ),
            None => format!(
                "No validated diagnosis is available. The failure analyzer points at {}.",
                state
                    .failing_artifact
                    .as_deref()
                    .unwrap_or("an unknown artifact")
            ),
        };

        format!(
            r#"Plan the patching of a diagnosed defect.

## Goal
{goal}

## {target}

## Requirements
- Produce EXACTLY ONE step: it reads the target file and applies the fix
  with replace_in_file in the same response.
- Patching only. The suite is validated in a later phase; no step may
  mention reproducing or exercising the suite.
- Return ONLY a JSON object: {{"repair_steps": ["..."], "reasoning": "..."}}
"#,
            goal = state.goal,
        )
    }

    fn build_validate_prompt(&self, state: &SharedState) -> String {
        format!(
            r#"Plan the validation of an applied patch.

## Goal
{goal}

## Requirements
- Produce exactly one step: run the test suite.
- Return ONLY a JSON object: {{"repair_steps": ["..."], "reasoning": "..."}}
"#,
            goal = state.goal,
        )
    }
}

fn head_lines(text: &str, n: usize) -> String {
    text.lines().take(n).collect::<Vec<_>>().join("\n")
}
