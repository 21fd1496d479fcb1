//! Advisory review of each execution.
//!
//! The critic asks the model for a short free-text critique and attaches
//! deterministic risk/satisfaction attributes computed from the execution
//! alone. Nothing here feeds the mediator's transitions.

use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use tracing::debug;

use crate::llm::{LlmClient, Role};
use crate::models::ExecutionResult;
use crate::orchestrator::SharedState;

/// Upper bound on the critique prompt size.
const MAX_PROMPT_CHARS: usize = 14_000;

/// Error details injected into the prompt are clipped to this many lines
/// and characters, always at a line boundary.
const MAX_ERROR_LINES: usize = 20;
const MAX_ERROR_CHARS: usize = 2_500;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// Critique text plus deterministic attributes.
#[derive(Debug, Clone)]
pub struct CritiqueFeedback {
    pub text: String,
    pub risk: RiskLevel,
    pub satisfaction: f32,
}

impl CritiqueFeedback {
    /// Feedback with neutral attributes and the given text; used where no
    /// execution evidence exists yet.
    pub fn heuristic_only(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            risk: RiskLevel::Low,
            satisfaction: 1.0,
        }
    }
}

pub struct Critic {
    llm: Arc<dyn LlmClient>,
}

impl Critic {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    pub async fn analyze(
        &self,
        exec: &ExecutionResult,
        state: &SharedState,
    ) -> Result<CritiqueFeedback> {
        let prompt = build_critique_prompt(exec, state);
        let text = self
            .llm
            .generate(Role::Critic, &prompt, Role::Critic.canonical_temperature())
            .await?;

        let (risk, satisfaction) = heuristic_attributes(exec);
        debug!(?risk, satisfaction, "critique attached");
        Ok(CritiqueFeedback {
            text,
            risk,
            satisfaction,
        })
    }
}

/// Risk and satisfaction derive from the execution alone: errors plus
/// failing tests is the worst case, one of the two is mixed, neither is
/// clean.
fn heuristic_attributes(exec: &ExecutionResult) -> (RiskLevel, f32) {
    let errors = exec.has_errors();
    let failing = exec.test_results.failed();
    match (errors, failing) {
        (true, true) => (RiskLevel::High, 0.2),
        (false, false) => (RiskLevel::Low, 1.0),
        _ => (RiskLevel::Medium, 0.5),
    }
}

fn build_critique_prompt(exec: &ExecutionResult, state: &SharedState) -> String {
    let outcomes = exec
        .tool_outcomes
        .iter()
        .map(|o| format!("- {} (exit {})", o.tool, o.exit_code))
        .collect::<Vec<_>>()
        .join("\n");

    let error_details = exec
        .last_error()
        .map(|e| clip_at_line_boundary(e, MAX_ERROR_LINES, MAX_ERROR_CHARS))
        .unwrap_or_default();

    let mut prompt = format!(
        r#"Review the latest step of an automated repair run.

## Goal
{goal}

## Phase
{phase}

## Step
{task}

## Tool outcomes
{outcomes}

## Test status
{tests}

## Error details
{error_details}

Give a 2-3 sentence critique: did this step move the repair forward, and
what should the next step watch out for?"#,
        goal = state.goal,
        phase = state.current_phase,
        task = exec.task,
        tests = exec.test_results.summary(),
    );

    if prompt.len() > MAX_PROMPT_CHARS {
        prompt.truncate(MAX_PROMPT_CHARS);
    }
    prompt
}

/// Clip text to at most `max_lines` lines and `max_chars` characters,
/// never cutting mid-line.
fn clip_at_line_boundary(text: &str, max_lines: usize, max_chars: usize) -> String {
    let mut out = String::new();
    for line in text.lines().take(max_lines) {
        if out.len() + line.len() + 1 > max_chars {
            break;
        }
        out.push_str(line);
        out.push('\n');
    }
    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TestResults, ToolOutcome};

    #[test]
    fn test_heuristics_cover_all_quadrants() {
        let clean = ExecutionResult::no_tools("t");
        assert_eq!(heuristic_attributes(&clean), (RiskLevel::Low, 1.0));

        let mut errors_only = ExecutionResult::no_tools("t");
        errors_only
            .tool_outcomes
            .push(ToolOutcome::error("read_file", "boom"));
        assert_eq!(heuristic_attributes(&errors_only), (RiskLevel::Medium, 0.5));

        let mut failing_only = ExecutionResult::no_tools("t");
        failing_only.test_results = TestResults::from_run(1, "FAILED t.py::x");
        // the failing run itself is a non-zero outcome in real executions;
        // model that here too
        failing_only.tool_outcomes.push(ToolOutcome {
            tool: "run_tests".into(),
            exit_code: 1,
            output: String::new(),
        });
        assert_eq!(heuristic_attributes(&failing_only), (RiskLevel::High, 0.2));
    }

    #[test]
    fn test_clip_respects_line_boundaries() {
        let text = (0..50).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n");
        let clipped = clip_at_line_boundary(&text, MAX_ERROR_LINES, MAX_ERROR_CHARS);
        assert!(clipped.lines().count() <= MAX_ERROR_LINES);
        assert!(clipped.ends_with("line 19"));

        let long_line = "x".repeat(3000);
        let clipped = clip_at_line_boundary(&long_line, 20, 2500);
        assert!(clipped.is_empty(), "an oversized first line is dropped whole");
    }

    #[test]
    fn test_prompt_is_bounded() {
        let mut exec = ExecutionResult::no_tools("t");
        exec.tool_outcomes.push(ToolOutcome::error(
            "replace_in_file",
            "e".repeat(40_000),
        ));
        let state = SharedState::new("g".repeat(20_000));
        let prompt = build_critique_prompt(&exec, &state);
        assert!(prompt.len() <= MAX_PROMPT_CHARS);
    }
}
