//! Task execution: turns one plan step into tool calls, enforces the
//! gates, and performs the IO the model asked for.
//!
//! The analysis phase uses a separate tool-less path that elicits a
//! structured diagnosis instead of tool calls.

use std::sync::Arc;

use anyhow::Result;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::analysis::FailureAnalyzer;
use crate::llm::{LlmClient, Role};
use crate::models::analysis::ValidationContext;
use crate::models::repair::render_history;
use crate::models::{ExecutionResult, FailureType, RootCauseAnalysis, TestResults, ToolOutcome};
use crate::orchestrator::SharedState;
use crate::phases::RepairPhase;
use crate::workspace::tools::{
    file_tree, grep, list_files, read_file, replace_in_file, window_around_line, write_file,
};
use crate::workspace::{TestRunner, Workspace};

use super::gates::apply_gates;
use super::json_utils::parse_first_object;

/// Lines of failure output echoed into tool prompts on collection errors.
const COLLECTION_OUTPUT_LINES: usize = 40;

/// Lines of raw failure output handed to the analysis prompt.
const ANALYSIS_OUTPUT_LINES: usize = 80;

/// One LLM-proposed tool invocation.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Deserialize)]
struct ToolCallEnvelope {
    #[serde(default)]
    #[allow(dead_code)]
    reasoning: String,
    #[serde(default)]
    tool_calls: Vec<ToolCall>,
}

pub struct Executor {
    llm: Arc<dyn LlmClient>,
    workspace: Workspace,
    runner: TestRunner,
}

impl Executor {
    pub fn new(llm: Arc<dyn LlmClient>, workspace: Workspace, runner: TestRunner) -> Self {
        Self {
            llm,
            workspace,
            runner,
        }
    }

    /// Execute one plan step against the shared state.
    pub async fn execute(&self, task: &str, state: &mut SharedState) -> Result<ExecutionResult> {
        if state.current_phase == RepairPhase::RepairAnalyze {
            self.execute_analysis(task, state).await
        } else {
            self.execute_tools(task, state).await
        }
    }

    // ========================================================================
    // Common tool path
    // ========================================================================

    async fn execute_tools(&self, task: &str, state: &mut SharedState) -> Result<ExecutionResult> {
        let prompt = self.build_tool_prompt(task, state);
        let response = self
            .llm
            .generate(Role::Executor, &prompt, Role::Executor.canonical_temperature())
            .await?;

        let calls = match parse_first_object::<ToolCallEnvelope>(&response) {
            Some(envelope) => envelope.tool_calls,
            None => {
                // one structured re-prompt, then proceed with whatever came back
                let reminder = format!(
                    "{prompt}\n\nREMINDER: your previous answer was not parseable. Respond \
                     with ONLY a JSON object of the form \
                     {{\"reasoning\": \"...\", \"tool_calls\": [{{\"tool\": \"...\", \"args\": {{}}}}]}}."
                );
                let retry = self
                    .llm
                    .generate(Role::Executor, &reminder, Role::Executor.canonical_temperature())
                    .await?;
                parse_first_object::<ToolCallEnvelope>(&retry)
                    .map(|envelope| envelope.tool_calls)
                    .unwrap_or_default()
            }
        };

        let gated = apply_gates(calls, state);

        let mut result = ExecutionResult::no_tools(task);
        if gated.is_empty() {
            let outcome = ToolOutcome::error("executor", "model produced no usable tool calls");
            state.last_tool_error = Some(outcome.output.clone());
            state.consecutive_tool_errors += 1;
            result.tool_outcomes.push(outcome);
            return Ok(result);
        }

        for call in gated {
            state.tool_call_count += 1;
            let outcome = self.run_tool(&call, state, &mut result).await;
            let fatal = outcome.exit_code != 0 && outcome.tool == "ground_artifact";
            debug!(tool = %outcome.tool, exit = outcome.exit_code, "tool executed");
            result.tool_outcomes.push(outcome);
            if fatal {
                break;
            }
        }

        // A failing suite surfaces through TestResults, not the tool-error
        // feedback channel; only genuine tool failures feed the ladder.
        let feedback_error = result
            .tool_outcomes
            .iter()
            .rev()
            .find(|o| o.is_error() && o.tool != "run_tests")
            .map(|o| o.output.chars().take(500).collect::<String>());
        if let Some(error) = feedback_error {
            state.last_tool_error = Some(error);
            state.consecutive_tool_errors += 1;
        } else if !result.has_errors() {
            state.last_tool_error = None;
            state.consecutive_tool_errors = 0;
        }

        Ok(result)
    }

    async fn run_tool(
        &self,
        call: &ToolCall,
        state: &mut SharedState,
        result: &mut ExecutionResult,
    ) -> ToolOutcome {
        match call.tool.as_str() {
            "read_file" => {
                let Some(path) = str_arg(&call.args, "path") else {
                    return ToolOutcome::error("read_file", "read_file requires 'path'");
                };
                match read_file(&self.workspace, &path) {
                    Ok(content) => {
                        state.cache_file_read(&path, &content);
                        ToolOutcome::ok("read_file", content)
                    }
                    Err(err) => ToolOutcome::error("read_file", format!("{err:#}")),
                }
            }
            "write_file" => {
                let (Some(path), Some(content)) =
                    (str_arg(&call.args, "path"), str_arg(&call.args, "content"))
                else {
                    return ToolOutcome::error(
                        "write_file",
                        "write_file requires 'path' and 'content'",
                    );
                };
                match write_file(&self.workspace, &path, &content) {
                    Ok(()) => {
                        state.add_modified_file(&path);
                        result.modified_files.push(SharedState::normalize_path(&path));
                        ToolOutcome::ok("write_file", format!("wrote {path}"))
                    }
                    Err(err) => ToolOutcome::error("write_file", format!("{err:#}")),
                }
            }
            "replace_in_file" => {
                let (Some(path), Some(search), Some(replace)) = (
                    str_arg(&call.args, "path"),
                    str_arg(&call.args, "search_block"),
                    str_arg(&call.args, "replace_block"),
                ) else {
                    return ToolOutcome::error(
                        "replace_in_file",
                        "replace_in_file requires 'path', 'search_block' and 'replace_block'",
                    );
                };
                match replace_in_file(&self.workspace, &path, &search, &replace) {
                    Ok(()) => {
                        state.add_modified_file(&path);
                        result.modified_files.push(SharedState::normalize_path(&path));
                        // keep the cache honest after an edit
                        if let Ok(content) = read_file(&self.workspace, &path) {
                            state.cache_file_read(&path, &content);
                        }
                        ToolOutcome::ok("replace_in_file", format!("patched {path}"))
                    }
                    Err(err) => ToolOutcome::error("replace_in_file", format!("{err:#}")),
                }
            }
            "grep" => {
                let (Some(pattern), Some(path)) =
                    (str_arg(&call.args, "pattern"), str_arg(&call.args, "path"))
                else {
                    return ToolOutcome::error("grep", "grep requires 'pattern' and 'path'");
                };
                match grep(&self.workspace, &pattern, &path) {
                    Ok(out) => ToolOutcome::ok("grep", out),
                    Err(err) => ToolOutcome::error("grep", format!("{err:#}")),
                }
            }
            "list_files" => {
                let path = str_arg(&call.args, "path").unwrap_or_else(|| ".".to_string());
                match list_files(&self.workspace, &path) {
                    Ok(out) => {
                        state.structure_discovered = true;
                        ToolOutcome::ok("list_files", out)
                    }
                    Err(err) => ToolOutcome::error("list_files", format!("{err:#}")),
                }
            }
            "file_tree" => {
                let path = str_arg(&call.args, "path").unwrap_or_else(|| ".".to_string());
                let depth = call.args.get("depth").and_then(Value::as_u64).unwrap_or(3) as usize;
                match file_tree(&self.workspace, &path, depth) {
                    Ok(out) => {
                        state.structure_discovered = true;
                        ToolOutcome::ok("file_tree", out)
                    }
                    Err(err) => ToolOutcome::error("file_tree", format!("{err:#}")),
                }
            }
            "run_tests" => self.run_tests_tool(state, result).await,
            other => ToolOutcome::error(other, format!("unknown tool '{other}'")),
        }
    }

    /// Run the suite, classify the outcome, and ground the identified
    /// failing artifact in the read cache.
    async fn run_tests_tool(
        &self,
        state: &mut SharedState,
        result: &mut ExecutionResult,
    ) -> ToolOutcome {
        let (exit_code, output) = match self.runner.run(self.workspace.root()).await {
            Ok(pair) => pair,
            Err(err) => return ToolOutcome::error("run_tests", format!("{err:#}")),
        };

        let results = TestResults::from_run(exit_code, &output);
        info!(exit_code, summary = %results.summary(), "test run finished");
        result.test_results = results.clone();
        state.set_last_test_results(results);

        if exit_code != 0 {
            let extract = FailureAnalyzer::analyze(&output);
            if let Some(artifact) = &extract.artifact {
                state.failing_artifact = Some(artifact.clone());
                state.failing_artifact_line = extract.line;
            }
            state.collection_failure_subtype = Some(extract.subtype);
            state.collection_failure_reason = extract.reason.clone();
            state.collection_failure_module = extract.module.clone();

            // Grounding invariant: the identified artifact must be in the
            // cache before any later phase reasons about it.
            if let Some(artifact) = state.failing_artifact.clone() {
                if state.cached_file(&artifact).is_none() {
                    match read_file(&self.workspace, &artifact) {
                        Ok(content) => state.cache_file_read(&artifact, &content),
                        Err(err) => {
                            return ToolOutcome::error(
                                "ground_artifact",
                                format!("failed to cache failing artifact {artifact}: {err:#}"),
                            );
                        }
                    }
                }
            }
        }

        ToolOutcome {
            tool: "run_tests".to_string(),
            exit_code,
            output,
        }
    }

    fn build_tool_prompt(&self, task: &str, state: &SharedState) -> String {
        let mut sections = vec![format!(
            "You are executing one step of a program-repair plan.\n\n## Goal\n{}\n\n## Current step\n{task}",
            state.goal
        )];

        if let Some(results) = &state.last_test_results {
            if results.was_run {
                let mut block = format!("## Test status\n{}", results.summary());
                if !results.error_snippet.is_empty() {
                    block.push_str(&format!("\nerror: {}", results.error_snippet));
                }
                if results.failure_type == FailureType::CollectionError {
                    block.push_str(&format!(
                        "\n\nCollection failure output (truncated):\n{}",
                        head_lines(&results.raw_output, COLLECTION_OUTPUT_LINES)
                    ));
                }
                sections.push(block);
            }
        }

        if let Some(artifact) = &state.failing_artifact {
            let line = state
                .failing_artifact_line
                .map(|l| format!(" line {l}"))
                .unwrap_or_default();
            sections.push(format!("## Failing artifact\n{artifact}{line}"));

            if let Some(content) = state.cached_file(artifact) {
                sections.push(format!(
                    "## Excerpt of {artifact}\n{}",
                    window_around_line(content, state.failing_artifact_line)
                ));
            }
        }

        if !state.recent_file_reads.is_empty() {
            let mut names: Vec<&String> = state.recent_file_reads.keys().collect();
            names.sort();
            sections.push(format!(
                "## Files already read\n{}",
                names
                    .iter()
                    .map(|n| n.as_str())
                    .collect::<Vec<_>>()
                    .join("\n")
            ));
        }

        if let Some(error) = &state.last_tool_error {
            let guidance = if error.contains("not found") {
                "\nThe search block you supplied does not exist in the file. Re-read \
                 the file and copy the exact lines to replace."
            } else if error.contains("multiple times") {
                "\nThe search block was ambiguous. Include more surrounding lines so \
                 it matches exactly once."
            } else {
                ""
            };
            sections.push(format!("## Previous attempt failed\n{error}{guidance}"));
        }

        if state.current_phase == RepairPhase::RepairPatch {
            if let Some(rca) = state
                .last_root_cause_analysis
                .as_ref()
                .filter(|rca| rca.valid)
            {
                let search_hint = rca
                    .proposed_search_block
                    .as_deref()
                    .map(|b| format!("\nproposed search block:\n{b}"))
                    .unwrap_or_default();
                sections.push(format!(
                    "## Validated diagnosis\nartifact: {} line {}\nroot cause: {}\nfix strategy: {}{search_hint}",
                    rca.artifact_path, rca.artifact_line, rca.root_cause_summary, rca.minimal_fix_strategy
                ));
            }
        }

        let tools = state.current_phase.allowed_tools().join(", ");
        sections.push(format!(
            "## Response format\nAvailable tools this phase: {tools}.\n\
             Tool argument schemas: read_file{{path}}, write_file{{path, content}}, \
             replace_in_file{{path, search_block, replace_block}}, grep{{pattern, path}}, \
             list_files{{path?}}, file_tree{{path?, depth?}}, run_tests{{}}.\n\
             Respond with ONLY a JSON object: \
             {{\"reasoning\": \"...\", \"tool_calls\": [{{\"tool\": \"...\", \"args\": {{...}}}}]}}"
        ));

        sections.join("\n\n")
    }

    // ========================================================================
    // Analysis path (tool-less)
    // ========================================================================

    async fn execute_analysis(
        &self,
        task: &str,
        state: &mut SharedState,
    ) -> Result<ExecutionResult> {
        let prompt = build_analysis_prompt(task, state);
        let response = self
            .llm
            .generate(Role::Executor, &prompt, Role::Executor.canonical_temperature())
            .await?;

        let mut rca = match parse_first_object::<RootCauseAnalysis>(&response) {
            Some(parsed) => parsed,
            None => {
                warn!("analysis response was not parseable as a diagnosis");
                RootCauseAnalysis::invalid_sentinel("analysis response was not valid JSON")
            }
        };

        if rca.invalid_reason.is_none() {
            let cached_concat = state.cached_concat();
            let ctx = ValidationContext {
                known_artifact: state.failing_artifact.as_deref(),
                known_line: state.failing_artifact_line,
                cached_artifact_content: state
                    .failing_artifact
                    .as_deref()
                    .and_then(|a| state.cached_file(a)),
                cached_concat: &cached_concat,
            };
            rca.validate(&ctx);
            info!(valid = rca.valid, reason = ?rca.invalid_reason, "diagnosis validated");
        }

        state.last_root_cause_analysis = Some(rca);
        Ok(ExecutionResult::no_tools(task))
    }
}

/// Prompt for the structured diagnosis: raw failure output, the failing
/// artifact's cached window (never the whole cache), and prior failed
/// diagnoses.
fn build_analysis_prompt(task: &str, state: &SharedState) -> String {
    let failure_output = state
        .last_test_results
        .as_ref()
        .map(|r| head_lines(&r.raw_output, ANALYSIS_OUTPUT_LINES))
        .unwrap_or_default();

    let file_window = state
        .failing_artifact
        .as_deref()
        .and_then(|a| {
            let content = state.cached_file(a)?;
            Some(format!(
                "## Excerpt of {a}\n{}",
                window_around_line(content, state.failing_artifact_line)
            ))
        })
        .unwrap_or_default();

    let history: Vec<_> = state.repair_history.iter().cloned().collect();
    let rendered_history = render_history(&history);

    format!(
        r#"Diagnose the root cause of this test failure.

## Goal
{goal}

## Current step
{task}

## Failure output
{failure_output}

{file_window}

{rendered_history}## Requirements
Respond with ONLY a JSON object:
{{
  "artifact_path": "workspace-relative path of the defective file",
  "artifact_line": <line number of the defect>,
  "root_cause_summary": "one sentence",
  "causal_explanation": "how the defect produces the observed failure",
  "minimal_fix_strategy": "the smallest change that fixes it",
  "proposed_search_block": "the exact lines to locate, copied from the excerpt",
  "why_previous_attempts_failed": "only when there were previous attempts"
}}
Use no tools. Ground every field in the output and excerpt above."#,
        goal = state.goal,
    )
}

fn str_arg(args: &Value, key: &str) -> Option<String> {
    args.get(key).and_then(Value::as_str).map(str::to_string)
}

fn head_lines(text: &str, n: usize) -> String {
    text.lines().take(n).collect::<Vec<_>>().join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_parses_wire_format() {
        let raw = r#"{"reasoning": "need the file", "tool_calls": [
            {"tool": "read_file", "args": {"path": "src/a.py"}},
            {"tool": "run_tests", "args": {}}
        ]}"#;
        let envelope: ToolCallEnvelope = serde_json::from_str(raw).unwrap();
        assert_eq!(envelope.tool_calls.len(), 2);
        assert_eq!(envelope.tool_calls[0].tool, "read_file");
        assert_eq!(envelope.tool_calls[0].args["path"], "src/a.py");
    }

    #[test]
    fn test_envelope_tolerates_missing_fields() {
        let envelope: ToolCallEnvelope = serde_json::from_str("{}").unwrap();
        assert!(envelope.tool_calls.is_empty());
    }

    #[test]
    fn test_analysis_prompt_excerpts_only_failing_artifact() {
        let mut state = SharedState::new("fix multiply");
        state.current_phase = RepairPhase::RepairAnalyze;
        state.failing_artifact = Some("src/calculator.py".into());
        state.failing_artifact_line = Some(2);
        state.cache_file_read("src/calculator.py", "def multiply(a, b):\n    return a / b\n");
        state.cache_file_read("src/unrelated.py", "SECRET_OTHER_CONTENT = 1\n");

        let prompt = build_analysis_prompt("diagnose", &state);
        assert!(prompt.contains("return a / b"));
        assert!(!prompt.contains("SECRET_OTHER_CONTENT"));
    }
}
