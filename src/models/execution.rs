//! Result of one Executor invocation: per-tool outcomes plus the test
//! results observed during it, if any.

use serde::{Deserialize, Serialize};

use super::test_results::TestResults;

/// Outcome of a single tool call. Exit code 0 indicates success.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub tool: String,
    pub exit_code: i32,
    pub output: String,
}

impl ToolOutcome {
    pub fn ok(tool: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            exit_code: 0,
            output: output.into(),
        }
    }

    pub fn error(tool: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            exit_code: 1,
            output: output.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.exit_code != 0
    }
}

/// Immutable record of one `execute` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub task: String,
    pub tool_outcomes: Vec<ToolOutcome>,
    pub test_results: TestResults,
    /// Files modified by this execution, in modification order.
    pub modified_files: Vec<String>,
}

impl ExecutionResult {
    /// An execution that produced no tool activity (the analysis path).
    pub fn no_tools(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            tool_outcomes: Vec::new(),
            test_results: TestResults::not_run(),
            modified_files: Vec::new(),
        }
    }

    /// An execution that failed before any tool could usefully run.
    pub fn fatal(task: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            tool_outcomes: vec![ToolOutcome::error("executor", message)],
            test_results: TestResults::not_run(),
            modified_files: Vec::new(),
        }
    }

    pub fn has_errors(&self) -> bool {
        self.tool_outcomes.iter().any(|o| o.is_error())
    }

    /// The last error message among the tool outcomes, if any.
    pub fn last_error(&self) -> Option<&str> {
        self.tool_outcomes
            .iter()
            .rev()
            .find(|o| o.is_error())
            .map(|o| o.output.as_str())
    }

    pub fn tests_were_run(&self) -> bool {
        self.test_results.was_run
    }
}
