//! Parsed outcome of one test-runner invocation.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Classified failure category for a test run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureType {
    None,
    AssertionError,
    SyntaxError,
    ImportError,
    AttributeError,
    TypeError,
    IndexError,
    KeyError,
    CollectionError,
    Unknown,
}

impl FailureType {
    /// Map a test-runner exit code to the coarse failure category.
    ///
    /// 0 clean, 1 test failures, 2 and 4/5 collection/usage problems,
    /// anything else is treated as a test failure.
    pub fn from_exit_code(code: i32) -> Self {
        match code {
            0 => FailureType::None,
            1 => FailureType::AssertionError,
            2 | 4 | 5 => FailureType::CollectionError,
            _ => FailureType::AssertionError,
        }
    }

    /// Refine an exit-code classification with what the output names.
    /// Collection errors keep their category; test failures are narrowed
    /// to the concrete exception class when one is visible.
    pub fn refine(self, output: &str) -> Self {
        if self != FailureType::AssertionError {
            return self;
        }
        for (needle, refined) in [
            ("SyntaxError", FailureType::SyntaxError),
            ("ModuleNotFoundError", FailureType::ImportError),
            ("ImportError", FailureType::ImportError),
            ("AttributeError", FailureType::AttributeError),
            ("TypeError", FailureType::TypeError),
            ("IndexError", FailureType::IndexError),
            ("KeyError", FailureType::KeyError),
        ] {
            if output.contains(needle) {
                return refined;
            }
        }
        self
    }
}

/// Subtype attached to collection-level failures by the failure analyzer.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CollectionSubtype {
    ImportError,
    SyntaxError,
    NoTestsFound,
    #[default]
    Unknown,
}

/// Immutable record of one test-runner invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResults {
    pub passing: BTreeSet<String>,
    pub failing: BTreeSet<String>,
    pub raw_output: String,
    pub was_run: bool,
    pub failure_type: FailureType,
    pub error_snippet: String,
}

impl TestResults {
    /// Placeholder for an execution that never reached the test runner.
    pub fn not_run() -> Self {
        Self {
            passing: BTreeSet::new(),
            failing: BTreeSet::new(),
            raw_output: String::new(),
            was_run: false,
            failure_type: FailureType::Unknown,
            error_snippet: String::new(),
        }
    }

    /// Build results from the runner's exit code and merged output.
    pub fn from_run(exit_code: i32, output: &str) -> Self {
        let failure_type = FailureType::from_exit_code(exit_code).refine(output);
        let (passing, failing) = parse_test_identifiers(output);
        Self {
            passing,
            failing,
            raw_output: output.to_string(),
            was_run: true,
            failure_type,
            error_snippet: extract_error_snippet(output),
        }
    }

    pub fn all_passed(&self) -> bool {
        self.was_run && self.failure_type == FailureType::None
    }

    pub fn failed(&self) -> bool {
        self.was_run && self.failure_type != FailureType::None
    }

    /// One-line summary for prompt injection.
    pub fn summary(&self) -> String {
        if !self.was_run {
            return "tests have not been run yet".to_string();
        }
        format!(
            "{} passed, {} failed ({:?})",
            self.passing.len(),
            self.failing.len(),
            self.failure_type
        )
    }
}

/// Collect test identifiers from verbose and summary runner lines.
/// Handles both `path::test PASSED` and `FAILED path::test - Error` shapes.
fn parse_test_identifiers(output: &str) -> (BTreeSet<String>, BTreeSet<String>) {
    let mut passing = BTreeSet::new();
    let mut failing = BTreeSet::new();
    for line in output.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("FAILED ") {
            if let Some(id) = first_token(rest) {
                failing.insert(id.to_string());
            }
        } else if let Some(rest) = line.strip_prefix("PASSED ") {
            if let Some(id) = first_token(rest) {
                passing.insert(id.to_string());
            }
        } else if line.contains("::") {
            let mut parts = line.split_whitespace();
            if let (Some(id), Some(verdict)) = (parts.next(), parts.next()) {
                match verdict {
                    "PASSED" => {
                        passing.insert(id.to_string());
                    }
                    "FAILED" | "ERROR" => {
                        failing.insert(id.to_string());
                    }
                    _ => {}
                }
            }
        }
    }
    (passing, failing)
}

fn first_token(s: &str) -> Option<&str> {
    s.split_whitespace().next().filter(|t| !t.is_empty())
}

/// Pull a short human-readable error line out of runner output.
fn extract_error_snippet(output: &str) -> String {
    let candidate = output
        .lines()
        .find(|l| l.trim_start().starts_with("E "))
        .or_else(|| output.lines().find(|l| l.contains("Error")))
        .unwrap_or_default()
        .trim();
    candidate.chars().take(200).collect()
}
