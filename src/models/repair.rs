//! Bounded history of failed repair cycles, rendered into later prompts so
//! the model stops repeating the same dead end.

use serde::{Deserialize, Serialize};

/// How a repair cycle ended when a replan fired.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RepairOutcome {
    AnalysisInvalid,
    AnalysisCapExceeded,
    SearchFailed,
    SearchAmbiguous,
    ValidateFailed,
    SyntaxError,
    NoPatch,
}

impl RepairOutcome {
    /// Wire-format name, as serialized.
    pub fn code(self) -> &'static str {
        match self {
            RepairOutcome::AnalysisInvalid => "ANALYSIS_INVALID",
            RepairOutcome::AnalysisCapExceeded => "ANALYSIS_CAP_EXCEEDED",
            RepairOutcome::SearchFailed => "SEARCH_FAILED",
            RepairOutcome::SearchAmbiguous => "SEARCH_AMBIGUOUS",
            RepairOutcome::ValidateFailed => "VALIDATE_FAILED",
            RepairOutcome::SyntaxError => "SYNTAX_ERROR",
            RepairOutcome::NoPatch => "NO_PATCH",
        }
    }

    fn describe(self) -> &'static str {
        match self {
            RepairOutcome::AnalysisInvalid => "the diagnosis failed validation",
            RepairOutcome::AnalysisCapExceeded => "no usable diagnosis within the attempt cap",
            RepairOutcome::SearchFailed => "the search block was not found in the file",
            RepairOutcome::SearchAmbiguous => "the search block matched more than once",
            RepairOutcome::ValidateFailed => "tests still failed after the patch",
            RepairOutcome::SyntaxError => "the patch introduced a syntax error",
            RepairOutcome::NoPatch => "no patch was produced",
        }
    }
}

/// One failed repair cycle, captured at the moment the replan fired.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairAttempt {
    pub index: usize,
    pub outcome: RepairOutcome,
    pub patch_summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_block: Option<String>,
    pub diagnosis_summary: String,
    pub fix_strategy: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_failure_subtype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_failure_line: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_failure_reason: Option<String>,
}

impl RepairAttempt {
    /// Plain-text rendering for prompt injection.
    pub fn render(&self) -> String {
        let mut lines = vec![format!(
            "Attempt {}: {} ({})",
            self.index,
            self.outcome.describe(),
            self.outcome.code()
        )];
        if !self.diagnosis_summary.is_empty() {
            lines.push(format!("  diagnosis: {}", self.diagnosis_summary));
        }
        if !self.fix_strategy.is_empty() {
            lines.push(format!("  strategy: {}", self.fix_strategy));
        }
        if !self.patch_summary.is_empty() {
            lines.push(format!("  patch: {}", self.patch_summary));
        }
        if let Some(block) = &self.search_block {
            if !block.is_empty() {
                lines.push(format!("  search block used: {}", block.trim()));
            }
        }
        if let Some(reason) = &self.validation_failure_reason {
            let line = self
                .validation_failure_line
                .map(|l| format!(" at line {l}"))
                .unwrap_or_default();
            let subtype = self
                .validation_failure_subtype
                .as_deref()
                .map(|s| format!(" [{s}]"))
                .unwrap_or_default();
            lines.push(format!("  validation failure{subtype}{line}: {reason}"));
        }
        lines.join("\n")
    }
}

/// Render a whole history block, oldest first.
pub fn render_history(history: &[RepairAttempt]) -> String {
    if history.is_empty() {
        return String::new();
    }
    let mut out = String::from("Previous failed repair attempts:\n");
    for attempt in history {
        out.push_str(&attempt.render());
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_outcome_and_strategy() {
        let attempt = RepairAttempt {
            index: 1,
            outcome: RepairOutcome::SearchFailed,
            patch_summary: "no files modified".into(),
            search_block: Some("return a ** b".into()),
            diagnosis_summary: "wrong operator".into(),
            fix_strategy: "swap / for *".into(),
            validation_failure_subtype: None,
            validation_failure_line: None,
            validation_failure_reason: None,
        };
        let text = attempt.render();
        assert!(text.contains("Attempt 1"));
        assert!(text.contains("not found"));
        assert!(text.contains("swap / for *"));
        assert!(text.contains("return a ** b"));
    }

    #[test]
    fn test_render_history_empty_is_empty() {
        assert!(render_history(&[]).is_empty());
    }

    #[test]
    fn test_render_validation_failure_details() {
        let attempt = RepairAttempt {
            index: 2,
            outcome: RepairOutcome::SyntaxError,
            patch_summary: "src/calculator.py".into(),
            search_block: None,
            diagnosis_summary: "wrong operator".into(),
            fix_strategy: "swap / for *".into(),
            validation_failure_subtype: Some("SYNTAX_ERROR".into()),
            validation_failure_line: Some(12),
            validation_failure_reason: Some("invalid syntax".into()),
        };
        let text = attempt.render();
        assert!(text.contains("[SYNTAX_ERROR]"));
        assert!(text.contains("at line 12"));
        assert!(text.contains("invalid syntax"));
    }
}
