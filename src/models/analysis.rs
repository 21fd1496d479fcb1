//! Structured diagnosis produced during the analysis phase, with the
//! deterministic validation that decides whether a diagnosis is usable as a
//! repair target.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Prefix of the marker line inserted when cached file content is truncated.
pub const TRUNCATION_PREFIX: &str = "<<truncated:";

/// Marker line recording how many lines were dropped from a cached read.
pub fn truncation_marker(omitted: usize) -> String {
    format!("{TRUNCATION_PREFIX} {omitted} lines omitted>>")
}

pub fn is_truncation_marker(line: &str) -> bool {
    line.trim_start().starts_with(TRUNCATION_PREFIX)
}

/// Line-number prefix emitted by file windowing (`  42 | content`).
static WINDOW_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*\d+\s*\|\s?").expect("invalid window prefix pattern"));

/// Minimum line tolerance when validating a reported failure line.
const MIN_LINE_TOLERANCE: f64 = 75.0;

/// Inputs the validation compares a diagnosis against.
#[derive(Debug, Default)]
pub struct ValidationContext<'a> {
    /// Artifact the failure analyzer identified, if any.
    pub known_artifact: Option<&'a str>,
    /// Line the failure analyzer identified, if any.
    pub known_line: Option<usize>,
    /// Cached content of the failing artifact, as cached (may be truncated).
    pub cached_artifact_content: Option<&'a str>,
    /// Concatenation of all cached file reads.
    pub cached_concat: &'a str,
}

/// Structured root-cause diagnosis. `valid` is derived, never parsed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootCauseAnalysis {
    #[serde(default)]
    pub artifact_path: String,
    #[serde(default)]
    pub artifact_line: usize,
    #[serde(default)]
    pub root_cause_summary: String,
    #[serde(default)]
    pub causal_explanation: String,
    #[serde(default)]
    pub minimal_fix_strategy: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proposed_search_block: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub why_previous_attempts_failed: Option<String>,
    #[serde(skip)]
    pub valid: bool,
    #[serde(skip)]
    pub invalid_reason: Option<String>,
}

impl RootCauseAnalysis {
    /// Sentinel stored when the analysis response could not be parsed at
    /// all; keeps the reason available for the next plan revision.
    pub fn invalid_sentinel(reason: impl Into<String>) -> Self {
        Self {
            artifact_path: String::new(),
            artifact_line: 0,
            root_cause_summary: String::new(),
            causal_explanation: String::new(),
            minimal_fix_strategy: String::new(),
            proposed_search_block: None,
            why_previous_attempts_failed: None,
            valid: false,
            invalid_reason: Some(reason.into()),
        }
    }

    /// Run the deterministic validation and record the outcome on `self`.
    ///
    /// Checks, in order: required text fields, reported line within the
    /// dynamic tolerance of the analyzer-identified line, and presence of
    /// the proposed search block in the cached content after whitespace
    /// normalization. A path disagreement with the analyzer is logged but
    /// never rejects.
    pub fn validate(&mut self, ctx: &ValidationContext<'_>) {
        self.valid = false;
        for (name, value) in [
            ("artifact_path", &self.artifact_path),
            ("root_cause_summary", &self.root_cause_summary),
            ("causal_explanation", &self.causal_explanation),
            ("minimal_fix_strategy", &self.minimal_fix_strategy),
        ] {
            if value.trim().is_empty() {
                self.invalid_reason = Some(format!("required field '{name}' is empty"));
                return;
            }
        }

        if let Some(known) = ctx.known_line {
            let tolerance = line_tolerance(
                ctx.cached_artifact_content
                    .map(|c| c.lines().count())
                    .unwrap_or(0),
                known,
                self.artifact_line,
            );
            let delta = self.artifact_line.abs_diff(known) as f64;
            if delta > tolerance {
                self.invalid_reason = Some(format!(
                    "reported line {} is {delta:.0} lines away from the identified line {known} (tolerance {tolerance:.0})",
                    self.artifact_line
                ));
                return;
            }
        }

        if let Some(block) = &self.proposed_search_block {
            if !block.trim().is_empty()
                && !search_block_exists(&normalize_for_search(block), &normalize_for_search(ctx.cached_concat))
            {
                self.invalid_reason =
                    Some("proposed search block does not appear in any file read so far".into());
                return;
            }
        }

        if let Some(known) = ctx.known_artifact {
            if !known.is_empty() && !paths_agree(&self.artifact_path, known) {
                warn!(
                    reported = %self.artifact_path,
                    identified = %known,
                    "diagnosis names a different artifact than the failure analyzer"
                );
            }
        }

        self.valid = true;
        self.invalid_reason = None;
    }
}

/// Dynamic tolerance for the reported failure line: 20% of the widest of
/// the cached line count, four times the identified line, and four times
/// the reported line, never below 75 lines. Small test windows would
/// otherwise reject valid diagnoses.
fn line_tolerance(cached_lines: usize, known_line: usize, reported_line: usize) -> f64 {
    let widest = cached_lines.max(known_line * 4).max(reported_line * 4);
    (widest as f64 * 0.20).max(MIN_LINE_TOLERANCE)
}

fn paths_agree(a: &str, b: &str) -> bool {
    let tail = |p: &str| {
        p.trim_start_matches("./")
            .rsplit('/')
            .next()
            .unwrap_or(p)
            .to_string()
    };
    a == b || tail(a) == tail(b)
}

/// Normalize text for search-block comparison: strip windowing prefixes,
/// drop truncation markers and blank lines, trim each line, and collapse
/// internal whitespace runs. Idempotent.
pub fn normalize_for_search(text: &str) -> String {
    let mut out = Vec::new();
    for line in text.lines() {
        if is_truncation_marker(line) {
            continue;
        }
        let mut stripped = line.to_string();
        loop {
            let next = WINDOW_PREFIX.replace(&stripped, "").into_owned();
            if next == stripped {
                break;
            }
            stripped = next;
        }
        let collapsed = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
        if !collapsed.is_empty() {
            out.push(collapsed);
        }
    }
    out.join("\n")
}

/// True when the normalized block appears inside the normalized content.
pub fn search_block_exists(normalized_block: &str, normalized_content: &str) -> bool {
    !normalized_block.is_empty() && normalized_content.contains(normalized_block)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_analysis() -> RootCauseAnalysis {
        RootCauseAnalysis {
            artifact_path: "src/calculator.py".into(),
            artifact_line: 12,
            root_cause_summary: "multiply divides instead of multiplying".into(),
            causal_explanation: "the operator on line 12 is / rather than *".into(),
            minimal_fix_strategy: "replace a / b with a * b".into(),
            proposed_search_block: Some("return a / b".into()),
            why_previous_attempts_failed: None,
            valid: false,
            invalid_reason: None,
        }
    }

    #[test]
    fn test_validation_accepts_grounded_diagnosis() {
        let mut rca = valid_analysis();
        let content = "def multiply(a, b):\n    return a / b\n";
        let ctx = ValidationContext {
            known_artifact: Some("src/calculator.py"),
            known_line: Some(12),
            cached_artifact_content: Some(content),
            cached_concat: content,
        };
        rca.validate(&ctx);
        assert!(rca.valid, "reason: {:?}", rca.invalid_reason);
    }

    #[test]
    fn test_validation_rejects_empty_required_field() {
        let mut rca = valid_analysis();
        rca.minimal_fix_strategy = "  ".into();
        rca.validate(&ValidationContext::default());
        assert!(!rca.valid);
        assert!(rca.invalid_reason.as_deref().unwrap().contains("minimal_fix_strategy"));
    }

    #[test]
    fn test_validation_rejects_far_away_line() {
        let mut rca = valid_analysis();
        rca.artifact_line = 4000;
        let content = "return a / b\n";
        let ctx = ValidationContext {
            known_artifact: Some("src/calculator.py"),
            known_line: Some(12),
            cached_artifact_content: Some(content),
            cached_concat: content,
        };
        rca.validate(&ctx);
        assert!(!rca.valid);
    }

    #[test]
    fn test_line_tolerance_floor_allows_small_windows() {
        // 12-line file, failure at line 10, reported at 60: within the
        // 75-line floor even though 20% of everything else is tiny.
        let mut rca = valid_analysis();
        rca.artifact_line = 60;
        let content = "return a / b\n";
        let ctx = ValidationContext {
            known_artifact: Some("src/calculator.py"),
            known_line: Some(10),
            cached_artifact_content: Some(content),
            cached_concat: content,
        };
        rca.validate(&ctx);
        assert!(rca.valid, "reason: {:?}", rca.invalid_reason);
    }

    #[test]
    fn test_validation_rejects_hallucinated_search_block() {
        let mut rca = valid_analysis();
        rca.proposed_search_block = Some("return a ** b".into());
        let content = "def multiply(a, b):\n    return a / b\n";
        let ctx = ValidationContext {
            known_artifact: Some("src/calculator.py"),
            known_line: Some(12),
            cached_artifact_content: Some(content),
            cached_concat: content,
        };
        rca.validate(&ctx);
        assert!(!rca.valid);
    }

    #[test]
    fn test_path_mismatch_is_soft() {
        let mut rca = valid_analysis();
        rca.artifact_path = "src/other.py".into();
        let content = "return a / b\n";
        let ctx = ValidationContext {
            known_artifact: Some("src/calculator.py"),
            known_line: Some(12),
            cached_artifact_content: Some(content),
            cached_concat: content,
        };
        rca.validate(&ctx);
        assert!(rca.valid, "path disagreement must not reject");
    }

    #[test]
    fn test_normalize_is_idempotent_and_drops_markers() {
        let text = format!(
            "   10 |   def multiply(a, b):\n{}\n   11 |       return   a / b\n\n",
            truncation_marker(480)
        );
        let once = normalize_for_search(&text);
        let twice = normalize_for_search(&once);
        assert_eq!(once, twice);
        assert!(!once.contains(TRUNCATION_PREFIX));
        assert_eq!(once, "def multiply(a, b):\nreturn a / b");
    }

    #[test]
    fn test_search_block_exists_up_to_whitespace() {
        let content = "def multiply(a, b):\n        return a /   b\n";
        let block = "return a / b";
        assert!(search_block_exists(
            &normalize_for_search(block),
            &normalize_for_search(content)
        ));
        assert!(!search_block_exists("", &normalize_for_search(content)));
    }
}
