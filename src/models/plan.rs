//! Plan produced by the Planner: an ordered list of step strings plus the
//! model's reasoning.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Lexemes that must never appear in a step of a plan generated for the
/// patch phase. Patching and test execution are separate phases; a step
/// mixing them would re-run the suite before the patch landed.
static PATCH_FORBIDDEN: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?i)run\s+test").expect("invalid lexeme pattern"),
        Regex::new(r"(?i)execute\s+test").expect("invalid lexeme pattern"),
        Regex::new(r"(?i)reproduce").expect("invalid lexeme pattern"),
    ]
});

/// Ordered, non-empty sequence of plan steps with free-text reasoning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlannerOutput {
    /// The ordered steps. The legacy key `investigation_steps` is accepted
    /// on input; output always uses `repair_steps`.
    #[serde(rename = "repair_steps", alias = "investigation_steps")]
    pub steps: Vec<String>,
    #[serde(default)]
    pub reasoning: String,
}

impl PlannerOutput {
    pub fn new(steps: Vec<String>, reasoning: impl Into<String>) -> Self {
        Self {
            steps,
            reasoning: reasoning.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty() || self.steps.iter().all(|s| s.trim().is_empty())
    }

    /// Check a single step against the patch-phase lexeme invariant.
    ///
    /// A step violates the invariant if it contains "run test",
    /// "execute test", "reproduce", or both "test" and "run" anywhere in
    /// the same step.
    pub fn step_violates_patch_invariant(step: &str) -> bool {
        if PATCH_FORBIDDEN.iter().any(|re| re.is_match(step)) {
            return true;
        }
        let lower = step.to_lowercase();
        lower.contains("test") && lower.contains("run")
    }

    /// True if any step of this plan violates the patch-phase invariant.
    pub fn violates_patch_invariant(&self) -> bool {
        self.steps
            .iter()
            .any(|s| Self::step_violates_patch_invariant(s))
    }
}
