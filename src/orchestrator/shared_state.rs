//! SharedState - mutable per-run context threaded through the repair loop.
//!
//! Created for each `run_task` invocation, mutated by the orchestrator and
//! the executor only, and dropped when the run returns. The critic and
//! mediator receive it read-only.

use std::collections::HashMap;
use std::collections::VecDeque;

use crate::models::analysis::truncation_marker;
use crate::models::{
    CollectionSubtype, PlannerOutput, RepairAttempt, RootCauseAnalysis, TestResults,
};
use crate::phases::RepairPhase;

/// Cached file reads are capped at this many lines.
pub const FILE_CACHE_MAX_LINES: usize = 500;

/// Bounded repair-history length; the oldest attempt is dropped first.
pub const REPAIR_HISTORY_CAP: usize = 5;

/// Mutable run context owned by the orchestrator.
#[derive(Debug)]
pub struct SharedState {
    pub goal: String,
    pub current_plan: Option<PlannerOutput>,
    pub current_task_index: usize,
    pub attempts_on_current_task: u32,
    pub total_iterations: u32,
    pub last_test_results: Option<TestResults>,
    /// Ordered unique list of workspace-relative modified paths.
    pub modified_files: Vec<String>,
    pub current_phase: RepairPhase,
    pub failing_artifact: Option<String>,
    pub failing_artifact_line: Option<usize>,
    pub collection_failure_subtype: Option<CollectionSubtype>,
    pub collection_failure_reason: Option<String>,
    pub collection_failure_module: Option<String>,
    pub last_tool_error: Option<String>,
    pub consecutive_tool_errors: u32,
    pub last_root_cause_analysis: Option<RootCauseAnalysis>,
    pub repair_history: VecDeque<RepairAttempt>,
    /// Normalized path → cached content, each entry capped at
    /// [`FILE_CACHE_MAX_LINES`] lines.
    pub recent_file_reads: HashMap<String, String>,
    pub structure_discovered: bool,
    pub failure_observed: bool,
    pub replan_count: u32,
    pub tool_call_count: u32,
}

impl SharedState {
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            current_plan: None,
            current_task_index: 0,
            attempts_on_current_task: 0,
            total_iterations: 0,
            last_test_results: None,
            modified_files: Vec::new(),
            current_phase: RepairPhase::Reproduce,
            failing_artifact: None,
            failing_artifact_line: None,
            collection_failure_subtype: None,
            collection_failure_reason: None,
            collection_failure_module: None,
            last_tool_error: None,
            consecutive_tool_errors: 0,
            last_root_cause_analysis: None,
            repair_history: VecDeque::new(),
            recent_file_reads: HashMap::new(),
            structure_discovered: false,
            failure_observed: false,
            replan_count: 0,
            tool_call_count: 0,
        }
    }

    /// The step the loop is currently executing, if the plan has one.
    pub fn current_task(&self) -> Option<&str> {
        self.current_plan
            .as_ref()
            .and_then(|p| p.steps.get(self.current_task_index))
            .map(String::as_str)
    }

    /// Install a fresh plan and restart task tracking.
    pub fn set_plan(&mut self, plan: PlannerOutput) {
        self.current_plan = Some(plan);
        self.current_task_index = 0;
        self.attempts_on_current_task = 0;
    }

    /// Record a modified path, normalized, preserving insertion order
    /// without duplicates.
    pub fn add_modified_file(&mut self, path: &str) {
        let normalized = Self::normalize_path(path);
        if normalized.is_empty() {
            return;
        }
        if !self.modified_files.contains(&normalized) {
            self.modified_files.push(normalized);
        }
    }

    pub fn clear_modified_files(&mut self) {
        self.modified_files.clear();
    }

    /// Store the latest test results. An all-pass result invalidates every
    /// piece of stale collection-failure metadata; a failing result marks
    /// the failure as observed.
    pub fn set_last_test_results(&mut self, results: TestResults) {
        if results.all_passed() {
            self.collection_failure_subtype = None;
            self.collection_failure_reason = None;
            self.collection_failure_module = None;
            self.failing_artifact = None;
            self.failing_artifact_line = None;
        } else if results.failed() {
            self.failure_observed = true;
        }
        self.last_test_results = Some(results);
    }

    /// Cache a file read under its normalized path, truncating long files
    /// to an 80/20 head-tail split around a single marker line.
    pub fn cache_file_read(&mut self, path: &str, content: &str) {
        let normalized = Self::normalize_path(path);
        let lines: Vec<&str> = content.lines().collect();
        let cached = if lines.len() <= FILE_CACHE_MAX_LINES {
            content.to_string()
        } else {
            let head = FILE_CACHE_MAX_LINES * 4 / 5;
            let tail = FILE_CACHE_MAX_LINES - head - 1;
            let omitted = lines.len() - head - tail;
            let mut out: Vec<String> = lines[..head].iter().map(|s| s.to_string()).collect();
            out.push(truncation_marker(omitted));
            out.extend(lines[lines.len() - tail..].iter().map(|s| s.to_string()));
            out.join("\n")
        };
        self.recent_file_reads.insert(normalized, cached);
    }

    pub fn cached_file(&self, path: &str) -> Option<&str> {
        self.recent_file_reads
            .get(&Self::normalize_path(path))
            .map(String::as_str)
    }

    /// Concatenation of every cached read, for search-block validation.
    pub fn cached_concat(&self) -> String {
        let mut parts: Vec<(&String, &String)> = self.recent_file_reads.iter().collect();
        parts.sort_by(|a, b| a.0.cmp(b.0));
        parts
            .into_iter()
            .map(|(_, content)| content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Drop the read cache along with the discovery flag and collection
    /// metadata derived from it.
    pub fn clear_file_cache(&mut self) {
        self.recent_file_reads.clear();
        self.structure_discovered = false;
        self.collection_failure_subtype = None;
        self.collection_failure_reason = None;
        self.collection_failure_module = None;
    }

    /// Reset transient per-cycle state ahead of a replanned reproduction.
    ///
    /// Clears only collection metadata and tool-error tracking. The file
    /// cache, discovery flag, last test results, failing artifact and its
    /// line, and the last diagnosis all survive so the next cycle can
    /// build on them.
    pub fn soft_reset(&mut self) {
        self.collection_failure_subtype = None;
        self.collection_failure_reason = None;
        self.collection_failure_module = None;
        self.last_tool_error = None;
        self.consecutive_tool_errors = 0;
    }

    /// Append a repair attempt, dropping the oldest past the cap.
    pub fn add_repair_attempt(&mut self, attempt: RepairAttempt) {
        if self.repair_history.len() >= REPAIR_HISTORY_CAP {
            self.repair_history.pop_front();
        }
        self.repair_history.push_back(attempt);
    }

    pub fn has_valid_root_cause_analysis(&self) -> bool {
        self.last_root_cause_analysis
            .as_ref()
            .map(|rca| rca.valid)
            .unwrap_or(false)
    }

    /// True when the latest run reported every test passing.
    pub fn tests_passing(&self) -> bool {
        self.last_test_results
            .as_ref()
            .map(|r| r.all_passed())
            .unwrap_or(false)
    }

    /// Normalize a workspace-relative path: drop a leading `./`, trim any
    /// trailing slash, collapse runs of `/`.
    pub fn normalize_path(path: &str) -> String {
        let trimmed = path.trim();
        let trimmed = trimmed.strip_prefix("./").unwrap_or(trimmed);
        let mut out = String::with_capacity(trimmed.len());
        let mut prev_slash = false;
        for c in trimmed.chars() {
            if c == '/' {
                if !prev_slash {
                    out.push('/');
                }
                prev_slash = true;
            } else {
                out.push(c);
                prev_slash = false;
            }
        }
        while out.ends_with('/') {
            out.pop();
        }
        out
    }
}
