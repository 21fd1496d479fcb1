//! Executor-side gates over LLM-proposed tool calls.
//!
//! Gates run in a fixed order: discovery, repair evidence, phase filter.
//! They substitute or drop calls the model proposed; the model cannot
//! bypass them.

use serde_json::json;
use tracing::{debug, warn};

use crate::models::FailureType;
use crate::orchestrator::SharedState;
use crate::phases::RepairPhase;

use super::executor::ToolCall;

const DISCOVERY_TOOLS: &[&str] = &["list_files", "file_tree"];

/// Apply all gates to the proposed call list.
pub fn apply_gates(calls: Vec<ToolCall>, state: &SharedState) -> Vec<ToolCall> {
    let calls = discovery_gate(calls, state);
    let calls = repair_evidence_gate(calls, state);
    phase_filter(calls, state.current_phase)
}

/// Before the structure is known, a reproduction step that proposes no
/// discovery tool is replaced by a single listing of the workspace root.
fn discovery_gate(calls: Vec<ToolCall>, state: &SharedState) -> Vec<ToolCall> {
    if state.current_phase != RepairPhase::Reproduce || state.structure_discovered {
        return calls;
    }
    if calls.iter().any(|c| DISCOVERY_TOOLS.contains(&c.tool.as_str())) {
        return calls;
    }
    debug!("discovery gate: injecting list_files over the proposed calls");
    vec![ToolCall {
        tool: "list_files".to_string(),
        args: json!({ "path": "." }),
    }]
}

/// A patch step may not run blind: when the failing artifact is known but
/// its content has never been read, the proposed calls are replaced by a
/// read of that artifact.
fn repair_evidence_gate(calls: Vec<ToolCall>, state: &SharedState) -> Vec<ToolCall> {
    if state.current_phase != RepairPhase::RepairPatch {
        return calls;
    }
    let qualifying_failure = state
        .last_test_results
        .as_ref()
        .map(|r| r.was_run && !matches!(r.failure_type, FailureType::None | FailureType::Unknown))
        .unwrap_or(false);
    if !qualifying_failure {
        return calls;
    }
    let Some(artifact) = state.failing_artifact.as_deref() else {
        return calls;
    };
    if state.cached_file(artifact).is_some() {
        return calls;
    }

    match sanitize_path(artifact) {
        Some(path) => {
            warn!(%path, "repair evidence gate: forcing read of uncached failing artifact");
            vec![ToolCall {
                tool: "read_file".to_string(),
                args: json!({ "path": path }),
            }]
        }
        None => {
            warn!(artifact, "repair evidence gate: artifact path unusable, falling back to listing");
            vec![ToolCall {
                tool: "list_files".to_string(),
                args: json!({ "path": "." }),
            }]
        }
    }
}

/// Drop every call outside the phase's allowlist.
fn phase_filter(calls: Vec<ToolCall>, phase: RepairPhase) -> Vec<ToolCall> {
    let allowed = phase.allowed_tools();
    calls
        .into_iter()
        .filter(|c| {
            let keep = allowed.contains(&c.tool.as_str());
            if !keep {
                warn!(tool = %c.tool, %phase, "phase filter: dropping disallowed tool call");
            }
            keep
        })
        .collect()
}

/// Strip marker and whitespace contamination from a path before it is
/// embedded in tool-call JSON. Returns None when nothing usable remains.
fn sanitize_path(raw: &str) -> Option<String> {
    let first_line = raw.lines().next().unwrap_or("");
    let cleaned = first_line.trim().trim_start_matches('>').trim();
    if cleaned.is_empty() || cleaned.chars().any(|c| c.is_whitespace() || c == '>') {
        return None;
    }
    Some(cleaned.to_string())
}
