//! Per-run persistence: the workspace metadata file and the single
//! benchmark log line.

use serde::Serialize;
use serde_json::json;
use tracing::info;

use crate::models::FailureType;
use crate::orchestrator::SharedState;
use crate::slug::slugify_truncate;
use crate::workspace::Workspace;

use anyhow::{Context, Result};

/// Name of the metadata file written at the workspace root.
pub const METADATA_FILE: &str = "synapsenet_metadata.json";

#[derive(Debug, Serialize)]
struct RunMetadata<'a> {
    workspace: String,
    modified_files: &'a [String],
    iterations: u32,
    replans: u32,
    tests_passed: bool,
    exit_code: i32,
}

/// Write `synapsenet_metadata.json` at the workspace root via a temp file
/// and rename.
pub fn export_metadata(ws: &Workspace, state: &SharedState, exit_code: i32) -> Result<()> {
    let metadata = RunMetadata {
        workspace: ws.root().display().to_string(),
        modified_files: &state.modified_files,
        iterations: state.total_iterations,
        replans: state.replan_count,
        tests_passed: state.tests_passing(),
        exit_code,
    };
    let path = ws.root().join(METADATA_FILE);
    let tmp = ws.root().join(format!(".{METADATA_FILE}.tmp"));
    let body = serde_json::to_string_pretty(&metadata).context("serializing run metadata")?;
    std::fs::write(&tmp, body).context("writing metadata temp file")?;
    std::fs::rename(&tmp, &path).context("renaming metadata file")?;
    Ok(())
}

/// Emit exactly one structured benchmark event for the run.
pub fn log_benchmark(state: &SharedState, resolved: bool, wall_time_seconds: f64, final_status: &str) {
    let failure_type = state
        .last_test_results
        .as_ref()
        .map(|r| r.failure_type)
        .unwrap_or(FailureType::Unknown);
    let line = json!({
        "case_id": slugify_truncate(&state.goal),
        "resolved": resolved,
        "total_iterations": state.total_iterations,
        "replan_count": state.replan_count,
        "tool_call_count": state.tool_call_count,
        "failure_type": failure_type,
        "failing_artifact": state.failing_artifact,
        "wall_time_seconds": wall_time_seconds,
        "final_status": final_status,
    });
    info!(target: "benchmark", benchmark = %line, "Benchmark");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_metadata_file_shape() {
        let dir = tempdir().unwrap();
        let ws = Workspace::open(dir.path()).unwrap();
        let mut state = SharedState::new("fix the thing");
        state.total_iterations = 4;
        state.replan_count = 1;
        state.add_modified_file("src/a.py");

        export_metadata(&ws, &state, 0).unwrap();

        let raw = std::fs::read_to_string(ws.root().join(METADATA_FILE)).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed["iterations"], 4);
        assert_eq!(parsed["replans"], 1);
        assert_eq!(parsed["exit_code"], 0);
        assert_eq!(parsed["modified_files"][0], "src/a.py");
        assert!(parsed["workspace"].as_str().unwrap().starts_with('/'));
    }
}
