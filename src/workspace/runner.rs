//! Test-runner process handling.
//!
//! The runner is invoked through the shell with stderr redirected into
//! stdout so the two streams interleave in the order the OS saw them; the
//! failure analyzer depends on that ordering.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::warn;

/// Exit code reported for a forcibly terminated run.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Spawns the configured test interpreter against a workspace.
#[derive(Debug, Clone)]
pub struct TestRunner {
    interpreter: String,
    timeout: Duration,
}

impl TestRunner {
    pub fn new(interpreter: impl Into<String>, timeout: Duration) -> Self {
        Self {
            interpreter: interpreter.into(),
            timeout,
        }
    }

    /// Run the suite with auto-discovery on `.`, returning the exit code
    /// and the merged output. A hung process is killed and reported as a
    /// synthetic non-zero exit with a TIMEOUT marker.
    pub async fn run(&self, workspace_root: &Path) -> Result<(i32, String)> {
        let command_line = format!("{} . 2>&1", self.interpreter);
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&command_line)
            .current_dir(workspace_root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("spawning test runner: {command_line}"))?;

        let mut stdout = child
            .stdout
            .take()
            .context("test runner stdout was not captured")?;
        let reader = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stdout.read_to_end(&mut buf).await;
            buf
        });

        match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(status) => {
                let status = status.context("waiting for test runner")?;
                let buf = reader.await.context("collecting test runner output")?;
                let output = String::from_utf8_lossy(&buf).into_owned();
                Ok((status.code().unwrap_or(-1), output))
            }
            Err(_) => {
                warn!(timeout_secs = self.timeout.as_secs(), "test run timed out, killing");
                let _ = child.kill().await;
                reader.abort();
                Ok((
                    TIMEOUT_EXIT_CODE,
                    format!(
                        "TIMEOUT: test run exceeded {}s and was terminated",
                        self.timeout.as_secs()
                    ),
                ))
            }
        }
    }
}
