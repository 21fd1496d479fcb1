//! Runtime configuration: workspace, test runner, LLM transport, and the
//! snapshot predicate.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub workspace: WorkspaceConfig,
    pub executor: ExecutorConfig,
    pub llm: LlmConfig,
    #[serde(default)]
    pub snapshot: SnapshotConfig,
}

/// Directory under which all file IO is confined.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Command that runs the test framework (auto-discovery on `.`).
    pub interpreter: String,
    /// Timeout for a full suite run.
    #[serde(default = "default_test_timeout_secs")]
    pub test_timeout_secs: u64,
    /// Timeout for other spawned processes.
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
}

fn default_test_timeout_secs() -> u64 {
    60
}

fn default_tool_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL of an OpenAI-compatible endpoint.
    pub base_url: String,
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_llm_timeout_secs() -> u64 {
    120
}

/// Which files the workspace snapshot captures and restore may delete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Extension of project source files, with leading dot.
    #[serde(default = "default_source_extension")]
    pub source_extension: String,
    /// Workspace-relative prefixes of the source tree.
    #[serde(default = "default_source_prefixes")]
    pub source_prefixes: Vec<String>,
}

fn default_source_extension() -> String {
    ".py".to_string()
}

fn default_source_prefixes() -> Vec<String> {
    vec!["src/".to_string()]
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            source_extension: default_source_extension(),
            source_prefixes: default_source_prefixes(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace: WorkspaceConfig {
                path: PathBuf::from("/tmp/synapsenet-workspace"),
            },
            executor: ExecutorConfig {
                interpreter: "python3 -m pytest -v".to_string(),
                test_timeout_secs: default_test_timeout_secs(),
                tool_timeout_secs: default_tool_timeout_secs(),
            },
            llm: LlmConfig {
                base_url: "http://localhost:8000/v1".to_string(),
                model: "local-model".to_string(),
                api_key: None,
                timeout_secs: default_llm_timeout_secs(),
            },
            snapshot: SnapshotConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration, falling back to defaults if no file was given.
    pub fn load_or_default(path: Option<&PathBuf>) -> Result<Self> {
        match path {
            Some(p) if p.exists() => Self::from_file(p),
            _ => Ok(Self::default()),
        }
    }

    /// Apply environment variable overrides.
    ///
    /// Supported variables:
    /// - SYNAPSENET_WORKSPACE: workspace root directory
    /// - SYNAPSENET_INTERPRETER: test-runner command
    /// - SYNAPSENET_LLM_BASE_URL, SYNAPSENET_LLM_MODEL, SYNAPSENET_LLM_API_KEY
    /// - SYNAPSENET_LLM_TIMEOUT_SECS
    pub fn apply_env_overrides(mut self) -> Self {
        if let Ok(val) = std::env::var("SYNAPSENET_WORKSPACE")
            && !val.is_empty()
        {
            self.workspace.path = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("SYNAPSENET_INTERPRETER")
            && !val.is_empty()
        {
            self.executor.interpreter = val;
        }
        if let Ok(val) = std::env::var("SYNAPSENET_LLM_BASE_URL")
            && !val.is_empty()
        {
            self.llm.base_url = val;
        }
        if let Ok(val) = std::env::var("SYNAPSENET_LLM_MODEL")
            && !val.is_empty()
        {
            self.llm.model = val;
        }
        if let Ok(val) = std::env::var("SYNAPSENET_LLM_API_KEY")
            && !val.is_empty()
        {
            self.llm.api_key = Some(val);
        }
        if let Ok(val) = std::env::var("SYNAPSENET_LLM_TIMEOUT_SECS")
            && let Ok(secs) = val.parse::<u64>()
        {
            self.llm.timeout_secs = secs;
        }
        self
    }

    /// Load with env overrides applied. Priority: file > env > defaults.
    pub fn load_with_env(path: Option<&PathBuf>) -> Result<Self> {
        Self::load_or_default(path).map(|c| c.apply_env_overrides())
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.workspace.path.is_absolute(),
            "workspace.path must be absolute, got {}",
            self.workspace.path.display()
        );
        anyhow::ensure!(
            !self.executor.interpreter.trim().is_empty(),
            "executor.interpreter must not be empty"
        );
        anyhow::ensure!(
            !self.llm.base_url.trim().is_empty(),
            "llm.base_url must not be empty"
        );
        anyhow::ensure!(!self.llm.model.trim().is_empty(), "llm.model must not be empty");
        Ok(())
    }

    /// Commented sample configuration for `init-config`.
    pub fn sample_yaml() -> String {
        let sample = Config::default();
        let body = serde_yaml::to_string(&sample).unwrap_or_default();
        format!(
            "# SynapseNet configuration.\n\
             # workspace.path: directory all repair IO is confined to (absolute).\n\
             # executor.interpreter: command that runs the test framework.\n\
             # llm.*: chat-completions endpoint used by all roles.\n{body}"
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_pass_validation() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn test_yaml_round_trip() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.executor.interpreter, config.executor.interpreter);
        assert_eq!(parsed.llm.base_url, config.llm.base_url);
        assert_eq!(parsed.snapshot.source_extension, ".py");
    }

    #[test]
    fn test_validation_rejects_relative_workspace() {
        let mut config = Config::default();
        config.workspace.path = PathBuf::from("relative/dir");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_yaml_uses_field_defaults() {
        let yaml = r#"
workspace:
  path: /tmp/ws
executor:
  interpreter: pytest
llm:
  base_url: http://localhost:9999/v1
  model: test-model
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.executor.test_timeout_secs, 60);
        assert_eq!(config.executor.tool_timeout_secs, 30);
        assert_eq!(config.llm.timeout_secs, 120);
        assert_eq!(config.snapshot.source_prefixes, vec!["src/"]);
    }

    #[test]
    fn test_sample_yaml_parses() {
        let sample = Config::sample_yaml();
        let parsed: Config = serde_yaml::from_str(&sample).unwrap();
        parsed.validate().unwrap();
    }
}
