mod settings;

pub use settings::{Config, ExecutorConfig, LlmConfig, SnapshotConfig, WorkspaceConfig};
