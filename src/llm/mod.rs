//! LLM access: the role-based client seam and its HTTP implementation.
//!
//! The loop treats the model strictly as a text oracle behind
//! [`LlmClient`]; all sequencing and safety live in the callers.

pub mod transport;

pub use transport::{HttpLlmClient, TransportError};

use anyhow::Result;
use async_trait::async_trait;

/// Role a generation request is issued under. Each role maps to a
/// canonical sampling temperature and a stable system preamble.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Planner,
    Executor,
    Critic,
    Mediator,
}

impl Role {
    pub fn canonical_temperature(self) -> f32 {
        match self {
            Role::Planner => 0.2,
            Role::Executor => 0.1,
            Role::Critic => 0.4,
            Role::Mediator => 0.0,
        }
    }

    /// Fallback temperature for requests outside the four roles.
    pub const DEFAULT_TEMPERATURE: f32 = 0.3;

    pub fn system_preamble(self) -> &'static str {
        match self {
            Role::Planner => {
                "You are the planning component of an automated program-repair system. \
                 You produce short ordered plans as JSON and nothing else."
            }
            Role::Executor => {
                "You are the execution component of an automated program-repair system. \
                 You answer with a single JSON object exactly as instructed; no prose \
                 outside the JSON."
            }
            Role::Critic => {
                "You are the reviewing component of an automated program-repair system. \
                 You give a short, blunt assessment of the latest execution."
            }
            Role::Mediator => {
                "You are the arbitration component of an automated program-repair system."
            }
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Role::Planner => "planner",
            Role::Executor => "executor",
            Role::Critic => "critic",
            Role::Mediator => "mediator",
        }
    }
}

/// Opaque text oracle. Implementations must be safe to share across
/// concurrent runs.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn generate(&self, role: Role, prompt: &str, temperature: f32) -> Result<String>;
}
