//! HTTP transport for the chat-completions endpoint.
//!
//! Transient upstream trouble (429, 503, connection drops) is retried a
//! bounded number of times with exponential backoff and jitter; anything
//! else propagates and fails the run.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use rand::Rng;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::LlmConfig;

use super::{LlmClient, Role};

const MAX_RETRIES: u32 = 3;
const BACKOFF_BASE_MS: u64 = 500;
const JITTER_MS: u64 = 250;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("LLM endpoint returned {status}: {body}")]
    Upstream { status: StatusCode, body: String },
    #[error("LLM response contained no choices")]
    EmptyResponse,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: String,
}

/// Chat-completions client with bounded retry.
pub struct HttpLlmClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl HttpLlmClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
        })
    }

    fn is_retryable_status(status: StatusCode) -> bool {
        status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::SERVICE_UNAVAILABLE
    }

    fn backoff(attempt: u32) -> Duration {
        let jitter = rand::thread_rng().gen_range(0..JITTER_MS);
        Duration::from_millis(BACKOFF_BASE_MS * 2u64.pow(attempt) + jitter)
    }

    async fn request_once(&self, role: Role, prompt: &str, temperature: f32) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: role.system_preamble(),
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature,
        };

        let mut builder = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.header(AUTHORIZATION, format!("Bearer {key}"));
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Upstream { status, body }.into());
        }

        let body: ChatResponse = response.json().await?;
        body.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| TransportError::EmptyResponse.into())
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn generate(&self, role: Role, prompt: &str, temperature: f32) -> Result<String> {
        let mut attempt = 0u32;
        loop {
            match self.request_once(role, prompt, temperature).await {
                Ok(text) => {
                    debug!(role = role.name(), chars = text.len(), "LLM response received");
                    return Ok(text);
                }
                Err(err) => {
                    let retryable = match err.downcast_ref::<TransportError>() {
                        Some(TransportError::Upstream { status, .. }) => {
                            Self::is_retryable_status(*status)
                        }
                        Some(_) => false,
                        // reqwest-level transport errors (timeouts,
                        // connection resets) are transient.
                        None => err
                            .downcast_ref::<reqwest::Error>()
                            .map(|e| e.is_timeout() || e.is_connect() || e.is_request())
                            .unwrap_or(false),
                    };
                    if !retryable || attempt >= MAX_RETRIES {
                        return Err(err);
                    }
                    let delay = Self::backoff(attempt);
                    warn!(
                        role = role.name(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying LLM request"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
