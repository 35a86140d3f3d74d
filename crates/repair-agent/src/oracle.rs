//! HTTP code-generation oracle speaking the OpenAI chat completions protocol
//! (llama.cpp, vLLM, Ollama's `/v1`, hosted proxies).

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use coordination::oracle::{CodeGenerationOracle, OracleRequest};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::OracleConfig;

const SYSTEM_PROMPT: &str = "You are an operations engineer repairing a failing service. \
Reply with exactly one fenced code block (```bash or ```python) containing a \
non-interactive script that fixes the problem. The script runs unattended with a \
short timeout; do not ask questions.";

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    reasoning_content: Option<String>,
}

pub struct HttpOracle {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    max_tokens: u32,
    temperature: f32,
}

impl HttpOracle {
    /// Build from config; errors when no URL is configured
    pub fn from_config(config: &OracleConfig) -> Result<Self> {
        let url = config
            .url
            .as_deref()
            .ok_or_else(|| anyhow!("oracle.url is not set"))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build oracle HTTP client")?;
        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", url.trim_end_matches('/')),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Reply text of the first choice; reasoning-only replies are returned as is
fn reply_text(response: ChatResponse) -> Result<String> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("oracle returned no choices"))?;
    match (choice.message.content, choice.message.reasoning_content) {
        (Some(content), _) if !content.trim().is_empty() => Ok(content),
        (_, Some(reasoning)) => Ok(reasoning),
        (content, None) => Ok(content.unwrap_or_default()),
    }
}

#[async_trait]
impl CodeGenerationOracle for HttpOracle {
    async fn propose_repair(&self, request: &OracleRequest) -> Result<String> {
        let body = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".into(),
                    content: SYSTEM_PROMPT.into(),
                },
                ChatMessage {
                    role: "user".into(),
                    content: request.to_prompt(),
                },
            ],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let mut builder = self.http.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder
            .send()
            .await
            .with_context(|| format!("POST {} failed", self.endpoint))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            bail!("oracle API error ({status}): {text}");
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .context("Failed to parse oracle response")?;
        let text = reply_text(parsed)?;
        debug!(component = %request.component, chars = text.len(), "Oracle replied");
        Ok(text)
    }
}
