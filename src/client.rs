//! Transport client.
//!
//! One non-retrying POST per request; the response body is handed to the frame
//! reader and a `Session` decodes it.

use crate::constants::{DEFAULT_ENDPOINT, DEFAULT_MAX_INPUT_TOKENS, DEFAULT_MODEL};
use crate::frames::frame_stream;
use crate::session::Session;
use crate::token_counting::TokenEstimator;
use crate::types::*;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Value>>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            tools: None,
            stream: true,
            max_tokens: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    pub max_input_tokens: usize,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
}

impl ClientConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            max_input_tokens: DEFAULT_MAX_INPUT_TOKENS,
            request_timeout: Duration::from_secs(300),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

pub struct ChatClient {
    http: reqwest::Client,
    config: ClientConfig,
}

impl ChatClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .build()
            .map_err(ChatDeltaError::Network)?;
        Ok(Self::with_http(http, config))
    }

    pub fn with_http(http: reqwest::Client, config: ClientConfig) -> Self {
        Self { http, config }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Builds a streaming request for the configured model.
    pub fn request(&self, messages: Vec<ChatMessage>) -> ChatRequest {
        ChatRequest::new(self.config.model.clone(), messages)
    }

    /// Rejects a request whose estimated input size exceeds the configured limit.
    pub fn check_budget(&self, request: &ChatRequest) -> Result<usize> {
        let estimated = TokenEstimator::estimate_request_tokens(request);
        if estimated > self.config.max_input_tokens {
            tracing::warn!(
                "[⚙️  -> ☁️ ] Request rejected: ~{} input tokens exceeds limit {}",
                estimated,
                self.config.max_input_tokens
            );
            return Err(ChatDeltaError::TokenBudgetExceeded {
                estimated,
                limit: self.config.max_input_tokens,
            }
            .into());
        }
        Ok(estimated)
    }

    /// Sends the request and validates the response head.
    pub async fn open_stream(&self, request: &ChatRequest) -> Result<reqwest::Response> {
        let estimated = self.check_budget(request)?;
        tracing::info!(
            "[⚙️  -> ☁️ ] POST {} (model: {}, messages: {}, ~{} input tokens)",
            self.config.endpoint,
            request.model,
            request.messages.len(),
            estimated
        );

        let response = self
            .http
            .post(&self.config.endpoint)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Accept", "text/event-stream")
            .json(request)
            .send()
            .await
            .map_err(ChatDeltaError::Network)?;

        let status = response.status();
        if !status.is_success() {
            let body = match response.text().await {
                Ok(t) => t,
                Err(_) => "Unknown error (failed to read response text)".to_string(),
            };
            tracing::error!(
                "[☁️  -> ⚙️ ] Upstream returned {}: {}",
                status,
                crate::str_utils::snippet(&body, 500)
            );
            return Err(ChatDeltaError::UpstreamHttp {
                status: status.as_u16(),
                body,
            }
            .into());
        }

        if response.content_length() == Some(0) {
            tracing::error!("[☁️  -> ⚙️ ] Upstream returned {} with an empty body", status);
            return Err(ChatDeltaError::NoResponseBody.into());
        }

        Ok(response)
    }

    /// Sends `request` and decodes the streamed reply through `session`.
    pub async fn stream_chat(
        &self,
        request: &ChatRequest,
        session: &mut Session,
        cancel: &CancellationToken,
        tx: &mpsc::Sender<EmittedEvent>,
    ) -> Result<StreamSummary> {
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(session.cancel()),
            response = self.open_stream(request) => response?,
        };

        let bytes_stream = response
            .bytes_stream()
            .map(|r| r.map_err(std::io::Error::other));
        let frames = frame_stream(bytes_stream);
        tokio::pin!(frames);
        session.run(frames, cancel, tx).await
    }
}
