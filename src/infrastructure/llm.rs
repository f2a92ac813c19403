//! Chat-completions client for OpenAI-compatible endpoints.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::domain::types::Message;

const CHAT_COMPLETIONS_PATH: &str = "chat/completions";
const MAX_TOKENS: u32 = 4096;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const READ_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("failed to build http client: {source}")]
    Client {
        #[source]
        source: reqwest::Error,
    },
    #[error("network error calling '{url}': {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("endpoint returned invalid response: {reason}")]
    InvalidResponse { reason: String },
}

impl LlmError {
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    pub fn invalid_response(reason: impl Into<String>) -> Self {
        Self::InvalidResponse {
            reason: reason.into(),
        }
    }
}

/// The LLM seam. The agent only ever needs one reply string for a prompt
/// plus conversation, so tests can script this trait directly.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn complete(
        &self,
        system_prompt: &str,
        messages: &[Message],
    ) -> Result<String, LlmError>;
}

/// Talks to `{base_url}/chat/completions`. Local endpoints need no auth.
pub struct HttpChatClient {
    base_url: String,
    model_id: String,
    http: reqwest::Client,
}

impl HttpChatClient {
    pub fn new(
        base_url: impl Into<String>,
        model_id: impl Into<String>,
    ) -> Result<Self, LlmError> {
        Self::with_timeouts(base_url, model_id, CONNECT_TIMEOUT, READ_TIMEOUT)
    }

    /// Client with endpoint-specific connect and read timeouts.
    pub fn with_timeouts(
        base_url: impl Into<String>,
        model_id: impl Into<String>,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(read_timeout)
            .build()
            .map_err(|source| LlmError::Client { source })?;
        Ok(Self {
            base_url: base_url.into(),
            model_id: model_id.into(),
            http,
        })
    }

    fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        format!("{base}/{CHAT_COMPLETIONS_PATH}")
    }
}

#[async_trait]
impl ChatBackend for HttpChatClient {
    async fn complete(
        &self,
        system_prompt: &str,
        messages: &[Message],
    ) -> Result<String, LlmError> {
        let url = self.endpoint();

        let mut wire_messages = Vec::with_capacity(messages.len() + 1);
        if !system_prompt.is_empty() {
            wire_messages.push(Message::system(system_prompt));
        }
        wire_messages.extend(messages.iter().cloned());

        let payload = ChatCompletionsRequest {
            model: self.model_id.clone(),
            max_tokens: MAX_TOKENS,
            messages: wire_messages,
        };

        info!(
            model = %self.model_id,
            messages = payload.messages.len(),
            "sending chat completion request"
        );
        let response: ChatCompletionsResponse = self
            .http
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|source| LlmError::network(&url, source))?
            .error_for_status()
            .map_err(|source| LlmError::network(&url, source))?
            .json()
            .await
            .map_err(|source| LlmError::network(&url, source))?;
        debug!("received chat completion response");

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .map(|message| message.content)
            .ok_or_else(|| LlmError::invalid_response("missing choices[0].message.content"))
    }
}

#[derive(Serialize)]
struct ChatCompletionsRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<Message>,
}

#[derive(Deserialize)]
struct ChatCompletionsResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: Option<ChatChoiceMessage>,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}
