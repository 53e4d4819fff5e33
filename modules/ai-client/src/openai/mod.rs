mod client;
pub(crate) mod types;

use std::time::Duration;

use crate::error::{AiError, Result};
use crate::traits::Message;
use tracing::warn;

use client::OpenAiClient;
use types::{uses_max_completion_tokens, ChatRequest, WireMessage};

const DEFAULT_MAX_TOKENS: u32 = 1024;

// =============================================================================
// OpenAi Agent
// =============================================================================

#[derive(Clone)]
pub struct OpenAi {
    api_key: String,
    pub(crate) model: String,
    base_url: Option<String>,
    json_mode: bool,
    max_output_tokens: Option<u32>,
    http: reqwest::Client,
}

impl OpenAi {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: None,
            json_mode: false,
            max_output_tokens: None,
            http: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Ask for `response_format: json_object`. Models that reject it are
    /// retried once without it.
    pub fn with_json_mode(mut self, enabled: bool) -> Self {
        self.json_mode = enabled;
        self
    }

    /// Completion cap. Unset, chat models get 1024 tokens and reasoning
    /// models get no cap, since their hidden reasoning counts against it.
    pub fn with_max_output_tokens(mut self, tokens: u32) -> Self {
        self.max_output_tokens = Some(tokens);
        self
    }

    /// Per-request timeout. Replaces the underlying HTTP client.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AiError::Config(e.to_string()))?;
        Ok(self)
    }

    /// Get the model name.
    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn json_mode(&self) -> bool {
        self.json_mode
    }

    pub(crate) fn client(&self) -> OpenAiClient {
        let client = OpenAiClient::new(&self.api_key, self.http.clone());
        if let Some(ref url) = self.base_url {
            client.with_base_url(url)
        } else {
            client
        }
    }

    fn request(&self, messages: &[Message]) -> ChatRequest {
        let request =
            ChatRequest::new(&self.model).messages(messages.iter().map(WireMessage::from));

        // Reasoning models reject temperature and max_tokens.
        if uses_max_completion_tokens(&self.model) {
            match self.max_output_tokens {
                Some(cap) => request.max_completion_tokens(cap),
                None => request,
            }
        } else {
            request
                .max_tokens(self.max_output_tokens.unwrap_or(DEFAULT_MAX_TOKENS))
                .temperature(0.0)
        }
    }

    /// Send a conversation and return the first completion's text.
    pub async fn complete_messages(&self, messages: &[Message]) -> Result<String> {
        let client = self.client();
        let base = self.request(messages);

        let response = if self.json_mode {
            match client.chat(&base.clone().json_object()).await {
                Err(e) if e.rejects_response_format() => {
                    warn!(model = %self.model, "JSON mode rejected, retrying without response_format");
                    client.chat(&base).await?
                }
                other => other?,
            }
        } else {
            client.chat(&base).await?
        };

        response.into_text().ok_or(AiError::EmptyResponse)
    }
}
