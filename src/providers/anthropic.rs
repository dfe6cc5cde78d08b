use async_trait::async_trait;
use log::{debug, error, warn};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{finish_translation, PromptSettings, TranslationRequest, TranslationResponse, Translator, Usage};
use crate::app_config::Pricing;
use crate::errors::{ProviderError, TranslatorError};

const DEFAULT_ENDPOINT: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

/// Anthropic messages API client
#[derive(Debug)]
pub struct Anthropic {
    client: Client,
    api_key: String,
    /// Base URL; empty means the public API
    endpoint: String,
    model: String,
    pricing: Pricing,
    settings: PromptSettings,
}

/// Messages API request body
#[derive(Debug, Serialize)]
pub struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    messages: Vec<AnthropicMessage>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AnthropicMessage {
    pub role: String,
    pub content: String,
}

/// Response content block; only text blocks carry a translation
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
pub struct AnthropicUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Messages API response body
#[derive(Debug, Deserialize)]
pub struct AnthropicResponse {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub usage: Option<AnthropicUsage>,
}

impl AnthropicRequest {
    pub fn new(model: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            model: model.into(),
            max_tokens,
            system: None,
            temperature: None,
            messages: Vec::new(),
        }
    }

    pub fn add_message(mut self, role: impl Into<String>, content: impl Into<String>) -> Self {
        self.messages.push(AnthropicMessage {
            role: role.into(),
            content: content.into(),
        });
        self
    }

    pub fn system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

impl AnthropicResponse {
    /// Text blocks joined in order
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                ContentBlock::Other => None,
            })
            .collect()
    }

    /// The model stopped at `max_tokens` rather than finishing
    pub fn is_truncated(&self) -> bool {
        self.stop_reason.as_deref() == Some("max_tokens")
    }
}

impl Anthropic {
    pub fn new(
        api_key: impl Into<String>,
        endpoint: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
        pricing: Pricing,
        settings: PromptSettings,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {}", e))?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            endpoint: endpoint.into(),
            model: model.into(),
            pricing,
            settings,
        })
    }

    fn messages_url(&self) -> String {
        let base = if self.endpoint.is_empty() {
            DEFAULT_ENDPOINT
        } else {
            self.endpoint.trim_end_matches('/')
        };
        format!("{}/v1/messages", base)
    }

    /// Send one messages request
    pub async fn complete(&self, request: AnthropicRequest) -> Result<AnthropicResponse, ProviderError> {
        let response = self
            .client
            .post(self.messages_url())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::ConnectionError(format!("Failed to reach Anthropic API: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            error!("Anthropic API error ({}): {}", status, body);
            return Err(ProviderError::from_status(status.as_u16(), body));
        }

        response
            .json::<AnthropicResponse>()
            .await
            .map_err(|e| ProviderError::ParseError(format!("Unexpected Anthropic response: {}", e)))
    }
}

#[async_trait]
impl Translator for Anthropic {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn translate(&self, request: &TranslationRequest) -> Result<TranslationResponse, TranslatorError> {
        let (system, payload) = self.settings.messages(request);
        let api_request = AnthropicRequest::new(&self.model, self.settings.max_tokens)
            .system(system)
            .temperature(self.settings.temperature)
            .add_message("user", payload);

        let response = self
            .complete(api_request)
            .await
            .map_err(|e| e.into_translator_error(0.0))?;

        let usage = response
            .usage
            .as_ref()
            .map(|u| Usage::priced(u.input_tokens, u.output_tokens, &self.pricing))
            .unwrap_or_default();
        debug!(
            "Anthropic {} -> {}: {} input / {} output tokens",
            request.content_id, request.target_language, usage.prompt_tokens, usage.completion_tokens
        );
        if response.is_truncated() {
            warn!(
                "Anthropic stopped at max_tokens for {} ({}); later segments may be missing",
                request.content_id, request.target_language
            );
        }

        let text = response.text();
        if text.trim().is_empty() {
            return Err(TranslatorError::Retryable {
                message: "Anthropic returned no text content".to_string(),
                cost_usd: usage.cost_usd,
            });
        }

        finish_translation(request, &text, usage)
    }
}
