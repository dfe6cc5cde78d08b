/*!
 * Translator adapters.
 *
 * This module contains the translation capability the pipeline depends on
 * and its client implementations:
 * - OpenAI: OpenAI-compatible chat completions
 * - Anthropic: Anthropic messages API
 * - Mock: scripted translator for tests and dry runs
 */

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::Arc;

use crate::app_config::{Pricing, TranslationConfig, TranslationProvider};
use crate::errors::TranslatorError;
use crate::language_utils::SupportedLanguage;
use crate::translation::prompts::{build_payload, reconcile, PromptTemplate};
use crate::translation::segmenter::Segment;

pub mod anthropic;
pub mod mock;
pub mod openai;

/// One unit's segments going to one target language
#[derive(Debug, Clone, PartialEq)]
pub struct TranslationRequest {
    pub content_id: String,
    /// ISO 639-1 code of the source text
    pub source_language: String,
    pub target_language: SupportedLanguage,
    pub segments: Vec<Segment>,
}

/// Token usage and its price for one call
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cost_usd: f64,
}

impl Usage {
    pub fn priced(prompt_tokens: u64, completion_tokens: u64, pricing: &Pricing) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            cost_usd: pricing.cost_of(prompt_tokens, completion_tokens),
        }
    }

    pub fn add(&mut self, other: &Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.cost_usd += other.cost_usd;
    }
}

/// Successful translation of every requested segment
#[derive(Debug, Clone, PartialEq)]
pub struct TranslationResponse {
    pub segments: Vec<Segment>,
    pub usage: Usage,
}

/// The external translation capability.
///
/// Implementations return either every requested segment or a classified
/// failure; both carry the cost the call consumed.
#[async_trait]
pub trait Translator: Send + Sync + Debug {
    /// Short identifier used in logs
    fn name(&self) -> &str;

    async fn translate(&self, request: &TranslationRequest) -> Result<TranslationResponse, TranslatorError>;
}

/// Shared prompt settings for the HTTP clients
#[derive(Debug, Clone)]
pub struct PromptSettings {
    pub template: PromptTemplate,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl PromptSettings {
    pub fn from_config(config: &TranslationConfig) -> Self {
        Self {
            template: PromptTemplate::new(&config.common.system_prompt),
            temperature: config.common.temperature,
            max_tokens: config.common.max_tokens,
        }
    }

    /// System prompt and user payload for a request
    pub fn messages(&self, request: &TranslationRequest) -> (String, String) {
        let source_name = isolang::Language::from_639_1(&request.source_language.to_lowercase())
            .map(|l| l.to_name())
            .unwrap_or(request.source_language.as_str());
        let system = self
            .template
            .render(source_name, request.target_language.display_name());
        (system, build_payload(&request.segments))
    }
}

/// Turn raw model output into a response, or a partial failure when ids are missing
pub fn finish_translation(
    request: &TranslationRequest,
    text: &str,
    usage: Usage,
) -> Result<TranslationResponse, TranslatorError> {
    let reconciliation = reconcile(text, &request.segments);
    if !reconciliation.is_complete() {
        return Err(TranslatorError::Partial {
            missing: reconciliation.missing,
            cost_usd: usage.cost_usd,
        });
    }

    Ok(TranslationResponse {
        segments: reconciliation.segments,
        usage,
    })
}

/// Build the configured translator
pub fn build_translator(config: &TranslationConfig) -> anyhow::Result<Arc<dyn Translator>> {
    let settings = PromptSettings::from_config(config);
    let resolved = config.resolve();

    let translator: Arc<dyn Translator> = match resolved.provider {
        TranslationProvider::OpenAI => Arc::new(openai::OpenAI::new(
            resolved.api_key,
            resolved.endpoint,
            resolved.model,
            resolved.timeout,
            resolved.pricing,
            settings,
        )?),
        TranslationProvider::Anthropic => Arc::new(anthropic::Anthropic::new(
            resolved.api_key,
            resolved.endpoint,
            resolved.model,
            resolved.timeout,
            resolved.pricing,
            settings,
        )?),
    };

    Ok(translator)
}
