use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::default::Default;
use std::path::Path;
use std::time::Duration;

use crate::language_utils::{parse_language_list, SupportedLanguage};

// @module: JSON configuration with per-field defaults

/// Settings read from `conf.json`
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    /// SQLite database file; empty selects the platform data directory
    #[serde(default)]
    pub database_path: String,

    /// Languages every chapter should end up translated into
    #[serde(default = "default_target_languages")]
    pub target_languages: Vec<String>,

    /// Translation provider config
    #[serde(default)]
    pub translation: TranslationConfig,

    /// Fan-out, retry and polling settings
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Monthly spending defaults
    #[serde(default)]
    pub budget: BudgetConfig,

    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,
}

/// Translation provider type
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TranslationProvider {
    // @provider: OpenAI-compatible chat completions
    #[default]
    OpenAI,
    // @provider: Anthropic messages API
    Anthropic,
}

impl TranslationProvider {
    // @returns: Capitalized provider name
    pub fn display_name(&self) -> &str {
        match self {
            Self::OpenAI => "OpenAI",
            Self::Anthropic => "Anthropic",
        }
    }

    /// Environment variable consulted when the config file has no key
    pub fn api_key_env_var(&self) -> &'static str {
        match self {
            Self::OpenAI => "OPENAI_API_KEY",
            Self::Anthropic => "ANTHROPIC_API_KEY",
        }
    }
}

impl std::fmt::Display for TranslationProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenAI => write!(f, "openai"),
            Self::Anthropic => write!(f, "anthropic"),
        }
    }
}

impl std::str::FromStr for TranslationProvider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "anthropic" => Ok(Self::Anthropic),
            _ => Err(anyhow!("Invalid provider type: {}", s)),
        }
    }
}

/// One entry of `translation.available_providers`; empty strings fall back to defaults
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProviderConfig {
    // @field: Which client this entry configures
    #[serde(rename = "type")]
    pub provider_type: TranslationProvider,

    #[serde(default)]
    pub model: String,

    // @field: Empty falls back to the provider's environment variable
    #[serde(default)]
    pub api_key: String,

    #[serde(default)]
    pub endpoint: String,

    // @field: Timeout seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    // @field: Price per 1K prompt tokens (USD)
    #[serde(default)]
    pub input_cost_per_1k_tokens: f64,

    // @field: Price per 1K completion tokens (USD)
    #[serde(default)]
    pub output_cost_per_1k_tokens: f64,
}

impl ProviderConfig {
    // @param provider_type: Provider enum
    // @returns: Provider config with defaults
    pub fn new(provider_type: TranslationProvider) -> Self {
        match provider_type {
            TranslationProvider::OpenAI => Self {
                provider_type,
                model: default_openai_model(),
                api_key: String::new(),
                endpoint: default_openai_endpoint(),
                timeout_secs: default_timeout_secs(),
                input_cost_per_1k_tokens: 0.00015,
                output_cost_per_1k_tokens: 0.0006,
            },
            TranslationProvider::Anthropic => Self {
                provider_type,
                model: default_anthropic_model(),
                api_key: String::new(),
                endpoint: default_anthropic_endpoint(),
                timeout_secs: default_anthropic_timeout_secs(),
                input_cost_per_1k_tokens: 0.0008,
                output_cost_per_1k_tokens: 0.004,
            },
        }
    }

    /// Pricing used to turn token usage into dollars
    pub fn pricing(&self) -> Pricing {
        Pricing {
            input_per_1k_usd: self.input_cost_per_1k_tokens,
            output_per_1k_usd: self.output_cost_per_1k_tokens,
        }
    }
}

/// Per-1K-token prices for a provider
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Pricing {
    pub input_per_1k_usd: f64,
    pub output_per_1k_usd: f64,
}

impl Pricing {
    /// Dollar cost of a call with the given token counts
    pub fn cost_of(&self, prompt_tokens: u64, completion_tokens: u64) -> f64 {
        (prompt_tokens as f64 / 1000.0) * self.input_per_1k_usd
            + (completion_tokens as f64 / 1000.0) * self.output_per_1k_usd
    }
}

/// Translation service configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TranslationConfig {
    /// Translation provider to use
    #[serde(default)]
    pub provider: TranslationProvider,

    /// Available translation providers
    #[serde(default)]
    pub available_providers: Vec<ProviderConfig>,

    /// Common translation settings
    #[serde(default)]
    pub common: TranslationCommonConfig,
}

/// Common translation settings applicable to all providers
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TranslationCommonConfig {
    /// System prompt template for translation
    /// Placeholders: {source_language}, {target_language}
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Temperature parameter for text generation (0.0 to 1.0)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Upper bound on generated tokens per call
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for TranslationCommonConfig {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

/// Fan-out, retry and polling settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PipelineConfig {
    /// Language workers allowed in flight for one chapter
    #[serde(default = "default_max_concurrent_languages")]
    pub max_concurrent_languages: usize,

    /// Minimum spacing between two translator dispatches
    #[serde(default = "default_dispatch_delay_ms")]
    pub dispatch_delay_ms: u64,

    /// Pause between chapter kickoffs in a bulk request
    #[serde(default = "default_inter_unit_delay_ms")]
    pub inter_unit_delay_ms: u64,

    /// Total attempts per language, including the first one
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,

    /// Base backoff time, doubled on each retry
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Cap on a single backoff delay
    #[serde(default = "default_retry_max_backoff_ms")]
    pub retry_max_backoff_ms: u64,

    /// Random extra delay as a fraction of the backoff (0.0 to 1.0)
    #[serde(default = "default_retry_jitter")]
    pub retry_jitter: f64,

    /// A `processing` claim older than this may be taken over
    #[serde(default = "default_claim_timeout_secs")]
    pub claim_timeout_secs: u64,

    /// How often the CLI polls job status
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_languages: default_max_concurrent_languages(),
            dispatch_delay_ms: default_dispatch_delay_ms(),
            inter_unit_delay_ms: default_inter_unit_delay_ms(),
            retry_count: default_retry_count(),
            retry_backoff_ms: default_retry_backoff_ms(),
            retry_max_backoff_ms: default_retry_max_backoff_ms(),
            retry_jitter: default_retry_jitter(),
            claim_timeout_secs: default_claim_timeout_secs(),
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

impl PipelineConfig {
    pub fn dispatch_delay(&self) -> Duration {
        Duration::from_millis(self.dispatch_delay_ms)
    }

    pub fn inter_unit_delay(&self) -> Duration {
        Duration::from_millis(self.inter_unit_delay_ms)
    }

    pub fn claim_timeout(&self) -> Duration {
        Duration::from_secs(self.claim_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// Budget defaults applied when a new month has no predecessor
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BudgetConfig {
    #[serde(default = "default_monthly_ceiling_usd")]
    pub monthly_ceiling_usd: f64,

    /// Percentage of the ceiling that raises the alert flag
    #[serde(default = "default_alert_threshold_pct")]
    pub alert_threshold_pct: f64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            monthly_ceiling_usd: default_monthly_ceiling_usd(),
            alert_threshold_pct: default_alert_threshold_pct(),
        }
    }
}

/// Log verbosity level
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

fn default_target_languages() -> Vec<String> {
    SupportedLanguage::ALL.iter().map(|l| l.code().to_string()).collect()
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_anthropic_timeout_secs() -> u64 {
    120
}

fn default_temperature() -> f32 {
    0.3
}

fn default_max_tokens() -> u32 {
    8192
}

fn default_max_concurrent_languages() -> usize {
    3
}

fn default_dispatch_delay_ms() -> u64 {
    1000
}

fn default_inter_unit_delay_ms() -> u64 {
    2000
}

fn default_retry_count() -> u32 {
    4
}

fn default_retry_backoff_ms() -> u64 {
    1000 // 1 second base backoff time, doubled on each retry
}

fn default_retry_max_backoff_ms() -> u64 {
    30_000
}

fn default_retry_jitter() -> f64 {
    0.2
}

fn default_claim_timeout_secs() -> u64 {
    900
}

fn default_poll_interval_secs() -> u64 {
    20
}

fn default_monthly_ceiling_usd() -> f64 {
    50.0
}

fn default_alert_threshold_pct() -> f64 {
    80.0
}

fn default_openai_endpoint() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_anthropic_endpoint() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_openai_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_anthropic_model() -> String {
    "claude-3-5-haiku-latest".to_string()
}

fn default_system_prompt() -> String {
    "You are a professional literary translator. Translate the following chapter fragments from {source_language} to {target_language}. Preserve the tone, voice and meaning of the original.".to_string()
}

impl Config {
    /// Load a config file, or write the defaults there if it does not exist yet
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<(Self, bool)> {
        let path = path.as_ref();
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config: Config = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
            Ok((config, false))
        } else {
            let config = Config::default();
            let json = serde_json::to_string_pretty(&config)?;
            std::fs::write(path, json)
                .with_context(|| format!("Failed to write default config: {}", path.display()))?;
            Ok((config, true))
        }
    }

    /// Parsed target languages
    pub fn target_languages(&self) -> Result<Vec<SupportedLanguage>> {
        parse_language_list(&self.target_languages).map_err(|e| anyhow!(e))
    }

    /// Validate the configuration for consistency and required values
    pub fn validate(&self) -> Result<()> {
        let languages = self.target_languages()?;
        if languages.is_empty() {
            return Err(anyhow!("At least one target language must be configured"));
        }

        let provider = self.translation.resolve();
        url::Url::parse(&provider.endpoint)
            .with_context(|| format!("Invalid provider endpoint: {}", provider.endpoint))?;

        if provider.api_key.is_empty() {
            return Err(anyhow!(
                "Translation API key is required for {} provider (set it in the config or {})",
                self.translation.provider.display_name(),
                self.translation.provider.api_key_env_var()
            ));
        }

        let pipeline = &self.pipeline;
        if pipeline.max_concurrent_languages == 0 {
            return Err(anyhow!("pipeline.max_concurrent_languages must be at least 1"));
        }
        if pipeline.retry_count == 0 {
            return Err(anyhow!("pipeline.retry_count must be at least 1"));
        }
        if !(0.0..=1.0).contains(&pipeline.retry_jitter) {
            return Err(anyhow!("pipeline.retry_jitter must be between 0.0 and 1.0"));
        }

        if !self.budget.monthly_ceiling_usd.is_finite() || self.budget.monthly_ceiling_usd < 0.0 {
            return Err(anyhow!("budget.monthly_ceiling_usd must be a non-negative amount"));
        }
        let threshold = self.budget.alert_threshold_pct;
        if !(threshold > 0.0 && threshold <= 100.0) {
            return Err(anyhow!("budget.alert_threshold_pct must be in (0, 100]"));
        }

        Ok(())
    }
}

/// Default implementation for Config
impl Default for Config {
    fn default() -> Self {
        Config {
            database_path: String::new(),
            target_languages: default_target_languages(),
            translation: TranslationConfig::default(),
            pipeline: PipelineConfig::default(),
            budget: BudgetConfig::default(),
            log_level: LogLevel::default(),
        }
    }
}

/// Settings of the active provider with defaults and the environment applied
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedProvider {
    pub provider: TranslationProvider,
    pub model: String,
    pub api_key: String,
    pub endpoint: String,
    pub timeout: Duration,
    pub pricing: Pricing,
}

impl TranslationConfig {
    /// First `available_providers` entry for `provider`
    pub fn provider_config(&self, provider: TranslationProvider) -> Option<&ProviderConfig> {
        self.available_providers
            .iter()
            .find(|p| p.provider_type == provider)
    }

    pub fn provider_config_mut(&mut self, provider: TranslationProvider) -> &mut ProviderConfig {
        let index = match self.available_providers.iter().position(|p| p.provider_type == provider) {
            Some(index) => index,
            None => {
                self.available_providers.push(ProviderConfig::new(provider));
                self.available_providers.len() - 1
            }
        };
        &mut self.available_providers[index]
    }

    /// Fill the active provider's blanks from built-in defaults and the environment
    pub fn resolve(&self) -> ResolvedProvider {
        let defaults = ProviderConfig::new(self.provider);
        let entry = self.provider_config(self.provider);
        let pick = |value: Option<&String>, fallback: &String| {
            value
                .filter(|v| !v.is_empty())
                .unwrap_or(fallback)
                .clone()
        };

        let api_key = entry
            .map(|p| p.api_key.clone())
            .filter(|k| !k.is_empty())
            .unwrap_or_else(|| std::env::var(self.provider.api_key_env_var()).unwrap_or_default());
        let timeout_secs = entry
            .map(|p| p.timeout_secs)
            .filter(|secs| *secs > 0)
            .unwrap_or(defaults.timeout_secs);

        ResolvedProvider {
            provider: self.provider,
            model: pick(entry.map(|p| &p.model), &defaults.model),
            api_key,
            endpoint: pick(entry.map(|p| &p.endpoint), &defaults.endpoint),
            timeout: Duration::from_secs(timeout_secs),
            pricing: entry.unwrap_or(&defaults).pricing(),
        }
    }
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            provider: TranslationProvider::default(),
            available_providers: vec![
                ProviderConfig::new(TranslationProvider::OpenAI),
                ProviderConfig::new(TranslationProvider::Anthropic),
            ],
            common: TranslationCommonConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_key() -> Config {
        let mut config = Config::default();
        config.translation.available_providers[0].api_key = "sk-test".to_string();
        config
    }

    #[test]
    fn test_default_shouldTargetAllSupportedLanguages() {
        let config = Config::default();
        assert_eq!(config.target_languages().unwrap().len(), 14);
    }

    #[test]
    fn test_validate_withApiKey_shouldPass() {
        assert!(config_with_key().validate().is_ok());
    }

    #[test]
    fn test_validate_withUnsupportedTargetLanguage_shouldFail() {
        let mut config = config_with_key();
        config.target_languages = vec!["en".into(), "fr".into()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_withZeroConcurrency_shouldFail() {
        let mut config = config_with_key();
        config.pipeline.max_concurrent_languages = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_withThresholdOutOfRange_shouldFail() {
        let mut config = config_with_key();
        config.budget.alert_threshold_pct = 150.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_withBadEndpoint_shouldFail() {
        let mut config = config_with_key();
        config.translation.available_providers[0].endpoint = "not a url".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deserialize_withMissingSections_shouldUseDefaults() {
        let config: Config = serde_json::from_str(r#"{"target_languages": ["es", "de"]}"#).unwrap();
        assert_eq!(config.pipeline.max_concurrent_languages, 3);
        assert_eq!(config.pipeline.retry_count, 4);
        assert_eq!(config.budget.monthly_ceiling_usd, 50.0);
        assert_eq!(config.translation.provider, TranslationProvider::OpenAI);
        assert_eq!(config.target_languages().unwrap().len(), 2);
    }

    #[test]
    fn test_pricing_costOf_shouldScalePerThousandTokens() {
        let pricing = Pricing {
            input_per_1k_usd: 0.5,
            output_per_1k_usd: 1.5,
        };
        let cost = pricing.cost_of(2000, 1000);
        assert!((cost - 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_resolve_withBlankEntry_shouldFallBackToDefaults() {
        let mut config = Config::default();
        config.translation.provider = TranslationProvider::Anthropic;
        let entry = config.translation.provider_config_mut(TranslationProvider::Anthropic);
        entry.model = String::new();
        entry.endpoint = String::new();
        entry.api_key = "ak-test".to_string();
        entry.timeout_secs = 0;

        let resolved = config.translation.resolve();

        assert_eq!(resolved.model, default_anthropic_model());
        assert_eq!(resolved.endpoint, default_anthropic_endpoint());
        assert_eq!(resolved.api_key, "ak-test");
        assert_eq!(resolved.timeout, Duration::from_secs(default_anthropic_timeout_secs()));
    }

    #[test]
    fn test_providerConfig_withUnknownType_shouldFailToParse() {
        let parsed = serde_json::from_str::<ProviderConfig>(r#"{"type": "ollama", "model": "llama3"}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_providerFromStr() {
        assert_eq!("Anthropic".parse::<TranslationProvider>().unwrap(), TranslationProvider::Anthropic);
        assert!("ollama".parse::<TranslationProvider>().is_err());
    }
}
