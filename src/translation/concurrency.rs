/*!
 * Fan-out concurrency tuning and dispatch pacing.
 *
 * This module combines the configured worker limit with provider-specific
 * ceilings, and provides the pacer that keeps a minimum spacing between
 * translator dispatches.
 */

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};

use crate::app_config::{PipelineConfig, TranslationProvider};

/// Provider-specific concurrency profile
#[derive(Debug, Clone)]
pub struct ProviderProfile {
    /// Maximum concurrent requests the provider tolerates comfortably
    pub max_concurrent_requests: usize,
    /// Shortest spacing between two requests
    pub min_dispatch_spacing: Duration,
}

impl ProviderProfile {
    /// Get the profile for a given provider
    pub fn for_provider(provider: TranslationProvider) -> Self {
        match provider {
            TranslationProvider::OpenAI => Self {
                max_concurrent_requests: 10,
                min_dispatch_spacing: Duration::from_millis(250),
            },
            TranslationProvider::Anthropic => Self {
                // Lower rate limits on most tiers
                max_concurrent_requests: 5,
                min_dispatch_spacing: Duration::from_millis(500),
            },
        }
    }
}

/// Effective fan-out settings for one orchestrator
#[derive(Debug, Clone, PartialEq)]
pub struct ConcurrencySettings {
    /// Language workers in flight at once
    pub max_concurrent_languages: usize,
    /// Minimum spacing between two dispatches
    pub dispatch_delay: Duration,
}

impl ConcurrencySettings {
    pub fn new(max_concurrent_languages: usize, dispatch_delay: Duration) -> Self {
        Self {
            max_concurrent_languages: max_concurrent_languages.max(1),
            dispatch_delay,
        }
    }

    /// Configured limits, tightened to what the provider tolerates
    pub fn for_provider(config: &PipelineConfig, provider: TranslationProvider) -> Self {
        let profile = ProviderProfile::for_provider(provider);
        Self::new(
            config.max_concurrent_languages.min(profile.max_concurrent_requests),
            config.dispatch_delay().max(profile.min_dispatch_spacing),
        )
    }
}

impl Default for ConcurrencySettings {
    fn default() -> Self {
        let config = PipelineConfig::default();
        Self::new(config.max_concurrent_languages, config.dispatch_delay())
    }
}

/// Enforces a minimum spacing between consecutive dispatches.
///
/// Callers queue on the inner lock, so dispatches leave one at a time in
/// arrival order.
#[derive(Debug)]
pub struct DispatchPacer {
    min_spacing: Duration,
    last_dispatch: Mutex<Option<Instant>>,
}

impl DispatchPacer {
    pub fn new(min_spacing: Duration) -> Self {
        Self {
            min_spacing,
            last_dispatch: Mutex::new(None),
        }
    }

    /// Wait until the spacing since the previous dispatch has elapsed
    pub async fn wait_turn(&self) {
        let mut last = self.last_dispatch.lock().await;
        if let Some(previous) = *last {
            sleep_until(previous + self.min_spacing).await;
        }
        *last = Some(Instant::now());
    }
}
