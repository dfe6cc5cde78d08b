/*!
 * Mock translator for tests and dry runs.
 *
 * Each target language can be given a script of steps that are consumed one
 * per call; once a language's script runs out the default step applies:
 * - `MockTranslator::working()` - always succeeds
 * - `MockTranslator::failing()` - always fails fatally
 *
 * Responses go through the same marker reconciliation as the HTTP clients.
 */

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::{finish_translation, TranslationRequest, TranslationResponse, Translator, Usage};
use crate::errors::{ProviderError, TranslatorError};
use crate::language_utils::SupportedLanguage;
use crate::translation::prompts::{segment_marker, END_MARKER};

/// What the mock does on one call
#[derive(Debug, Clone, PartialEq)]
pub enum MockStep {
    /// Translate every segment
    Succeed,
    /// HTTP 429
    RateLimited,
    /// HTTP 503
    Unavailable,
    /// HTTP 422 with the given message
    Fatal(String),
    /// Answer without the marker for this segment id
    DropSegment(String),
}

/// Scripted translator
#[derive(Debug)]
pub struct MockTranslator {
    scripts: Arc<Mutex<HashMap<SupportedLanguage, VecDeque<MockStep>>>>,
    default_step: MockStep,
    /// Cost reported by every call that produced output
    cost_per_call: f64,
    latency: Option<Duration>,
    calls: Arc<Mutex<HashMap<SupportedLanguage, usize>>>,
    total_calls: Arc<AtomicUsize>,
    /// Start of every call, in call order
    call_log: Arc<Mutex<Vec<(SupportedLanguage, Instant)>>>,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: Arc<AtomicUsize>,
}

impl MockTranslator {
    pub fn new(default_step: MockStep) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(HashMap::new())),
            default_step,
            cost_per_call: 0.0,
            latency: None,
            calls: Arc::new(Mutex::new(HashMap::new())),
            total_calls: Arc::new(AtomicUsize::new(0)),
            call_log: Arc::new(Mutex::new(Vec::new())),
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Create a working mock that always succeeds
    pub fn working() -> Self {
        Self::new(MockStep::Succeed)
    }

    /// Create a mock that always fails fatally
    pub fn failing() -> Self {
        Self::new(MockStep::Fatal("unsupported input".to_string()))
    }

    pub fn with_cost(mut self, cost_per_call: f64) -> Self {
        self.cost_per_call = cost_per_call;
        self
    }

    /// Every call waits this long before answering
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Queue steps for one language
    pub fn script(self, language: SupportedLanguage, steps: Vec<MockStep>) -> Self {
        self.scripts
            .lock()
            .entry(language)
            .or_default()
            .extend(steps);
        self
    }

    /// Calls made for one language
    pub fn calls_for(&self, language: SupportedLanguage) -> usize {
        self.calls.lock().get(&language).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.total_calls.load(Ordering::SeqCst)
    }

    /// Language and start time of every call so far
    pub fn call_starts(&self) -> Vec<(SupportedLanguage, Instant)> {
        self.call_log.lock().clone()
    }

    /// Most calls that were ever running at the same time
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn next_step(&self, language: SupportedLanguage) -> MockStep {
        self.scripts
            .lock()
            .get_mut(&language)
            .and_then(|steps| steps.pop_front())
            .unwrap_or_else(|| self.default_step.clone())
    }

    /// Marker-formatted answer translating every segment except `skip`
    fn render_answer(request: &TranslationRequest, skip: Option<&str>) -> String {
        let mut answer = String::new();
        for segment in &request.segments {
            if Some(segment.id.as_str()) == skip {
                continue;
            }
            answer.push_str(&segment_marker(&segment.id));
            answer.push('\n');
            answer.push_str(&format!("[{}] {}", request.target_language, segment.markup));
            answer.push('\n');
        }
        answer.push_str(END_MARKER);
        answer
    }

    fn usage_for(&self, request: &TranslationRequest) -> Usage {
        let chars: usize = request.segments.iter().map(|s| s.markup.len()).sum();
        Usage {
            prompt_tokens: (chars / 4) as u64 + 50,
            completion_tokens: (chars / 4) as u64,
            cost_usd: self.cost_per_call,
        }
    }
}

impl Clone for MockTranslator {
    fn clone(&self) -> Self {
        Self {
            scripts: Arc::clone(&self.scripts),
            default_step: self.default_step.clone(),
            cost_per_call: self.cost_per_call,
            latency: self.latency,
            calls: Arc::clone(&self.calls),
            total_calls: Arc::clone(&self.total_calls),
            call_log: Arc::clone(&self.call_log),
            in_flight: Arc::clone(&self.in_flight),
            peak_in_flight: Arc::clone(&self.peak_in_flight),
        }
    }
}

#[async_trait]
impl Translator for MockTranslator {
    fn name(&self) -> &str {
        "mock"
    }

    async fn translate(&self, request: &TranslationRequest) -> Result<TranslationResponse, TranslatorError> {
        self.total_calls.fetch_add(1, Ordering::SeqCst);
        *self.calls.lock().entry(request.target_language).or_insert(0) += 1;
        self.call_log.lock().push((request.target_language, Instant::now()));
        let step = self.next_step(request.target_language);

        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(running, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match step {
            MockStep::Succeed => {
                let text = Self::render_answer(request, None);
                finish_translation(request, &text, self.usage_for(request))
            }
            MockStep::DropSegment(id) => {
                let text = Self::render_answer(request, Some(&id));
                finish_translation(request, &text, self.usage_for(request))
            }
            MockStep::RateLimited => {
                Err(ProviderError::from_status(429, "rate limit reached").into_translator_error(0.0))
            }
            MockStep::Unavailable => {
                Err(ProviderError::from_status(503, "service unavailable").into_translator_error(0.0))
            }
            MockStep::Fatal(message) => Err(ProviderError::from_status(422, message).into_translator_error(0.0)),
        }
    }
}
