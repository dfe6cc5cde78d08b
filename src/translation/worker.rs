/*!
 * Per-language worker.
 *
 * Drives one (content, language) record through
 * `pending -> processing -> completed | failed`:
 * claim the record, then per attempt persist the attempt number, ask the
 * ledger for permission, call the translator, report the cost and verify
 * every segment came back. Retryable failures back off and try again;
 * anything else ends the run.
 */

use anyhow::Result;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::retry::RetryPolicy;
use super::segmenter::Segment;
use crate::budget::BudgetLedger;
use crate::database::models::{format_timestamp, TranslationStatus};
use crate::database::repository::{RecordCompletion, RecordFailure};
use crate::database::Repository;
use crate::errors::PipelineError;
use crate::language_utils::{language_codes_match, SupportedLanguage};
use crate::providers::{TranslationRequest, TranslationResponse, Translator, Usage};

/// A segmented content unit ready for translation
#[derive(Debug, Clone, PartialEq)]
pub struct UnitWork {
    pub content_id: String,
    pub source_language: String,
    pub segments: Vec<Segment>,
}

/// How a worker run ended
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerOutcome {
    /// Translated and stored
    Completed { attempts: u32, cost_usd: f64 },
    /// Stored as failed with the last error
    Failed {
        attempts: u32,
        cost_usd: f64,
        error: PipelineError,
    },
    /// The record was already completed; nothing was done
    AlreadyCompleted,
    /// Another worker holds a live claim on the record
    ClaimedElsewhere,
}

impl WorkerOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, WorkerOutcome::Completed { .. } | WorkerOutcome::AlreadyCompleted)
    }
}

/// Translates one unit into one language
#[derive(Clone)]
pub struct LanguageWorker {
    repo: Repository,
    ledger: BudgetLedger,
    translator: Arc<dyn Translator>,
    retry: RetryPolicy,
    claim_timeout: Duration,
}

impl LanguageWorker {
    pub fn new(
        repo: Repository,
        ledger: BudgetLedger,
        translator: Arc<dyn Translator>,
        retry: RetryPolicy,
        claim_timeout: Duration,
    ) -> Self {
        Self {
            repo,
            ledger,
            translator,
            retry,
            claim_timeout,
        }
    }

    /// Run the state machine for one language.
    ///
    /// Errors are storage failures only; translation failures end up in
    /// the record and the returned outcome.
    pub async fn run(&self, unit: &UnitWork, language: SupportedLanguage) -> Result<WorkerOutcome> {
        let name = format!("{}/{}", unit.content_id, language);
        let claim_token = uuid::Uuid::new_v4().to_string();
        let stale_before = format_timestamp(
            chrono::Utc::now()
                - chrono::Duration::from_std(self.claim_timeout).unwrap_or_else(|_| chrono::Duration::zero()),
        );

        let claimed = self
            .repo
            .claim_record(&unit.content_id, language.code(), &claim_token, &stale_before)
            .await?;
        if !claimed {
            return self.unclaimed_outcome(unit, language).await;
        }

        if language_codes_match(&unit.source_language, language.code()) {
            info!("{}: target equals source language, copying source segments", name);
            self.repo
                .complete_record(
                    &unit.content_id,
                    language.code(),
                    &RecordCompletion {
                        segments: unit.segments.clone(),
                        ..Default::default()
                    },
                )
                .await?;
            return Ok(WorkerOutcome::Completed {
                attempts: 0,
                cost_usd: 0.0,
            });
        }

        info!("{}: translating {} segments", name, unit.segments.len());
        let request = TranslationRequest {
            content_id: unit.content_id.clone(),
            source_language: unit.source_language.clone(),
            target_language: language,
            segments: unit.segments.clone(),
        };
        let spent = Mutex::new(Usage::default());
        let claim_lost = AtomicBool::new(false);

        let outcome = self
            .retry
            .run(
                &name,
                |attempt| {
                    let request = &request;
                    let spent = &spent;
                    let claim_lost = &claim_lost;
                    let claim_token = claim_token.as_str();
                    async move {
                        self.attempt(request, claim_token, attempt, spent, claim_lost)
                            .await
                    }
                },
                PipelineError::is_retryable,
            )
            .await;

        let usage = *spent.lock();
        if claim_lost.load(Ordering::SeqCst) {
            warn!("{}: claim was taken over by another worker, leaving the record alone", name);
            return Ok(WorkerOutcome::ClaimedElsewhere);
        }

        match outcome.result {
            Ok(response) => {
                self.repo
                    .complete_record(
                        &unit.content_id,
                        language.code(),
                        &RecordCompletion {
                            segments: response.segments,
                            attempt_count: outcome.attempts,
                            prompt_tokens: usage.prompt_tokens,
                            completion_tokens: usage.completion_tokens,
                            cost_usd: usage.cost_usd,
                        },
                    )
                    .await?;
                info!(
                    "{}: completed after {} attempt(s), ${:.4}",
                    name, outcome.attempts, usage.cost_usd
                );
                Ok(WorkerOutcome::Completed {
                    attempts: outcome.attempts,
                    cost_usd: usage.cost_usd,
                })
            }
            Err(error) => {
                self.repo
                    .fail_record(
                        &unit.content_id,
                        language.code(),
                        &RecordFailure {
                            kind: error.kind(),
                            message: error.to_string(),
                            attempt_count: outcome.attempts,
                            prompt_tokens: usage.prompt_tokens,
                            completion_tokens: usage.completion_tokens,
                            cost_usd: usage.cost_usd,
                        },
                    )
                    .await?;
                warn!("{}: failed after {} attempt(s): {}", name, outcome.attempts, error);
                Ok(WorkerOutcome::Failed {
                    attempts: outcome.attempts,
                    cost_usd: usage.cost_usd,
                    error,
                })
            }
        }
    }

    /// One attempt: heartbeat, budget pre-flight, call, cost report, id check
    async fn attempt(
        &self,
        request: &TranslationRequest,
        claim_token: &str,
        attempt: u32,
        spent: &Mutex<Usage>,
        claim_lost: &AtomicBool,
    ) -> Result<TranslationResponse, PipelineError> {
        let still_owned = self
            .repo
            .record_attempt(&request.content_id, request.target_language.code(), claim_token, attempt)
            .await?;
        if !still_owned {
            claim_lost.store(true, Ordering::SeqCst);
            return Err(PipelineError::Internal("claim lost".to_string()));
        }

        self.ledger.check().await?;

        debug!(
            "{}/{}: attempt {} via {}",
            request.content_id,
            request.target_language,
            attempt,
            self.translator.name()
        );
        let result = self.translator.translate(request).await;

        match result {
            Ok(response) => {
                self.report_cost(&response.usage).await;
                spent.lock().add(&response.usage);

                let returned: HashSet<&str> = response.segments.iter().map(|s| s.id.as_str()).collect();
                let missing: Vec<String> = request
                    .segments
                    .iter()
                    .filter(|s| !returned.contains(s.id.as_str()))
                    .map(|s| s.id.clone())
                    .collect();
                if !missing.is_empty() {
                    return Err(PipelineError::PartialReconciliation { missing });
                }

                Ok(response)
            }
            Err(error) => {
                let usage = Usage {
                    cost_usd: error.cost_usd(),
                    ..Default::default()
                };
                self.report_cost(&usage).await;
                spent.lock().add(&usage);
                Err(error.into())
            }
        }
    }

    async fn report_cost(&self, usage: &Usage) {
        if usage.cost_usd <= 0.0 {
            return;
        }
        if let Err(e) = self.ledger.record_spend(usage.cost_usd).await {
            // The call already happened; losing the figure must not lose the translation
            warn!("Failed to record spend of ${:.4}: {}", usage.cost_usd, e);
        }
    }

    async fn unclaimed_outcome(&self, unit: &UnitWork, language: SupportedLanguage) -> Result<WorkerOutcome> {
        let record = self.repo.get_record(&unit.content_id, language.code()).await?;
        match record.map(|r| r.status) {
            Some(TranslationStatus::Completed) => {
                debug!("{}/{}: already completed", unit.content_id, language);
                Ok(WorkerOutcome::AlreadyCompleted)
            }
            Some(_) => {
                debug!("{}/{}: claimed by another worker", unit.content_id, language);
                Ok(WorkerOutcome::ClaimedElsewhere)
            }
            None => Err(anyhow::anyhow!(
                "No translation record for {}/{}",
                unit.content_id,
                language
            )),
        }
    }
}
