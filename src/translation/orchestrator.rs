/*!
 * Fan-out orchestrator.
 *
 * Runs one language worker per requested language of a content unit with
 * bounded parallelism and paced dispatches. Each language resolves on its own
 * and settles its job task as it finishes. A language whose record another
 * worker holds is set aside and followed after the fan-out, so it never sits
 * on a dispatch slot.
 */

use futures::stream::{self, StreamExt};
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

use super::concurrency::{ConcurrencySettings, DispatchPacer};
use super::segmenter::DocumentSegmenter;
use super::worker::{LanguageWorker, UnitWork, WorkerOutcome};
use crate::database::models::TranslationStatus;
use crate::database::repository::TaskOutcome;
use crate::database::Repository;
use crate::errors::{ErrorKind, PipelineError};
use crate::language_utils::SupportedLanguage;

/// Shortest interval between looks at a record another worker is holding
const MIN_CLAIM_POLL: Duration = Duration::from_secs(1);

/// Final state of one language in a fan-out
#[derive(Debug, Clone, PartialEq)]
pub struct LanguageResult {
    pub language: SupportedLanguage,
    pub status: TranslationStatus,
    pub attempts: u32,
    pub cost_usd: f64,
    pub error_kind: Option<ErrorKind>,
    pub error_message: Option<String>,
}

impl LanguageResult {
    fn completed(language: SupportedLanguage, attempts: u32, cost_usd: f64) -> Self {
        Self {
            language,
            status: TranslationStatus::Completed,
            attempts,
            cost_usd,
            error_kind: None,
            error_message: None,
        }
    }

    fn failed(language: SupportedLanguage, attempts: u32, cost_usd: f64, error: &PipelineError) -> Self {
        Self {
            language,
            status: TranslationStatus::Failed,
            attempts,
            cost_usd,
            error_kind: Some(error.kind()),
            error_message: Some(error.to_string()),
        }
    }

    fn is_completed(&self) -> bool {
        self.status == TranslationStatus::Completed
    }

    fn task_outcome(&self) -> TaskOutcome {
        TaskOutcome {
            status: self.status,
            error_kind: self.error_kind,
            error_message: self.error_message.clone(),
        }
    }
}

/// First pass over one language
enum Dispatch {
    Resolved(LanguageResult),
    /// Another worker holds the record
    Deferred(SupportedLanguage),
}

/// Outcome of one fan-out
#[derive(Debug, Clone, PartialEq)]
pub struct FanOutReport {
    pub content_id: String,
    pub results: Vec<LanguageResult>,
}

impl FanOutReport {
    pub fn completed_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_completed()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.results.len() - self.completed_count()
    }

    pub fn result_for(&self, language: SupportedLanguage) -> Option<&LanguageResult> {
        self.results.iter().find(|r| r.language == language)
    }

    pub fn total_cost_usd(&self) -> f64 {
        self.results.iter().map(|r| r.cost_usd).sum()
    }
}

/// Fans a content unit out to its language workers
#[derive(Clone)]
pub struct FanOutOrchestrator {
    repo: Repository,
    worker: LanguageWorker,
    segmenter: DocumentSegmenter,
    settings: ConcurrencySettings,
    claim_timeout: Duration,
    claim_poll: Duration,
}

impl FanOutOrchestrator {
    pub fn new(
        repo: Repository,
        worker: LanguageWorker,
        settings: ConcurrencySettings,
        claim_timeout: Duration,
    ) -> Self {
        Self {
            repo,
            worker,
            segmenter: DocumentSegmenter::new(),
            settings,
            claim_timeout,
            claim_poll: MIN_CLAIM_POLL,
        }
    }

    /// How often to look at a record another worker holds; at least a second
    pub fn with_claim_poll(mut self, interval: Duration) -> Self {
        self.claim_poll = interval.max(MIN_CLAIM_POLL);
        self
    }

    pub fn settings(&self) -> &ConcurrencySettings {
        &self.settings
    }

    /// Translate one unit into every requested language.
    ///
    /// Never fails as a whole: problems are attributed to the languages they
    /// affect and reflected in the job counters when `job_id` is given.
    pub async fn run(
        &self,
        job_id: Option<&str>,
        content_id: &str,
        languages: &[SupportedLanguage],
        retranslate: bool,
    ) -> FanOutReport {
        let mut report = FanOutReport {
            content_id: content_id.to_string(),
            results: Vec::with_capacity(languages.len()),
        };

        let unit = match self.prepare_unit(content_id).await {
            Ok(unit) => unit,
            Err(e) => {
                warn!("{}: not translatable: {}", content_id, e);
                for &language in languages {
                    let result = LanguageResult::failed(language, 0, 0.0, &e);
                    self.settle(job_id, content_id, &result).await;
                    report.results.push(result);
                }
                return report;
            }
        };

        let pending = match self.open_languages(&unit, languages, retranslate).await {
            Ok(pending) => pending,
            Err(e) => {
                error!("{}: failed to prepare records: {:#}", content_id, e);
                let e = PipelineError::from(e);
                for &language in languages {
                    let result = LanguageResult::failed(language, 0, 0.0, &e);
                    self.settle(job_id, content_id, &result).await;
                    report.results.push(result);
                }
                return report;
            }
        };

        let already_done: Vec<SupportedLanguage> = languages
            .iter()
            .copied()
            .filter(|l| !pending.contains(l))
            .collect();
        if !already_done.is_empty() {
            info!(
                "{}: {} language(s) already translated",
                content_id,
                already_done.len()
            );
            for &language in &already_done {
                let result = LanguageResult::completed(language, 0, 0.0);
                self.settle(job_id, content_id, &result).await;
                report.results.push(result);
            }
        }

        if pending.is_empty() {
            return report;
        }

        info!(
            "{}: dispatching {} language(s), {} at a time",
            content_id,
            pending.len(),
            self.settings.max_concurrent_languages
        );
        let pacer = Arc::new(DispatchPacer::new(self.settings.dispatch_delay));
        let unit = &unit;

        let mut dispatches = stream::iter(pending)
            .map(|language| {
                let pacer = Arc::clone(&pacer);
                async move {
                    pacer.wait_turn().await;
                    let dispatch = self.dispatch_language(unit, language).await;
                    if let Dispatch::Resolved(result) = &dispatch {
                        self.settle(job_id, &unit.content_id, result).await;
                    }
                    dispatch
                }
            })
            .buffer_unordered(self.settings.max_concurrent_languages);

        let mut deferred = Vec::new();
        while let Some(dispatch) = dispatches.next().await {
            match dispatch {
                Dispatch::Resolved(result) => report.results.push(result),
                Dispatch::Deferred(language) => deferred.push(language),
            }
        }

        if !deferred.is_empty() {
            info!(
                "{}: following {} language(s) claimed by another worker",
                content_id,
                deferred.len()
            );
            let mut followed = stream::iter(deferred)
                .map(|language| async move {
                    let result = self.follow_foreign_claim(unit, language).await;
                    self.settle(job_id, &unit.content_id, &result).await;
                    result
                })
                .buffer_unordered(self.settings.max_concurrent_languages);

            while let Some(result) = followed.next().await {
                report.results.push(result);
            }
        }

        info!(
            "{}: {} completed, {} failed",
            content_id,
            report.completed_count(),
            report.failed_count()
        );
        report
    }

    /// Load the unit and its segmentation, reusing the cached one when the
    /// source revision is unchanged
    pub async fn prepare_unit(&self, content_id: &str) -> Result<UnitWork, PipelineError> {
        let chapter = self
            .repo
            .get_chapter(content_id)
            .await?
            .ok_or_else(|| PipelineError::NonTranslatable(format!("unknown content unit {}", content_id)))?;

        let revision = DocumentSegmenter::revision(&chapter.source_markup);
        let cached = match (&chapter.segments, &chapter.segments_revision) {
            (Some(segments), Some(stored)) if *stored == revision && !segments.is_empty() => {
                Some(segments.clone())
            }
            _ => None,
        };

        let segments = match cached {
            Some(segments) => segments,
            None => {
                let document = self.segmenter.segment(&chapter.source_markup)?;
                self.repo
                    .store_segments(&chapter.id, &document.revision, &document.segments)
                    .await?;
                document.segments
            }
        };

        Ok(UnitWork {
            content_id: chapter.id,
            source_language: chapter.source_language,
            segments,
        })
    }

    /// Make sure every requested language has a record and return the ones
    /// that still need work
    async fn open_languages(
        &self,
        unit: &UnitWork,
        languages: &[SupportedLanguage],
        retranslate: bool,
    ) -> anyhow::Result<Vec<SupportedLanguage>> {
        if retranslate {
            for language in languages {
                self.repo.reset_to_pending(&unit.content_id, language.code()).await?;
            }
            return Ok(languages.to_vec());
        }

        let completed = self.repo.completed_languages(&unit.content_id).await?;
        let mut pending = Vec::new();
        for &language in languages {
            if completed.iter().any(|c| c == language.code()) {
                continue;
            }
            self.repo.ensure_pending(&unit.content_id, language.code()).await?;
            pending.push(language);
        }
        Ok(pending)
    }

    async fn dispatch_language(&self, unit: &UnitWork, language: SupportedLanguage) -> Dispatch {
        match self.worker.run(unit, language).await {
            Ok(WorkerOutcome::Completed { attempts, cost_usd }) => {
                Dispatch::Resolved(LanguageResult::completed(language, attempts, cost_usd))
            }
            Ok(WorkerOutcome::AlreadyCompleted) => Dispatch::Resolved(LanguageResult::completed(language, 0, 0.0)),
            Ok(WorkerOutcome::Failed {
                attempts,
                cost_usd,
                error,
            }) => Dispatch::Resolved(LanguageResult::failed(language, attempts, cost_usd, &error)),
            Ok(WorkerOutcome::ClaimedElsewhere) => Dispatch::Deferred(language),
            Err(e) => {
                error!("{}/{}: storage failure: {:#}", unit.content_id, language, e);
                Dispatch::Resolved(LanguageResult::failed(language, 0, 0.0, &PipelineError::from(e)))
            }
        }
    }

    /// Wait out another worker's claim, then take the record over once if
    /// the claim went stale
    async fn follow_foreign_claim(&self, unit: &UnitWork, language: SupportedLanguage) -> LanguageResult {
        if let Some(result) = self.await_foreign_claim(unit, language).await {
            return result;
        }

        match self.dispatch_language(unit, language).await {
            Dispatch::Resolved(result) => result,
            Dispatch::Deferred(language) => {
                let error = PipelineError::Internal("record stayed claimed by another worker".to_string());
                LanguageResult::failed(language, 0, 0.0, &error)
            }
        }
    }

    /// Follow a record owned by someone else until it turns terminal or
    /// its claim goes stale
    async fn await_foreign_claim(&self, unit: &UnitWork, language: SupportedLanguage) -> Option<LanguageResult> {
        let deadline = Instant::now() + self.claim_timeout;

        while Instant::now() < deadline {
            sleep(self.claim_poll).await;
            match self.repo.get_record(&unit.content_id, language.code()).await {
                Ok(Some(record)) => match record.status {
                    TranslationStatus::Completed => {
                        return Some(LanguageResult::completed(language, 0, 0.0));
                    }
                    TranslationStatus::Failed => {
                        return Some(LanguageResult {
                            language,
                            status: TranslationStatus::Failed,
                            attempts: record.attempt_count.max(0) as u32,
                            cost_usd: 0.0,
                            error_kind: record.error_kind,
                            error_message: record.error_message,
                        });
                    }
                    _ => {}
                },
                Ok(None) => return None,
                Err(e) => warn!("{}/{}: status read failed: {:#}", unit.content_id, language, e),
            }
        }
        None
    }

    /// Record a language's outcome on its job task
    async fn settle(&self, job_id: Option<&str>, content_id: &str, result: &LanguageResult) {
        let Some(job_id) = job_id else {
            return;
        };
        match self
            .repo
            .resolve_job_task(job_id, content_id, result.language.code(), &result.task_outcome())
            .await
        {
            Ok(Some(job)) if job.is_finished() => {
                info!(
                    "Job {} finished: {} completed, {} failed",
                    job.id, job.completed_tasks, job.failed_tasks
                );
            }
            Ok(_) => {}
            Err(e) => error!("Failed to settle {}/{} of job {}: {:#}", content_id, result.language, job_id, e),
        }
    }
}
