/*!
 * Read-only progress rollups over the status store.
 */

use serde::Serialize;
use std::collections::HashMap;

use crate::database::models::{derive_job_status, JobRecord, JobStatus, TranslationRecord, TranslationStatus};
use crate::database::Repository;
use crate::errors::{ErrorKind, PipelineError};
use crate::jobs::StatusEntry;
use crate::language_utils::SupportedLanguage;

/// Share of a book's chapters translated into every configured language
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BookProgress {
    pub book_id: String,
    pub title: String,
    pub total_chapters: usize,
    pub translated_chapters: usize,
    /// In [0, 1]; zero for a book without chapters
    pub fraction: f64,
}

/// Counts and totals across every translation record
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineProgress {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    /// Mean claim-to-completion time of completed records with usable timestamps
    pub average_duration_secs: Option<f64>,
    pub total_cost_usd: f64,
    pub total_prompt_tokens: i64,
    pub total_completion_tokens: i64,
}

/// One failed task of a job
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskFailure {
    pub content_id: String,
    pub language: String,
    pub error_kind: Option<ErrorKind>,
    pub error_message: Option<String>,
}

/// A job with its derived status and failure breakdown
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobProgress {
    pub job: JobRecord,
    pub status: JobStatus,
    pub failures: Vec<TaskFailure>,
}

impl JobProgress {
    /// Failed tasks grouped by content unit
    pub fn failures_by_unit(&self) -> HashMap<&str, Vec<&TaskFailure>> {
        let mut grouped: HashMap<&str, Vec<&TaskFailure>> = HashMap::new();
        for failure in &self.failures {
            grouped.entry(failure.content_id.as_str()).or_default().push(failure);
        }
        grouped
    }
}

#[derive(Clone)]
pub struct ProgressAggregator {
    repo: Repository,
    languages: Vec<SupportedLanguage>,
}

impl ProgressAggregator {
    /// `languages` decides when a chapter counts as fully translated
    pub fn new(repo: Repository, languages: Vec<SupportedLanguage>) -> Self {
        Self { repo, languages }
    }

    /// Per-language status of one content unit
    pub async fn unit_status(&self, content_id: &str) -> Result<Vec<StatusEntry>, PipelineError> {
        if self.repo.get_chapter(content_id).await?.is_none() {
            return Err(PipelineError::Validation(format!("unknown content unit '{}'", content_id)));
        }
        let records = self.repo.list_records_for_content(content_id).await?;
        Ok(records.iter().map(StatusEntry::from).collect())
    }

    pub async fn book_progress(&self, book_id: &str) -> Result<BookProgress, PipelineError> {
        let book = self
            .repo
            .get_book(book_id)
            .await?
            .ok_or_else(|| PipelineError::Validation(format!("unknown book '{}'", book_id)))?;
        let chapters = self.repo.list_chapters(book_id).await?;
        let records = self.repo.list_records_for_book(book_id).await?;

        let mut completed: HashMap<&str, Vec<&str>> = HashMap::new();
        for record in records.iter().filter(|r| r.status == TranslationStatus::Completed) {
            completed
                .entry(record.content_id.as_str())
                .or_default()
                .push(record.language.as_str());
        }

        let translated_chapters = chapters
            .iter()
            .filter(|chapter| {
                let done = completed.get(chapter.id.as_str());
                self.languages
                    .iter()
                    .all(|l| done.is_some_and(|d| d.contains(&l.code())))
            })
            .count();

        let fraction = if chapters.is_empty() {
            0.0
        } else {
            translated_chapters as f64 / chapters.len() as f64
        };

        Ok(BookProgress {
            book_id: book.id,
            title: book.title,
            total_chapters: chapters.len(),
            translated_chapters,
            fraction,
        })
    }

    pub async fn all_books(&self) -> Result<Vec<BookProgress>, PipelineError> {
        let mut progress = Vec::new();
        for book in self.repo.list_books().await? {
            progress.push(self.book_progress(&book.id).await?);
        }
        Ok(progress)
    }

    pub async fn pipeline_progress(&self) -> Result<PipelineProgress, PipelineError> {
        let records = self.repo.list_all_records().await?;
        Ok(summarize(&records))
    }

    pub async fn job_progress(&self, job_id: &str) -> Result<JobProgress, PipelineError> {
        let job = self
            .repo
            .get_job(job_id)
            .await?
            .ok_or_else(|| PipelineError::Validation(format!("unknown job '{}'", job_id)))?;
        let states = self.repo.job_task_states(job_id).await?;

        let status = derive_job_status(states.iter().map(|s| s.status));
        let failures = states
            .into_iter()
            .filter(|s| s.status == TranslationStatus::Failed)
            .map(|s| TaskFailure {
                content_id: s.content_id,
                language: s.language,
                error_kind: s.error_kind,
                error_message: s.error_message,
            })
            .collect();

        Ok(JobProgress { job, status, failures })
    }
}

/// Roll up a set of records; missing cost counts as zero
pub fn summarize(records: &[TranslationRecord]) -> PipelineProgress {
    let mut progress = PipelineProgress {
        total: records.len(),
        ..Default::default()
    };
    let mut durations = Vec::new();

    for record in records {
        match record.status {
            TranslationStatus::Pending => progress.pending += 1,
            TranslationStatus::Processing => progress.processing += 1,
            TranslationStatus::Completed => {
                progress.completed += 1;
                if let Some(secs) = record.duration_secs() {
                    durations.push(secs);
                }
            }
            TranslationStatus::Failed => progress.failed += 1,
        }
        progress.total_cost_usd += record.cost_usd.unwrap_or(0.0);
        progress.total_prompt_tokens += record.prompt_tokens.unwrap_or(0);
        progress.total_completion_tokens += record.completion_tokens.unwrap_or(0);
    }

    if !durations.is_empty() {
        progress.average_duration_secs = Some(durations.iter().sum::<f64>() / durations.len() as f64);
    }
    progress
}
