/*!
 * Job launcher: validation, job bookkeeping and detached submission.
 */

use log::{error, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use super::models::{BookKickoffResult, KickoffAck, KickoffRequest};
use crate::database::models::{ChapterRecord, JobKind, JobRecord};
use crate::database::Repository;
use crate::errors::PipelineError;
use crate::language_utils::{parse_language_list, SupportedLanguage};
use crate::translation::FanOutOrchestrator;

/// Starts translation jobs in the background
#[derive(Clone)]
pub struct JobLauncher {
    repo: Repository,
    orchestrator: FanOutOrchestrator,
    default_languages: Vec<SupportedLanguage>,
    inter_unit_delay: Duration,
    handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl JobLauncher {
    pub fn new(
        repo: Repository,
        orchestrator: FanOutOrchestrator,
        default_languages: Vec<SupportedLanguage>,
        inter_unit_delay: Duration,
    ) -> Self {
        Self {
            repo,
            orchestrator,
            default_languages,
            inter_unit_delay,
            handles: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Validate and start a request; returns as soon as the job is recorded
    pub async fn kickoff(&self, request: &KickoffRequest) -> Result<KickoffAck, PipelineError> {
        match request {
            KickoffRequest::Unit {
                content_unit_id,
                languages,
                retranslate,
            } => self.kickoff_unit(content_unit_id, languages, *retranslate).await,
            KickoffRequest::Book {
                book_id,
                languages,
                retranslate,
            } => {
                self.kickoff_book(book_id, languages.as_deref().unwrap_or(&[]), *retranslate)
                    .await
            }
        }
    }

    pub async fn kickoff_unit(
        &self,
        content_id: &str,
        languages: &[String],
        retranslate: bool,
    ) -> Result<KickoffAck, PipelineError> {
        let languages = self.resolve_languages(languages)?;
        let chapter = self
            .repo
            .get_chapter(content_id)
            .await?
            .ok_or_else(|| PipelineError::Validation(format!("unknown content unit '{}'", content_id)))?;

        let job = self
            .create_job(JobKind::Unit, &chapter.book_id, std::slice::from_ref(&chapter), &languages)
            .await?;
        info!(
            "Job {}: translating {} into {} language(s)",
            job.id,
            content_id,
            languages.len()
        );

        let orchestrator = self.orchestrator.clone();
        let job_id = job.id.clone();
        let content_id = content_id.to_string();
        self.detach(async move {
            orchestrator
                .run(Some(&job_id), &content_id, &languages, retranslate)
                .await;
        });

        Ok(KickoffAck::accepted(job.id))
    }

    /// Start every incomplete chapter of a book.
    ///
    /// A book with nothing left to do is declined, not an error.
    pub async fn kickoff_book(
        &self,
        book_id: &str,
        languages: &[String],
        retranslate: bool,
    ) -> Result<KickoffAck, PipelineError> {
        let languages = self.resolve_languages(languages)?;
        if self.repo.get_book(book_id).await?.is_none() {
            return Err(PipelineError::Validation(format!("unknown book '{}'", book_id)));
        }

        let chapters = self.incomplete_chapters(book_id, &languages, retranslate).await?;
        if chapters.is_empty() {
            info!("Book {}: nothing left to translate", book_id);
            return Ok(KickoffAck::declined(format!(
                "book '{}' has no incomplete chapters",
                book_id
            )));
        }

        let job = self
            .create_job(JobKind::Book, book_id, &chapters, &languages)
            .await?;
        info!(
            "Job {}: translating {} chapter(s) of {} into {} language(s)",
            job.id,
            chapters.len(),
            book_id,
            languages.len()
        );

        let launcher = self.clone();
        let job_id = job.id.clone();
        self.detach(async move {
            for (index, chapter) in chapters.into_iter().enumerate() {
                if index > 0 {
                    tokio::time::sleep(launcher.inter_unit_delay).await;
                }
                let orchestrator = launcher.orchestrator.clone();
                let job_id = job_id.clone();
                let languages = languages.clone();
                launcher.detach(async move {
                    orchestrator
                        .run(Some(&job_id), &chapter.id, &languages, retranslate)
                        .await;
                });
            }
        });

        Ok(KickoffAck::accepted(job.id))
    }

    /// Kick off several books one after another.
    ///
    /// Each book gets its own answer; a declined or invalid book does not
    /// stop the others.
    pub async fn kickoff_books(
        &self,
        book_ids: &[String],
        languages: &[String],
        retranslate: bool,
    ) -> Vec<BookKickoffResult> {
        let mut results = Vec::with_capacity(book_ids.len());

        for book_id in book_ids {
            let ack = match self.kickoff_book(book_id, languages, retranslate).await {
                Ok(ack) => ack,
                Err(e) => {
                    warn!("Book {} not started: {}", book_id, e);
                    KickoffAck::declined(e.to_string())
                }
            };
            results.push(BookKickoffResult {
                book_id: book_id.clone(),
                ack,
            });
        }

        results
    }

    /// Wait until every detached task, including ones spawned meanwhile, ended
    pub async fn wait_for_idle(&self) {
        loop {
            let handles = std::mem::take(&mut *self.handles.lock());
            if handles.is_empty() {
                return;
            }
            for handle in handles {
                if let Err(e) = handle.await {
                    error!("Background translation task ended abnormally: {}", e);
                }
            }
        }
    }

    /// Number of detached tasks not yet awaited
    pub fn tracked_tasks(&self) -> usize {
        self.handles.lock().len()
    }

    fn detach<F>(&self, task: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(task);
        let mut handles = self.handles.lock();
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    /// Empty means the configured defaults
    fn resolve_languages(&self, codes: &[String]) -> Result<Vec<SupportedLanguage>, PipelineError> {
        let languages = if codes.is_empty() {
            self.default_languages.clone()
        } else {
            parse_language_list(codes)?
        };

        if languages.is_empty() {
            return Err(PipelineError::Validation("no target languages requested".to_string()));
        }
        Ok(languages)
    }

    async fn incomplete_chapters(
        &self,
        book_id: &str,
        languages: &[SupportedLanguage],
        retranslate: bool,
    ) -> Result<Vec<ChapterRecord>, PipelineError> {
        let chapters = self.repo.list_chapters(book_id).await?;
        if retranslate {
            return Ok(chapters);
        }

        let mut incomplete = Vec::new();
        for chapter in chapters {
            let completed = self.repo.completed_languages(&chapter.id).await?;
            if languages
                .iter()
                .any(|l| !completed.iter().any(|c| c == l.code()))
            {
                incomplete.push(chapter);
            }
        }
        Ok(incomplete)
    }

    async fn create_job(
        &self,
        kind: JobKind,
        book_id: &str,
        chapters: &[ChapterRecord],
        languages: &[SupportedLanguage],
    ) -> Result<JobRecord, PipelineError> {
        let tasks: Vec<(String, String)> = chapters
            .iter()
            .flat_map(|c| languages.iter().map(move |l| (c.id.clone(), l.code().to_string())))
            .collect();
        let job = JobRecord::new(
            kind,
            Some(book_id.to_string()),
            languages.iter().map(|l| l.code().to_string()).collect(),
            tasks.len() as i64,
        );
        self.repo.create_job(&job, &tasks).await?;
        Ok(job)
    }
}
