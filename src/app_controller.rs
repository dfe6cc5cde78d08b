use anyhow::{anyhow, Context, Result};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use log::{info, warn};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::app_config::Config;
use crate::budget::{BudgetLedger, BudgetSnapshot, BudgetUpdate};
use crate::database::models::{BookRecord, ChapterRecord, JobRecord, TranslationStatus};
use crate::database::{DatabaseConnection, Repository};
use crate::errors::PipelineError;
use crate::file_utils::FileManager;
use crate::jobs::{BookKickoffResult, JobLauncher, KickoffAck, KickoffRequest, StatusEntry};
use crate::language_utils::{is_valid_source_language, SupportedLanguage};
use crate::progress::{BookProgress, JobProgress, PipelineProgress, ProgressAggregator};
use crate::providers::{build_translator, Translator};
use crate::translation::concurrency::ConcurrencySettings;
use crate::translation::retry::RetryPolicy;
use crate::translation::{DocumentSegmenter, FanOutOrchestrator, LanguageWorker};

// @module: Application controller wiring the pipeline together

/// What an import stored
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportSummary {
    pub book_id: String,
    pub chapters: usize,
    pub segments: usize,
    /// Chapters without anything to translate
    pub non_translatable: Vec<String>,
}

/// Main application controller
pub struct Controller {
    // @field: App configuration
    config: Config,
    repo: Repository,
    ledger: BudgetLedger,
    launcher: JobLauncher,
    progress: ProgressAggregator,
}

impl Controller {
    // @method: Open the configured database and build the configured translator
    pub fn with_config(config: Config) -> Result<Self> {
        let db = if config.database_path.is_empty() {
            DatabaseConnection::new_default()?
        } else {
            DatabaseConnection::new(&config.database_path)?
        };
        let translator = build_translator(&config.translation).context("Failed to create translator")?;

        Self::with_parts(config, Repository::new(db), translator)
    }

    /// Assemble a controller from an existing store and translator
    pub fn with_parts(config: Config, repo: Repository, translator: Arc<dyn Translator>) -> Result<Self> {
        let languages = config.target_languages()?;
        let ledger = BudgetLedger::new(repo.clone(), config.budget.clone());

        let worker = LanguageWorker::new(
            repo.clone(),
            ledger.clone(),
            translator,
            RetryPolicy::from_config(&config.pipeline),
            config.pipeline.claim_timeout(),
        );
        let orchestrator = FanOutOrchestrator::new(
            repo.clone(),
            worker,
            ConcurrencySettings::for_provider(&config.pipeline, config.translation.provider),
            config.pipeline.claim_timeout(),
        )
        .with_claim_poll(config.pipeline.poll_interval());
        let launcher = JobLauncher::new(
            repo.clone(),
            orchestrator,
            languages.clone(),
            config.pipeline.inter_unit_delay(),
        );
        let progress = ProgressAggregator::new(repo.clone(), languages);

        Ok(Self {
            config,
            repo,
            ledger,
            launcher,
            progress,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    pub fn launcher(&self) -> &JobLauncher {
        &self.launcher
    }

    /// Store every chapter document of a directory under one book.
    ///
    /// Chapters are segmented right away so broken documents show up at
    /// import time; they are stored either way.
    pub async fn import_book(
        &self,
        dir: &Path,
        book_id: &str,
        title: Option<&str>,
        source_language: &str,
    ) -> Result<ImportSummary> {
        if !is_valid_source_language(source_language) {
            return Err(anyhow!("Invalid source language: {}", source_language));
        }

        let sources = FileManager::collect_chapters(dir)?;
        if sources.is_empty() {
            return Err(anyhow!("No chapter documents found in {:?}", dir));
        }

        let book_title = title.map(String::from).unwrap_or_else(|| {
            dir.file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| book_id.to_string())
        });
        self.repo.upsert_book(&BookRecord::new(book_id, book_title)).await?;

        let segmenter = DocumentSegmenter::new();
        let mut summary = ImportSummary {
            book_id: book_id.to_string(),
            chapters: 0,
            segments: 0,
            non_translatable: Vec::new(),
        };

        for source in sources {
            let chapter_id = format!("{}-{}", book_id, source.slug);
            let chapter = ChapterRecord::new(
                chapter_id.clone(),
                book_id,
                source.ordinal,
                source.title,
                source_language.to_lowercase(),
                source.markup,
            );
            self.repo.upsert_chapter(&chapter).await?;
            summary.chapters += 1;

            match segmenter.segment(&chapter.source_markup) {
                Ok(document) => {
                    summary.segments += document.len();
                    self.repo
                        .store_segments(&chapter_id, &document.revision, &document.segments)
                        .await?;
                }
                Err(e) => {
                    warn!("{} ({:?}): {}", chapter_id, source.path, e);
                    summary.non_translatable.push(chapter_id);
                }
            }
        }

        info!(
            "Imported {} chapter(s) with {} segment(s) into book {}",
            summary.chapters, summary.segments, book_id
        );
        Ok(summary)
    }

    pub async fn kickoff(&self, request: &KickoffRequest) -> Result<KickoffAck, PipelineError> {
        self.launcher.kickoff(request).await
    }

    pub async fn kickoff_books(
        &self,
        book_ids: &[String],
        languages: &[String],
        retranslate: bool,
    ) -> Vec<BookKickoffResult> {
        self.launcher.kickoff_books(book_ids, languages, retranslate).await
    }

    pub async fn unit_status(&self, content_id: &str) -> Result<Vec<StatusEntry>, PipelineError> {
        self.progress.unit_status(content_id).await
    }

    pub async fn job_progress(&self, job_id: &str) -> Result<JobProgress, PipelineError> {
        self.progress.job_progress(job_id).await
    }

    pub async fn book_progress(&self) -> Result<Vec<BookProgress>, PipelineError> {
        self.progress.all_books().await
    }

    pub async fn pipeline_progress(&self) -> Result<PipelineProgress, PipelineError> {
        self.progress.pipeline_progress().await
    }

    pub async fn budget(&self) -> Result<BudgetSnapshot, PipelineError> {
        self.ledger.snapshot().await
    }

    pub async fn update_budget(&self, update: &BudgetUpdate) -> Result<BudgetSnapshot, PipelineError> {
        self.ledger.update_limits(update).await
    }

    /// Write a completed translation back into the chapter's document
    pub async fn export(&self, content_id: &str, language: SupportedLanguage, output_dir: &Path) -> Result<PathBuf> {
        let chapter = self
            .repo
            .get_chapter(content_id)
            .await?
            .ok_or_else(|| anyhow!("Unknown content unit: {}", content_id))?;
        let record = self
            .repo
            .get_record(content_id, language.code())
            .await?
            .filter(|r| r.status == TranslationStatus::Completed)
            .ok_or_else(|| anyhow!("{} has no completed {} translation", content_id, language))?;

        let segments = record.segments.unwrap_or_default();
        let document = DocumentSegmenter::new()
            .reassemble(&chapter.source_markup, &segments)
            .with_context(|| format!("Failed to reassemble {} ({})", content_id, language))?;

        let path = FileManager::generate_output_path(content_id, output_dir, language.code(), "html");
        FileManager::write_to_file(&path, &document)?;
        info!("Exported {} ({}) to {:?}", content_id, language, path);
        Ok(path)
    }

    /// Poll jobs until every task resolved, with one progress bar per job.
    ///
    /// Keeps the process alive for the detached work it started.
    pub async fn watch_jobs(&self, job_ids: &[String]) -> Result<Vec<JobProgress>> {
        let multi_progress = MultiProgress::new();
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} tasks ({percent}%) {msg}")
            .or_else(|_| ProgressStyle::default_bar().template("{spinner} [{elapsed_precise}] [{bar:40}] {pos}/{len} ({percent}%) {msg}"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());

        let mut bars = Vec::with_capacity(job_ids.len());
        for job_id in job_ids {
            let job = self.require_job(job_id).await?;
            let bar = multi_progress.add(ProgressBar::new(job.total_tasks.max(0) as u64));
            bar.set_style(style.clone());
            bar.set_message(short_id(job_id));
            bars.push((job_id.clone(), bar));
        }

        let poll_interval = self.config.pipeline.poll_interval();
        loop {
            let mut all_finished = true;
            for (job_id, bar) in &bars {
                let job = self.require_job(job_id).await?;
                bar.set_position(job.resolved_tasks().max(0) as u64);
                if job.failed_tasks > 0 {
                    bar.set_message(format!("{} ({} failed)", short_id(job_id), job.failed_tasks));
                }
                if job.is_finished() {
                    bar.finish();
                } else {
                    all_finished = false;
                }
            }
            if all_finished {
                break;
            }
            tokio::time::sleep(poll_interval).await;
        }

        self.launcher.wait_for_idle().await;

        let mut results = Vec::with_capacity(job_ids.len());
        for job_id in job_ids {
            results.push(self.progress.job_progress(job_id).await?);
        }
        Ok(results)
    }

    async fn require_job(&self, job_id: &str) -> Result<JobRecord> {
        self.repo
            .get_job(job_id)
            .await?
            .ok_or_else(|| anyhow!("Unknown job: {}", job_id))
    }
}

fn short_id(job_id: &str) -> String {
    job_id.chars().take(8).collect()
}
