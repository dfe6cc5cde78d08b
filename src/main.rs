// Module-specific lints configuration
#![allow(clippy::uninlined_format_args)]

use anyhow::{anyhow, Context, Result};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use log::{info, warn, Level, LevelFilter, Log, Metadata, Record, SetLoggerError};
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use chapterflow::app_config::{self, Config, TranslationProvider};
use chapterflow::app_controller::Controller;
use chapterflow::budget::BudgetUpdate;
use chapterflow::database::{DatabaseConnection, Repository};
use chapterflow::jobs::KickoffRequest;
use chapterflow::language_utils::SupportedLanguage;
use chapterflow::providers::mock::MockTranslator;

/// CLI Wrapper for TranslationProvider to implement ValueEnum
#[derive(Debug, Clone, ValueEnum)]
enum CliTranslationProvider {
    OpenAI,
    Anthropic,
}

impl From<CliTranslationProvider> for TranslationProvider {
    fn from(cli_provider: CliTranslationProvider) -> Self {
        match cli_provider {
            CliTranslationProvider::OpenAI => TranslationProvider::OpenAI,
            CliTranslationProvider::Anthropic => TranslationProvider::Anthropic,
        }
    }
}

/// CLI Wrapper for LogLevel to implement ValueEnum
#[derive(Debug, Clone, ValueEnum)]
enum CliLogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<CliLogLevel> for app_config::LogLevel {
    fn from(cli_level: CliLogLevel) -> Self {
        match cli_level {
            CliLogLevel::Error => app_config::LogLevel::Error,
            CliLogLevel::Warn => app_config::LogLevel::Warn,
            CliLogLevel::Info => app_config::LogLevel::Info,
            CliLogLevel::Debug => app_config::LogLevel::Debug,
            CliLogLevel::Trace => app_config::LogLevel::Trace,
        }
    }
}

fn level_filter(level: &app_config::LogLevel) -> LevelFilter {
    match level {
        app_config::LogLevel::Error => LevelFilter::Error,
        app_config::LogLevel::Warn => LevelFilter::Warn,
        app_config::LogLevel::Info => LevelFilter::Info,
        app_config::LogLevel::Debug => LevelFilter::Debug,
        app_config::LogLevel::Trace => LevelFilter::Trace,
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Import a directory of chapter documents as one book
    Import {
        /// Directory holding .html, .xhtml, .md or .txt chapters
        #[arg(value_name = "DIR")]
        dir: PathBuf,

        /// Book identifier
        #[arg(short, long)]
        book: String,

        /// Book title (defaults to the directory name)
        #[arg(long)]
        title: Option<String>,

        /// Language the chapters are written in
        #[arg(short, long, default_value = "en")]
        source_language: String,
    },

    /// Translate one chapter
    Translate {
        content_id: String,

        /// Target language; repeat for several (defaults to the configured ones)
        #[arg(short, long = "language")]
        languages: Vec<String>,

        /// Translate again even where a translation exists
        #[arg(long)]
        retranslate: bool,
    },

    /// Translate every incomplete chapter of one or more books
    TranslateBook {
        #[arg(required = true)]
        book_ids: Vec<String>,

        #[arg(short, long = "language")]
        languages: Vec<String>,

        #[arg(long)]
        retranslate: bool,
    },

    /// Per-language status of a chapter
    Status { content_id: String },

    /// Progress and failures of a job
    Job { job_id: String },

    /// Show or change the monthly budget
    Budget {
        #[command(subcommand)]
        command: BudgetCommand,
    },

    /// Book and pipeline progress
    Progress,

    /// Write a completed translation back into its document
    Export {
        content_id: String,

        #[arg(short, long)]
        language: String,

        /// Output directory
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },

    /// Generate shell completions for chapterflow
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand, Debug)]
enum BudgetCommand {
    /// Current month's budget
    Show,
    /// Change the current month's limits
    Set {
        /// Monthly ceiling in USD
        #[arg(long)]
        ceiling: Option<f64>,

        /// Alert threshold as a percentage of the ceiling
        #[arg(long)]
        threshold: Option<f64>,
    },
}

/// chapterflow - detached multi-language chapter translation
#[derive(Parser, Debug)]
#[command(name = "chapterflow")]
#[command(version)]
#[command(about = "Translate book chapters into many languages in the background")]
#[command(long_about = "chapterflow segments chapter documents, translates them into every configured
language in parallel, and keeps per-language status and monthly spend in a local database.

EXAMPLES:
    chapterflow import ./my-novel --book novel -s fr   # Import chapters written in French
    chapterflow translate novel-01 -l es -l de          # Translate one chapter
    chapterflow translate-book novel                    # Translate every incomplete chapter
    chapterflow status novel-01                         # Per-language status
    chapterflow budget set --ceiling 25                 # Lower the monthly ceiling
    chapterflow completions bash > chapterflow.bash     # Generate bash completions

CONFIGURATION:
    Configuration is stored in conf.json by default. If the file doesn't exist,
    a default one is created automatically.")]
struct CommandLineOptions {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, default_value = "conf.json", global = true)]
    config: String,

    /// Set logging level
    #[arg(long, value_enum, global = true)]
    log_level: Option<CliLogLevel>,

    /// Translation provider to use
    #[arg(short, long, value_enum, global = true)]
    provider: Option<CliTranslationProvider>,

    /// Model name to use for translation
    #[arg(short, long, global = true)]
    model: Option<String>,

    /// Use the offline mock translator instead of a provider
    #[arg(long, global = true)]
    dry_run: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,
}

// @struct: Custom logger implementation
struct CustomLogger {
    level: LevelFilter,
}

impl CustomLogger {
    // @creates: New logger with specified level
    fn new(level: LevelFilter) -> Self {
        CustomLogger { level }
    }

    // @initializes: Global logger
    fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
        let logger = Box::new(CustomLogger::new(level));
        log::set_boxed_logger(logger)?;
        log::set_max_level(level);
        Ok(())
    }

    // @returns: Emoji for log level
    fn get_emoji_for_level(level: Level) -> &'static str {
        match level {
            Level::Error => "❌",
            Level::Warn => "🚧",
            Level::Info => " ",
            Level::Debug => "🔍",
            Level::Trace => "📋",
        }
    }

    fn color_for_level(level: Level) -> &'static str {
        match level {
            Level::Error => "1;31",
            Level::Warn => "1;33",
            Level::Info => "1;32",
            Level::Debug => "1;36",
            Level::Trace => "1;35",
        }
    }
}

impl Log for CustomLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let now = chrono::Local::now().format("%H:%M:%S.%3f");
            let level = record.level();

            let _ = writeln!(
                std::io::stderr(),
                "\x1B[{}m{} {} {}\x1B[0m",
                Self::color_for_level(level),
                now,
                Self::get_emoji_for_level(level),
                record.args()
            );
        }
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Trace lets the max level be raised later without reinitializing
    CustomLogger::init(LevelFilter::Trace)?;
    log::set_max_level(LevelFilter::Info);

    let cli = CommandLineOptions::parse();

    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = CommandLineOptions::command();
        generate(*shell, &mut cmd, "chapterflow", &mut std::io::stdout());
        return Ok(());
    }

    let config = load_config(&cli)?;
    let needs_translator = matches!(
        cli.command,
        Commands::Translate { .. } | Commands::TranslateBook { .. }
    );
    if needs_translator && !cli.dry_run {
        config.validate().context("Configuration validation failed")?;
    }

    let controller = if cli.dry_run {
        warn!("Dry run: translations come from the mock translator");
        let db = if config.database_path.is_empty() {
            DatabaseConnection::new_default()?
        } else {
            DatabaseConnection::new(&config.database_path)?
        };
        Controller::with_parts(config, Repository::new(db), Arc::new(MockTranslator::working()))?
    } else {
        Controller::with_config(config)?
    };

    run_command(&controller, cli.command, cli.json).await
}

fn load_config(cli: &CommandLineOptions) -> Result<Config> {
    if let Some(level) = &cli.log_level {
        log::set_max_level(level_filter(&level.clone().into()));
    }

    let (mut config, created) = Config::load_or_create(&cli.config)?;
    if created {
        warn!("Config file not found at '{}', created a default one.", cli.config);
    }

    if let Some(provider) = &cli.provider {
        config.translation.provider = provider.clone().into();
    }
    if let Some(model) = &cli.model {
        let provider = config.translation.provider;
        config.translation.provider_config_mut(provider).model = model.clone();
    }

    match &cli.log_level {
        Some(level) => config.log_level = level.clone().into(),
        None => log::set_max_level(level_filter(&config.log_level)),
    }

    Ok(config)
}

async fn run_command(controller: &Controller, command: Commands, json: bool) -> Result<()> {
    match command {
        Commands::Import {
            dir,
            book,
            title,
            source_language,
        } => {
            let summary = controller
                .import_book(&dir, &book, title.as_deref(), &source_language)
                .await?;
            if json {
                print_json(&summary)?;
            } else {
                println!(
                    "{}: {} chapter(s), {} segment(s)",
                    summary.book_id, summary.chapters, summary.segments
                );
                for chapter in &summary.non_translatable {
                    println!("  nothing to translate in {}", chapter);
                }
            }
        }
        Commands::Translate {
            content_id,
            languages,
            retranslate,
        } => {
            let ack = controller
                .kickoff(&KickoffRequest::Unit {
                    content_unit_id: content_id,
                    languages,
                    retranslate,
                })
                .await?;
            let job_ids: Vec<String> = ack.job_id.iter().cloned().collect();
            if json {
                print_json(&ack)?;
            }
            report_jobs(controller, &job_ids, json).await?;
        }
        Commands::TranslateBook {
            book_ids,
            languages,
            retranslate,
        } => {
            let results = controller.kickoff_books(&book_ids, &languages, retranslate).await;
            if json {
                print_json(&results)?;
            }
            let mut job_ids = Vec::new();
            for result in &results {
                match (&result.ack.job_id, &result.ack.reason) {
                    (Some(job_id), _) => {
                        info!("Book {}: job {}", result.book_id, job_id);
                        job_ids.push(job_id.clone());
                    }
                    (None, Some(reason)) => warn!("Book {} skipped: {}", result.book_id, reason),
                    (None, None) => warn!("Book {} skipped", result.book_id),
                }
            }
            report_jobs(controller, &job_ids, json).await?;
        }
        Commands::Status { content_id } => {
            let entries = controller.unit_status(&content_id).await?;
            if json {
                print_json(&entries)?;
            } else if entries.is_empty() {
                println!("{}: no translations requested", content_id);
            } else {
                for entry in entries {
                    println!(
                        "{:<4} {:<11} {}",
                        entry.language,
                        entry.status.to_string(),
                        entry.error.or(entry.completed_at).unwrap_or_default()
                    );
                }
            }
        }
        Commands::Job { job_id } => {
            let progress = controller.job_progress(&job_id).await?;
            if json {
                print_json(&progress)?;
            } else {
                println!(
                    "{} [{}] {}/{} resolved, {} failed",
                    progress.job.id,
                    progress.status,
                    progress.job.resolved_tasks(),
                    progress.job.total_tasks,
                    progress.job.failed_tasks
                );
                for failure in &progress.failures {
                    println!(
                        "  {} {}: {}",
                        failure.content_id,
                        failure.language,
                        failure.error_message.as_deref().unwrap_or("unknown error")
                    );
                }
            }
        }
        Commands::Budget { command } => {
            let snapshot = match command {
                BudgetCommand::Show => controller.budget().await?,
                BudgetCommand::Set { ceiling, threshold } => {
                    if ceiling.is_none() && threshold.is_none() {
                        return Err(anyhow!("Nothing to change: pass --ceiling and/or --threshold"));
                    }
                    controller
                        .update_budget(&BudgetUpdate {
                            ceiling_usd: ceiling,
                            alert_threshold_pct: threshold,
                        })
                        .await?
                }
            };
            if json {
                print_json(&snapshot)?;
            } else {
                println!(
                    "{}: ${:.2} of ${:.2} spent ({}), alert at {}%{}",
                    snapshot.month,
                    snapshot.spent_usd,
                    snapshot.ceiling_usd,
                    snapshot.status,
                    snapshot.alert_threshold_pct,
                    if snapshot.alert_triggered { " [alert raised]" } else { "" }
                );
            }
        }
        Commands::Progress => {
            let books = controller.book_progress().await?;
            let pipeline = controller.pipeline_progress().await?;
            if json {
                print_json(&serde_json::json!({ "books": books, "pipeline": pipeline }))?;
            } else {
                for book in &books {
                    println!(
                        "{:<20} {:>3}/{:<3} chapters translated ({:.0}%)",
                        book.book_id,
                        book.translated_chapters,
                        book.total_chapters,
                        book.fraction * 100.0
                    );
                }
                println!(
                    "records: {} completed, {} failed, {} in progress, {} pending; cost ${:.4}{}",
                    pipeline.completed,
                    pipeline.failed,
                    pipeline.processing,
                    pipeline.pending,
                    pipeline.total_cost_usd,
                    pipeline
                        .average_duration_secs
                        .map(|d| format!(", avg {:.1}s", d))
                        .unwrap_or_default()
                );
            }
        }
        Commands::Export {
            content_id,
            language,
            output,
        } => {
            let language = SupportedLanguage::from_code(&language)?;
            let path = controller.export(&content_id, language, &output).await?;
            println!("{}", path.display());
        }
        Commands::Completions { .. } => {}
    }

    Ok(())
}

/// Keep the process alive until the started jobs resolve, then summarize
async fn report_jobs(controller: &Controller, job_ids: &[String], json: bool) -> Result<()> {
    if job_ids.is_empty() {
        return Ok(());
    }

    let results = controller.watch_jobs(job_ids).await?;
    if json {
        return print_json(&results);
    }

    for progress in results {
        println!(
            "Job {} {}: {} completed, {} failed",
            progress.job.id, progress.status, progress.job.completed_tasks, progress.job.failed_tasks
        );
        for failure in &progress.failures {
            println!(
                "  {} {}: {}",
                failure.content_id,
                failure.language,
                failure.error_message.as_deref().unwrap_or("unknown error")
            );
        }
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
