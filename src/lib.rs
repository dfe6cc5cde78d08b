/*!
 * # chapterflow
 *
 * Detached multi-language chapter translation with a monthly budget.
 *
 * ## Features
 *
 * - Split chapter documents into identified segments and splice
 *   translations back into the original markup
 * - Translate one chapter into many languages in parallel, each language
 *   tracked as its own durable record
 * - Kick off single chapters or whole books and poll for status
 * - Retry transient provider failures with exponential backoff
 * - Refuse new provider calls once the month's spend reaches the ceiling
 *
 * ## Architecture
 *
 * - `app_config`: Configuration management
 * - `database`: SQLite status and cache store
 * - `translation`: Segmenter, retry policy, language worker and fan-out
 * - `providers`: Translator adapters (OpenAI, Anthropic, mock)
 * - `budget`: Monthly budget ledger
 * - `jobs`: Kickoff boundary and detached job launcher
 * - `progress`: Read-only rollups
 * - `app_controller`: Wires the pieces together for the CLI
 * - `file_utils`: Chapter import and export helpers
 * - `language_utils`: Supported language codes
 * - `errors`: Error taxonomy
 */

// Global lints configuration
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::redundant_closure_for_method_calls)]

pub mod app_config;
pub mod app_controller;
pub mod budget;
pub mod database;
pub mod errors;
pub mod file_utils;
pub mod jobs;
pub mod language_utils;
pub mod progress;
pub mod providers;
pub mod translation;

pub use app_config::Config;
pub use budget::{BudgetLedger, BudgetSnapshot, BudgetStatus, BudgetUpdate};
pub use errors::{AppError, ErrorKind, PipelineError, ProviderError, SegmentError, TranslatorError};
pub use jobs::{JobLauncher, KickoffAck, KickoffRequest, StatusEntry};
pub use language_utils::SupportedLanguage;
pub use progress::ProgressAggregator;
pub use translation::{DocumentSegmenter, FanOutOrchestrator, LanguageWorker, Segment};
