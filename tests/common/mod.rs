/*!
 * Common test utilities for the chapterflow test suite
 */

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::fs;
use anyhow::Result;
use tempfile::TempDir;

use chapterflow::app_config::Config;
use chapterflow::app_controller::Controller;
use chapterflow::database::Repository;
use chapterflow::database::models::{BookRecord, ChapterRecord};
use chapterflow::providers::mock::MockTranslator;

/// Three paragraphs in French, the source language used across scenarios
pub const SAMPLE_CHAPTER: &str = "<section>\n<p>Il pleuvait.</p>\n<p>Elle attendait.</p>\n<p>Le train arriva.</p>\n</section>";

/// Route library logs through env_logger; safe to call from every test
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Creates a temporary directory for test files
pub fn create_temp_dir() -> Result<TempDir> {
    Ok(TempDir::new()?)
}

/// Creates a test file with the given content in the specified directory
pub fn create_test_file(dir: &Path, filename: &str, content: &str) -> Result<PathBuf> {
    let file_path = dir.join(filename);
    fs::write(&file_path, content)?;
    Ok(file_path)
}

/// Configuration with every delay shrunk so scenarios finish quickly
pub fn fast_config(languages: &[&str]) -> Config {
    let mut config = Config::default();
    config.target_languages = languages.iter().map(|l| l.to_string()).collect();
    config.pipeline.dispatch_delay_ms = 0;
    config.pipeline.inter_unit_delay_ms = 1;
    config.pipeline.retry_backoff_ms = 1;
    config.pipeline.retry_max_backoff_ms = 10;
    config.pipeline.retry_jitter = 0.0;
    config.pipeline.poll_interval_secs = 0;
    config
}

/// In-memory store holding `books` books of `chapters_per_book` chapters each.
///
/// Books are `book-N`, chapters `book-N-ch-M`.
pub async fn seeded_repository(books: usize, chapters_per_book: usize) -> Result<Repository> {
    let repo = Repository::new_in_memory()?;
    for b in 1..=books {
        let book_id = format!("book-{}", b);
        repo.upsert_book(&BookRecord::new(&book_id, format!("Book {}", b))).await?;
        for c in 1..=chapters_per_book {
            repo.upsert_chapter(&ChapterRecord::new(
                format!("{}-ch-{}", book_id, c),
                &book_id,
                c as i64,
                format!("Chapter {}", c),
                "fr",
                SAMPLE_CHAPTER,
            ))
            .await?;
        }
    }
    Ok(repo)
}

/// Controller over an existing store with a mock translator
pub fn controller_with_mock(config: Config, repo: Repository, mock: &MockTranslator) -> Result<Controller> {
    Controller::with_parts(config, repo, Arc::new(mock.clone()))
}
