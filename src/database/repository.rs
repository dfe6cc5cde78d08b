/*!
 * Repository layer for database operations.
 *
 * This module provides a high-level API for all database operations,
 * abstracting away the SQL details and providing type-safe access.
 *
 * Every mutation is a single-row upsert, conditional update or atomic
 * increment, so concurrent workers never need more than the row they touch.
 */

use anyhow::Result;
use log::debug;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::connection::DatabaseConnection;
use super::models::{
    now_timestamp, BookRecord, BudgetPeriodRecord, ChapterRecord, JobKind, JobRecord,
    JobTaskState, TranslationRecord, TranslationStatus,
};
use crate::errors::ErrorKind;
use crate::translation::segmenter::Segment;

const RECORD_COLUMNS: &str = "content_id, language, status, segments, error_kind, error_message, \
     attempt_count, prompt_tokens, completion_tokens, cost_usd, claim_token, \
     requested_at, started_at, completed_at, updated_at";

const CHAPTER_COLUMNS: &str = "id, book_id, ordinal, title, source_language, source_markup, \
     segments, segments_revision, created_at, updated_at";

const JOB_COLUMNS: &str = "id, kind, book_id, languages, total_tasks, completed_tasks, \
     failed_tasks, started_at, completed_at";

const BUDGET_COLUMNS: &str = "month, ceiling_usd, spent_usd, alert_threshold_pct, \
     alert_triggered_at, created_at, updated_at";

/// Terminal success payload for a translation record
#[derive(Debug, Clone, Default)]
pub struct RecordCompletion {
    pub segments: Vec<Segment>,
    pub attempt_count: u32,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cost_usd: f64,
}

/// Terminal failure payload for a translation record
#[derive(Debug, Clone)]
pub struct RecordFailure {
    pub kind: ErrorKind,
    pub message: String,
    pub attempt_count: u32,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cost_usd: f64,
}

/// Terminal outcome of one job task
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub status: TranslationStatus,
    pub error_kind: Option<ErrorKind>,
    pub error_message: Option<String>,
}

impl TaskOutcome {
    pub fn completed() -> Self {
        Self {
            status: TranslationStatus::Completed,
            error_kind: None,
            error_message: None,
        }
    }

    pub fn failed(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            status: TranslationStatus::Failed,
            error_kind: Some(kind),
            error_message: Some(message.into()),
        }
    }
}

/// Repository for database operations
#[derive(Clone)]
pub struct Repository {
    /// Database connection
    db: DatabaseConnection,
}

fn json_column<T: serde::de::DeserializeOwned>(
    row: &Row,
    idx: usize,
) -> rusqlite::Result<Option<T>> {
    let raw: Option<String> = row.get(idx)?;
    match raw {
        Some(text) => serde_json::from_str(&text).map(Some).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        }),
        None => Ok(None),
    }
}

fn error_kind_column(row: &Row, idx: usize) -> rusqlite::Result<Option<ErrorKind>> {
    let raw: Option<String> = row.get(idx)?;
    Ok(raw.and_then(|s| s.parse().ok()))
}

fn record_from_row(row: &Row) -> rusqlite::Result<TranslationRecord> {
    Ok(TranslationRecord {
        content_id: row.get(0)?,
        language: row.get(1)?,
        status: row
            .get::<_, String>(2)?
            .parse()
            .unwrap_or(TranslationStatus::Pending),
        segments: json_column(row, 3)?,
        error_kind: error_kind_column(row, 4)?,
        error_message: row.get(5)?,
        attempt_count: row.get(6)?,
        prompt_tokens: row.get(7)?,
        completion_tokens: row.get(8)?,
        cost_usd: row.get(9)?,
        claim_token: row.get(10)?,
        requested_at: row.get(11)?,
        started_at: row.get(12)?,
        completed_at: row.get(13)?,
        updated_at: row.get(14)?,
    })
}

fn chapter_from_row(row: &Row) -> rusqlite::Result<ChapterRecord> {
    Ok(ChapterRecord {
        id: row.get(0)?,
        book_id: row.get(1)?,
        ordinal: row.get(2)?,
        title: row.get(3)?,
        source_language: row.get(4)?,
        source_markup: row.get(5)?,
        segments: json_column(row, 6)?,
        segments_revision: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

fn job_from_row(row: &Row) -> rusqlite::Result<JobRecord> {
    Ok(JobRecord {
        id: row.get(0)?,
        kind: row.get::<_, String>(1)?.parse().unwrap_or(JobKind::Unit),
        book_id: row.get(2)?,
        languages: json_column(row, 3)?.unwrap_or_default(),
        total_tasks: row.get(4)?,
        completed_tasks: row.get(5)?,
        failed_tasks: row.get(6)?,
        started_at: row.get(7)?,
        completed_at: row.get(8)?,
    })
}

fn budget_from_row(row: &Row) -> rusqlite::Result<BudgetPeriodRecord> {
    Ok(BudgetPeriodRecord {
        month: row.get(0)?,
        ceiling_usd: row.get(1)?,
        spent_usd: row.get(2)?,
        alert_threshold_pct: row.get(3)?,
        alert_triggered_at: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

impl Repository {
    /// Create a new repository with the given database connection
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Create a repository with the default database location
    pub fn new_default() -> Result<Self> {
        let db = DatabaseConnection::new_default()?;
        Ok(Self::new(db))
    }

    /// Create a repository with an in-memory database (for testing)
    pub fn new_in_memory() -> Result<Self> {
        let db = DatabaseConnection::new_in_memory()?;
        Ok(Self::new(db))
    }

    /// Underlying connection
    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    // =========================================================================
    // Document Store Operations
    // =========================================================================

    /// Insert or rename a book
    pub async fn upsert_book(&self, book: &BookRecord) -> Result<()> {
        let book = book.clone();

        self.db
            .execute_async(move |conn| {
                conn.execute(
                    r#"
                    INSERT INTO books (id, title, created_at, updated_at)
                    VALUES (?1, ?2, ?3, ?4)
                    ON CONFLICT(id) DO UPDATE SET title = excluded.title, updated_at = excluded.updated_at
                    "#,
                    params![book.id, book.title, book.created_at, book.updated_at],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn get_book(&self, book_id: &str) -> Result<Option<BookRecord>> {
        let book_id = book_id.to_string();

        self.db
            .execute_async(move |conn| {
                let book = conn
                    .query_row(
                        "SELECT id, title, created_at, updated_at FROM books WHERE id = ?1",
                        [book_id],
                        |row| {
                            Ok(BookRecord {
                                id: row.get(0)?,
                                title: row.get(1)?,
                                created_at: row.get(2)?,
                                updated_at: row.get(3)?,
                            })
                        },
                    )
                    .optional()?;
                Ok(book)
            })
            .await
    }

    pub async fn list_books(&self) -> Result<Vec<BookRecord>> {
        self.db
            .execute_async(|conn| {
                let mut stmt =
                    conn.prepare("SELECT id, title, created_at, updated_at FROM books ORDER BY id")?;
                let books = stmt
                    .query_map([], |row| {
                        Ok(BookRecord {
                            id: row.get(0)?,
                            title: row.get(1)?,
                            created_at: row.get(2)?,
                            updated_at: row.get(3)?,
                        })
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(books)
            })
            .await
    }

    /// Insert a chapter or replace its authored fields.
    ///
    /// Cached segments are kept; they are ignored once the revision no
    /// longer matches the markup.
    pub async fn upsert_chapter(&self, chapter: &ChapterRecord) -> Result<()> {
        let chapter = chapter.clone();

        self.db
            .execute_async(move |conn| {
                conn.execute(
                    r#"
                    INSERT INTO chapters (
                        id, book_id, ordinal, title, source_language, source_markup,
                        created_at, updated_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                    ON CONFLICT(id) DO UPDATE SET
                        book_id = excluded.book_id,
                        ordinal = excluded.ordinal,
                        title = excluded.title,
                        source_language = excluded.source_language,
                        source_markup = excluded.source_markup,
                        updated_at = excluded.updated_at
                    "#,
                    params![
                        chapter.id,
                        chapter.book_id,
                        chapter.ordinal,
                        chapter.title,
                        chapter.source_language,
                        chapter.source_markup,
                        chapter.created_at,
                        chapter.updated_at,
                    ],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn get_chapter(&self, chapter_id: &str) -> Result<Option<ChapterRecord>> {
        let chapter_id = chapter_id.to_string();

        self.db
            .execute_async(move |conn| {
                let chapter = conn
                    .query_row(
                        &format!("SELECT {} FROM chapters WHERE id = ?1", CHAPTER_COLUMNS),
                        [chapter_id],
                        chapter_from_row,
                    )
                    .optional()?;
                Ok(chapter)
            })
            .await
    }

    /// Chapters of a book in reading order
    pub async fn list_chapters(&self, book_id: &str) -> Result<Vec<ChapterRecord>> {
        let book_id = book_id.to_string();

        self.db
            .execute_async(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM chapters WHERE book_id = ?1 ORDER BY ordinal, id",
                    CHAPTER_COLUMNS
                ))?;
                let chapters = stmt
                    .query_map([book_id], chapter_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(chapters)
            })
            .await
    }

    /// Cache a segmentation for the given revision
    pub async fn store_segments(
        &self,
        chapter_id: &str,
        revision: &str,
        segments: &[Segment],
    ) -> Result<()> {
        let chapter_id = chapter_id.to_string();
        let revision = revision.to_string();
        let segments_json = serde_json::to_string(segments)?;
        let now = now_timestamp();

        self.db
            .execute_async(move |conn| {
                conn.execute(
                    "UPDATE chapters SET segments = ?2, segments_revision = ?3, updated_at = ?4 WHERE id = ?1",
                    params![chapter_id, segments_json, revision, now],
                )?;
                Ok(())
            })
            .await
    }

    // =========================================================================
    // Translation Record Operations
    // =========================================================================

    /// Create a `pending` record unless one already exists.
    ///
    /// Returns true when a new record was inserted.
    pub async fn ensure_pending(&self, content_id: &str, language: &str) -> Result<bool> {
        let content_id = content_id.to_string();
        let language = language.to_string();
        let now = now_timestamp();

        self.db
            .execute_async(move |conn| {
                let inserted = conn.execute(
                    r#"
                    INSERT INTO translation_records (content_id, language, status, requested_at, updated_at)
                    VALUES (?1, ?2, 'pending', ?3, ?3)
                    ON CONFLICT(content_id, language) DO NOTHING
                    "#,
                    params![content_id, language, now],
                )?;
                Ok(inserted > 0)
            })
            .await
    }

    /// Explicit retranslation: put the record back to `pending`, whatever its state
    pub async fn reset_to_pending(&self, content_id: &str, language: &str) -> Result<()> {
        let content_id = content_id.to_string();
        let language = language.to_string();
        let now = now_timestamp();

        self.db
            .execute_async(move |conn| {
                conn.execute(
                    r#"
                    INSERT INTO translation_records (content_id, language, status, requested_at, updated_at)
                    VALUES (?1, ?2, 'pending', ?3, ?3)
                    ON CONFLICT(content_id, language) DO UPDATE SET
                        status = 'pending',
                        segments = NULL,
                        error_kind = NULL,
                        error_message = NULL,
                        attempt_count = 0,
                        prompt_tokens = NULL,
                        completion_tokens = NULL,
                        cost_usd = NULL,
                        claim_token = NULL,
                        requested_at = excluded.requested_at,
                        started_at = NULL,
                        completed_at = NULL,
                        updated_at = excluded.updated_at
                    "#,
                    params![content_id, language, now],
                )?;
                Ok(())
            })
            .await
    }

    /// Claim a record for a worker.
    ///
    /// Succeeds on `pending` and `failed` records, and on `processing` records
    /// whose last update is older than `stale_before`. Never claims a
    /// `completed` record. Returns true when this caller now owns the record.
    pub async fn claim_record(
        &self,
        content_id: &str,
        language: &str,
        claim_token: &str,
        stale_before: &str,
    ) -> Result<bool> {
        let content_id = content_id.to_string();
        let language = language.to_string();
        let claim_token = claim_token.to_string();
        let stale_before = stale_before.to_string();
        let now = now_timestamp();

        self.db
            .execute_async(move |conn| {
                let claimed = conn.execute(
                    r#"
                    UPDATE translation_records SET
                        status = 'processing',
                        claim_token = ?3,
                        attempt_count = 0,
                        error_kind = NULL,
                        error_message = NULL,
                        started_at = ?4,
                        completed_at = NULL,
                        updated_at = ?4
                    WHERE content_id = ?1 AND language = ?2
                      AND (status IN ('pending', 'failed')
                           OR (status = 'processing' AND updated_at < ?5))
                    "#,
                    params![content_id, language, claim_token, now, stale_before],
                )?;
                if claimed > 0 {
                    debug!("Claimed {}/{} with token {}", content_id, language, claim_token);
                }
                Ok(claimed > 0)
            })
            .await
    }

    /// Persist the attempt number; also refreshes the claim's heartbeat.
    ///
    /// Returns false when the claim was lost to another worker.
    pub async fn record_attempt(
        &self,
        content_id: &str,
        language: &str,
        claim_token: &str,
        attempt: u32,
    ) -> Result<bool> {
        let content_id = content_id.to_string();
        let language = language.to_string();
        let claim_token = claim_token.to_string();
        let now = now_timestamp();

        self.db
            .execute_async(move |conn| {
                let updated = conn.execute(
                    r#"
                    UPDATE translation_records SET attempt_count = ?4, updated_at = ?5
                    WHERE content_id = ?1 AND language = ?2
                      AND status = 'processing' AND claim_token = ?3
                    "#,
                    params![content_id, language, claim_token, attempt as i64, now],
                )?;
                Ok(updated > 0)
            })
            .await
    }

    /// Write the `completed` state, segments and cost in one statement.
    ///
    /// Last write wins; a duplicate completion simply rewrites the same payload.
    pub async fn complete_record(
        &self,
        content_id: &str,
        language: &str,
        completion: &RecordCompletion,
    ) -> Result<()> {
        let content_id = content_id.to_string();
        let language = language.to_string();
        let segments_json = serde_json::to_string(&completion.segments)?;
        let completion = completion.clone();
        let now = now_timestamp();

        self.db
            .execute_async(move |conn| {
                conn.execute(
                    r#"
                    INSERT INTO translation_records (
                        content_id, language, status, segments, attempt_count,
                        prompt_tokens, completion_tokens, cost_usd,
                        requested_at, started_at, completed_at, updated_at
                    ) VALUES (?1, ?2, 'completed', ?3, ?4, ?5, ?6, ?7, ?8, ?8, ?8, ?8)
                    ON CONFLICT(content_id, language) DO UPDATE SET
                        status = 'completed',
                        segments = excluded.segments,
                        error_kind = NULL,
                        error_message = NULL,
                        attempt_count = excluded.attempt_count,
                        prompt_tokens = excluded.prompt_tokens,
                        completion_tokens = excluded.completion_tokens,
                        cost_usd = excluded.cost_usd,
                        claim_token = NULL,
                        started_at = COALESCE(translation_records.started_at, excluded.started_at),
                        completed_at = excluded.completed_at,
                        updated_at = excluded.updated_at
                    "#,
                    params![
                        content_id,
                        language,
                        segments_json,
                        completion.attempt_count as i64,
                        completion.prompt_tokens as i64,
                        completion.completion_tokens as i64,
                        completion.cost_usd,
                        now,
                    ],
                )?;
                Ok(())
            })
            .await
    }

    /// Write the `failed` state unless the record is already `completed`.
    ///
    /// Returns false when a completed record was left untouched.
    pub async fn fail_record(
        &self,
        content_id: &str,
        language: &str,
        failure: &RecordFailure,
    ) -> Result<bool> {
        let content_id = content_id.to_string();
        let language = language.to_string();
        let failure = failure.clone();
        let now = now_timestamp();

        self.db
            .execute_async(move |conn| {
                let updated = conn.execute(
                    r#"
                    UPDATE translation_records SET
                        status = 'failed',
                        error_kind = ?3,
                        error_message = ?4,
                        attempt_count = ?5,
                        prompt_tokens = ?6,
                        completion_tokens = ?7,
                        cost_usd = ?8,
                        claim_token = NULL,
                        completed_at = ?9,
                        updated_at = ?9
                    WHERE content_id = ?1 AND language = ?2 AND status != 'completed'
                    "#,
                    params![
                        content_id,
                        language,
                        failure.kind.to_string(),
                        failure.message,
                        failure.attempt_count as i64,
                        failure.prompt_tokens as i64,
                        failure.completion_tokens as i64,
                        failure.cost_usd,
                        now,
                    ],
                )?;
                Ok(updated > 0)
            })
            .await
    }

    pub async fn get_record(&self, content_id: &str, language: &str) -> Result<Option<TranslationRecord>> {
        let content_id = content_id.to_string();
        let language = language.to_string();

        self.db
            .execute_async(move |conn| {
                let record = conn
                    .query_row(
                        &format!(
                            "SELECT {} FROM translation_records WHERE content_id = ?1 AND language = ?2",
                            RECORD_COLUMNS
                        ),
                        params![content_id, language],
                        record_from_row,
                    )
                    .optional()?;
                Ok(record)
            })
            .await
    }

    /// All language records of one chapter
    pub async fn list_records_for_content(&self, content_id: &str) -> Result<Vec<TranslationRecord>> {
        let content_id = content_id.to_string();

        self.db
            .execute_async(move |conn| {
                Self::query_records(
                    conn,
                    &format!(
                        "SELECT {} FROM translation_records WHERE content_id = ?1 ORDER BY language",
                        RECORD_COLUMNS
                    ),
                    params![content_id],
                )
            })
            .await
    }

    /// All records of every chapter of a book
    pub async fn list_records_for_book(&self, book_id: &str) -> Result<Vec<TranslationRecord>> {
        let book_id = book_id.to_string();

        self.db
            .execute_async(move |conn| {
                Self::query_records(
                    conn,
                    &format!(
                        "SELECT {} FROM translation_records WHERE content_id IN \
                         (SELECT id FROM chapters WHERE book_id = ?1) ORDER BY content_id, language",
                        RECORD_COLUMNS
                    ),
                    params![book_id],
                )
            })
            .await
    }

    pub async fn list_all_records(&self) -> Result<Vec<TranslationRecord>> {
        self.db
            .execute_async(|conn| {
                Self::query_records(
                    conn,
                    &format!(
                        "SELECT {} FROM translation_records ORDER BY content_id, language",
                        RECORD_COLUMNS
                    ),
                    params![],
                )
            })
            .await
    }

    /// Languages a chapter is already fully translated into
    pub async fn completed_languages(&self, content_id: &str) -> Result<Vec<String>> {
        let content_id = content_id.to_string();

        self.db
            .execute_async(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT language FROM translation_records WHERE content_id = ?1 AND status = 'completed' ORDER BY language",
                )?;
                let languages = stmt
                    .query_map([content_id], |row| row.get(0))?
                    .collect::<rusqlite::Result<Vec<String>>>()?;
                Ok(languages)
            })
            .await
    }

    fn query_records(
        conn: &Connection,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<TranslationRecord>> {
        let mut stmt = conn.prepare(sql)?;
        let records = stmt
            .query_map(params, record_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    // =========================================================================
    // Job Operations
    // =========================================================================

    /// Create a job together with its (content, language) tasks
    pub async fn create_job(&self, job: &JobRecord, tasks: &[(String, String)]) -> Result<()> {
        let job = job.clone();
        let tasks = tasks.to_vec();
        let languages_json = serde_json::to_string(&job.languages)?;

        self.db
            .transaction_async(move |tx| {
                tx.execute(
                    r#"
                    INSERT INTO translation_jobs (
                        id, kind, book_id, languages, total_tasks, completed_tasks,
                        failed_tasks, started_at, completed_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                    "#,
                    params![
                        job.id,
                        job.kind.to_string(),
                        job.book_id,
                        languages_json,
                        job.total_tasks,
                        job.completed_tasks,
                        job.failed_tasks,
                        job.started_at,
                        job.completed_at,
                    ],
                )?;

                let mut stmt = tx.prepare(
                    "INSERT OR IGNORE INTO job_tasks (job_id, content_id, language) VALUES (?1, ?2, ?3)",
                )?;
                for (content_id, language) in &tasks {
                    stmt.execute(params![job.id, content_id, language])?;
                }

                debug!("Created job {} with {} tasks", job.id, tasks.len());
                Ok(())
            })
            .await
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Option<JobRecord>> {
        let job_id = job_id.to_string();

        self.db
            .execute_async(move |conn| {
                let job = conn
                    .query_row(
                        &format!("SELECT {} FROM translation_jobs WHERE id = ?1", JOB_COLUMNS),
                        [job_id],
                        job_from_row,
                    )
                    .optional()?;
                Ok(job)
            })
            .await
    }

    /// Most recent jobs first
    pub async fn list_jobs(&self, limit: usize) -> Result<Vec<JobRecord>> {
        self.db
            .execute_async(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM translation_jobs ORDER BY started_at DESC LIMIT ?1",
                    JOB_COLUMNS
                ))?;
                let jobs = stmt
                    .query_map([limit as i64], job_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(jobs)
            })
            .await
    }

    /// Settle one task of a job and bump the job's counters in the same
    /// transaction, stamping `completed_at` when the last task resolves.
    ///
    /// A task settles once; later outcomes for it are ignored.
    pub async fn resolve_job_task(
        &self,
        job_id: &str,
        content_id: &str,
        language: &str,
        outcome: &TaskOutcome,
    ) -> Result<Option<JobRecord>> {
        if !outcome.status.is_terminal() {
            return Err(anyhow::anyhow!(
                "Task {}/{} cannot settle as {}",
                content_id,
                language,
                outcome.status
            ));
        }
        let job_id = job_id.to_string();
        let content_id = content_id.to_string();
        let language = language.to_string();
        let outcome = outcome.clone();
        let now = now_timestamp();

        self.db
            .transaction_async(move |tx| {
                let settled = tx.execute(
                    r#"
                    UPDATE job_tasks SET status = ?4, error_kind = ?5, error_message = ?6, resolved_at = ?7
                    WHERE job_id = ?1 AND content_id = ?2 AND language = ?3 AND status = 'pending'
                    "#,
                    params![
                        job_id,
                        content_id,
                        language,
                        outcome.status.to_string(),
                        outcome.error_kind.map(|k| k.to_string()),
                        outcome.error_message,
                        now,
                    ],
                )?;

                if settled > 0 {
                    let (completed, failed) = match outcome.status {
                        TranslationStatus::Completed => (1, 0),
                        _ => (0, 1),
                    };
                    tx.execute(
                        r#"
                        UPDATE translation_jobs SET
                            completed_tasks = completed_tasks + ?2,
                            failed_tasks = failed_tasks + ?3,
                            completed_at = CASE
                                WHEN completed_at IS NULL
                                     AND completed_tasks + ?2 + failed_tasks + ?3 >= total_tasks
                                THEN ?4
                                ELSE completed_at
                            END
                        WHERE id = ?1
                        "#,
                        params![job_id, completed, failed, now],
                    )?;
                } else {
                    debug!("Task {}/{} of job {} was already settled", content_id, language, job_id);
                }

                let job = tx
                    .query_row(
                        &format!("SELECT {} FROM translation_jobs WHERE id = ?1", JOB_COLUMNS),
                        [&job_id],
                        job_from_row,
                    )
                    .optional()?;
                Ok(job)
            })
            .await
    }

    /// Tasks of a job.
    ///
    /// Settled tasks report their own outcome; the shared translation record
    /// only tells an open task apart as `processing` or `pending`.
    pub async fn job_task_states(&self, job_id: &str) -> Result<Vec<JobTaskState>> {
        let job_id = job_id.to_string();

        self.db
            .execute_async(move |conn| {
                let mut stmt = conn.prepare(
                    r#"
                    SELECT t.content_id, t.language,
                           CASE
                               WHEN t.status IN ('completed', 'failed') THEN t.status
                               WHEN r.status = 'processing' THEN 'processing'
                               ELSE 'pending'
                           END,
                           t.error_kind, t.error_message
                    FROM job_tasks t
                    LEFT JOIN translation_records r
                        ON r.content_id = t.content_id AND r.language = t.language
                    WHERE t.job_id = ?1
                    ORDER BY t.content_id, t.language
                    "#,
                )?;
                let states = stmt
                    .query_map([job_id], |row| {
                        Ok(JobTaskState {
                            content_id: row.get(0)?,
                            language: row.get(1)?,
                            status: row
                                .get::<_, String>(2)?
                                .parse()
                                .unwrap_or(TranslationStatus::Pending),
                            error_kind: error_kind_column(row, 3)?,
                            error_message: row.get(4)?,
                        })
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(states)
            })
            .await
    }

    // =========================================================================
    // Budget Operations
    // =========================================================================

    pub async fn get_budget_period(&self, month: &str) -> Result<Option<BudgetPeriodRecord>> {
        let month = month.to_string();

        self.db
            .execute_async(move |conn| Self::get_budget_period_sync(conn, &month))
            .await
    }

    fn get_budget_period_sync(conn: &Connection, month: &str) -> Result<Option<BudgetPeriodRecord>> {
        let period = conn
            .query_row(
                &format!("SELECT {} FROM budget_periods WHERE month = ?1", BUDGET_COLUMNS),
                [month],
                budget_from_row,
            )
            .optional()?;
        Ok(period)
    }

    /// Latest period strictly before `month`
    pub async fn latest_budget_period_before(&self, month: &str) -> Result<Option<BudgetPeriodRecord>> {
        let month = month.to_string();

        self.db
            .execute_async(move |conn| {
                let period = conn
                    .query_row(
                        &format!(
                            "SELECT {} FROM budget_periods WHERE month < ?1 ORDER BY month DESC LIMIT 1",
                            BUDGET_COLUMNS
                        ),
                        [month],
                        budget_from_row,
                    )
                    .optional()?;
                Ok(period)
            })
            .await
    }

    /// Insert a period unless the month already has one; returns the stored row
    pub async fn insert_budget_period(&self, period: &BudgetPeriodRecord) -> Result<BudgetPeriodRecord> {
        let period = period.clone();

        self.db
            .execute_async(move |conn| {
                conn.execute(
                    &format!(
                        "INSERT OR IGNORE INTO budget_periods ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                        BUDGET_COLUMNS
                    ),
                    params![
                        period.month,
                        period.ceiling_usd,
                        period.spent_usd,
                        period.alert_threshold_pct,
                        period.alert_triggered_at,
                        period.created_at,
                        period.updated_at,
                    ],
                )?;
                Self::get_budget_period_sync(conn, &period.month)?
                    .ok_or_else(|| anyhow::anyhow!("Budget period {} vanished after insert", period.month))
            })
            .await
    }

    /// Atomically add spend to a period and raise the alert flag on first crossing
    pub async fn add_spend(&self, month: &str, amount_usd: f64) -> Result<Option<BudgetPeriodRecord>> {
        let month = month.to_string();
        let now = now_timestamp();

        self.db
            .transaction_async(move |tx| {
                tx.execute(
                    "UPDATE budget_periods SET spent_usd = spent_usd + ?2, updated_at = ?3 WHERE month = ?1",
                    params![month, amount_usd, now],
                )?;
                tx.execute(
                    r#"
                    UPDATE budget_periods SET alert_triggered_at = ?2
                    WHERE month = ?1 AND alert_triggered_at IS NULL
                      AND spent_usd >= ceiling_usd * alert_threshold_pct / 100.0
                    "#,
                    params![month, now],
                )?;
                Self::get_budget_period_sync(tx, &month)
            })
            .await
    }

    /// Change the ceiling and/or threshold of a period.
    ///
    /// The alert flag is re-evaluated against the new limits.
    pub async fn update_budget_limits(
        &self,
        month: &str,
        ceiling_usd: Option<f64>,
        alert_threshold_pct: Option<f64>,
    ) -> Result<Option<BudgetPeriodRecord>> {
        let month = month.to_string();
        let now = now_timestamp();

        self.db
            .transaction_async(move |tx| {
                tx.execute(
                    r#"
                    UPDATE budget_periods SET
                        ceiling_usd = COALESCE(?2, ceiling_usd),
                        alert_threshold_pct = COALESCE(?3, alert_threshold_pct),
                        updated_at = ?4
                    WHERE month = ?1
                    "#,
                    params![month, ceiling_usd, alert_threshold_pct, now],
                )?;
                tx.execute(
                    r#"
                    UPDATE budget_periods SET alert_triggered_at = CASE
                        WHEN spent_usd >= ceiling_usd * alert_threshold_pct / 100.0
                        THEN COALESCE(alert_triggered_at, ?2)
                        ELSE NULL
                    END
                    WHERE month = ?1
                    "#,
                    params![month, now],
                )?;
                Self::get_budget_period_sync(tx, &month)
            })
            .await
    }
}
