/*!
 * Database entity models.
 *
 * These structures map directly to database tables and provide
 * type-safe access to persisted data.
 */

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::ErrorKind;
use crate::translation::segmenter::Segment;

/// Current time as a fixed-width UTC RFC 3339 string.
///
/// Fixed width keeps lexicographic order equal to chronological order,
/// which the stale-claim query relies on.
pub fn now_timestamp() -> String {
    format_timestamp(chrono::Utc::now())
}

pub fn format_timestamp(at: chrono::DateTime<chrono::Utc>) -> String {
    at.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Lifecycle of one (content, language) translation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranslationStatus {
    /// Requested, nobody working on it
    Pending,
    /// Claimed by a worker
    Processing,
    /// Translated and verified
    Completed,
    /// Gave up; see the error fields
    Failed,
}

impl TranslationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TranslationStatus::Completed | TranslationStatus::Failed)
    }
}

impl fmt::Display for TranslationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranslationStatus::Pending => write!(f, "pending"),
            TranslationStatus::Processing => write!(f, "processing"),
            TranslationStatus::Completed => write!(f, "completed"),
            TranslationStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for TranslationStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(TranslationStatus::Pending),
            "processing" => Ok(TranslationStatus::Processing),
            "completed" => Ok(TranslationStatus::Completed),
            "failed" => Ok(TranslationStatus::Failed),
            _ => Err(anyhow::anyhow!("Invalid translation status: {}", s)),
        }
    }
}

/// Overall status of a job, derived from its tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Processing => write!(f, "processing"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Derive a job's status from the statuses of its tasks.
///
/// Any task still open keeps the job open (`processing` once something has
/// started or finished, `pending` otherwise). With every task terminal, a
/// single failure makes the job `failed`.
pub fn derive_job_status<I>(statuses: I) -> JobStatus
where
    I: IntoIterator<Item = TranslationStatus>,
{
    let mut open = 0usize;
    let mut started = 0usize;
    let mut failed = 0usize;

    for status in statuses {
        match status {
            TranslationStatus::Pending => open += 1,
            TranslationStatus::Processing => {
                open += 1;
                started += 1;
            }
            TranslationStatus::Completed => started += 1,
            TranslationStatus::Failed => {
                started += 1;
                failed += 1;
            }
        }
    }

    if open > 0 {
        if started > 0 {
            JobStatus::Processing
        } else {
            JobStatus::Pending
        }
    } else if failed > 0 {
        JobStatus::Failed
    } else {
        JobStatus::Completed
    }
}

/// What a job was asked to translate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// A single chapter
    Unit,
    /// The incomplete chapters of a book
    Book,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKind::Unit => write!(f, "unit"),
            JobKind::Book => write!(f, "book"),
        }
    }
}

impl std::str::FromStr for JobKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "unit" => Ok(JobKind::Unit),
            "book" => Ok(JobKind::Book),
            _ => Err(anyhow::anyhow!("Invalid job kind: {}", s)),
        }
    }
}

/// Book record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookRecord {
    pub id: String,
    pub title: String,
    pub created_at: String,
    pub updated_at: String,
}

impl BookRecord {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = now_timestamp();
        Self {
            id: id.into(),
            title: title.into(),
            created_at: now.clone(),
            updated_at: now,
        }
    }
}

/// Chapter record: one content unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterRecord {
    /// Stable chapter identifier
    pub id: String,
    pub book_id: String,
    /// Position inside the book
    pub ordinal: i64,
    pub title: String,
    /// ISO 639-1 code of the authored text
    pub source_language: String,
    /// Authored document
    pub source_markup: String,
    /// Cached segmentation
    pub segments: Option<Vec<Segment>>,
    /// Revision the cached segmentation was computed from
    pub segments_revision: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl ChapterRecord {
    pub fn new(
        id: impl Into<String>,
        book_id: impl Into<String>,
        ordinal: i64,
        title: impl Into<String>,
        source_language: impl Into<String>,
        source_markup: impl Into<String>,
    ) -> Self {
        let now = now_timestamp();
        Self {
            id: id.into(),
            book_id: book_id.into(),
            ordinal,
            title: title.into(),
            source_language: source_language.into(),
            source_markup: source_markup.into(),
            segments: None,
            segments_revision: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }
}

/// Durable state of one (content, language) translation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationRecord {
    pub content_id: String,
    pub language: String,
    pub status: TranslationStatus,
    /// Translated fragments keyed by segment id, present once completed
    pub segments: Option<Vec<Segment>>,
    pub error_kind: Option<ErrorKind>,
    pub error_message: Option<String>,
    /// Attempts made by the current (or last) claim
    pub attempt_count: i64,
    pub prompt_tokens: Option<i64>,
    pub completion_tokens: Option<i64>,
    /// Missing when the provider reported no usage
    pub cost_usd: Option<f64>,
    pub claim_token: Option<String>,
    pub requested_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub updated_at: String,
}

impl TranslationRecord {
    /// Seconds between claim and completion, when both timestamps parse
    pub fn duration_secs(&self) -> Option<f64> {
        let started = chrono::DateTime::parse_from_rfc3339(self.started_at.as_deref()?).ok()?;
        let completed = chrono::DateTime::parse_from_rfc3339(self.completed_at.as_deref()?).ok()?;
        let millis = (completed - started).num_milliseconds();
        if millis < 0 {
            return None;
        }
        Some(millis as f64 / 1000.0)
    }
}

/// Bulk translation job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// UUID v4
    pub id: String,
    pub kind: JobKind,
    pub book_id: Option<String>,
    /// Target language codes
    pub languages: Vec<String>,
    /// One task per (content, language) pair
    pub total_tasks: i64,
    pub completed_tasks: i64,
    pub failed_tasks: i64,
    pub started_at: String,
    /// Set once every task resolved
    pub completed_at: Option<String>,
}

impl JobRecord {
    pub fn new(kind: JobKind, book_id: Option<String>, languages: Vec<String>, total_tasks: i64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            book_id,
            languages,
            total_tasks,
            completed_tasks: 0,
            failed_tasks: 0,
            started_at: now_timestamp(),
            completed_at: None,
        }
    }

    pub fn resolved_tasks(&self) -> i64 {
        self.completed_tasks + self.failed_tasks
    }

    pub fn is_finished(&self) -> bool {
        self.resolved_tasks() >= self.total_tasks
    }
}

/// One task of a job: its own outcome once resolved, else whether a
/// worker currently holds its record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobTaskState {
    pub content_id: String,
    pub language: String,
    pub status: TranslationStatus,
    pub error_kind: Option<ErrorKind>,
    pub error_message: Option<String>,
}

/// Spending period for one calendar month
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetPeriodRecord {
    /// `YYYY-MM`
    pub month: String,
    pub ceiling_usd: f64,
    pub spent_usd: f64,
    pub alert_threshold_pct: f64,
    /// Set the first time spend crossed the threshold
    pub alert_triggered_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl BudgetPeriodRecord {
    pub fn new(month: impl Into<String>, ceiling_usd: f64, alert_threshold_pct: f64) -> Self {
        let now = now_timestamp();
        Self {
            month: month.into(),
            ceiling_usd,
            spent_usd: 0.0,
            alert_threshold_pct,
            alert_triggered_at: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    /// Spend level at which the alert flag goes up
    pub fn alert_level_usd(&self) -> f64 {
        self.ceiling_usd * self.alert_threshold_pct / 100.0
    }

    pub fn is_exhausted(&self) -> bool {
        self.spent_usd >= self.ceiling_usd
    }
}
