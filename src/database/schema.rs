/*!
 * Store schema as an ordered list of migrations.
 *
 * Migration `n` brings the store from version `n - 1` to `n`. Each runs in
 * its own transaction together with the version bump, so a crash leaves the
 * store at a known version.
 */

use anyhow::{Context, Result};
use log::{debug, info};
use rusqlite::{params, Connection, OptionalExtension};

/// Books and chapters, with the segmentation cached per source revision
const V1_CHAPTER_STORE: &str = r#"
CREATE TABLE books (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE chapters (
    id TEXT PRIMARY KEY,
    book_id TEXT NOT NULL REFERENCES books(id) ON DELETE CASCADE,
    ordinal INTEGER NOT NULL,
    title TEXT NOT NULL,
    source_language TEXT NOT NULL,
    source_markup TEXT NOT NULL,
    segments TEXT,
    segments_revision TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX idx_chapters_book ON chapters(book_id, ordinal);
"#;

/// One row per (content, language)
const V2_TRANSLATION_RECORDS: &str = r#"
CREATE TABLE translation_records (
    content_id TEXT NOT NULL REFERENCES chapters(id) ON DELETE CASCADE,
    language TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    segments TEXT,
    error_kind TEXT,
    error_message TEXT,
    attempt_count INTEGER NOT NULL DEFAULT 0,
    prompt_tokens INTEGER,
    completion_tokens INTEGER,
    cost_usd REAL,
    claim_token TEXT,
    requested_at TEXT NOT NULL,
    started_at TEXT,
    completed_at TEXT,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (content_id, language)
);

CREATE INDEX idx_records_status ON translation_records(status);
"#;

/// Jobs and the (content, language) tasks they cover
const V3_JOBS: &str = r#"
CREATE TABLE translation_jobs (
    id TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    book_id TEXT,
    languages TEXT NOT NULL,
    total_tasks INTEGER NOT NULL,
    completed_tasks INTEGER NOT NULL DEFAULT 0,
    failed_tasks INTEGER NOT NULL DEFAULT 0,
    started_at TEXT NOT NULL,
    completed_at TEXT
);

CREATE TABLE job_tasks (
    job_id TEXT NOT NULL REFERENCES translation_jobs(id) ON DELETE CASCADE,
    content_id TEXT NOT NULL,
    language TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    error_kind TEXT,
    error_message TEXT,
    resolved_at TEXT,
    PRIMARY KEY (job_id, content_id, language)
);

CREATE INDEX idx_jobs_started ON translation_jobs(started_at);
"#;

const V4_BUDGET: &str = r#"
CREATE TABLE budget_periods (
    month TEXT PRIMARY KEY,
    ceiling_usd REAL NOT NULL,
    spent_usd REAL NOT NULL DEFAULT 0,
    alert_threshold_pct REAL NOT NULL,
    alert_triggered_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

const MIGRATIONS: &[&str] = &[V1_CHAPTER_STORE, V2_TRANSLATION_RECORDS, V3_JOBS, V4_BUDGET];

/// Version a fully migrated store reports
pub const SCHEMA_VERSION: i32 = MIGRATIONS.len() as i32;

/// Bring the store up to `SCHEMA_VERSION`
pub fn initialize_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            version INTEGER NOT NULL,
            updated_at TEXT NOT NULL
        );",
    )?;

    let current = get_schema_version(conn)?;
    if current > SCHEMA_VERSION {
        return Err(anyhow::anyhow!(
            "Store is at schema v{}, newer than this build (v{})",
            current,
            SCHEMA_VERSION
        ));
    }
    if current == SCHEMA_VERSION {
        debug!("Store schema is up to date (v{})", current);
        return Ok(());
    }

    for (index, sql) in MIGRATIONS.iter().enumerate().skip(current as usize) {
        let version = index as i32 + 1;
        info!("Migrating store schema to v{}", version);
        apply_migration(conn, version, sql)
            .with_context(|| format!("Schema migration to v{} failed", version))?;
    }
    Ok(())
}

fn apply_migration(conn: &Connection, version: i32, sql: &str) -> Result<()> {
    // `initialize_schema` only has a shared borrow, so the transaction is explicit
    conn.execute_batch("BEGIN IMMEDIATE;")?;
    let result = conn.execute_batch(sql).and_then(|_| {
        conn.execute(
            "INSERT OR REPLACE INTO schema_version (id, version, updated_at) VALUES (1, ?1, datetime('now'))",
            params![version],
        )
    });

    match result {
        Ok(_) => {
            conn.execute_batch("COMMIT;")?;
            Ok(())
        }
        Err(e) => {
            conn.execute_batch("ROLLBACK;")?;
            Err(e.into())
        }
    }
}

fn get_schema_version(conn: &Connection) -> Result<i32> {
    let version = conn
        .query_row("SELECT version FROM schema_version WHERE id = 1", [], |row| row.get(0))
        .optional()
        .context("Failed to read schema version")?;
    Ok(version.unwrap_or(0))
}
