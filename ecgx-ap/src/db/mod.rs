//! Database access for the analysis pipeline
//!
//! SQLite via sqlx. Records are soft-deleted, never physically removed;
//! status transitions use compare-and-set updates so concurrent writers
//! can never skip a lifecycle state.

pub mod analyses;
pub mod artifacts;
pub mod directory;
pub mod notifications;
pub mod validations;

use anyhow::Result;
use sqlx::SqlitePool;
use std::path::Path;

/// Initialize the database connection pool
///
/// Connects to the SQLite database in the data folder, creating it (and
/// the schema) when missing.
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // SQLite URI with mode=rwc (read, write, create)
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;
    init_tables(&pool).await?;

    Ok(pool)
}

/// In-memory pool for tests
///
/// Pinned to one connection: each connection to `:memory:` opens its own
/// private database.
pub async fn init_memory_pool() -> Result<SqlitePool> {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    init_tables(&pool).await?;
    Ok(pool)
}

/// Create pipeline tables if they don't exist
async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ecg_analyses (
            guid TEXT PRIMARY KEY,
            patient_id TEXT NOT NULL,
            created_by TEXT NOT NULL,
            file_path TEXT NOT NULL,
            filename TEXT NOT NULL,
            content_hash TEXT NOT NULL DEFAULT '',
            file_size INTEGER NOT NULL DEFAULT 0,
            sample_rate INTEGER,
            duration_secs REAL,
            lead_count INTEGER,
            lead_names TEXT NOT NULL DEFAULT '[]',
            device TEXT,
            status TEXT NOT NULL,
            retry_count INTEGER NOT NULL DEFAULT 0,
            error_message TEXT,
            processing_started_at TEXT,
            processing_completed_at TEXT,
            processing_duration_ms INTEGER,
            primary_diagnosis TEXT,
            clinical_urgency TEXT,
            ai_confidence REAL,
            requires_immediate_attention INTEGER NOT NULL DEFAULT 0,
            report TEXT,
            deleted_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ecg_measurements (
            guid TEXT PRIMARY KEY,
            analysis_id TEXT NOT NULL,
            name TEXT NOT NULL,
            value REAL NOT NULL,
            unit TEXT NOT NULL,
            source TEXT NOT NULL DEFAULT 'algorithm',
            confidence REAL NOT NULL DEFAULT 0.0,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ecg_annotations (
            guid TEXT PRIMARY KEY,
            analysis_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            location TEXT,
            description TEXT NOT NULL,
            severity TEXT,
            source TEXT NOT NULL,
            confidence REAL NOT NULL DEFAULT 0.0,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS validations (
            guid TEXT PRIMARY KEY,
            analysis_id TEXT NOT NULL,
            validator_id TEXT NOT NULL,
            status TEXT NOT NULL,
            clinical_notes TEXT,
            agrees_with_ai INTEGER,
            signal_quality_rating INTEGER,
            interpretation_quality_rating INTEGER,
            requires_second_opinion INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            submitted_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // At most one open validation per (analysis, validator); concurrent
    // inserts that slip past the pre-check hit this index instead
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_validations_open_pair
        ON validations (analysis_id, validator_id)
        WHERE status = 'PENDING'
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS notifications (
            guid TEXT PRIMARY KEY,
            recipient_id TEXT NOT NULL,
            title TEXT NOT NULL,
            message TEXT NOT NULL,
            notification_type TEXT NOT NULL,
            priority TEXT NOT NULL,
            requested_channels TEXT NOT NULL DEFAULT '[]',
            analysis_id TEXT,
            email_delivery TEXT NOT NULL DEFAULT '{}',
            sms_delivery TEXT NOT NULL DEFAULT '{}',
            push_delivery TEXT NOT NULL DEFAULT '{}',
            in_app_delivery TEXT NOT NULL DEFAULT '{}',
            sent_at TEXT,
            read_at TEXT,
            scheduled_for TEXT,
            expires_at TEXT,
            retry_count INTEGER NOT NULL DEFAULT 0,
            max_retries INTEGER NOT NULL DEFAULT 3,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            guid TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            role TEXT NOT NULL,
            years_experience INTEGER NOT NULL DEFAULT 0,
            available INTEGER NOT NULL DEFAULT 1,
            enabled_channels TEXT NOT NULL DEFAULT '["inapp"]',
            quiet_hours_start TEXT,
            quiet_hours_end TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS patients (
            guid TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            birth_date TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!(
        "Database tables initialized (ecg_analyses, ecg_measurements, ecg_annotations, validations, notifications, users, patients)"
    );

    Ok(())
}
