//! Analysis record persistence
//!
//! Status transitions are compare-and-set: every UPDATE names the expected
//! current status in its WHERE clause and reports whether it won. Clinical
//! outputs are written in the same statement as the COMPLETED transition,
//! so no reader can observe one without the other.

use crate::models::{AnalysisStatus, ClinicalReport, EcgAnalysis};
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use uuid::Uuid;

use ecgx_common::{Error, Result};

/// Search filter for the analysis listing endpoint
#[derive(Debug, Clone, Default)]
pub struct AnalysisFilter {
    pub patient_id: Option<Uuid>,
    pub status: Option<AnalysisStatus>,
    pub urgency: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

/// Insert a freshly created PENDING analysis
pub async fn insert_analysis(pool: &SqlitePool, analysis: &EcgAnalysis) -> Result<()> {
    let lead_names = serde_json::to_string(&analysis.lead_names)
        .map_err(|e| Error::Internal(format!("Failed to serialize lead names: {}", e)))?;

    sqlx::query(
        r#"
        INSERT INTO ecg_analyses (
            guid, patient_id, created_by, file_path, filename,
            content_hash, file_size, sample_rate, duration_secs,
            lead_count, lead_names, device, status, retry_count,
            created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(analysis.guid.to_string())
    .bind(analysis.patient_id.to_string())
    .bind(analysis.created_by.to_string())
    .bind(&analysis.file_path)
    .bind(&analysis.filename)
    .bind(&analysis.content_hash)
    .bind(analysis.file_size as i64)
    .bind(analysis.sample_rate.map(|r| r as i64))
    .bind(analysis.duration_secs)
    .bind(analysis.lead_count.map(|c| c as i64))
    .bind(lead_names)
    .bind(&analysis.device)
    .bind(analysis.status.as_str())
    .bind(analysis.retry_count as i64)
    .bind(analysis.created_at.to_rfc3339())
    .bind(analysis.updated_at.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

/// Load one analysis by id (soft-deleted rows excluded)
pub async fn load_analysis(pool: &SqlitePool, guid: Uuid) -> Result<Option<EcgAnalysis>> {
    let row = sqlx::query("SELECT * FROM ecg_analyses WHERE guid = ? AND deleted_at IS NULL")
        .bind(guid.to_string())
        .fetch_optional(pool)
        .await?;

    row.map(|r| analysis_from_row(&r)).transpose()
}

/// Prior analysis of the same file for the same patient, if any
///
/// Used to warn about duplicate submissions; duplicates are still accepted.
pub async fn find_by_content_hash(
    pool: &SqlitePool,
    patient_id: Uuid,
    content_hash: &str,
) -> Result<Option<Uuid>> {
    if content_hash.is_empty() {
        return Ok(None);
    }
    let guid: Option<String> = sqlx::query_scalar(
        r#"
        SELECT guid FROM ecg_analyses
        WHERE patient_id = ? AND content_hash = ? AND deleted_at IS NULL
        ORDER BY created_at ASC
        LIMIT 1
        "#,
    )
    .bind(patient_id.to_string())
    .bind(content_hash)
    .fetch_optional(pool)
    .await?;

    guid.map(|g| {
        Uuid::parse_str(&g).map_err(|e| Error::Internal(format!("Bad guid in database: {}", e)))
    })
    .transpose()
}

/// CAS transition PENDING → PROCESSING
///
/// Returns false when another worker won the claim (or the record moved
/// on); the caller must not process in that case.
pub async fn begin_processing(
    pool: &SqlitePool,
    guid: Uuid,
    started_at: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE ecg_analyses
        SET status = 'PROCESSING',
            processing_started_at = ?,
            error_message = NULL,
            updated_at = ?
        WHERE guid = ? AND status = 'PENDING' AND deleted_at IS NULL
        "#,
    )
    .bind(started_at.to_rfc3339())
    .bind(Utc::now().to_rfc3339())
    .bind(guid.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Persist recording metadata discovered during signal loading
pub async fn update_recording_metadata(
    pool: &SqlitePool,
    guid: Uuid,
    metadata: &crate::types::RecordingMetadata,
) -> Result<()> {
    let lead_names = serde_json::to_string(&metadata.lead_names)
        .map_err(|e| Error::Internal(format!("Failed to serialize lead names: {}", e)))?;

    sqlx::query(
        r#"
        UPDATE ecg_analyses
        SET content_hash = ?, file_size = ?, sample_rate = ?,
            duration_secs = ?, lead_count = ?, lead_names = ?, device = ?,
            updated_at = ?
        WHERE guid = ?
        "#,
    )
    .bind(&metadata.content_hash)
    .bind(metadata.file_size as i64)
    .bind(metadata.sample_rate as i64)
    .bind(metadata.duration_secs)
    .bind(metadata.lead_count as i64)
    .bind(lead_names)
    .bind(&metadata.device)
    .bind(Utc::now().to_rfc3339())
    .bind(guid.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

/// CAS transition PROCESSING → COMPLETED, writing clinical outputs atomically
pub async fn complete_analysis(
    pool: &SqlitePool,
    guid: Uuid,
    report: &ClinicalReport,
    completed_at: DateTime<Utc>,
    duration_ms: u64,
) -> Result<bool> {
    let report_json = serde_json::to_string(report)
        .map_err(|e| Error::Internal(format!("Failed to serialize report: {}", e)))?;

    let result = sqlx::query(
        r#"
        UPDATE ecg_analyses
        SET status = 'COMPLETED',
            processing_completed_at = ?,
            processing_duration_ms = ?,
            primary_diagnosis = ?,
            clinical_urgency = ?,
            ai_confidence = ?,
            requires_immediate_attention = ?,
            report = ?,
            error_message = NULL,
            updated_at = ?
        WHERE guid = ? AND status = 'PROCESSING' AND deleted_at IS NULL
        "#,
    )
    .bind(completed_at.to_rfc3339())
    .bind(duration_ms as i64)
    .bind(&report.primary_diagnosis)
    .bind(report.clinical_urgency.as_str())
    .bind(report.ai_confidence)
    .bind(report.requires_immediate_attention as i64)
    .bind(report_json)
    .bind(Utc::now().to_rfc3339())
    .bind(guid.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// CAS transition PROCESSING → FAILED, recording the error and attempt count
pub async fn fail_analysis(
    pool: &SqlitePool,
    guid: Uuid,
    error: &str,
    retry_count: u32,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE ecg_analyses
        SET status = 'FAILED',
            error_message = ?,
            retry_count = ?,
            processing_completed_at = ?,
            updated_at = ?
        WHERE guid = ? AND status = 'PROCESSING' AND deleted_at IS NULL
        "#,
    )
    .bind(error)
    .bind(retry_count as i64)
    .bind(Utc::now().to_rfc3339())
    .bind(Utc::now().to_rfc3339())
    .bind(guid.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// CAS transition FAILED → PENDING for an automatic retry
///
/// `retry_count` becomes the 1-based number of retries consumed.
pub async fn requeue_failed(pool: &SqlitePool, guid: Uuid, retry_count: u32) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE ecg_analyses
        SET status = 'PENDING', retry_count = ?, updated_at = ?
        WHERE guid = ? AND status = 'FAILED' AND deleted_at IS NULL
        "#,
    )
    .bind(retry_count as i64)
    .bind(Utc::now().to_rfc3339())
    .bind(guid.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Soft delete: the record stays in the database but leaves every listing
pub async fn soft_delete(pool: &SqlitePool, guid: Uuid) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE ecg_analyses
        SET deleted_at = ?, updated_at = ?
        WHERE guid = ? AND deleted_at IS NULL
        "#,
    )
    .bind(Utc::now().to_rfc3339())
    .bind(Utc::now().to_rfc3339())
    .bind(guid.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Filtered listing, newest first, with the unpaged total for the UI
pub async fn search_analyses(
    pool: &SqlitePool,
    filter: &AnalysisFilter,
) -> Result<(Vec<EcgAnalysis>, i64)> {
    let mut conditions = vec!["deleted_at IS NULL".to_string()];
    let mut binds: Vec<String> = Vec::new();

    if let Some(patient_id) = filter.patient_id {
        conditions.push("patient_id = ?".to_string());
        binds.push(patient_id.to_string());
    }
    if let Some(status) = filter.status {
        conditions.push("status = ?".to_string());
        binds.push(status.as_str().to_string());
    }
    if let Some(urgency) = &filter.urgency {
        conditions.push("clinical_urgency = ?".to_string());
        binds.push(urgency.clone());
    }

    let where_clause = conditions.join(" AND ");

    let count_sql = format!("SELECT COUNT(*) FROM ecg_analyses WHERE {}", where_clause);
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    for bind in &binds {
        count_query = count_query.bind(bind);
    }
    let total = count_query.fetch_one(pool).await?;

    let limit = if filter.limit > 0 { filter.limit.min(200) } else { 50 };
    let list_sql = format!(
        "SELECT * FROM ecg_analyses WHERE {} ORDER BY created_at DESC LIMIT ? OFFSET ?",
        where_clause
    );
    let mut list_query = sqlx::query(&list_sql);
    for bind in &binds {
        list_query = list_query.bind(bind);
    }
    let rows = list_query
        .bind(limit)
        .bind(filter.offset.max(0))
        .fetch_all(pool)
        .await?;

    let analyses = rows
        .iter()
        .map(analysis_from_row)
        .collect::<Result<Vec<_>>>()?;

    Ok((analyses, total))
}

fn analysis_from_row(row: &SqliteRow) -> Result<EcgAnalysis> {
    let guid: String = row.get("guid");
    let patient_id: String = row.get("patient_id");
    let created_by: String = row.get("created_by");

    let status: String = row.get("status");
    let status = AnalysisStatus::parse(&status)
        .ok_or_else(|| Error::Internal(format!("Unknown analysis status: {}", status)))?;

    let lead_names: String = row.get("lead_names");
    let lead_names: Vec<String> = serde_json::from_str(&lead_names)
        .map_err(|e| Error::Internal(format!("Failed to deserialize lead names: {}", e)))?;

    let report: Option<String> = row.get("report");
    let report: Option<ClinicalReport> = report
        .map(|r| serde_json::from_str(&r))
        .transpose()
        .map_err(|e| Error::Internal(format!("Failed to deserialize report: {}", e)))?;

    Ok(EcgAnalysis {
        guid: parse_uuid(&guid)?,
        patient_id: parse_uuid(&patient_id)?,
        created_by: parse_uuid(&created_by)?,
        file_path: row.get("file_path"),
        filename: row.get("filename"),
        content_hash: row.get("content_hash"),
        file_size: row.get::<i64, _>("file_size") as u64,
        sample_rate: row.get::<Option<i64>, _>("sample_rate").map(|r| r as u32),
        duration_secs: row.get("duration_secs"),
        lead_count: row.get::<Option<i64>, _>("lead_count").map(|c| c as usize),
        lead_names,
        device: row.get("device"),
        status,
        retry_count: row.get::<i64, _>("retry_count") as u32,
        error_message: row.get("error_message"),
        processing_started_at: parse_ts_opt(row.get("processing_started_at"))?,
        processing_completed_at: parse_ts_opt(row.get("processing_completed_at"))?,
        processing_duration_ms: row
            .get::<Option<i64>, _>("processing_duration_ms")
            .map(|d| d as u64),
        report,
        deleted_at: parse_ts_opt(row.get("deleted_at"))?,
        created_at: parse_ts(row.get("created_at"))?,
        updated_at: parse_ts(row.get("updated_at"))?,
    })
}

pub(crate) fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| Error::Internal(format!("Bad guid in database: {}", e)))
}

pub(crate) fn parse_ts(s: String) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Bad timestamp in database: {}", e)))
}

pub(crate) fn parse_ts_opt(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
    s.map(parse_ts).transpose()
}
