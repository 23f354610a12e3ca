//! Derived measurement and annotation persistence
//!
//! Append-only rows written together with the COMPLETED transition. They
//! are never updated afterwards; re-processing is impossible once an
//! analysis is terminal.

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::analyses::{parse_ts, parse_uuid};
use ecgx_common::Result;

/// One derived numeric measurement (interval, rate)
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Measurement {
    pub guid: Uuid,
    pub analysis_id: Uuid,
    pub name: String,
    pub value: f64,
    pub unit: String,
    /// Provenance: "algorithm" for derived values, "ai" for model output
    pub source: String,
    /// Confidence in the value, 0.0-1.0
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
}

impl Measurement {
    pub fn new(
        analysis_id: Uuid,
        name: impl Into<String>,
        value: f64,
        unit: impl Into<String>,
        source: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self {
            guid: Uuid::new_v4(),
            analysis_id,
            name: name.into(),
            value,
            unit: unit.into(),
            source: source.into(),
            confidence,
            created_at: Utc::now(),
        }
    }
}

/// One annotation (finding or anomaly) with its provenance source
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Annotation {
    pub guid: Uuid,
    pub analysis_id: Uuid,
    /// Annotation kind (e.g., "finding", "anomaly")
    pub kind: String,
    /// Lead or segment location, when known
    pub location: Option<String>,
    pub description: String,
    pub severity: Option<String>,
    /// Provenance: "ai" for model findings, "algorithm" for derived checks
    pub source: String,
    /// Confidence in the annotation, 0.0-1.0
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
}

impl Annotation {
    pub fn new(
        analysis_id: Uuid,
        kind: impl Into<String>,
        description: impl Into<String>,
        source: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self {
            guid: Uuid::new_v4(),
            analysis_id,
            kind: kind.into(),
            location: None,
            description: description.into(),
            severity: None,
            source: source.into(),
            confidence,
            created_at: Utc::now(),
        }
    }
}

/// Insert derived measurements for a completed analysis
pub async fn insert_measurements(pool: &SqlitePool, measurements: &[Measurement]) -> Result<()> {
    for m in measurements {
        sqlx::query(
            r#"
            INSERT INTO ecg_measurements (guid, analysis_id, name, value, unit, source, confidence, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(m.guid.to_string())
        .bind(m.analysis_id.to_string())
        .bind(&m.name)
        .bind(m.value)
        .bind(&m.unit)
        .bind(&m.source)
        .bind(m.confidence)
        .bind(m.created_at.to_rfc3339())
        .execute(pool)
        .await?;
    }
    Ok(())
}

/// Insert annotations for a completed analysis
pub async fn insert_annotations(pool: &SqlitePool, annotations: &[Annotation]) -> Result<()> {
    for a in annotations {
        sqlx::query(
            r#"
            INSERT INTO ecg_annotations (guid, analysis_id, kind, location, description, severity, source, confidence, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(a.guid.to_string())
        .bind(a.analysis_id.to_string())
        .bind(&a.kind)
        .bind(&a.location)
        .bind(&a.description)
        .bind(&a.severity)
        .bind(&a.source)
        .bind(a.confidence)
        .bind(a.created_at.to_rfc3339())
        .execute(pool)
        .await?;
    }
    Ok(())
}

/// Measurements for one analysis
pub async fn list_measurements(pool: &SqlitePool, analysis_id: Uuid) -> Result<Vec<Measurement>> {
    let rows = sqlx::query(
        "SELECT * FROM ecg_measurements WHERE analysis_id = ? ORDER BY name ASC",
    )
    .bind(analysis_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            Ok(Measurement {
                guid: parse_uuid(&row.get::<String, _>("guid"))?,
                analysis_id: parse_uuid(&row.get::<String, _>("analysis_id"))?,
                name: row.get("name"),
                value: row.get("value"),
                unit: row.get("unit"),
                source: row.get("source"),
                confidence: row.get("confidence"),
                created_at: parse_ts(row.get("created_at"))?,
            })
        })
        .collect()
}

/// Annotations for one analysis
pub async fn list_annotations(pool: &SqlitePool, analysis_id: Uuid) -> Result<Vec<Annotation>> {
    let rows = sqlx::query(
        "SELECT * FROM ecg_annotations WHERE analysis_id = ? ORDER BY created_at ASC, guid ASC",
    )
    .bind(analysis_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            Ok(Annotation {
                guid: parse_uuid(&row.get::<String, _>("guid"))?,
                analysis_id: parse_uuid(&row.get::<String, _>("analysis_id"))?,
                kind: row.get("kind"),
                location: row.get("location"),
                description: row.get("description"),
                severity: row.get("severity"),
                source: row.get("source"),
                confidence: row.get("confidence"),
                created_at: parse_ts(row.get("created_at"))?,
            })
        })
        .collect()
}
