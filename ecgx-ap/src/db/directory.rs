//! User and patient directory queries
//!
//! The directory is reference data maintained elsewhere; the pipeline
//! reads it for validator assignment and notification routing, and seeds
//! it only in tests and deployment tooling.

use crate::models::{ChannelKind, Patient, QuietHours, UserRole, ValidatorProfile};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use uuid::Uuid;

use super::analyses::parse_uuid;
use ecgx_common::{Error, Result};

/// Insert or replace a directory user
pub async fn upsert_user(pool: &SqlitePool, profile: &ValidatorProfile) -> Result<()> {
    let channels = serde_json::to_string(&profile.enabled_channels)
        .map_err(|e| Error::Internal(format!("Failed to serialize channels: {}", e)))?;
    let (qh_start, qh_end) = match profile.quiet_hours {
        Some(qh) => {
            let (s, e) = qh.to_strings();
            (Some(s), Some(e))
        }
        None => (None, None),
    };

    sqlx::query(
        r#"
        INSERT INTO users (
            guid, name, role, years_experience, available,
            enabled_channels, quiet_hours_start, quiet_hours_end
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(guid) DO UPDATE SET
            name = excluded.name,
            role = excluded.role,
            years_experience = excluded.years_experience,
            available = excluded.available,
            enabled_channels = excluded.enabled_channels,
            quiet_hours_start = excluded.quiet_hours_start,
            quiet_hours_end = excluded.quiet_hours_end
        "#,
    )
    .bind(profile.guid.to_string())
    .bind(&profile.name)
    .bind(profile.role.as_str())
    .bind(profile.years_experience as i64)
    .bind(profile.available as i64)
    .bind(channels)
    .bind(qh_start)
    .bind(qh_end)
    .execute(pool)
    .await?;

    Ok(())
}

/// Load one user profile
pub async fn load_user(pool: &SqlitePool, guid: Uuid) -> Result<Option<ValidatorProfile>> {
    let row = sqlx::query("SELECT * FROM users WHERE guid = ?")
        .bind(guid.to_string())
        .fetch_optional(pool)
        .await?;

    row.map(|r| user_from_row(&r)).transpose()
}

/// All available users in validating roles, most experienced first
///
/// Capability filtering against the analysis urgency happens in the
/// workflow layer, which knows the seniority threshold.
pub async fn available_validators(pool: &SqlitePool) -> Result<Vec<ValidatorProfile>> {
    let rows = sqlx::query(
        r#"
        SELECT * FROM users
        WHERE available = 1 AND role IN ('cardiologist', 'physician')
        ORDER BY years_experience DESC, guid ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    rows.iter().map(user_from_row).collect()
}

/// All administrators (escalation and system-alert recipients)
pub async fn administrators(pool: &SqlitePool) -> Result<Vec<ValidatorProfile>> {
    let rows = sqlx::query("SELECT * FROM users WHERE role = 'administrator' ORDER BY guid ASC")
        .fetch_all(pool)
        .await?;

    rows.iter().map(user_from_row).collect()
}

/// All cardiologists (urgent rejection fan-out recipients)
pub async fn cardiologists(pool: &SqlitePool) -> Result<Vec<ValidatorProfile>> {
    let rows = sqlx::query("SELECT * FROM users WHERE role = 'cardiologist' ORDER BY guid ASC")
        .fetch_all(pool)
        .await?;

    rows.iter().map(user_from_row).collect()
}

/// Insert or replace a patient record
pub async fn upsert_patient(pool: &SqlitePool, patient: &Patient) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO patients (guid, name, birth_date) VALUES (?, ?, ?)
        ON CONFLICT(guid) DO UPDATE SET
            name = excluded.name,
            birth_date = excluded.birth_date
        "#,
    )
    .bind(patient.guid.to_string())
    .bind(&patient.name)
    .bind(patient.birth_date.map(|d| d.to_string()))
    .execute(pool)
    .await?;

    Ok(())
}

/// Load one patient
pub async fn load_patient(pool: &SqlitePool, guid: Uuid) -> Result<Option<Patient>> {
    let row = sqlx::query("SELECT * FROM patients WHERE guid = ?")
        .bind(guid.to_string())
        .fetch_optional(pool)
        .await?;

    row.map(|r| {
        let birth_date: Option<String> = r.get("birth_date");
        let birth_date = birth_date
            .map(|d| d.parse::<chrono::NaiveDate>())
            .transpose()
            .map_err(|e| Error::Internal(format!("Bad birth date in database: {}", e)))?;
        Ok(Patient {
            guid: parse_uuid(&r.get::<String, _>("guid"))?,
            name: r.get("name"),
            birth_date,
        })
    })
    .transpose()
}

fn user_from_row(row: &SqliteRow) -> Result<ValidatorProfile> {
    let role: String = row.get("role");
    let role =
        UserRole::parse(&role).ok_or_else(|| Error::Internal(format!("Unknown role: {}", role)))?;

    let channels: String = row.get("enabled_channels");
    let enabled_channels: Vec<ChannelKind> = serde_json::from_str(&channels)
        .map_err(|e| Error::Internal(format!("Failed to deserialize channels: {}", e)))?;

    let qh_start: Option<String> = row.get("quiet_hours_start");
    let qh_end: Option<String> = row.get("quiet_hours_end");
    let quiet_hours = match (qh_start, qh_end) {
        (Some(s), Some(e)) => QuietHours::parse(&s, &e),
        _ => None,
    };

    Ok(ValidatorProfile {
        guid: parse_uuid(&row.get::<String, _>("guid"))?,
        name: row.get("name"),
        role,
        years_experience: row.get::<i64, _>("years_experience") as u32,
        available: row.get::<i64, _>("available") != 0,
        enabled_channels,
        quiet_hours,
    })
}
