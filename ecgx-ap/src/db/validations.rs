//! Validation task persistence
//!
//! One open (PENDING) validation per analysis+validator pair. The
//! workflow pre-checks with `has_open_validation`; a partial unique
//! index backs it up, so concurrent inserts for the same pair surface
//! as `Error::Conflict` instead of a second open row.

use crate::models::{Validation, ValidationStatus};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use uuid::Uuid;

use super::analyses::{parse_ts, parse_ts_opt, parse_uuid};
use ecgx_common::{Error, Result};

/// Whether this validator already has an open validation for the analysis
pub async fn has_open_validation(
    pool: &SqlitePool,
    analysis_id: Uuid,
    validator_id: Uuid,
) -> Result<bool> {
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM validations
        WHERE analysis_id = ? AND validator_id = ? AND status = 'PENDING'
        "#,
    )
    .bind(analysis_id.to_string())
    .bind(validator_id.to_string())
    .fetch_one(pool)
    .await?;

    Ok(count > 0)
}

/// Insert a new PENDING validation
///
/// # Errors
/// `Conflict` when the validator already has an open validation for the
/// analysis (enforced by the `idx_validations_open_pair` unique index).
pub async fn insert_validation(pool: &SqlitePool, validation: &Validation) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO validations (
            guid, analysis_id, validator_id, status,
            requires_second_opinion, created_at
        ) VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(validation.guid.to_string())
    .bind(validation.analysis_id.to_string())
    .bind(validation.validator_id.to_string())
    .bind(validation.status.as_str())
    .bind(validation.requires_second_opinion as i64)
    .bind(validation.created_at.to_rfc3339())
    .execute(pool)
    .await
    .map_err(|e| match &e {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => Error::Conflict(format!(
            "validator {} already has an open validation for analysis {}",
            validation.validator_id, validation.analysis_id
        )),
        _ => Error::from(e),
    })?;

    Ok(())
}

/// Load one validation by id
pub async fn load_validation(pool: &SqlitePool, guid: Uuid) -> Result<Option<Validation>> {
    let row = sqlx::query("SELECT * FROM validations WHERE guid = ?")
        .bind(guid.to_string())
        .fetch_optional(pool)
        .await?;

    row.map(|r| validation_from_row(&r)).transpose()
}

/// Persist a submitted review (CAS: only a PENDING row may transition)
pub async fn submit_validation(pool: &SqlitePool, validation: &Validation) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE validations
        SET status = ?,
            clinical_notes = ?,
            agrees_with_ai = ?,
            signal_quality_rating = ?,
            interpretation_quality_rating = ?,
            submitted_at = ?
        WHERE guid = ? AND status = 'PENDING'
        "#,
    )
    .bind(validation.status.as_str())
    .bind(&validation.clinical_notes)
    .bind(validation.agrees_with_ai.map(|b| b as i64))
    .bind(validation.signal_quality_rating.map(|r| r as i64))
    .bind(validation.interpretation_quality_rating.map(|r| r as i64))
    .bind(validation.submitted_at.map(|t| t.to_rfc3339()))
    .bind(validation.guid.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// All validations for an analysis, oldest first
pub async fn list_for_analysis(pool: &SqlitePool, analysis_id: Uuid) -> Result<Vec<Validation>> {
    let rows = sqlx::query(
        "SELECT * FROM validations WHERE analysis_id = ? ORDER BY created_at ASC",
    )
    .bind(analysis_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter().map(validation_from_row).collect()
}

/// Open validation queue for one validator, oldest first
pub async fn pending_for_validator(pool: &SqlitePool, validator_id: Uuid) -> Result<Vec<Validation>> {
    let rows = sqlx::query(
        r#"
        SELECT * FROM validations
        WHERE validator_id = ? AND status = 'PENDING'
        ORDER BY created_at ASC
        "#,
    )
    .bind(validator_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter().map(validation_from_row).collect()
}

fn validation_from_row(row: &SqliteRow) -> Result<Validation> {
    let status: String = row.get("status");
    let status = ValidationStatus::parse(&status)
        .ok_or_else(|| Error::Internal(format!("Unknown validation status: {}", status)))?;

    Ok(Validation {
        guid: parse_uuid(&row.get::<String, _>("guid"))?,
        analysis_id: parse_uuid(&row.get::<String, _>("analysis_id"))?,
        validator_id: parse_uuid(&row.get::<String, _>("validator_id"))?,
        status,
        clinical_notes: row.get("clinical_notes"),
        agrees_with_ai: row.get::<Option<i64>, _>("agrees_with_ai").map(|v| v != 0),
        signal_quality_rating: row
            .get::<Option<i64>, _>("signal_quality_rating")
            .map(|r| r as u8),
        interpretation_quality_rating: row
            .get::<Option<i64>, _>("interpretation_quality_rating")
            .map(|r| r as u8),
        requires_second_opinion: row.get::<i64, _>("requires_second_opinion") != 0,
        created_at: parse_ts(row.get("created_at"))?,
        submitted_at: parse_ts_opt(row.get("submitted_at"))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_pool;
    use crate::models::ValidationReview;

    #[tokio::test]
    async fn open_validation_detected_until_terminal() {
        let pool = init_memory_pool().await.unwrap();
        let analysis_id = Uuid::new_v4();
        let validator_id = Uuid::new_v4();

        assert!(!has_open_validation(&pool, analysis_id, validator_id)
            .await
            .unwrap());

        let mut v = Validation::new(analysis_id, validator_id, false);
        insert_validation(&pool, &v).await.unwrap();
        assert!(has_open_validation(&pool, analysis_id, validator_id)
            .await
            .unwrap());

        v.apply_review(&ValidationReview {
            approved: true,
            clinical_notes: None,
            agrees_with_ai: Some(true),
            signal_quality_rating: Some(5),
            interpretation_quality_rating: Some(5),
        });
        assert!(submit_validation(&pool, &v).await.unwrap());

        // Terminal: a new validation for the same pair is no conflict
        assert!(!has_open_validation(&pool, analysis_id, validator_id)
            .await
            .unwrap());
        let loaded = load_validation(&pool, v.guid).await.unwrap().unwrap();
        assert_eq!(loaded.status, ValidationStatus::Approved);
        assert!(loaded.submitted_at.is_some());
    }

    #[tokio::test]
    async fn second_open_insert_for_same_pair_is_conflict() {
        // Bypasses the workflow pre-check: the unique index alone must
        // reject a second open row for the pair
        let pool = init_memory_pool().await.unwrap();
        let analysis_id = Uuid::new_v4();
        let validator_id = Uuid::new_v4();

        let mut first = Validation::new(analysis_id, validator_id, false);
        insert_validation(&pool, &first).await.unwrap();

        let second = Validation::new(analysis_id, validator_id, false);
        let err = insert_validation(&pool, &second).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        // Once the first is terminal a new open validation is allowed
        first.apply_review(&ValidationReview {
            approved: true,
            clinical_notes: None,
            agrees_with_ai: Some(true),
            signal_quality_rating: None,
            interpretation_quality_rating: None,
        });
        assert!(submit_validation(&pool, &first).await.unwrap());
        insert_validation(&pool, &second).await.unwrap();
    }

    #[tokio::test]
    async fn double_submit_loses_cas() {
        let pool = init_memory_pool().await.unwrap();
        let mut v = Validation::new(Uuid::new_v4(), Uuid::new_v4(), false);
        insert_validation(&pool, &v).await.unwrap();

        v.apply_review(&ValidationReview {
            approved: false,
            clinical_notes: Some("disagree".into()),
            agrees_with_ai: Some(false),
            signal_quality_rating: None,
            interpretation_quality_rating: None,
        });
        assert!(submit_validation(&pool, &v).await.unwrap());
        assert!(!submit_validation(&pool, &v).await.unwrap());
    }
}
