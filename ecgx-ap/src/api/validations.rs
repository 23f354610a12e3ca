//! Validation workflow endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::db;
use crate::error::{ApiError, ApiResult};
use crate::models::{Validation, ValidationReview};
use crate::AppState;

/// POST /validations request body
#[derive(Debug, Deserialize)]
pub struct CreateValidationRequest {
    pub analysis_id: Uuid,
    pub validator_id: Uuid,
}

/// POST /validations
///
/// 409 when the validator already has an open validation for the analysis.
pub async fn create_validation(
    State(state): State<AppState>,
    Json(request): Json<CreateValidationRequest>,
) -> ApiResult<(StatusCode, Json<Validation>)> {
    let validation = state
        .workflow
        .create_validation(request.analysis_id, request.validator_id)
        .await?;
    Ok((StatusCode::CREATED, Json(validation)))
}

/// GET /validations/:id
pub async fn get_validation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Validation>> {
    let validation = db::validations::load_validation(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("validation {}", id)))?;
    Ok(Json(validation))
}

/// POST /validations/:id/submit
///
/// 409 when the validation was already submitted.
pub async fn submit_validation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(review): Json<ValidationReview>,
) -> ApiResult<Json<Validation>> {
    if let Some(rating) = review.signal_quality_rating {
        if !(1..=5).contains(&rating) {
            return Err(ApiError::BadRequest(format!(
                "signal quality rating {} out of range 1-5",
                rating
            )));
        }
    }
    if let Some(rating) = review.interpretation_quality_rating {
        if !(1..=5).contains(&rating) {
            return Err(ApiError::BadRequest(format!(
                "interpretation quality rating {} out of range 1-5",
                rating
            )));
        }
    }

    let validation = state.workflow.submit_validation(id, &review).await?;
    Ok(Json(validation))
}

/// POST /analyses/:id/validations/urgent
///
/// Assigns the analysis to the best available validator. 201 with the new
/// validation when one was assigned; 202 with `null` when no validator was
/// available (critical analyses escalate to administrators in that case).
pub async fn create_urgent_validation(
    State(state): State<AppState>,
    Path(analysis_id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<Option<Validation>>)> {
    let analysis = db::analyses::load_analysis(&state.db, analysis_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("analysis {}", analysis_id)))?;

    if analysis.status != crate::models::AnalysisStatus::Completed {
        return Err(ApiError::BadRequest(format!(
            "analysis {} is {}, only COMPLETED analyses can be validated",
            analysis_id,
            analysis.status.as_str()
        )));
    }

    let assigned = state.workflow.assign_validator(&analysis).await?;
    let status = if assigned.is_some() {
        StatusCode::CREATED
    } else {
        StatusCode::ACCEPTED
    };
    Ok((status, Json(assigned)))
}

/// GET /analyses/:id/validations
pub async fn analysis_validations(
    State(state): State<AppState>,
    Path(analysis_id): Path<Uuid>,
) -> ApiResult<Json<Vec<Validation>>> {
    let validations = db::validations::list_for_analysis(&state.db, analysis_id).await?;
    Ok(Json(validations))
}

/// GET /validators/:id/validations — the validator's open queue
pub async fn validator_queue(
    State(state): State<AppState>,
    Path(validator_id): Path<Uuid>,
) -> ApiResult<Json<Vec<Validation>>> {
    let validations = db::validations::pending_for_validator(&state.db, validator_id).await?;
    Ok(Json(validations))
}

/// Build validation routes
pub fn validation_routes() -> Router<AppState> {
    Router::new()
        .route("/validations", post(create_validation))
        .route("/validations/:id", get(get_validation))
        .route("/validations/:id/submit", post(submit_validation))
        .route("/analyses/:id/validations", get(analysis_validations))
        .route(
            "/analyses/:id/validations/urgent",
            post(create_urgent_validation),
        )
        .route("/validators/:id/validations", get(validator_queue))
}
