//! Analysis submission and query endpoints
//!
//! Submission returns 202 immediately; processing runs in a background
//! task whose progress is observable through GET and the SSE stream.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::{self, analyses::AnalysisFilter};
use crate::error::{ApiError, ApiResult};
use crate::models::{AnalysisStatus, EcgAnalysis};
use crate::AppState;

/// POST /analyses request body
#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub patient_id: Uuid,
    pub created_by: Uuid,
    /// Path of the uploaded recording inside the data folder
    pub file_path: String,
    /// Display filename; defaults to the path's final component
    #[serde(default)]
    pub filename: Option<String>,
}

/// POST /analyses response body
#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub analysis_id: Uuid,
    pub status: String,
    /// Earlier analysis of the same file for this patient, when one exists
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplicate_of: Option<Uuid>,
}

/// GET /analyses query parameters
#[derive(Debug, Deserialize, Default)]
pub struct SearchParams {
    pub patient_id: Option<Uuid>,
    pub status: Option<String>,
    pub urgency: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
}

/// Paged listing response
#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub analyses: Vec<EcgAnalysis>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// POST /analyses
///
/// Accepts the recording and schedules processing. 202 means "accepted",
/// not "valid": unreadable files surface as a FAILED analysis.
pub async fn submit_analysis(
    State(state): State<AppState>,
    Json(request): Json<SubmitRequest>,
) -> ApiResult<(StatusCode, Json<SubmitResponse>)> {
    let filename = request.filename.unwrap_or_else(|| {
        std::path::Path::new(&request.file_path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| request.file_path.clone())
    });

    let (analysis, duplicate_of) = state
        .orchestrator
        .submit(
            request.patient_id,
            request.created_by,
            request.file_path,
            filename,
        )
        .await?;

    state.orchestrator.spawn_processing(analysis.guid);

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            analysis_id: analysis.guid,
            status: analysis.status.as_str().to_string(),
            duplicate_of,
        }),
    ))
}

/// GET /analyses/:id
pub async fn get_analysis(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<EcgAnalysis>> {
    let analysis = db::analyses::load_analysis(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("analysis {}", id)))?;
    Ok(Json(analysis))
}

/// GET /analyses
pub async fn search_analyses(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> ApiResult<Json<SearchResponse>> {
    let status = params
        .status
        .as_deref()
        .map(|s| {
            AnalysisStatus::parse(s)
                .ok_or_else(|| ApiError::BadRequest(format!("unknown status: {}", s)))
        })
        .transpose()?;

    if let Some(urgency) = params.urgency.as_deref() {
        if ecgx_common::ClinicalUrgency::parse(urgency).is_none() {
            return Err(ApiError::BadRequest(format!("unknown urgency: {}", urgency)));
        }
    }

    let filter = AnalysisFilter {
        patient_id: params.patient_id,
        status,
        urgency: params.urgency,
        limit: params.limit.unwrap_or(50),
        offset: params.offset.unwrap_or(0),
    };

    let (analyses, total) = db::analyses::search_analyses(&state.db, &filter).await?;
    Ok(Json(SearchResponse {
        analyses,
        total,
        limit: filter.limit,
        offset: filter.offset,
    }))
}

/// GET /patients/:id/analyses query parameters
#[derive(Debug, Deserialize, Default)]
pub struct PageParams {
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
}

/// GET /patients/:id/analyses
pub async fn patient_analyses(
    State(state): State<AppState>,
    Path(patient_id): Path<Uuid>,
    Query(page): Query<PageParams>,
) -> ApiResult<Json<SearchResponse>> {
    let filter = AnalysisFilter {
        patient_id: Some(patient_id),
        limit: page.limit.unwrap_or(100),
        offset: page.offset.unwrap_or(0),
        ..Default::default()
    };
    let (analyses, total) = db::analyses::search_analyses(&state.db, &filter).await?;
    Ok(Json(SearchResponse {
        analyses,
        total,
        limit: filter.limit,
        offset: filter.offset,
    }))
}

/// GET /analyses/:id/measurements
pub async fn analysis_measurements(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<db::artifacts::Measurement>>> {
    let measurements = db::artifacts::list_measurements(&state.db, id).await?;
    Ok(Json(measurements))
}

/// GET /analyses/:id/annotations
pub async fn analysis_annotations(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<db::artifacts::Annotation>>> {
    let annotations = db::artifacts::list_annotations(&state.db, id).await?;
    Ok(Json(annotations))
}

/// DELETE /analyses/:id (soft delete)
pub async fn delete_analysis(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    if db::analyses::soft_delete(&state.db, id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("analysis {}", id)))
    }
}

/// Build analysis routes
pub fn analysis_routes() -> Router<AppState> {
    Router::new()
        .route("/analyses", post(submit_analysis).get(search_analyses))
        .route("/analyses/:id", get(get_analysis).delete(delete_analysis))
        .route("/analyses/:id/measurements", get(analysis_measurements))
        .route("/analyses/:id/annotations", get(analysis_annotations))
        .route("/patients/:id/analyses", get(patient_analyses))
}
