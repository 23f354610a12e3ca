//! HTTP API tests over the assembled router with an in-memory database.

mod helpers;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Utc;
use ecgx_ap::db;
use ecgx_ap::models::{ClinicalReport, EcgAnalysis, UserRole};
use ecgx_ap::{build_router, AppState};
use ecgx_common::config::TomlConfig;
use ecgx_common::events::EventBus;
use ecgx_common::ClinicalUrgency;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tower::util::ServiceExt;
use uuid::Uuid;

use helpers::{seed_patient, seed_user};

async fn test_app() -> (axum::Router, SqlitePool) {
    let pool = db::init_memory_pool().await.unwrap();
    let config = TomlConfig {
        pipeline: ecgx_common::config::PipelineConfig {
            retry_cooldown_secs: 0,
            ..Default::default()
        },
        ..Default::default()
    };
    let state = AppState::new(pool.clone(), EventBus::new(64), &config);
    (build_router(state), pool)
}

async fn request(router: &axum::Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(value) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&value).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

/// Directly persist a COMPLETED analysis (bypasses the model gateway)
async fn completed_analysis(
    pool: &SqlitePool,
    patient_id: Uuid,
    urgency: ClinicalUrgency,
) -> EcgAnalysis {
    let analysis = EcgAnalysis::new(
        patient_id,
        Uuid::new_v4(),
        "/data/rec.csv".into(),
        "rec.csv".into(),
    );
    db::analyses::insert_analysis(pool, &analysis).await.unwrap();
    db::analyses::begin_processing(pool, analysis.guid, Utc::now())
        .await
        .unwrap();

    let report = ClinicalReport {
        ai_confidence: 0.9,
        raw_predictions: json!({}),
        interpretability: json!({}),
        heart_rate_bpm: Some(74.0),
        pr_ms: None,
        qrs_ms: None,
        qt_ms: None,
        qtc_ms: None,
        rhythm: "Sinus Rhythm".into(),
        primary_diagnosis: "Normal Sinus Rhythm".into(),
        secondary_diagnosis: None,
        icd10_codes: vec![],
        clinical_urgency: urgency,
        requires_immediate_attention: urgency == ClinicalUrgency::Critical,
        recommendations: vec![],
        findings: vec![],
        features: vec![],
        anomalies: vec![],
        quality_score: 0.9,
        noise_level: 0.05,
        baseline_wander: 0.1,
    };
    db::analyses::complete_analysis(pool, analysis.guid, &report, Utc::now(), 500)
        .await
        .unwrap();

    db::analyses::load_analysis(pool, analysis.guid)
        .await
        .unwrap()
        .unwrap()
}

#[tokio::test]
async fn health_reports_ok() {
    let (router, _pool) = test_app().await;
    let (status, body) = request(&router, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "ecgx-ap");
}

#[tokio::test]
async fn submit_returns_202_and_processes_in_background() {
    let (router, pool) = test_app().await;
    let patient_id = seed_patient(&pool).await;
    let submitter = seed_user(&pool, UserRole::Technician, 1, true).await;

    let (status, body) = request(
        &router,
        "POST",
        "/analyses",
        Some(json!({
            "patient_id": patient_id,
            "created_by": submitter,
            "file_path": "/nonexistent/recording.csv"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "PENDING");
    let analysis_id = body["analysis_id"].as_str().unwrap().to_string();

    // Unreadable input fails terminally in the background task
    let mut final_status = String::new();
    for _ in 0..100 {
        let (status, body) =
            request(&router, "GET", &format!("/analyses/{}", analysis_id), None).await;
        assert_eq!(status, StatusCode::OK);
        final_status = body["status"].as_str().unwrap().to_string();
        if final_status == "FAILED" || final_status == "COMPLETED" {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert_eq!(final_status, "FAILED");
}

#[tokio::test]
async fn submit_unknown_patient_is_404() {
    let (router, _pool) = test_app().await;
    let (status, body) = request(
        &router,
        "POST",
        "/analyses",
        Some(json!({
            "patient_id": Uuid::new_v4(),
            "created_by": Uuid::new_v4(),
            "file_path": "/tmp/rec.csv"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn get_unknown_analysis_is_404() {
    let (router, _pool) = test_app().await;
    let (status, body) = request(
        &router,
        "GET",
        &format!("/analyses/{}", Uuid::new_v4()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn search_rejects_unknown_status() {
    let (router, _pool) = test_app().await;
    let (status, body) = request(&router, "GET", "/analyses?status=BOGUS", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn search_filters_and_pages() {
    let (router, pool) = test_app().await;
    let patient_id = seed_patient(&pool).await;
    for _ in 0..3 {
        completed_analysis(&pool, patient_id, ClinicalUrgency::Routine).await;
    }

    let (status, body) = request(
        &router,
        "GET",
        &format!("/analyses?patient_id={}&status=COMPLETED&limit=2", patient_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 3);
    assert_eq!(body["analyses"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn patient_listing_honors_limit_and_offset() {
    let (router, pool) = test_app().await;
    let patient_id = seed_patient(&pool).await;
    for _ in 0..3 {
        completed_analysis(&pool, patient_id, ClinicalUrgency::Routine).await;
    }

    let (status, body) = request(
        &router,
        "GET",
        &format!("/patients/{}/analyses", patient_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 3);
    assert_eq!(body["analyses"].as_array().unwrap().len(), 3);

    let (status, body) = request(
        &router,
        "GET",
        &format!("/patients/{}/analyses?limit=2&offset=2", patient_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 3);
    assert_eq!(body["analyses"].as_array().unwrap().len(), 1);
    assert_eq!(body["limit"], 2);
    assert_eq!(body["offset"], 2);
}

#[tokio::test]
async fn delete_soft_deletes_once() {
    let (router, pool) = test_app().await;
    let patient_id = seed_patient(&pool).await;
    let analysis = completed_analysis(&pool, patient_id, ClinicalUrgency::Routine).await;

    let uri = format!("/analyses/{}", analysis.guid);
    let (status, _) = request(&router, "DELETE", &uri, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = request(&router, "GET", &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = request(&router, "DELETE", &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn duplicate_open_validation_is_409() {
    let (router, pool) = test_app().await;
    let patient_id = seed_patient(&pool).await;
    let validator_id = seed_user(&pool, UserRole::Cardiologist, 10, true).await;
    let analysis = completed_analysis(&pool, patient_id, ClinicalUrgency::Routine).await;

    let body = json!({"analysis_id": analysis.guid, "validator_id": validator_id});
    let (status, created) = request(&router, "POST", "/validations", Some(body.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["status"], "PENDING");

    let (status, error) = request(&router, "POST", "/validations", Some(body)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error["error"]["code"], "CONFLICT");
}

#[tokio::test]
async fn urgent_assignment_picks_validator_or_accepts_unassigned() {
    let (router, pool) = test_app().await;
    let patient_id = seed_patient(&pool).await;
    let analysis = completed_analysis(&pool, patient_id, ClinicalUrgency::Critical).await;

    // Nobody in the directory: accepted but unassigned
    let uri = format!("/analyses/{}/validations/urgent", analysis.guid);
    let (status, body) = request(&router, "POST", &uri, None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert!(body.is_null());

    // A senior cardiologist appears: assignment succeeds
    let senior = seed_user(&pool, UserRole::Cardiologist, 12, true).await;
    let (status, body) = request(&router, "POST", &uri, None).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["validator_id"].as_str().unwrap(), senior.to_string());
    assert_eq!(body["status"], "PENDING");
}

#[tokio::test]
async fn validation_of_pending_analysis_is_400() {
    let (router, pool) = test_app().await;
    let patient_id = seed_patient(&pool).await;
    let validator_id = seed_user(&pool, UserRole::Cardiologist, 10, true).await;

    let analysis = EcgAnalysis::new(
        patient_id,
        Uuid::new_v4(),
        "/data/rec.csv".into(),
        "rec.csv".into(),
    );
    db::analyses::insert_analysis(&pool, &analysis).await.unwrap();

    let (status, body) = request(
        &router,
        "POST",
        "/validations",
        Some(json!({"analysis_id": analysis.guid, "validator_id": validator_id})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn submit_review_then_resubmit_is_409() {
    let (router, pool) = test_app().await;
    let patient_id = seed_patient(&pool).await;
    let validator_id = seed_user(&pool, UserRole::Cardiologist, 10, true).await;
    let analysis = completed_analysis(&pool, patient_id, ClinicalUrgency::Routine).await;

    let (_, created) = request(
        &router,
        "POST",
        "/validations",
        Some(json!({"analysis_id": analysis.guid, "validator_id": validator_id})),
    )
    .await;
    let validation_id = created["guid"].as_str().unwrap().to_string();

    let review = json!({
        "approved": true,
        "agrees_with_ai": true,
        "signal_quality_rating": 4,
        "interpretation_quality_rating": 5
    });
    let uri = format!("/validations/{}/submit", validation_id);
    let (status, submitted) = request(&router, "POST", &uri, Some(review.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(submitted["status"], "APPROVED");

    let (status, error) = request(&router, "POST", &uri, Some(review)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error["error"]["code"], "CONFLICT");
}

#[tokio::test]
async fn review_rating_out_of_range_is_400() {
    let (router, pool) = test_app().await;
    let patient_id = seed_patient(&pool).await;
    let validator_id = seed_user(&pool, UserRole::Cardiologist, 10, true).await;
    let analysis = completed_analysis(&pool, patient_id, ClinicalUrgency::Routine).await;

    let (_, created) = request(
        &router,
        "POST",
        "/validations",
        Some(json!({"analysis_id": analysis.guid, "validator_id": validator_id})),
    )
    .await;
    let validation_id = created["guid"].as_str().unwrap().to_string();

    let (status, _) = request(
        &router,
        "POST",
        &format!("/validations/{}/submit", validation_id),
        Some(json!({"approved": true, "signal_quality_rating": 9})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn notification_inbox_round_trip() {
    let (router, pool) = test_app().await;
    let patient_id = seed_patient(&pool).await;
    let validator_id = seed_user(&pool, UserRole::Cardiologist, 10, true).await;
    let analysis = completed_analysis(&pool, patient_id, ClinicalUrgency::Routine).await;

    // Creating a validation produces an assignment notification
    request(
        &router,
        "POST",
        "/validations",
        Some(json!({"analysis_id": analysis.guid, "validator_id": validator_id})),
    )
    .await;

    let (status, inbox) = request(
        &router,
        "GET",
        &format!("/users/{}/notifications", validator_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let inbox = inbox.as_array().unwrap().clone();
    assert_eq!(inbox.len(), 1);
    let notification_id = inbox[0]["guid"].as_str().unwrap().to_string();

    let (_, counts) = request(
        &router,
        "GET",
        &format!("/users/{}/notifications/unread-count", validator_id),
        None,
    )
    .await;
    assert_eq!(counts["unread"], 1);

    let (status, marked) = request(
        &router,
        "POST",
        &format!("/users/{}/notifications/{}/read", validator_id, notification_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(!marked["read_at"].is_null());

    let (_, counts) = request(
        &router,
        "GET",
        &format!("/users/{}/notifications/unread-count", validator_id),
        None,
    )
    .await;
    assert_eq!(counts["unread"], 0);
}
