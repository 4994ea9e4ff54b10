//! Request handlers.

use crate::error::ApiError;
use crate::projects::{Project, ProjectInput};
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;
use vitrine_audit::{AuditFilter, AuditRecord, DeadLetterSummary, MetricsSnapshot};

/// Page size when the caller gives none.
pub const DEFAULT_PAGE_SIZE: usize = 50;
/// Upper bound on a single page.
pub const MAX_PAGE_SIZE: usize = 500;

pub async fn healthz() -> Json<serde_json::Value> {
    Json(json!({ "ok": true, "service": "vitrine-server" }))
}

pub async fn fallback() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": "not_found",
            "message": "The requested resource was not found"
        })),
    )
}

// =============================================================================
// Audit log
// =============================================================================

#[derive(Debug, Serialize)]
pub struct AuditPage {
    pub records: Vec<AuditRecord>,
    pub total: u64,
    pub limit: usize,
    pub offset: usize,
}

pub async fn list_audit_records(
    State(state): State<AppState>,
    Query(mut filter): Query<AuditFilter>,
) -> Result<Json<AuditPage>, ApiError> {
    let limit = filter.limit.unwrap_or(DEFAULT_PAGE_SIZE);
    if limit == 0 || limit > MAX_PAGE_SIZE {
        return Err(ApiError::InvalidRequest(format!(
            "limit must be between 1 and {MAX_PAGE_SIZE}"
        )));
    }
    if let (Some(start), Some(end)) = (filter.start_time, filter.end_time) {
        if start > end {
            return Err(ApiError::InvalidRequest(
                "start_time must not be after end_time".to_string(),
            ));
        }
    }
    let offset = filter.offset.unwrap_or(0);
    filter.limit = Some(limit);
    filter.offset = Some(offset);

    let pipeline = state.pipeline();
    let records = pipeline.query(&filter).await?;
    let total = pipeline.count(&filter).await?;

    Ok(Json(AuditPage {
        records,
        total,
        limit,
        offset,
    }))
}

pub async fn get_audit_record(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
) -> Result<Json<AuditRecord>, ApiError> {
    state
        .pipeline()
        .get(event_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("audit event {event_id}")))
}

#[derive(Debug, Serialize)]
pub struct AuditStats {
    pub enabled: bool,
    pub publisher_enabled: bool,
    pub dead_letters: usize,
    pub metrics: MetricsSnapshot,
}

pub async fn audit_stats(State(state): State<AppState>) -> Json<AuditStats> {
    let pipeline = state.pipeline();
    Json(AuditStats {
        enabled: pipeline.is_enabled(),
        publisher_enabled: pipeline.publisher_enabled(),
        dead_letters: pipeline.dead_letter_count(),
        metrics: pipeline.metrics(),
    })
}

pub async fn list_dead_letters(State(state): State<AppState>) -> Json<Vec<DeadLetterSummary>> {
    Json(state.pipeline().dead_letters())
}

pub async fn replay_dead_letter(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    if state.pipeline().replay_dead_letter(message_id)? {
        Ok(StatusCode::ACCEPTED)
    } else {
        Err(ApiError::NotFound(format!("dead letter {message_id}")))
    }
}

pub async fn discard_dead_letter(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    if state.pipeline().discard_dead_letter(message_id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("dead letter {message_id}")))
    }
}

// =============================================================================
// Projects
// =============================================================================

pub async fn list_projects(State(state): State<AppState>) -> Json<Vec<Project>> {
    Json(state.projects().list())
}

pub async fn get_project(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<Project>, ApiError> {
    Ok(Json(state.projects().get(id)?))
}

pub async fn create_project(
    State(state): State<AppState>,
    Json(input): Json<ProjectInput>,
) -> Result<(StatusCode, Json<Project>), ApiError> {
    let project = state.projects().create(input).await?;
    Ok((StatusCode::CREATED, Json(project)))
}

pub async fn update_project(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(input): Json<ProjectInput>,
) -> Result<Json<Project>, ApiError> {
    Ok(Json(state.projects().update(id, input).await?))
}

pub async fn delete_project(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<StatusCode, ApiError> {
    state.projects().delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn publish_project(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<Project>, ApiError> {
    Ok(Json(state.projects().publish(id).await?))
}

pub async fn unpublish_project(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<Project>, ApiError> {
    Ok(Json(state.projects().unpublish(id).await?))
}
