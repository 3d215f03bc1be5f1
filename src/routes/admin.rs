use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use uuid::Uuid;

use crate::error::Result;
use crate::AppState;

/// Retake path: the attempt is removed entirely, never un-submitted.
#[utoipa::path(
    delete,
    path = "/api/admin/courses/{course_id}/exams/{exam_id}/attempts/{learner_id}",
    params(
        ("course_id" = Uuid, Path, description = "Course ID"),
        ("exam_id" = Uuid, Path, description = "Exam ID"),
        ("learner_id" = Uuid, Path, description = "Learner ID")
    ),
    responses(
        (status = 204, description = "Attempt deleted"),
        (status = 404, description = "No attempt for this learner")
    )
)]
#[axum::debug_handler]
pub async fn delete_attempt(
    State(state): State<AppState>,
    Path((course_id, exam_id, learner_id)): Path<(Uuid, Uuid, Uuid)>,
) -> Result<impl IntoResponse> {
    state
        .attempt_service
        .delete_attempt(course_id, exam_id, learner_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[axum::debug_handler]
pub async fn list_results(
    State(state): State<AppState>,
    Path((course_id, exam_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse> {
    let results = state
        .attempt_service
        .list_results(course_id, exam_id)
        .await?;
    Ok(Json(results))
}

#[axum::debug_handler]
pub async fn list_events(
    State(state): State<AppState>,
    Path((course_id, exam_id, learner_id)): Path<(Uuid, Uuid, Uuid)>,
) -> Result<impl IntoResponse> {
    let events = state
        .attempt_service
        .list_events(course_id, exam_id, learner_id)
        .await?;
    Ok(Json(events))
}
