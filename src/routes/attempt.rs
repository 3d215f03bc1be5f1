use axum::{
    extract::{Extension, Path, State},
    response::{IntoResponse, Json},
};
use uuid::Uuid;
use validator::Validate;

use crate::dto::attempt_dto::{
    AttemptView, FocusLossRequest, SaveAnswersRequest, SaveAnswersResponse, SubmitRequest,
    SubmitResponse,
};
use crate::error::Result;
use crate::middleware::auth::Principal;
use crate::services::attempt_service::SubmitTrigger;
use crate::AppState;

#[utoipa::path(
    post,
    path = "/api/courses/{course_id}/exams/{exam_id}/attempt",
    params(
        ("course_id" = Uuid, Path, description = "Course ID"),
        ("exam_id" = Uuid, Path, description = "Exam ID")
    ),
    responses(
        (status = 200, description = "Attempt opened or resumed", body = Json<AttemptView>),
        (status = 404, description = "Exam not found")
    )
)]
#[axum::debug_handler]
pub async fn open_attempt(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path((course_id, exam_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse> {
    let (attempt, exam) = state
        .attempt_service
        .open_attempt(principal.id, course_id, exam_id)
        .await?;
    Ok(Json(AttemptView::new(&attempt, &exam)))
}

#[utoipa::path(
    patch,
    path = "/api/courses/{course_id}/exams/{exam_id}/attempt/answers",
    params(
        ("course_id" = Uuid, Path, description = "Course ID"),
        ("exam_id" = Uuid, Path, description = "Exam ID")
    ),
    request_body = SaveAnswersRequest,
    responses(
        (status = 200, description = "Answers merged", body = Json<SaveAnswersResponse>),
        (status = 404, description = "No open attempt"),
        (status = 422, description = "Malformed answer payload"),
        (status = 423, description = "Attempt already submitted")
    )
)]
#[axum::debug_handler]
pub async fn save_answers(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path((course_id, exam_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<SaveAnswersRequest>,
) -> Result<impl IntoResponse> {
    req.validate()?;
    let saved = state
        .attempt_service
        .save_answers(principal.id, course_id, exam_id, &req.answers)
        .await?;
    Ok(Json(SaveAnswersResponse {
        saved: true,
        question_ids: req.answers.keys().copied().collect(),
        saved_at: saved.updated_at,
    }))
}

#[utoipa::path(
    post,
    path = "/api/courses/{course_id}/exams/{exam_id}/attempt/submit",
    params(
        ("course_id" = Uuid, Path, description = "Course ID"),
        ("exam_id" = Uuid, Path, description = "Exam ID")
    ),
    request_body = SubmitRequest,
    responses(
        (status = 200, description = "Attempt finalized and graded", body = Json<SubmitResponse>),
        (status = 409, description = "Attempt already submitted")
    )
)]
#[axum::debug_handler]
pub async fn submit_attempt(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path((course_id, exam_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<SubmitRequest>,
) -> Result<impl IntoResponse> {
    let trigger = req.trigger.unwrap_or(SubmitTrigger::Learner);
    state
        .attempt_service
        .submit(principal.id, course_id, exam_id, &req.answers, trigger)
        .await?;
    let result = state
        .attempt_service
        .result(principal.id, course_id, exam_id)
        .await?;
    Ok(Json(SubmitResponse::from(&result)))
}

#[axum::debug_handler]
pub async fn get_status(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path((course_id, exam_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse> {
    let status = state
        .attempt_service
        .status(principal.id, course_id, exam_id)
        .await?;
    Ok(Json(status))
}

#[axum::debug_handler]
pub async fn get_result(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path((course_id, exam_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse> {
    let result = state
        .attempt_service
        .result(principal.id, course_id, exam_id)
        .await?;
    Ok(Json(result))
}

#[axum::debug_handler]
pub async fn report_focus_loss(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path((course_id, exam_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<FocusLossRequest>,
) -> Result<impl IntoResponse> {
    let event = state
        .attempt_service
        .record_focus_loss(principal.id, course_id, exam_id, req.cause)
        .await?;
    Ok(Json(event))
}
