pub mod admin;
pub mod attempt;
pub mod health;

use axum::{
    routing::{delete, get, patch, post},
    Router,
};

use crate::middleware::auth::{require_admin, require_learner};
use crate::AppState;

pub fn router(state: AppState) -> Router {
    let learner_api = Router::new()
        .route(
            "/api/courses/:course_id/exams/:exam_id/attempt",
            post(attempt::open_attempt),
        )
        .route(
            "/api/courses/:course_id/exams/:exam_id/attempt/answers",
            patch(attempt::save_answers),
        )
        .route(
            "/api/courses/:course_id/exams/:exam_id/attempt/submit",
            post(attempt::submit_attempt),
        )
        .route(
            "/api/courses/:course_id/exams/:exam_id/attempt/status",
            get(attempt::get_status),
        )
        .route(
            "/api/courses/:course_id/exams/:exam_id/attempt/result",
            get(attempt::get_result),
        )
        .route(
            "/api/courses/:course_id/exams/:exam_id/attempt/focus-loss",
            post(attempt::report_focus_loss),
        )
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            require_learner,
        ));

    let admin_api = Router::new()
        .route(
            "/api/admin/courses/:course_id/exams/:exam_id/attempts/:learner_id",
            delete(admin::delete_attempt),
        )
        .route(
            "/api/admin/courses/:course_id/exams/:exam_id/attempts/:learner_id/events",
            get(admin::list_events),
        )
        .route(
            "/api/admin/courses/:course_id/exams/:exam_id/results",
            get(admin::list_results),
        )
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            require_admin,
        ));

    Router::new()
        .route("/health", get(health::health))
        .merge(learner_api)
        .merge(admin_api)
        .with_state(state)
}
