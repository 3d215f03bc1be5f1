use std::sync::Arc;
use std::time::Duration;

use assessment_engine::{
    client::{
        autosave::SaveStatus,
        backend::{ExamBackend, LocalBackend},
        lockout::FocusEvent,
        session::{ExamSession, ViewState},
    },
    database::memory::MemoryStore,
    error::Error,
    models::{
        exam::Exam,
        question::{Answer, Question, QuestionKind},
    },
    services::attempt_service::{AttemptPolicy, AttemptService},
};
use uuid::Uuid;

async fn setup() -> (AttemptService, Uuid, Uuid) {
    let store = MemoryStore::new();
    let course_id = Uuid::new_v4();
    let exam_id = Uuid::new_v4();
    store
        .insert_exam(Exam {
            id: exam_id,
            course_id,
            title: "Capitals".into(),
            duration_minutes: Some(30),
            questions: vec![
                Question {
                    id: 1,
                    prompt: "Capital of France?".into(),
                    kind: QuestionKind::SingleSelect {
                        options: vec!["Lyon".into(), "Paris".into()],
                        correct: 1,
                    },
                    rationale: None,
                },
                Question {
                    id: 2,
                    prompt: "Capital of Japan?".into(),
                    kind: QuestionKind::ShortText {
                        answer: "Tokyo".into(),
                    },
                    rationale: None,
                },
            ],
        })
        .await
        .unwrap();
    let service = AttemptService::new(
        Arc::new(store.clone()),
        Arc::new(store),
        AttemptPolicy::default(),
    );
    (service, course_id, exam_id)
}

#[tokio::test]
async fn edits_survive_a_reload_and_grade_on_submit() {
    let (service, course_id, exam_id) = setup().await;
    let backend: Arc<dyn ExamBackend> = Arc::new(LocalBackend::new(service, Uuid::new_v4()));

    let first = ExamSession::open(backend.clone(), course_id, exam_id, Duration::from_secs(1))
        .await
        .unwrap();
    let remaining = first.remaining_seconds().unwrap();
    assert!(remaining > 29 * 60 && remaining <= 30 * 60);

    first.edit(1, Answer::Index(0)).unwrap();
    first.edit(2, Answer::Text("  tokyo ".into())).unwrap();
    first.edit(1, Answer::Index(1)).unwrap();
    first.flush().await;
    assert!(matches!(first.save_status(), SaveStatus::Saved { .. }));
    drop(first);

    let second = ExamSession::open(backend, course_id, exam_id, Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(second.answers().get(&1), Some(&Answer::Index(1)));
    assert_eq!(second.state(), ViewState::Editable);

    let result = second.submit().await.unwrap();
    assert_eq!(result.score, 2);
    assert!(result.certificate.eligible);
    assert!(matches!(second.edit(1, Answer::Index(0)), Err(Error::Locked)));
}

#[tokio::test]
async fn reopening_a_submitted_attempt_goes_straight_to_results() {
    let (service, course_id, exam_id) = setup().await;
    let backend: Arc<dyn ExamBackend> = Arc::new(LocalBackend::new(service, Uuid::new_v4()));

    let session = ExamSession::open(backend.clone(), course_id, exam_id, Duration::from_secs(1))
        .await
        .unwrap();
    session.edit(1, Answer::Index(0)).unwrap();
    session.submit().await.unwrap();
    drop(session);

    let reopened = ExamSession::open(backend, course_id, exam_id, Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(reopened.state(), ViewState::Submitted);
    assert_eq!(reopened.remaining_seconds(), None);
    let result = reopened.result().unwrap();
    assert_eq!(result.certificate.percentage, 0);
}

#[tokio::test]
async fn lockout_is_reported_and_blocks_until_released() {
    let (service, course_id, exam_id) = setup().await;
    let learner = Uuid::new_v4();
    let backend: Arc<dyn ExamBackend> = Arc::new(LocalBackend::new(service.clone(), learner));

    let session = ExamSession::open(backend, course_id, exam_id, Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(session.focus_event(FocusEvent::Blur), ViewState::Locked);
    assert_eq!(session.focus_event(FocusEvent::Focus), ViewState::Locked);
    assert!(matches!(session.edit(1, Answer::Index(1)), Err(Error::LockedOut)));
    tokio::time::sleep(Duration::from_millis(20)).await;

    let events = service.list_events(course_id, exam_id, learner).await.unwrap();
    assert_eq!(events.len(), 1);

    session.release_lock();
    session.edit(1, Answer::Index(1)).unwrap();
}

#[tokio::test]
async fn a_malformed_edit_never_blocks_other_questions() {
    let (service, course_id, exam_id) = setup().await;
    let learner = Uuid::new_v4();
    let backend: Arc<dyn ExamBackend> = Arc::new(LocalBackend::new(service.clone(), learner));

    let session = ExamSession::open(backend, course_id, exam_id, Duration::from_secs(1))
        .await
        .unwrap();
    assert!(matches!(
        session.edit(1, Answer::Index(7)),
        Err(Error::ValidationFailed(_))
    ));
    session.flush().await;
    session.edit(2, Answer::Text("Tokyo".into())).unwrap();
    session.flush().await;

    assert!(matches!(session.save_status(), SaveStatus::Saved { .. }));
    let status = service.status(learner, course_id, exam_id).await.unwrap();
    assert_eq!(status.questions_answered, 1);

    let result = session.submit().await.unwrap();
    assert_eq!(result.score, 1);
    assert_eq!(result.certificate.percentage, 50);
}
