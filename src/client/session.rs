use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use uuid::Uuid;

use crate::client::autosave::{Autosave, SaveStatus};
use crate::client::backend::ExamBackend;
use crate::client::countdown::{Countdown, Latch};
use crate::client::lockout::{FocusEvent, Lockout};
use crate::dto::attempt_dto::AttemptView;
use crate::error::{Error, Result};
use crate::models::attempt::AttemptState;
use crate::models::question::{Answer, AnswerMap, QuestionId};
use crate::services::attempt_service::{AttemptResult, SubmitTrigger};
use crate::services::deadline::Deadline;
use crate::utils::time;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewState {
    Editable,
    /// Frozen by a focus loss until a proctor releases it.
    Locked,
    Submitting,
    Submitted,
}

#[derive(Default)]
struct Shared {
    answers: Mutex<AnswerMap>,
    lockout: Mutex<Lockout>,
    finalizing: Latch,
    result: Mutex<Option<AttemptResult>>,
    notice: Mutex<Option<String>>,
}

fn guard<T>(lock: &Mutex<T>) -> MutexGuard<'_, T> {
    lock.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone)]
struct Context {
    backend: Arc<dyn ExamBackend>,
    autosave: Autosave,
    course_id: Uuid,
    exam_id: Uuid,
    shared: Arc<Shared>,
}

impl Context {
    /// Shared by the learner's submit and the countdown. Whichever trips the
    /// latch first sends; the other sees the stored result or `AlreadySubmitted`.
    async fn finalize(&self, trigger: SubmitTrigger) -> Result<AttemptResult> {
        if !self.shared.finalizing.trip() {
            return guard(&self.shared.result)
                .clone()
                .ok_or(Error::AlreadySubmitted);
        }

        self.autosave.flush().await;
        let answers = guard(&self.shared.answers).clone();
        let submitted = match self
            .backend
            .submit(self.course_id, self.exam_id, answers, trigger)
            .await
        {
            // Everything the server accepts has been stored key by key by the
            // flush above, so closing on the stored answers loses nothing valid.
            Err(Error::ValidationFailed(reason)) => {
                tracing::warn!(%reason, ?trigger, "local answers refused, submitting stored answers");
                self.backend
                    .submit(self.course_id, self.exam_id, AnswerMap::new(), trigger)
                    .await
            }
            other => other,
        };
        match submitted {
            Ok(submitted) => tracing::info!(
                attempt_id = %submitted.attempt_id,
                ?trigger,
                percentage = submitted.percentage,
                "exam submitted"
            ),
            Err(Error::AlreadySubmitted) => {
                tracing::warn!(exam_id = %self.exam_id, ?trigger, "exam already submitted");
                *guard(&self.shared.notice) = Some(Error::AlreadySubmitted.to_string());
            }
            Err(e) => {
                self.shared.finalizing.reset();
                return Err(e);
            }
        }

        match self.backend.result(self.course_id, self.exam_id).await {
            Ok(result) => {
                *guard(&self.shared.result) = Some(result.clone());
                Ok(result)
            }
            Err(e) => {
                self.shared.finalizing.reset();
                Err(e)
            }
        }
    }
}

/// One learner's open exam view.
pub struct ExamSession {
    ctx: Context,
    view: AttemptView,
    countdown: Option<Countdown>,
}

impl ExamSession {
    /// Opens or resumes the attempt. Saved answers are restored, and a timed
    /// attempt gets a countdown that forces submission at the deadline.
    pub async fn open(
        backend: Arc<dyn ExamBackend>,
        course_id: Uuid,
        exam_id: Uuid,
        tick: Duration,
    ) -> Result<Self> {
        let view = backend.open_attempt(course_id, exam_id).await?;
        let shared = Arc::new(Shared {
            answers: Mutex::new(view.answers.clone()),
            ..Default::default()
        });
        let ctx = Context {
            backend: backend.clone(),
            autosave: Autosave::spawn(backend.clone(), course_id, exam_id),
            course_id,
            exam_id,
            shared,
        };

        if view.state == AttemptState::Submitted {
            ctx.shared.finalizing.trip();
            let result = backend.result(course_id, exam_id).await?;
            *guard(&ctx.shared.result) = Some(result);
        }

        let countdown = match (view.state, view.deadline) {
            (AttemptState::InProgress, Some(at)) => {
                let ctx = ctx.clone();
                Some(Countdown::spawn(Deadline { at }, tick, move || async move {
                    if let Err(e) = ctx.finalize(SubmitTrigger::Deadline).await {
                        tracing::error!(error = %e, "forced submission failed");
                    }
                }))
            }
            _ => None,
        };

        Ok(Self {
            ctx,
            view,
            countdown,
        })
    }

    pub fn view(&self) -> &AttemptView {
        &self.view
    }

    pub fn state(&self) -> ViewState {
        let shared = &self.ctx.shared;
        if guard(&shared.result).is_some() {
            ViewState::Submitted
        } else if shared.finalizing.is_tripped() {
            ViewState::Submitting
        } else if guard(&shared.lockout).is_locked() {
            ViewState::Locked
        } else {
            ViewState::Editable
        }
    }

    pub fn answers(&self) -> AnswerMap {
        guard(&self.ctx.shared.answers).clone()
    }

    /// Records an edit locally and queues it for autosave. A failed save never
    /// rolls back the local answer.
    pub fn edit(&self, question_id: QuestionId, answer: Answer) -> Result<()> {
        match self.state() {
            ViewState::Editable => {}
            ViewState::Locked => return Err(Error::LockedOut),
            ViewState::Submitting | ViewState::Submitted => return Err(Error::Locked),
        }
        let question = self
            .view
            .exam
            .questions
            .iter()
            .find(|q| q.id == question_id)
            .ok_or_else(|| {
                Error::ValidationFailed(format!(
                    "question {} is not part of this exam",
                    question_id
                ))
            })?;
        question.check_answer(&answer)?;
        self.ctx.autosave.push(question_id, answer.clone())?;
        guard(&self.ctx.shared.answers).insert(question_id, answer);
        Ok(())
    }

    /// Feeds a visibility or focus signal to the lockout. The first transition
    /// into the locked state is reported to the server in the background.
    pub fn focus_event(&self, event: FocusEvent) -> ViewState {
        if matches!(self.state(), ViewState::Submitting | ViewState::Submitted) {
            return self.state();
        }
        let locked = guard(&self.ctx.shared.lockout).apply(event, time::now());
        if let Some(cause) = locked {
            tracing::warn!(exam_id = %self.ctx.exam_id, cause = cause.as_str(), "exam view locked");
            let ctx = self.ctx.clone();
            tokio::spawn(async move {
                if let Err(e) = ctx
                    .backend
                    .report_focus_loss(ctx.course_id, ctx.exam_id, cause)
                    .await
                {
                    tracing::warn!(error = %e, "failed to report focus loss");
                }
            });
        }
        self.state()
    }

    /// Proctor override.
    pub fn release_lock(&self) -> bool {
        let released = guard(&self.ctx.shared.lockout).release();
        if released {
            tracing::info!(exam_id = %self.ctx.exam_id, "lockout released");
        }
        released
    }

    pub async fn submit(&self) -> Result<AttemptResult> {
        if self.state() == ViewState::Locked {
            return Err(Error::LockedOut);
        }
        self.ctx.finalize(SubmitTrigger::Learner).await
    }

    pub fn result(&self) -> Option<AttemptResult> {
        guard(&self.ctx.shared.result).clone()
    }

    /// Set when the server had already closed the attempt by the time we submitted.
    pub fn notice(&self) -> Option<String> {
        guard(&self.ctx.shared.notice).clone()
    }

    pub fn remaining_seconds(&self) -> Option<i64> {
        self.countdown.as_ref().map(Countdown::remaining_seconds)
    }

    pub fn save_status(&self) -> SaveStatus {
        self.ctx.autosave.status()
    }

    pub async fn flush(&self) {
        self.ctx.autosave.flush().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::backend::MockExamBackend;
    use crate::dto::attempt_dto::{
        PublicExam, PublicKind, PublicQuestion, SaveAnswersResponse, SubmitResponse,
    };
    use crate::models::integrity_event::FocusLossCause;
    use crate::services::certificate_service;
    use crate::services::grading_service::GradeReport;
    use chrono::{DateTime, Utc};

    fn view(state: AttemptState, deadline: Option<DateTime<Utc>>, answers: AnswerMap) -> AttemptView {
        AttemptView {
            attempt_id: Uuid::new_v4(),
            state,
            started_at: Some(time::now()),
            submitted_at: None,
            deadline,
            answers,
            exam: PublicExam {
                id: Uuid::new_v4(),
                course_id: Uuid::new_v4(),
                title: "Safety basics".into(),
                duration_minutes: deadline.map(|_| 60),
                questions: (1..=2)
                    .map(|id| PublicQuestion {
                        id,
                        prompt: format!("Question {}", id),
                        kind: PublicKind::SingleSelect {
                            options: vec!["a".into(), "b".into(), "c".into()],
                        },
                    })
                    .collect(),
            },
        }
    }

    fn result(score: i32) -> AttemptResult {
        AttemptResult {
            attempt_id: Uuid::new_v4(),
            learner_id: Uuid::new_v4(),
            exam_id: Uuid::new_v4(),
            started_at: Some(time::now()),
            submitted_at: time::now(),
            score,
            gradable_count: 2,
            certificate: certificate_service::decide(score, 2, 80),
            report: GradeReport {
                score,
                gradable_count: 2,
                questions: Vec::new(),
            },
        }
    }

    fn submitted(r: &AttemptResult) -> Result<SubmitResponse> {
        Ok(SubmitResponse::from(r))
    }

    #[tokio::test]
    async fn resumes_saved_answers_and_submits_them() {
        let saved = AnswerMap::from([(1, Answer::Index(2))]);
        let opened = view(AttemptState::InProgress, None, saved);

        let mut backend = MockExamBackend::new();
        backend
            .expect_open_attempt()
            .return_once(move |_, _| Ok(opened));
        backend.expect_save_answers().returning(|_, _, answers| {
            Ok(SaveAnswersResponse {
                saved: true,
                question_ids: answers.keys().copied().collect(),
                saved_at: time::now(),
            })
        });
        backend
            .expect_submit()
            .withf(|_, _, answers, trigger| {
                answers.len() == 2 && *trigger == SubmitTrigger::Learner
            })
            .times(1)
            .returning(|_, _, _, _| submitted(&result(1)));
        backend.expect_result().returning(|_, _| Ok(result(1)));

        let session = ExamSession::open(Arc::new(backend), Uuid::new_v4(), Uuid::new_v4(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(session.answers().get(&1), Some(&Answer::Index(2)));
        assert_eq!(session.remaining_seconds(), None);

        session.edit(2, Answer::Index(0)).unwrap();
        let graded = session.submit().await.unwrap();

        assert_eq!(graded.certificate.percentage, 50);
        assert_eq!(session.state(), ViewState::Submitted);
        assert!(matches!(session.edit(1, Answer::Index(0)), Err(Error::Locked)));
    }

    #[tokio::test]
    async fn focus_loss_freezes_edits_and_reports_once() {
        let opened = view(AttemptState::InProgress, None, AnswerMap::new());
        let mut backend = MockExamBackend::new();
        backend
            .expect_open_attempt()
            .return_once(move |_, _| Ok(opened));
        backend
            .expect_report_focus_loss()
            .withf(|_, _, cause| *cause == FocusLossCause::Hidden)
            .times(1)
            .returning(|_, _, _| Ok(()));

        let session = ExamSession::open(Arc::new(backend), Uuid::new_v4(), Uuid::new_v4(), Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(session.focus_event(FocusEvent::Hidden), ViewState::Locked);
        assert_eq!(session.focus_event(FocusEvent::Visible), ViewState::Locked);
        assert_eq!(session.focus_event(FocusEvent::Blur), ViewState::Locked);
        assert!(matches!(session.edit(1, Answer::Index(0)), Err(Error::LockedOut)));
        assert!(matches!(session.submit().await, Err(Error::LockedOut)));
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(session.release_lock());
        assert_eq!(session.state(), ViewState::Editable);
    }

    #[tokio::test]
    async fn deadline_forces_a_single_submission() {
        let opened = view(
            AttemptState::InProgress,
            Some(time::now() - chrono::Duration::seconds(1)),
            AnswerMap::from([(1, Answer::Index(0))]),
        );
        let mut backend = MockExamBackend::new();
        backend
            .expect_open_attempt()
            .return_once(move |_, _| Ok(opened));
        backend
            .expect_submit()
            .withf(|_, _, _, trigger| *trigger == SubmitTrigger::Deadline)
            .times(1)
            .returning(|_, _, _, _| submitted(&result(1)));
        backend.expect_result().returning(|_, _| Ok(result(1)));

        let session = ExamSession::open(Arc::new(backend), Uuid::new_v4(), Uuid::new_v4(), Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(session.state(), ViewState::Submitted);
        assert_eq!(session.remaining_seconds(), Some(0));
        let again = session.submit().await.unwrap();
        assert_eq!(again.score, 1);
    }

    #[tokio::test]
    async fn already_submitted_shows_results_with_notice() {
        let opened = view(AttemptState::InProgress, None, AnswerMap::new());
        let mut backend = MockExamBackend::new();
        backend
            .expect_open_attempt()
            .return_once(move |_, _| Ok(opened));
        backend
            .expect_submit()
            .times(1)
            .returning(|_, _, _, _| Err(Error::AlreadySubmitted));
        backend.expect_result().times(1).returning(|_, _| Ok(result(2)));

        let session = ExamSession::open(Arc::new(backend), Uuid::new_v4(), Uuid::new_v4(), Duration::from_secs(1))
            .await
            .unwrap();
        let graded = session.submit().await.unwrap();

        assert!(graded.certificate.eligible);
        assert_eq!(session.state(), ViewState::Submitted);
        assert!(session.notice().is_some());
    }

    #[tokio::test]
    async fn refused_local_answers_fall_back_to_stored_ones() {
        let opened = view(AttemptState::InProgress, None, AnswerMap::from([(1, Answer::Index(2))]));
        let mut seq = mockall::Sequence::new();
        let mut backend = MockExamBackend::new();
        backend
            .expect_open_attempt()
            .return_once(move |_, _| Ok(opened));
        backend
            .expect_submit()
            .withf(|_, _, answers, _| !answers.is_empty())
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _, _| Err(Error::ValidationFailed("question 1 expects a text answer".into())));
        backend
            .expect_submit()
            .withf(|_, _, answers, _| answers.is_empty())
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _, _| submitted(&result(1)));
        backend.expect_result().returning(|_, _| Ok(result(1)));

        let session = ExamSession::open(Arc::new(backend), Uuid::new_v4(), Uuid::new_v4(), Duration::from_secs(1))
            .await
            .unwrap();
        let graded = session.submit().await.unwrap();

        assert_eq!(graded.score, 1);
        assert_eq!(session.state(), ViewState::Submitted);
    }

    #[tokio::test]
    async fn network_failure_on_submit_leaves_view_editable() {
        let opened = view(AttemptState::InProgress, None, AnswerMap::new());
        let mut backend = MockExamBackend::new();
        backend
            .expect_open_attempt()
            .return_once(move |_, _| Ok(opened));
        backend
            .expect_submit()
            .times(1)
            .returning(|_, _, _, _| Err(Error::Internal("timeout".into())));

        let session = ExamSession::open(Arc::new(backend), Uuid::new_v4(), Uuid::new_v4(), Duration::from_secs(1))
            .await
            .unwrap();

        assert!(session.submit().await.is_err());
        assert_eq!(session.state(), ViewState::Editable);
    }

    #[tokio::test]
    async fn malformed_edits_are_rejected_before_queuing() {
        let opened = view(AttemptState::InProgress, None, AnswerMap::new());
        let mut backend = MockExamBackend::new();
        backend
            .expect_open_attempt()
            .return_once(move |_, _| Ok(opened));

        let session = ExamSession::open(Arc::new(backend), Uuid::new_v4(), Uuid::new_v4(), Duration::from_secs(1))
            .await
            .unwrap();

        assert!(matches!(
            session.edit(99, Answer::Index(0)),
            Err(Error::ValidationFailed(_))
        ));
        assert!(matches!(
            session.edit(1, Answer::Index(3)),
            Err(Error::ValidationFailed(_))
        ));
        assert!(matches!(
            session.edit(2, Answer::Text("b".into())),
            Err(Error::ValidationFailed(_))
        ));
        session.flush().await;
        assert!(session.answers().is_empty());
        assert_eq!(session.save_status(), SaveStatus::Idle);
    }
}
