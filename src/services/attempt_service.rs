use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::database::store::{AttemptStore, ExamCatalog};
use crate::error::{Error, Result};
use crate::models::attempt::{Attempt, AttemptState};
use crate::models::exam::Exam;
use crate::models::integrity_event::{FocusLossCause, IntegrityEvent};
use crate::models::question::AnswerMap;
use crate::services::certificate_service::{self, CertificateDecision};
use crate::services::deadline::Deadline;
use crate::services::grading_service::{GradeReport, GradingService};
use crate::utils::time;

#[derive(Debug, Clone, Copy)]
pub struct AttemptPolicy {
    pub certificate_threshold: u8,
    /// Window after the deadline in which a submission's own answers still count.
    pub deadline_grace: Duration,
}

impl Default for AttemptPolicy {
    fn default() -> Self {
        Self {
            certificate_threshold: certificate_service::DEFAULT_THRESHOLD,
            deadline_grace: Duration::seconds(5),
        }
    }
}

/// Who asked for the attempt to be closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitTrigger {
    Learner,
    Deadline,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptStatus {
    pub attempt_id: Uuid,
    pub state: AttemptState,
    pub started_at: Option<DateTime<Utc>>,
    pub deadline: Option<DateTime<Utc>>,
    pub remaining_seconds: Option<i64>,
    pub questions_answered: usize,
    pub total_questions: usize,
}

/// A finalized attempt as the results view sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptResult {
    pub attempt_id: Uuid,
    pub learner_id: Uuid,
    pub exam_id: Uuid,
    pub started_at: Option<DateTime<Utc>>,
    pub submitted_at: DateTime<Utc>,
    pub score: i32,
    pub gradable_count: i32,
    pub certificate: CertificateDecision,
    pub report: GradeReport,
}

#[derive(Clone)]
pub struct AttemptService {
    store: Arc<dyn AttemptStore>,
    catalog: Arc<dyn ExamCatalog>,
    policy: AttemptPolicy,
}

impl AttemptService {
    pub fn new(
        store: Arc<dyn AttemptStore>,
        catalog: Arc<dyn ExamCatalog>,
        policy: AttemptPolicy,
    ) -> Self {
        Self {
            store,
            catalog,
            policy,
        }
    }

    pub async fn exam(&self, course_id: Uuid, exam_id: Uuid) -> Result<Exam> {
        self.catalog.get_exam_by_id(course_id, exam_id).await
    }

    /// Get-or-create plus start the timer. Reopening never restarts the clock;
    /// reopening past the deadline closes the attempt with what was saved.
    pub async fn open_attempt(
        &self,
        learner_id: Uuid,
        course_id: Uuid,
        exam_id: Uuid,
    ) -> Result<(Attempt, Exam)> {
        let exam = self.exam(course_id, exam_id).await?;
        let now = time::now();
        let mut attempt = self
            .store
            .get_or_create_attempt(learner_id, course_id, exam_id, now)
            .await?;

        if attempt.is_submitted {
            return Ok((attempt, exam));
        }

        if attempt.started_at.is_none() {
            attempt = self.store.start_timer(attempt.id, now).await?;
            tracing::info!(
                attempt_id = %attempt.id,
                learner_id = %learner_id,
                exam_id = %exam_id,
                timed = exam.is_timed(),
                "attempt started"
            );
        }

        if self.is_closed(&attempt, &exam, now) {
            attempt = self.close_expired(&attempt, &exam, now).await?;
        }

        Ok((attempt, exam))
    }

    /// Autosave entry point: merges a partial answer map into the open attempt.
    pub async fn save_answers(
        &self,
        learner_id: Uuid,
        course_id: Uuid,
        exam_id: Uuid,
        answers: &AnswerMap,
    ) -> Result<Attempt> {
        let exam = self.exam(course_id, exam_id).await?;
        let attempt = self.require_attempt(learner_id, exam_id).await?;
        if attempt.is_submitted {
            return Err(Error::Locked);
        }
        validate_answers(&exam, answers)?;

        let now = time::now();
        if self.is_closed(&attempt, &exam, now) {
            self.close_expired(&attempt, &exam, now).await?;
            return Err(Error::Locked);
        }

        let saved = self.store.save_answers(attempt.id, answers, now).await?;
        tracing::debug!(
            attempt_id = %saved.id,
            keys = answers.len(),
            "answers saved"
        );
        Ok(saved)
    }

    /// Closes the attempt exactly once. A repeated call is rejected with
    /// `AlreadySubmitted` and changes nothing.
    pub async fn submit(
        &self,
        learner_id: Uuid,
        course_id: Uuid,
        exam_id: Uuid,
        answers: &AnswerMap,
        trigger: SubmitTrigger,
    ) -> Result<Attempt> {
        let exam = self.exam(course_id, exam_id).await?;
        let attempt = self.require_attempt(learner_id, exam_id).await?;
        if attempt.is_submitted {
            tracing::warn!(attempt_id = %attempt.id, ?trigger, "duplicate submission rejected");
            return Err(Error::AlreadySubmitted);
        }
        validate_answers(&exam, answers)?;

        let now = time::now();
        let late = self.is_closed(&attempt, &exam, now);
        let final_answers = if late {
            tracing::warn!(
                attempt_id = %attempt.id,
                "submission arrived after the deadline; using saved answers"
            );
            AnswerMap::new()
        } else {
            answers.clone()
        };

        let finalized = match self
            .store
            .finalize(attempt.id, &final_answers, &exam, now)
            .await
        {
            Ok(finalized) => finalized,
            Err(Error::AlreadySubmitted) => {
                tracing::warn!(attempt_id = %attempt.id, ?trigger, "lost submission race");
                return Err(Error::AlreadySubmitted);
            }
            Err(e) => return Err(e),
        };

        tracing::info!(
            attempt_id = %finalized.id,
            learner_id = %learner_id,
            ?trigger,
            late,
            score = finalized.score.unwrap_or_default(),
            "attempt submitted"
        );
        Ok(finalized)
    }

    pub async fn status(
        &self,
        learner_id: Uuid,
        course_id: Uuid,
        exam_id: Uuid,
    ) -> Result<AttemptStatus> {
        let exam = self.exam(course_id, exam_id).await?;
        let attempt = self.require_attempt(learner_id, exam_id).await?;
        Ok(build_status(&attempt, &exam, time::now()))
    }

    /// Only finalized attempts have results; an open attempt is reported as
    /// not found rather than exposing a partial score.
    pub async fn result(
        &self,
        learner_id: Uuid,
        course_id: Uuid,
        exam_id: Uuid,
    ) -> Result<AttemptResult> {
        let exam = self.exam(course_id, exam_id).await?;
        let attempt = self.require_attempt(learner_id, exam_id).await?;
        self.build_result(&attempt, &exam)
    }

    /// Appends lockout evidence. Never finalizes or alters the attempt.
    pub async fn record_focus_loss(
        &self,
        learner_id: Uuid,
        course_id: Uuid,
        exam_id: Uuid,
        cause: FocusLossCause,
    ) -> Result<IntegrityEvent> {
        self.exam(course_id, exam_id).await?;
        let attempt = self.require_attempt(learner_id, exam_id).await?;
        if attempt.is_submitted {
            return Err(Error::Locked);
        }
        let event = self
            .store
            .record_event(attempt.id, cause, time::now())
            .await?;
        tracing::warn!(
            attempt_id = %attempt.id,
            learner_id = %learner_id,
            cause = cause.as_str(),
            "exam view lost focus"
        );
        Ok(event)
    }

    /// Administrative retake path: removes the attempt wholesale.
    pub async fn delete_attempt(
        &self,
        course_id: Uuid,
        exam_id: Uuid,
        learner_id: Uuid,
    ) -> Result<()> {
        self.exam(course_id, exam_id).await?;
        self.store.delete_attempt(learner_id, exam_id).await?;
        tracing::info!(learner_id = %learner_id, exam_id = %exam_id, "attempt deleted");
        Ok(())
    }

    pub async fn list_results(&self, course_id: Uuid, exam_id: Uuid) -> Result<Vec<AttemptResult>> {
        let exam = self.exam(course_id, exam_id).await?;
        self.store
            .list_submitted(exam_id)
            .await?
            .iter()
            .map(|attempt| self.build_result(attempt, &exam))
            .collect()
    }

    pub async fn list_events(
        &self,
        course_id: Uuid,
        exam_id: Uuid,
        learner_id: Uuid,
    ) -> Result<Vec<IntegrityEvent>> {
        self.exam(course_id, exam_id).await?;
        let attempt = self.require_attempt(learner_id, exam_id).await?;
        self.store.list_events(attempt.id).await
    }

    /// Finalizes every started attempt whose deadline passed, with its saved
    /// answers. Returns how many were closed by this sweep.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut closed = 0;
        for attempt in self.store.list_in_progress().await? {
            let exam = match self.exam(attempt.course_id, attempt.exam_id).await {
                Ok(exam) => exam,
                Err(Error::NotFound(_)) => continue,
                Err(e) => return Err(e),
            };
            if !self.is_closed(&attempt, &exam, now) {
                continue;
            }
            match self.store.finalize(attempt.id, &AnswerMap::new(), &exam, now).await {
                Ok(finalized) => {
                    closed += 1;
                    tracing::info!(
                        attempt_id = %finalized.id,
                        score = finalized.score.unwrap_or_default(),
                        "expired attempt auto-submitted"
                    );
                }
                Err(Error::AlreadySubmitted) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(closed)
    }

    async fn require_attempt(&self, learner_id: Uuid, exam_id: Uuid) -> Result<Attempt> {
        self.store
            .find_attempt(learner_id, exam_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("no attempt for exam {}", exam_id)))
    }

    fn is_closed(&self, attempt: &Attempt, exam: &Exam, now: DateTime<Utc>) -> bool {
        Deadline::for_attempt(attempt.started_at, exam.duration_minutes)
            .is_some_and(|d| d.is_closed(now, self.policy.deadline_grace))
    }

    async fn close_expired(&self, attempt: &Attempt, exam: &Exam, now: DateTime<Utc>) -> Result<Attempt> {
        match self.store.finalize(attempt.id, &AnswerMap::new(), exam, now).await {
            Ok(finalized) => {
                tracing::info!(attempt_id = %finalized.id, "expired attempt closed on access");
                Ok(finalized)
            }
            Err(Error::AlreadySubmitted) => self.require_attempt(attempt.learner_id, attempt.exam_id).await,
            Err(e) => Err(e),
        }
    }

    fn build_result(&self, attempt: &Attempt, exam: &Exam) -> Result<AttemptResult> {
        let (Some(score), Some(submitted_at)) = (attempt.score, attempt.submitted_at) else {
            return Err(Error::NotFound("attempt has not been submitted".to_string()));
        };
        let report = GradingService::grade(&exam.questions, &attempt.answers);
        let gradable_count = report.gradable_count;
        Ok(AttemptResult {
            attempt_id: attempt.id,
            learner_id: attempt.learner_id,
            exam_id: attempt.exam_id,
            started_at: attempt.started_at,
            submitted_at,
            score,
            gradable_count,
            certificate: certificate_service::decide(
                score,
                gradable_count,
                self.policy.certificate_threshold,
            ),
            report,
        })
    }
}

pub fn build_status(attempt: &Attempt, exam: &Exam, now: DateTime<Utc>) -> AttemptStatus {
    let deadline = Deadline::for_attempt(attempt.started_at, exam.duration_minutes);
    AttemptStatus {
        attempt_id: attempt.id,
        state: attempt.state(),
        started_at: attempt.started_at,
        deadline: deadline.map(|d| d.at),
        remaining_seconds: match attempt.state() {
            AttemptState::InProgress => deadline.map(|d| d.remaining_seconds(now)),
            _ => None,
        },
        questions_answered: attempt.answers.len(),
        total_questions: exam.questions.len(),
    }
}

fn validate_answers(exam: &Exam, answers: &AnswerMap) -> Result<()> {
    for (id, answer) in answers {
        let question = exam.question(*id).ok_or_else(|| {
            Error::ValidationFailed(format!("question {} is not part of this exam", id))
        })?;
        question.check_answer(answer)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::MemoryStore;
    use crate::models::question::{Answer, Question, QuestionKind};

    fn single(id: i32, correct: usize) -> Question {
        Question {
            id,
            prompt: format!("Question {}", id),
            kind: QuestionKind::SingleSelect {
                options: vec!["zero".into(), "one".into(), "two".into()],
                correct,
            },
            rationale: None,
        }
    }

    async fn setup(duration_minutes: Option<i32>) -> (AttemptService, MemoryStore, Exam) {
        let store = MemoryStore::new();
        let exam = Exam {
            id: Uuid::new_v4(),
            course_id: Uuid::new_v4(),
            title: "Safety".into(),
            questions: vec![
                single(1, 1),
                single(2, 0),
                Question {
                    id: 3,
                    prompt: "Describe a hazard".into(),
                    kind: QuestionKind::FreeText,
                    rationale: None,
                },
            ],
            duration_minutes,
        };
        store.insert_exam(exam.clone()).await.unwrap();
        let service = AttemptService::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            AttemptPolicy::default(),
        );
        (service, store, exam)
    }

    #[tokio::test]
    async fn scenario_half_right_scores_fifty_percent() {
        let (service, _, exam) = setup(Some(60)).await;
        let learner = Uuid::new_v4();
        let (attempt, _) = service
            .open_attempt(learner, exam.course_id, exam.id)
            .await
            .unwrap();
        assert_eq!(attempt.state(), AttemptState::InProgress);

        let answers = AnswerMap::from([(1, Answer::Index(1)), (2, Answer::Index(1))]);
        let submitted = service
            .submit(learner, exam.course_id, exam.id, &answers, SubmitTrigger::Learner)
            .await
            .unwrap();
        assert_eq!(submitted.score, Some(1));

        let result = service.result(learner, exam.course_id, exam.id).await.unwrap();
        assert_eq!(result.gradable_count, 2);
        assert_eq!(result.certificate.percentage, 50);
        assert!(!result.certificate.eligible);
    }

    #[tokio::test]
    async fn reopening_keeps_the_original_start() {
        let (service, _, exam) = setup(Some(60)).await;
        let learner = Uuid::new_v4();
        let (first, _) = service.open_attempt(learner, exam.course_id, exam.id).await.unwrap();
        let (second, _) = service.open_attempt(learner, exam.course_id, exam.id).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.started_at, second.started_at);
    }

    #[tokio::test]
    async fn save_requires_an_open_attempt_and_valid_payload() {
        let (service, _, exam) = setup(None).await;
        let learner = Uuid::new_v4();
        let answers = AnswerMap::from([(1, Answer::Index(1))]);
        assert!(matches!(
            service.save_answers(learner, exam.course_id, exam.id, &answers).await,
            Err(Error::NotFound(_))
        ));

        service.open_attempt(learner, exam.course_id, exam.id).await.unwrap();
        let bad_index = AnswerMap::from([(1, Answer::Index(7))]);
        assert!(matches!(
            service.save_answers(learner, exam.course_id, exam.id, &bad_index).await,
            Err(Error::ValidationFailed(_))
        ));
        let unknown = AnswerMap::from([(42, Answer::Index(0))]);
        assert!(matches!(
            service.save_answers(learner, exam.course_id, exam.id, &unknown).await,
            Err(Error::ValidationFailed(_))
        ));
        service
            .save_answers(learner, exam.course_id, exam.id, &answers)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn second_submit_changes_nothing() {
        let (service, store, exam) = setup(None).await;
        let learner = Uuid::new_v4();
        service.open_attempt(learner, exam.course_id, exam.id).await.unwrap();
        let first = service
            .submit(
                learner,
                exam.course_id,
                exam.id,
                &AnswerMap::from([(1, Answer::Index(0))]),
                SubmitTrigger::Learner,
            )
            .await
            .unwrap();
        let second = service
            .submit(
                learner,
                exam.course_id,
                exam.id,
                &AnswerMap::from([(1, Answer::Index(1)), (2, Answer::Index(0))]),
                SubmitTrigger::Deadline,
            )
            .await;
        assert!(matches!(second, Err(Error::AlreadySubmitted)));
        let stored = store.find_attempt(learner, exam.id).await.unwrap().unwrap();
        assert_eq!(stored.score, first.score);
        assert_eq!(stored.submitted_at, first.submitted_at);
        assert!(matches!(
            service
                .save_answers(learner, exam.course_id, exam.id, &AnswerMap::new())
                .await,
            Err(Error::Locked)
        ));
    }

    #[tokio::test]
    async fn results_are_hidden_until_submission() {
        let (service, _, exam) = setup(None).await;
        let learner = Uuid::new_v4();
        service.open_attempt(learner, exam.course_id, exam.id).await.unwrap();
        assert!(matches!(
            service.result(learner, exam.course_id, exam.id).await,
            Err(Error::NotFound(_))
        ));
        let status = service.status(learner, exam.course_id, exam.id).await.unwrap();
        assert_eq!(status.state, AttemptState::InProgress);
        assert_eq!(status.remaining_seconds, None);
    }

    async fn started(store: &MemoryStore, exam: &Exam, learner: Uuid, at: DateTime<Utc>) -> Attempt {
        let attempt = store
            .get_or_create_attempt(learner, exam.course_id, exam.id, at)
            .await
            .unwrap();
        store.start_timer(attempt.id, at).await.unwrap()
    }

    #[tokio::test]
    async fn reopening_past_the_deadline_closes_with_saved_answers() {
        let (service, store, exam) = setup(Some(60)).await;
        let learner = Uuid::new_v4();
        let attempt = started(&store, &exam, learner, time::now() - Duration::minutes(61)).await;
        store
            .save_answers(attempt.id, &AnswerMap::from([(1, Answer::Index(1))]), time::now())
            .await
            .unwrap();

        let (reopened, _) = service.open_attempt(learner, exam.course_id, exam.id).await.unwrap();

        assert_eq!(reopened.id, attempt.id);
        assert_eq!(reopened.state(), AttemptState::Submitted);
        assert_eq!(reopened.score, Some(1));
    }

    #[tokio::test]
    async fn save_after_the_grace_window_closes_the_attempt() {
        let (service, store, exam) = setup(Some(60)).await;
        let learner = Uuid::new_v4();
        started(&store, &exam, learner, time::now() - Duration::minutes(61)).await;

        let late = service
            .save_answers(
                learner,
                exam.course_id,
                exam.id,
                &AnswerMap::from([(1, Answer::Index(1))]),
            )
            .await;

        assert!(matches!(late, Err(Error::Locked)));
        let stored = store.find_attempt(learner, exam.id).await.unwrap().unwrap();
        assert!(stored.is_submitted);
        assert!(stored.answers.is_empty());
        assert_eq!(stored.score, Some(0));
    }

    #[tokio::test]
    async fn late_submit_ignores_its_payload() {
        let (service, store, exam) = setup(Some(60)).await;
        let learner = Uuid::new_v4();
        let attempt = started(&store, &exam, learner, time::now() - Duration::minutes(61)).await;
        store
            .save_answers(attempt.id, &AnswerMap::from([(1, Answer::Index(1))]), time::now())
            .await
            .unwrap();

        let submitted = service
            .submit(
                learner,
                exam.course_id,
                exam.id,
                &AnswerMap::from([(1, Answer::Index(0))]),
                SubmitTrigger::Deadline,
            )
            .await
            .unwrap();

        assert_eq!(submitted.score, Some(1));
        assert_eq!(submitted.answers.get(&1), Some(&Answer::Index(1)));
    }

    #[tokio::test]
    async fn submit_inside_the_grace_window_keeps_its_payload() {
        let (service, store, exam) = setup(Some(60)).await;
        let learner = Uuid::new_v4();
        let started_at = time::now() - Duration::minutes(60) - Duration::seconds(2);
        let attempt = started(&store, &exam, learner, started_at).await;
        store
            .save_answers(attempt.id, &AnswerMap::from([(1, Answer::Index(1))]), time::now())
            .await
            .unwrap();

        let submitted = service
            .submit(
                learner,
                exam.course_id,
                exam.id,
                &AnswerMap::from([(2, Answer::Index(0))]),
                SubmitTrigger::Deadline,
            )
            .await
            .unwrap();

        assert_eq!(submitted.score, Some(2));
        assert_eq!(submitted.answers.len(), 2);
    }

    #[tokio::test]
    async fn sweep_closes_expired_attempts_with_saved_answers() {
        let (service, store, exam) = setup(Some(60)).await;
        let learner = Uuid::new_v4();
        let other = Uuid::new_v4();
        let (expired, _) = service.open_attempt(learner, exam.course_id, exam.id).await.unwrap();
        service.open_attempt(other, exam.course_id, exam.id).await.unwrap();
        store
            .save_answers(expired.id, &AnswerMap::from([(1, Answer::Index(1))]), time::now())
            .await
            .unwrap();

        let started = expired.started_at.unwrap();
        let now = started + Duration::minutes(61);
        // Both attempts started at roughly the same time, so both are past due.
        let closed = service.sweep_expired(now).await.unwrap();
        assert_eq!(closed, 2);
        let swept = store.find_attempt(learner, exam.id).await.unwrap().unwrap();
        assert!(swept.is_submitted);
        assert_eq!(swept.score, Some(1));
        assert_eq!(service.sweep_expired(now).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn sweep_ignores_attempts_within_the_deadline() {
        let (service, _, exam) = setup(Some(60)).await;
        let learner = Uuid::new_v4();
        service.open_attempt(learner, exam.course_id, exam.id).await.unwrap();
        assert_eq!(service.sweep_expired(time::now()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn focus_loss_is_recorded_without_closing() {
        let (service, _, exam) = setup(None).await;
        let learner = Uuid::new_v4();
        service.open_attempt(learner, exam.course_id, exam.id).await.unwrap();
        service
            .record_focus_loss(learner, exam.course_id, exam.id, FocusLossCause::Hidden)
            .await
            .unwrap();
        let events = service.list_events(exam.course_id, exam.id, learner).await.unwrap();
        assert_eq!(events.len(), 1);
        let status = service.status(learner, exam.course_id, exam.id).await.unwrap();
        assert_eq!(status.state, AttemptState::InProgress);
    }

    #[tokio::test]
    async fn delete_then_reopen_starts_over() {
        let (service, _, exam) = setup(Some(30)).await;
        let learner = Uuid::new_v4();
        let (old, _) = service.open_attempt(learner, exam.course_id, exam.id).await.unwrap();
        service
            .submit(learner, exam.course_id, exam.id, &AnswerMap::new(), SubmitTrigger::Learner)
            .await
            .unwrap();
        service.delete_attempt(exam.course_id, exam.id, learner).await.unwrap();
        assert!(service.list_results(exam.course_id, exam.id).await.unwrap().is_empty());

        let (fresh, _) = service.open_attempt(learner, exam.course_id, exam.id).await.unwrap();
        assert_ne!(fresh.id, old.id);
        assert!(!fresh.is_submitted);
        assert!(fresh.answers.is_empty());
    }
}
