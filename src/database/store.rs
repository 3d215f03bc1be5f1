use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::attempt::Attempt;
use crate::models::exam::Exam;
use crate::models::integrity_event::{FocusLossCause, IntegrityEvent};
use crate::models::question::AnswerMap;

/// Persistence for attempts. Implementations must serialize `finalize` per
/// attempt so that exactly one call wins; every other call sees
/// `Error::AlreadySubmitted`.
#[async_trait]
pub trait AttemptStore: Send + Sync {
    /// Returns the existing attempt for the pair or creates an empty one.
    /// At most one attempt per (learner, exam) ever exists.
    async fn get_or_create_attempt(
        &self,
        learner_id: Uuid,
        course_id: Uuid,
        exam_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Attempt>;

    async fn find_attempt(&self, learner_id: Uuid, exam_id: Uuid) -> Result<Option<Attempt>>;

    /// Sets `started_at` only if it is unset.
    async fn start_timer(&self, attempt_id: Uuid, now: DateTime<Utc>) -> Result<Attempt>;

    /// Key-wise merge. `Error::Locked` once submitted.
    async fn save_answers(
        &self,
        attempt_id: Uuid,
        answers: &AnswerMap,
        now: DateTime<Utc>,
    ) -> Result<Attempt>;

    /// Merges the final answers, scores against `exam`, and closes the attempt.
    async fn finalize(
        &self,
        attempt_id: Uuid,
        answers: &AnswerMap,
        exam: &Exam,
        now: DateTime<Utc>,
    ) -> Result<Attempt>;

    /// Removes the attempt entirely, with its integrity events.
    async fn delete_attempt(&self, learner_id: Uuid, exam_id: Uuid) -> Result<()>;

    /// Started, unsubmitted attempts; input for the deadline sweep.
    async fn list_in_progress(&self) -> Result<Vec<Attempt>>;

    async fn list_submitted(&self, exam_id: Uuid) -> Result<Vec<Attempt>>;

    async fn record_event(
        &self,
        attempt_id: Uuid,
        cause: FocusLossCause,
        now: DateTime<Utc>,
    ) -> Result<IntegrityEvent>;

    async fn list_events(&self, attempt_id: Uuid) -> Result<Vec<IntegrityEvent>>;
}

/// Read-only view of the course catalog.
#[async_trait]
pub trait ExamCatalog: Send + Sync {
    async fn get_exam_by_id(&self, course_id: Uuid, exam_id: Uuid) -> Result<Exam>;
}
