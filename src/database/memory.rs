use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::database::store::{AttemptStore, ExamCatalog};
use crate::error::{Error, Result};
use crate::models::attempt::Attempt;
use crate::models::exam::Exam;
use crate::models::integrity_event::{FocusLossCause, IntegrityEvent};
use crate::models::question::AnswerMap;
use crate::services::grading_service::GradingService;

#[derive(Default)]
struct State {
    exams: HashMap<Uuid, Exam>,
    attempts: HashMap<Uuid, Attempt>,
    by_pair: HashMap<(Uuid, Uuid), Uuid>,
    events: Vec<IntegrityEvent>,
}

impl State {
    fn attempt_mut(&mut self, attempt_id: Uuid) -> Result<&mut Attempt> {
        self.attempts
            .get_mut(&attempt_id)
            .ok_or_else(|| Error::NotFound(format!("attempt {} not found", attempt_id)))
    }
}

/// Process-local store and catalog. Every operation runs under one lock, which
/// is what serializes concurrent `finalize` calls.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_exam(&self, exam: Exam) -> Result<()> {
        exam.validate()?;
        self.state.lock().await.exams.insert(exam.id, exam);
        Ok(())
    }

    /// Deleting an exam cascades to its attempts and their events.
    pub async fn delete_exam(&self, exam_id: Uuid) -> Result<()> {
        let mut state = self.state.lock().await;
        state
            .exams
            .remove(&exam_id)
            .ok_or_else(|| Error::NotFound(format!("exam {} not found", exam_id)))?;
        let removed: Vec<Uuid> = state
            .attempts
            .values()
            .filter(|a| a.exam_id == exam_id)
            .map(|a| a.id)
            .collect();
        for id in &removed {
            state.attempts.remove(id);
        }
        state.by_pair.retain(|(_, exam), _| *exam != exam_id);
        state.events.retain(|e| !removed.contains(&e.attempt_id));
        Ok(())
    }
}

#[async_trait]
impl AttemptStore for MemoryStore {
    async fn get_or_create_attempt(
        &self,
        learner_id: Uuid,
        course_id: Uuid,
        exam_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Attempt> {
        let mut state = self.state.lock().await;
        if let Some(id) = state.by_pair.get(&(learner_id, exam_id)).copied() {
            return Ok(state.attempt_mut(id)?.clone());
        }
        let attempt = Attempt::new(learner_id, course_id, exam_id, now);
        state.by_pair.insert((learner_id, exam_id), attempt.id);
        state.attempts.insert(attempt.id, attempt.clone());
        Ok(attempt)
    }

    async fn find_attempt(&self, learner_id: Uuid, exam_id: Uuid) -> Result<Option<Attempt>> {
        let state = self.state.lock().await;
        Ok(state
            .by_pair
            .get(&(learner_id, exam_id))
            .and_then(|id| state.attempts.get(id))
            .cloned())
    }

    async fn start_timer(&self, attempt_id: Uuid, now: DateTime<Utc>) -> Result<Attempt> {
        let mut state = self.state.lock().await;
        let attempt = state.attempt_mut(attempt_id)?;
        if attempt.started_at.is_none() {
            attempt.started_at = Some(now);
            attempt.updated_at = now;
        }
        Ok(attempt.clone())
    }

    async fn save_answers(
        &self,
        attempt_id: Uuid,
        answers: &AnswerMap,
        now: DateTime<Utc>,
    ) -> Result<Attempt> {
        let mut state = self.state.lock().await;
        let attempt = state.attempt_mut(attempt_id)?;
        if attempt.is_submitted {
            return Err(Error::Locked);
        }
        attempt.merge_answers(answers);
        attempt.updated_at = now;
        Ok(attempt.clone())
    }

    async fn finalize(
        &self,
        attempt_id: Uuid,
        answers: &AnswerMap,
        exam: &Exam,
        now: DateTime<Utc>,
    ) -> Result<Attempt> {
        let mut state = self.state.lock().await;
        let attempt = state.attempt_mut(attempt_id)?;
        if attempt.is_submitted {
            return Err(Error::AlreadySubmitted);
        }
        attempt.merge_answers(answers);
        attempt.score = Some(GradingService::score(&exam.questions, &attempt.answers));
        attempt.submitted_at = Some(now);
        attempt.is_submitted = true;
        attempt.updated_at = now;
        Ok(attempt.clone())
    }

    async fn delete_attempt(&self, learner_id: Uuid, exam_id: Uuid) -> Result<()> {
        let mut state = self.state.lock().await;
        let id = state.by_pair.remove(&(learner_id, exam_id)).ok_or_else(|| {
            Error::NotFound(format!(
                "no attempt for learner {} on exam {}",
                learner_id, exam_id
            ))
        })?;
        state.attempts.remove(&id);
        state.events.retain(|e| e.attempt_id != id);
        Ok(())
    }

    async fn list_in_progress(&self) -> Result<Vec<Attempt>> {
        let state = self.state.lock().await;
        Ok(state
            .attempts
            .values()
            .filter(|a| !a.is_submitted && a.started_at.is_some())
            .cloned()
            .collect())
    }

    async fn list_submitted(&self, exam_id: Uuid) -> Result<Vec<Attempt>> {
        let state = self.state.lock().await;
        let mut attempts: Vec<Attempt> = state
            .attempts
            .values()
            .filter(|a| a.exam_id == exam_id && a.is_submitted)
            .cloned()
            .collect();
        attempts.sort_by_key(|a| a.submitted_at);
        Ok(attempts)
    }

    async fn record_event(
        &self,
        attempt_id: Uuid,
        cause: FocusLossCause,
        now: DateTime<Utc>,
    ) -> Result<IntegrityEvent> {
        let mut state = self.state.lock().await;
        state.attempt_mut(attempt_id)?;
        let event = IntegrityEvent {
            id: Uuid::new_v4(),
            attempt_id,
            cause,
            occurred_at: now,
        };
        state.events.push(event.clone());
        Ok(event)
    }

    async fn list_events(&self, attempt_id: Uuid) -> Result<Vec<IntegrityEvent>> {
        let state = self.state.lock().await;
        Ok(state
            .events
            .iter()
            .filter(|e| e.attempt_id == attempt_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ExamCatalog for MemoryStore {
    async fn get_exam_by_id(&self, course_id: Uuid, exam_id: Uuid) -> Result<Exam> {
        let state = self.state.lock().await;
        state
            .exams
            .get(&exam_id)
            .filter(|e| e.course_id == course_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("exam {} not found", exam_id)))
    }
}
