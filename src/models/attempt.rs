use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::question::AnswerMap;

/// Lifecycle of an attempt. `Submitted` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptState {
    NotStarted,
    InProgress,
    Submitted,
}

/// One learner's record for one exam: answers while open, frozen once submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    pub id: Uuid,
    pub learner_id: Uuid,
    pub course_id: Uuid,
    pub exam_id: Uuid,
    pub answers: AnswerMap,
    pub started_at: Option<DateTime<Utc>>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub is_submitted: bool,
    /// Absent until submission.
    pub score: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Attempt {
    pub fn new(learner_id: Uuid, course_id: Uuid, exam_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            learner_id,
            course_id,
            exam_id,
            answers: AnswerMap::new(),
            started_at: None,
            submitted_at: None,
            is_submitted: false,
            score: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn state(&self) -> AttemptState {
        if self.is_submitted {
            AttemptState::Submitted
        } else if self.started_at.is_some() {
            AttemptState::InProgress
        } else {
            AttemptState::NotStarted
        }
    }

    /// Key-wise overwrite; keys absent from `answers` are left untouched.
    pub fn merge_answers(&mut self, answers: &AnswerMap) {
        for (id, answer) in answers {
            self.answers.insert(*id, answer.clone());
        }
    }
}

#[derive(Debug, FromRow)]
pub struct AttemptRow {
    pub id: Uuid,
    pub learner_id: Uuid,
    pub course_id: Uuid,
    pub exam_id: Uuid,
    pub answers: Json<AnswerMap>,
    pub started_at: Option<DateTime<Utc>>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub is_submitted: bool,
    pub score: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<AttemptRow> for Attempt {
    fn from(row: AttemptRow) -> Self {
        Self {
            id: row.id,
            learner_id: row.learner_id,
            course_id: row.course_id,
            exam_id: row.exam_id,
            answers: row.answers.0,
            started_at: row.started_at,
            submitted_at: row.submitted_at,
            is_submitted: row.is_submitted,
            score: row.score,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}
