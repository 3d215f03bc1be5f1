use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::question::{Question, QuestionId};

/// A published exam as served by the course catalog. Read-only to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exam {
    pub id: Uuid,
    pub course_id: Uuid,
    pub title: String,
    pub questions: Vec<Question>,
    /// `None` means untimed.
    pub duration_minutes: Option<i32>,
}

impl Exam {
    pub fn question(&self, id: QuestionId) -> Option<&Question> {
        self.questions.iter().find(|q| q.id == id)
    }

    pub fn is_timed(&self) -> bool {
        self.duration_minutes.is_some()
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(minutes) = self.duration_minutes {
            if minutes <= 0 {
                return Err(Error::ValidationFailed(format!(
                    "exam duration must be positive, got {} minutes",
                    minutes
                )));
            }
        }
        let mut seen = std::collections::HashSet::new();
        for q in &self.questions {
            if !seen.insert(q.id) {
                return Err(Error::ValidationFailed(format!(
                    "duplicate question id {}",
                    q.id
                )));
            }
            q.validate()?;
        }
        Ok(())
    }
}
