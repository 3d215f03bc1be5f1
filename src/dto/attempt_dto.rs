use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::models::attempt::{Attempt, AttemptState};
use crate::models::exam::Exam;
use crate::models::integrity_event::FocusLossCause;
use crate::error::{Error, Result};
use crate::models::question::{check_index, Answer, AnswerMap, Question, QuestionId, QuestionKind};
use crate::services::attempt_service::{AttemptResult, SubmitTrigger};
use crate::services::deadline::Deadline;

/// The learner-visible part of a question kind: options, never answer keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PublicKind {
    SingleSelect { options: Vec<String> },
    MultiSelect { options: Vec<String> },
    ShortText,
    FreeText,
}

impl From<&QuestionKind> for PublicKind {
    fn from(kind: &QuestionKind) -> Self {
        match kind {
            QuestionKind::SingleSelect { options, .. } => PublicKind::SingleSelect {
                options: options.clone(),
            },
            QuestionKind::MultiSelect { options, .. } => PublicKind::MultiSelect {
                options: options.clone(),
            },
            QuestionKind::ShortText { .. } => PublicKind::ShortText,
            QuestionKind::FreeText => PublicKind::FreeText,
        }
    }
}

/// A question as the learner sees it while the attempt is open: no answer key,
/// no rationale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicQuestion {
    pub id: QuestionId,
    pub prompt: String,
    #[serde(flatten)]
    pub kind: PublicKind,
}

impl PublicQuestion {
    /// Same shape and range rules the server applies on save.
    pub fn check_answer(&self, answer: &Answer) -> Result<()> {
        match (&self.kind, answer) {
            (PublicKind::SingleSelect { options }, Answer::Index(idx)) => {
                check_index(self.id, *idx, options.len())
            }
            (PublicKind::MultiSelect { options }, Answer::Indices(set)) => set
                .iter()
                .try_for_each(|idx| check_index(self.id, *idx, options.len())),
            (PublicKind::ShortText | PublicKind::FreeText, Answer::Text(_)) => Ok(()),
            (kind, _) => Err(Error::ValidationFailed(format!(
                "question {} expects {}",
                self.id,
                match kind {
                    PublicKind::SingleSelect { .. } => "a single option index",
                    PublicKind::MultiSelect { .. } => "a list of option indices",
                    PublicKind::ShortText | PublicKind::FreeText => "a text answer",
                }
            ))),
        }
    }
}

impl From<&Question> for PublicQuestion {
    fn from(q: &Question) -> Self {
        Self {
            id: q.id,
            prompt: q.prompt.clone(),
            kind: PublicKind::from(&q.kind),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicExam {
    pub id: Uuid,
    pub course_id: Uuid,
    pub title: String,
    pub duration_minutes: Option<i32>,
    pub questions: Vec<PublicQuestion>,
}

impl From<&Exam> for PublicExam {
    fn from(exam: &Exam) -> Self {
        Self {
            id: exam.id,
            course_id: exam.course_id,
            title: exam.title.clone(),
            duration_minutes: exam.duration_minutes,
            questions: exam.questions.iter().map(PublicQuestion::from).collect(),
        }
    }
}

/// Everything the exam view needs to render or resume an attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptView {
    pub attempt_id: Uuid,
    pub state: AttemptState,
    pub started_at: Option<DateTime<Utc>>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub deadline: Option<DateTime<Utc>>,
    pub answers: AnswerMap,
    pub exam: PublicExam,
}

impl AttemptView {
    pub fn new(attempt: &Attempt, exam: &Exam) -> Self {
        Self {
            attempt_id: attempt.id,
            state: attempt.state(),
            started_at: attempt.started_at,
            submitted_at: attempt.submitted_at,
            deadline: Deadline::for_attempt(attempt.started_at, exam.duration_minutes)
                .map(|d| d.at),
            answers: attempt.answers.clone(),
            exam: PublicExam::from(exam),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SaveAnswersRequest {
    #[validate(custom(function = "not_empty"))]
    pub answers: AnswerMap,
}

fn not_empty(answers: &AnswerMap) -> std::result::Result<(), ValidationError> {
    if answers.is_empty() {
        let mut err = ValidationError::new("empty");
        err.message = Some("at least one answer is required".into());
        return Err(err);
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveAnswersResponse {
    pub saved: bool,
    pub question_ids: Vec<QuestionId>,
    pub saved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    #[serde(default)]
    pub answers: AnswerMap,
    #[serde(default)]
    pub trigger: Option<SubmitTrigger>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub attempt_id: Uuid,
    pub state: AttemptState,
    pub score: i32,
    pub gradable_count: i32,
    pub percentage: u32,
    pub eligible: bool,
    pub submitted_at: DateTime<Utc>,
}

impl From<&AttemptResult> for SubmitResponse {
    fn from(result: &AttemptResult) -> Self {
        Self {
            attempt_id: result.attempt_id,
            state: AttemptState::Submitted,
            score: result.score,
            gradable_count: result.gradable_count,
            percentage: result.certificate.percentage,
            eligible: result.certificate.eligible,
            submitted_at: result.submitted_at,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FocusLossRequest {
    pub cause: FocusLossCause,
}
