use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub type QuestionId = i32;

/// Recorded answers keyed by question id.
pub type AnswerMap = BTreeMap<QuestionId, Answer>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: QuestionId,
    pub prompt: String,
    #[serde(flatten)]
    pub kind: QuestionKind,
    /// Shown to the learner only once the attempt is submitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}

/// Each kind carries exactly the answer key its grading rule needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QuestionKind {
    SingleSelect {
        options: Vec<String>,
        correct: usize,
    },
    MultiSelect {
        options: Vec<String>,
        correct: BTreeSet<usize>,
    },
    ShortText {
        answer: String,
    },
    FreeText,
}

/// A learner's answer as stored in the attempt. Shapes are distinguished
/// structurally: a number, an array of numbers, or a string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Answer {
    Index(usize),
    Indices(BTreeSet<usize>),
    Text(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Correct,
    Incorrect,
    /// Free-text: never auto-graded.
    Ungraded,
}

impl Question {
    pub fn is_gradable(&self) -> bool {
        !matches!(self.kind, QuestionKind::FreeText)
    }

    pub fn options(&self) -> Option<&[String]> {
        match &self.kind {
            QuestionKind::SingleSelect { options, .. }
            | QuestionKind::MultiSelect { options, .. } => Some(options),
            QuestionKind::ShortText { .. } | QuestionKind::FreeText => None,
        }
    }

    /// Grades a possibly-missing answer. A missing or mis-shaped answer is
    /// incorrect for every gradable kind.
    pub fn grade(&self, answer: Option<&Answer>) -> Outcome {
        let correct = match (&self.kind, answer) {
            (QuestionKind::FreeText, _) => return Outcome::Ungraded,
            (QuestionKind::SingleSelect { correct, .. }, Some(Answer::Index(given))) => {
                given == correct
            }
            (QuestionKind::MultiSelect { correct, .. }, Some(Answer::Indices(given))) => {
                given == correct
            }
            (QuestionKind::ShortText { answer: key }, Some(Answer::Text(given))) => {
                normalize(given) == normalize(key)
            }
            _ => false,
        };
        if correct {
            Outcome::Correct
        } else {
            Outcome::Incorrect
        }
    }

    /// Checks that `answer` has the shape this question accepts and that any
    /// option index exists.
    pub fn check_answer(&self, answer: &Answer) -> Result<()> {
        match (&self.kind, answer) {
            (QuestionKind::SingleSelect { options, .. }, Answer::Index(idx)) => {
                check_index(self.id, *idx, options.len())
            }
            (QuestionKind::MultiSelect { options, .. }, Answer::Indices(set)) => set
                .iter()
                .try_for_each(|idx| check_index(self.id, *idx, options.len())),
            (QuestionKind::ShortText { .. } | QuestionKind::FreeText, Answer::Text(_)) => Ok(()),
            (kind, _) => Err(Error::ValidationFailed(format!(
                "question {} expects {}",
                self.id,
                kind.expected_shape()
            ))),
        }
    }

    /// Authoring-time invariants: select questions need at least two options
    /// and a non-empty correct set drawn from valid indices.
    pub fn validate(&self) -> Result<()> {
        if self.prompt.trim().is_empty() {
            return Err(Error::ValidationFailed(format!(
                "question {} has an empty prompt",
                self.id
            )));
        }
        match &self.kind {
            QuestionKind::SingleSelect { options, correct } => {
                check_option_count(self.id, options.len())?;
                check_index(self.id, *correct, options.len())
            }
            QuestionKind::MultiSelect { options, correct } => {
                check_option_count(self.id, options.len())?;
                if correct.is_empty() {
                    return Err(Error::ValidationFailed(format!(
                        "question {} has no correct option",
                        self.id
                    )));
                }
                correct
                    .iter()
                    .try_for_each(|idx| check_index(self.id, *idx, options.len()))
            }
            QuestionKind::ShortText { answer } if answer.trim().is_empty() => {
                Err(Error::ValidationFailed(format!(
                    "question {} has an empty answer key",
                    self.id
                )))
            }
            QuestionKind::ShortText { .. } | QuestionKind::FreeText => Ok(()),
        }
    }

    /// Removes an option and shifts every correct index above it down by one.
    /// Refuses to remove the last correct option, or to go below two options.
    pub fn remove_option(&mut self, index: usize) -> Result<()> {
        let id = self.id;
        match &mut self.kind {
            QuestionKind::SingleSelect { options, correct } => {
                check_index(id, index, options.len())?;
                check_option_count(id, options.len() - 1)?;
                if *correct == index {
                    return Err(Error::ValidationFailed(format!(
                        "option {} is the correct answer of question {}; pick another first",
                        index, id
                    )));
                }
                options.remove(index);
                if *correct > index {
                    *correct -= 1;
                }
                Ok(())
            }
            QuestionKind::MultiSelect { options, correct } => {
                check_index(id, index, options.len())?;
                check_option_count(id, options.len() - 1)?;
                if correct.len() == 1 && correct.contains(&index) {
                    return Err(Error::ValidationFailed(format!(
                        "option {} is the only correct answer of question {}",
                        index, id
                    )));
                }
                options.remove(index);
                *correct = correct
                    .iter()
                    .filter(|&&c| c != index)
                    .map(|&c| if c > index { c - 1 } else { c })
                    .collect();
                Ok(())
            }
            QuestionKind::ShortText { .. } | QuestionKind::FreeText => Err(
                Error::ValidationFailed(format!("question {} has no options", id)),
            ),
        }
    }

    /// The answer key rendered in the same shape as a learner answer.
    pub fn answer_key(&self) -> Option<Answer> {
        match &self.kind {
            QuestionKind::SingleSelect { correct, .. } => Some(Answer::Index(*correct)),
            QuestionKind::MultiSelect { correct, .. } => Some(Answer::Indices(correct.clone())),
            QuestionKind::ShortText { answer } => Some(Answer::Text(answer.clone())),
            QuestionKind::FreeText => None,
        }
    }
}

impl QuestionKind {
    pub fn name(&self) -> &'static str {
        match self {
            QuestionKind::SingleSelect { .. } => "single_select",
            QuestionKind::MultiSelect { .. } => "multi_select",
            QuestionKind::ShortText { .. } => "short_text",
            QuestionKind::FreeText => "free_text",
        }
    }

    fn expected_shape(&self) -> &'static str {
        match self {
            QuestionKind::SingleSelect { .. } => "a single option index",
            QuestionKind::MultiSelect { .. } => "a list of option indices",
            QuestionKind::ShortText { .. } | QuestionKind::FreeText => "a text answer",
        }
    }
}

fn normalize(s: &str) -> String {
    s.trim().to_lowercase()
}

pub(crate) fn check_index(question_id: QuestionId, index: usize, len: usize) -> Result<()> {
    if index < len {
        Ok(())
    } else {
        Err(Error::ValidationFailed(format!(
            "option index {} out of range for question {} ({} options)",
            index, question_id, len
        )))
    }
}

fn check_option_count(question_id: QuestionId, len: usize) -> Result<()> {
    if len >= 2 {
        Ok(())
    } else {
        Err(Error::ValidationFailed(format!(
            "question {} needs at least two options",
            question_id
        )))
    }
}
