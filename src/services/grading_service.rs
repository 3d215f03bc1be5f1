use serde::{Deserialize, Serialize};

use crate::models::question::{Answer, AnswerMap, Outcome, Question, QuestionId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradedQuestion {
    pub question_id: QuestionId,
    pub kind: String,
    pub prompt: String,
    pub answer: Option<Answer>,
    pub correct_answer: Option<Answer>,
    pub outcome: Outcome,
    pub rationale: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeReport {
    pub score: i32,
    /// Free-text questions are excluded.
    pub gradable_count: i32,
    pub questions: Vec<GradedQuestion>,
}

pub struct GradingService;

impl GradingService {
    /// Pure function of the question set and the final answer map; the same
    /// inputs always produce the same report.
    pub fn grade(questions: &[Question], answers: &AnswerMap) -> GradeReport {
        let mut score = 0;
        let mut gradable_count = 0;
        let mut graded = Vec::with_capacity(questions.len());

        for q in questions {
            let answer = answers.get(&q.id);
            let outcome = q.grade(answer);
            if q.is_gradable() {
                gradable_count += 1;
            }
            if outcome == Outcome::Correct {
                score += 1;
            }
            graded.push(GradedQuestion {
                question_id: q.id,
                kind: q.kind.name().to_string(),
                prompt: q.prompt.clone(),
                answer: answer.cloned(),
                correct_answer: q.answer_key(),
                outcome,
                rationale: q.rationale.clone(),
            });
        }

        GradeReport {
            score,
            gradable_count,
            questions: graded,
        }
    }

    pub fn score(questions: &[Question], answers: &AnswerMap) -> i32 {
        questions
            .iter()
            .filter(|q| q.grade(answers.get(&q.id)) == Outcome::Correct)
            .count() as i32
    }
}
