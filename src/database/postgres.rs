use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::database::store::{AttemptStore, ExamCatalog};
use crate::error::{Error, Result};
use crate::models::attempt::{Attempt, AttemptRow};
use crate::models::exam::Exam;
use crate::models::integrity_event::{FocusLossCause, IntegrityEvent, IntegrityEventRow};
use crate::models::question::{AnswerMap, Question};
use crate::services::grading_service::GradingService;

const ATTEMPT_COLUMNS: &str = "id, learner_id, course_id, exam_id, answers, started_at, \
     submitted_at, is_submitted, score, created_at, updated_at";

#[derive(Clone)]
pub struct PgAttemptStore {
    pool: PgPool,
}

impl PgAttemptStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn get_attempt(&self, attempt_id: Uuid) -> Result<Attempt> {
        let row = sqlx::query_as::<_, AttemptRow>(&format!(
            "SELECT {} FROM attempts WHERE id = $1",
            ATTEMPT_COLUMNS
        ))
        .bind(attempt_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Attempt::from)
            .ok_or_else(|| Error::NotFound(format!("attempt {} not found", attempt_id)))
    }
}

#[async_trait]
impl AttemptStore for PgAttemptStore {
    async fn get_or_create_attempt(
        &self,
        learner_id: Uuid,
        course_id: Uuid,
        exam_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Attempt> {
        let fresh = Attempt::new(learner_id, course_id, exam_id, now);
        sqlx::query(
            r#"
            INSERT INTO attempts (id, learner_id, course_id, exam_id, answers, is_submitted, created_at, updated_at)
            VALUES ($1, $2, $3, $4, '{}'::jsonb, FALSE, $5, $5)
            ON CONFLICT (learner_id, exam_id) DO NOTHING
            "#,
        )
        .bind(fresh.id)
        .bind(learner_id)
        .bind(course_id)
        .bind(exam_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query_as::<_, AttemptRow>(&format!(
            "SELECT {} FROM attempts WHERE learner_id = $1 AND exam_id = $2",
            ATTEMPT_COLUMNS
        ))
        .bind(learner_id)
        .bind(exam_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn find_attempt(&self, learner_id: Uuid, exam_id: Uuid) -> Result<Option<Attempt>> {
        let row = sqlx::query_as::<_, AttemptRow>(&format!(
            "SELECT {} FROM attempts WHERE learner_id = $1 AND exam_id = $2",
            ATTEMPT_COLUMNS
        ))
        .bind(learner_id)
        .bind(exam_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Attempt::from))
    }

    async fn start_timer(&self, attempt_id: Uuid, now: DateTime<Utc>) -> Result<Attempt> {
        let row = sqlx::query_as::<_, AttemptRow>(&format!(
            r#"
            UPDATE attempts
            SET started_at = COALESCE(started_at, $2),
                updated_at = CASE WHEN started_at IS NULL THEN $2 ELSE updated_at END
            WHERE id = $1
            RETURNING {}
            "#,
            ATTEMPT_COLUMNS
        ))
        .bind(attempt_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Attempt::from)
            .ok_or_else(|| Error::NotFound(format!("attempt {} not found", attempt_id)))
    }

    async fn save_answers(
        &self,
        attempt_id: Uuid,
        answers: &AnswerMap,
        now: DateTime<Utc>,
    ) -> Result<Attempt> {
        // jsonb `||` replaces only the keys present on the right-hand side.
        let row = sqlx::query_as::<_, AttemptRow>(&format!(
            r#"
            UPDATE attempts
            SET answers = answers || $2, updated_at = $3
            WHERE id = $1 AND is_submitted = FALSE
            RETURNING {}
            "#,
            ATTEMPT_COLUMNS
        ))
        .bind(attempt_id)
        .bind(Json(answers))
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(row.into()),
            None => {
                // Distinguish a missing attempt from a submitted one.
                self.get_attempt(attempt_id).await?;
                Err(Error::Locked)
            }
        }
    }

    async fn finalize(
        &self,
        attempt_id: Uuid,
        answers: &AnswerMap,
        exam: &Exam,
        now: DateTime<Utc>,
    ) -> Result<Attempt> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, AttemptRow>(&format!(
            "SELECT {} FROM attempts WHERE id = $1 FOR UPDATE",
            ATTEMPT_COLUMNS
        ))
        .bind(attempt_id)
        .fetch_optional(&mut *tx)
        .await?;
        let mut attempt: Attempt = row
            .map(Attempt::from)
            .ok_or_else(|| Error::NotFound(format!("attempt {} not found", attempt_id)))?;

        if attempt.is_submitted {
            return Err(Error::AlreadySubmitted);
        }

        attempt.merge_answers(answers);
        let score = GradingService::score(&exam.questions, &attempt.answers);

        let row = sqlx::query_as::<_, AttemptRow>(&format!(
            r#"
            UPDATE attempts
            SET answers = $2, score = $3, submitted_at = $4, is_submitted = TRUE, updated_at = $4
            WHERE id = $1
            RETURNING {}
            "#,
            ATTEMPT_COLUMNS
        ))
        .bind(attempt_id)
        .bind(Json(&attempt.answers))
        .bind(score)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(row.into())
    }

    async fn delete_attempt(&self, learner_id: Uuid, exam_id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM attempts WHERE learner_id = $1 AND exam_id = $2")
            .bind(learner_id)
            .bind(exam_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!(
                "no attempt for learner {} on exam {}",
                learner_id, exam_id
            )));
        }
        Ok(())
    }

    async fn list_in_progress(&self) -> Result<Vec<Attempt>> {
        let rows = sqlx::query_as::<_, AttemptRow>(&format!(
            "SELECT {} FROM attempts WHERE is_submitted = FALSE AND started_at IS NOT NULL",
            ATTEMPT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Attempt::from).collect())
    }

    async fn list_submitted(&self, exam_id: Uuid) -> Result<Vec<Attempt>> {
        let rows = sqlx::query_as::<_, AttemptRow>(&format!(
            "SELECT {} FROM attempts WHERE exam_id = $1 AND is_submitted = TRUE ORDER BY submitted_at",
            ATTEMPT_COLUMNS
        ))
        .bind(exam_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Attempt::from).collect())
    }

    async fn record_event(
        &self,
        attempt_id: Uuid,
        cause: FocusLossCause,
        now: DateTime<Utc>,
    ) -> Result<IntegrityEvent> {
        let row = sqlx::query_as::<_, IntegrityEventRow>(
            r#"
            INSERT INTO attempt_events (id, attempt_id, cause, occurred_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id, attempt_id, cause, occurred_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(attempt_id)
        .bind(cause.as_str())
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    async fn list_events(&self, attempt_id: Uuid) -> Result<Vec<IntegrityEvent>> {
        let rows = sqlx::query_as::<_, IntegrityEventRow>(
            r#"
            SELECT id, attempt_id, cause, occurred_at
            FROM attempt_events
            WHERE attempt_id = $1
            ORDER BY occurred_at
            "#,
        )
        .bind(attempt_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(IntegrityEvent::try_from).collect()
    }
}

#[derive(Debug, FromRow)]
struct ExamRow {
    id: Uuid,
    course_id: Uuid,
    title: String,
    questions: Json<Vec<Question>>,
    duration_minutes: Option<i32>,
}

#[derive(Clone)]
pub struct PgExamCatalog {
    pool: PgPool,
}

impl PgExamCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExamCatalog for PgExamCatalog {
    async fn get_exam_by_id(&self, course_id: Uuid, exam_id: Uuid) -> Result<Exam> {
        let row = sqlx::query_as::<_, ExamRow>(
            r#"
            SELECT id, course_id, title, questions, duration_minutes
            FROM exams
            WHERE id = $1 AND course_id = $2
            "#,
        )
        .bind(exam_id)
        .bind(course_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("exam {} not found", exam_id)))?;

        Ok(Exam {
            id: row.id,
            course_id: row.course_id,
            title: row.title,
            questions: row.questions.0,
            duration_minutes: row.duration_minutes,
        })
    }
}
