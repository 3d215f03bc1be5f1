use async_trait::async_trait;
use uuid::Uuid;

use crate::dto::attempt_dto::{AttemptView, SaveAnswersResponse, SubmitResponse};
use crate::error::Result;
use crate::models::integrity_event::FocusLossCause;
use crate::models::question::AnswerMap;
use crate::services::attempt_service::{AttemptResult, AttemptService, SubmitTrigger};

/// The learner-scoped operations an exam view needs from the server.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExamBackend: Send + Sync {
    async fn open_attempt(&self, course_id: Uuid, exam_id: Uuid) -> Result<AttemptView>;

    async fn save_answers(
        &self,
        course_id: Uuid,
        exam_id: Uuid,
        answers: AnswerMap,
    ) -> Result<SaveAnswersResponse>;

    async fn submit(
        &self,
        course_id: Uuid,
        exam_id: Uuid,
        answers: AnswerMap,
        trigger: SubmitTrigger,
    ) -> Result<SubmitResponse>;

    async fn result(&self, course_id: Uuid, exam_id: Uuid) -> Result<AttemptResult>;

    async fn report_focus_loss(
        &self,
        course_id: Uuid,
        exam_id: Uuid,
        cause: FocusLossCause,
    ) -> Result<()>;
}

/// Calls the service in-process on behalf of one learner.
#[derive(Clone)]
pub struct LocalBackend {
    service: AttemptService,
    learner_id: Uuid,
}

impl LocalBackend {
    pub fn new(service: AttemptService, learner_id: Uuid) -> Self {
        Self {
            service,
            learner_id,
        }
    }
}

#[async_trait]
impl ExamBackend for LocalBackend {
    async fn open_attempt(&self, course_id: Uuid, exam_id: Uuid) -> Result<AttemptView> {
        let (attempt, exam) = self
            .service
            .open_attempt(self.learner_id, course_id, exam_id)
            .await?;
        Ok(AttemptView::new(&attempt, &exam))
    }

    async fn save_answers(
        &self,
        course_id: Uuid,
        exam_id: Uuid,
        answers: AnswerMap,
    ) -> Result<SaveAnswersResponse> {
        let saved = self
            .service
            .save_answers(self.learner_id, course_id, exam_id, &answers)
            .await?;
        Ok(SaveAnswersResponse {
            saved: true,
            question_ids: answers.keys().copied().collect(),
            saved_at: saved.updated_at,
        })
    }

    async fn submit(
        &self,
        course_id: Uuid,
        exam_id: Uuid,
        answers: AnswerMap,
        trigger: SubmitTrigger,
    ) -> Result<SubmitResponse> {
        self.service
            .submit(self.learner_id, course_id, exam_id, &answers, trigger)
            .await?;
        let result = self.result(course_id, exam_id).await?;
        Ok(SubmitResponse::from(&result))
    }

    async fn result(&self, course_id: Uuid, exam_id: Uuid) -> Result<AttemptResult> {
        self.service.result(self.learner_id, course_id, exam_id).await
    }

    async fn report_focus_loss(
        &self,
        course_id: Uuid,
        exam_id: Uuid,
        cause: FocusLossCause,
    ) -> Result<()> {
        self.service
            .record_focus_loss(self.learner_id, course_id, exam_id, cause)
            .await?;
        Ok(())
    }
}
