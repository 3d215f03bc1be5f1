use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use uuid::Uuid;

use crate::client::backend::ExamBackend;
use crate::dto::attempt_dto::{
    AttemptView, FocusLossRequest, SaveAnswersRequest, SaveAnswersResponse, SubmitRequest,
    SubmitResponse,
};
use crate::error::{Error, Result};
use crate::models::integrity_event::FocusLossCause;
use crate::models::question::AnswerMap;
use crate::services::attempt_service::{AttemptResult, SubmitTrigger};

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
    #[serde(default)]
    message: Option<String>,
}

/// `ExamBackend` over the learner HTTP API.
#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
    token: String,
}

impl HttpBackend {
    pub fn new(client: Client, base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn request(&self, method: Method, course_id: Uuid, exam_id: Uuid, suffix: &str) -> RequestBuilder {
        let url = format!(
            "{}/api/courses/{}/exams/{}/attempt{}",
            self.base_url, course_id, exam_id, suffix
        );
        self.client.request(method, url).bearer_auth(&self.token)
    }

    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T> {
        let resp = check(req.send().await?).await?;
        Ok(resp.json::<T>().await?)
    }
}

/// Maps an error response back onto the same `Error` variant the server raised,
/// so a retried request fails identically on both sides of the wire.
async fn check(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let err = match serde_json::from_str::<ErrorBody>(&body) {
        Ok(parsed) => {
            let message = parsed.message.unwrap_or_else(|| parsed.error.clone());
            match Error::from_code(&parsed.error, message) {
                Error::Internal(message) => from_status(status, message),
                mapped => mapped,
            }
        }
        Err(_) => from_status(status, body),
    };
    Err(err)
}

fn from_status(status: StatusCode, message: String) -> Error {
    match status {
        StatusCode::UNAUTHORIZED => Error::Unauthorized(message),
        StatusCode::FORBIDDEN => Error::Forbidden(message),
        StatusCode::NOT_FOUND => Error::NotFound(message),
        StatusCode::CONFLICT => Error::AlreadySubmitted,
        StatusCode::LOCKED => Error::Locked,
        StatusCode::UNPROCESSABLE_ENTITY | StatusCode::BAD_REQUEST => {
            Error::ValidationFailed(message)
        }
        _ => Error::Internal(format!("server returned {}: {}", status, message)),
    }
}

#[async_trait]
impl ExamBackend for HttpBackend {
    async fn open_attempt(&self, course_id: Uuid, exam_id: Uuid) -> Result<AttemptView> {
        self.send(self.request(Method::POST, course_id, exam_id, ""))
            .await
    }

    async fn save_answers(
        &self,
        course_id: Uuid,
        exam_id: Uuid,
        answers: AnswerMap,
    ) -> Result<SaveAnswersResponse> {
        let req = self
            .request(Method::PATCH, course_id, exam_id, "/answers")
            .json(&SaveAnswersRequest { answers });
        self.send(req).await
    }

    async fn submit(
        &self,
        course_id: Uuid,
        exam_id: Uuid,
        answers: AnswerMap,
        trigger: SubmitTrigger,
    ) -> Result<SubmitResponse> {
        let req = self
            .request(Method::POST, course_id, exam_id, "/submit")
            .json(&SubmitRequest {
                answers,
                trigger: Some(trigger),
            });
        self.send(req).await
    }

    async fn result(&self, course_id: Uuid, exam_id: Uuid) -> Result<AttemptResult> {
        self.send(self.request(Method::GET, course_id, exam_id, "/result"))
            .await
    }

    async fn report_focus_loss(
        &self,
        course_id: Uuid,
        exam_id: Uuid,
        cause: FocusLossCause,
    ) -> Result<()> {
        let req = self
            .request(Method::POST, course_id, exam_id, "/focus-loss")
            .json(&FocusLossRequest { cause });
        check(req.send().await?).await?;
        Ok(())
    }
}
