use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot, watch};
use uuid::Uuid;

use crate::client::backend::ExamBackend;
use crate::error::{Error, Result};
use crate::models::question::{Answer, AnswerMap, QuestionId};

#[derive(Debug, Clone, PartialEq)]
pub enum SaveStatus {
    Idle,
    Saving,
    Saved { at: DateTime<Utc> },
    /// The edits stay pending and ride along with the next save.
    Failed { message: String },
    /// The server refused these answers outright; they were dropped from the
    /// queue so the remaining edits could be stored.
    Rejected {
        question_ids: Vec<QuestionId>,
        message: String,
    },
    /// The server refused further writes; the queue has stopped.
    Closed,
}

enum Command {
    Edit(QuestionId, Answer),
    Flush(oneshot::Sender<()>),
}

/// Serialized save queue. One consumer drains edits in arrival order, so a
/// later edit to the same question always overwrites an earlier one before
/// anything reaches the server.
#[derive(Clone)]
pub struct Autosave {
    tx: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<SaveStatus>,
}

impl Autosave {
    pub fn spawn(backend: Arc<dyn ExamBackend>, course_id: Uuid, exam_id: Uuid) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(SaveStatus::Idle);
        tokio::spawn(run(backend, course_id, exam_id, rx, status_tx));
        Self {
            tx,
            status: status_rx,
        }
    }

    pub fn push(&self, question_id: QuestionId, answer: Answer) -> Result<()> {
        self.tx
            .send(Command::Edit(question_id, answer))
            .map_err(|_| Error::Locked)
    }

    /// Waits until everything pushed so far has been attempted.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Command::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }

    pub fn status(&self) -> SaveStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SaveStatus> {
        self.status.clone()
    }
}

async fn run(
    backend: Arc<dyn ExamBackend>,
    course_id: Uuid,
    exam_id: Uuid,
    mut rx: mpsc::UnboundedReceiver<Command>,
    status: watch::Sender<SaveStatus>,
) {
    let mut pending = AnswerMap::new();

    while let Some(first) = rx.recv().await {
        let mut waiters = Vec::new();
        absorb(first, &mut pending, &mut waiters);
        while let Ok(next) = rx.try_recv() {
            absorb(next, &mut pending, &mut waiters);
        }

        if !pending.is_empty() {
            status.send_replace(SaveStatus::Saving);
            match save_batch(backend.as_ref(), course_id, exam_id, &mut pending).await {
                BatchOutcome::Saved(at) => {
                    status.send_replace(SaveStatus::Saved { at });
                }
                BatchOutcome::Rejected {
                    question_ids,
                    message,
                } => {
                    tracing::warn!(?question_ids, %message, "answers rejected by the server");
                    status.send_replace(SaveStatus::Rejected {
                        question_ids,
                        message,
                    });
                }
                BatchOutcome::Failed(e) => {
                    tracing::warn!(error = %e, pending = pending.len(), "autosave failed");
                    status.send_replace(SaveStatus::Failed {
                        message: e.to_string(),
                    });
                }
                BatchOutcome::Closed => {
                    tracing::info!(%exam_id, "attempt closed, autosave stopped");
                    status.send_replace(SaveStatus::Closed);
                    rx.close();
                    while let Ok(cmd) = rx.try_recv() {
                        absorb(cmd, &mut pending, &mut waiters);
                    }
                    release(waiters);
                    return;
                }
            }
        }

        release(waiters);
    }
}

enum BatchOutcome {
    Saved(DateTime<Utc>),
    Rejected {
        question_ids: Vec<QuestionId>,
        message: String,
    },
    Failed(Error),
    Closed,
}

/// Sends everything pending. Saved and rejected keys leave `pending`; on a
/// transport failure the whole batch stays for the next attempt.
async fn save_batch(
    backend: &dyn ExamBackend,
    course_id: Uuid,
    exam_id: Uuid,
    pending: &mut AnswerMap,
) -> BatchOutcome {
    match backend
        .save_answers(course_id, exam_id, pending.clone())
        .await
    {
        Ok(saved) => {
            tracing::debug!(count = pending.len(), "answers saved");
            pending.clear();
            BatchOutcome::Saved(saved.saved_at)
        }
        Err(Error::ValidationFailed(message)) if pending.len() == 1 => BatchOutcome::Rejected {
            question_ids: std::mem::take(pending).into_keys().collect(),
            message,
        },
        Err(Error::ValidationFailed(message)) => {
            save_each(backend, course_id, exam_id, pending, message).await
        }
        Err(Error::Locked | Error::AlreadySubmitted) => BatchOutcome::Closed,
        Err(e) => BatchOutcome::Failed(e),
    }
}

/// A batch is refused as a whole for one bad key. Retries key by key so the
/// valid answers still land and only the refused ones are dropped.
async fn save_each(
    backend: &dyn ExamBackend,
    course_id: Uuid,
    exam_id: Uuid,
    pending: &mut AnswerMap,
    mut message: String,
) -> BatchOutcome {
    let mut rejected = Vec::new();
    let mut saved_at = None;
    let keys: Vec<QuestionId> = pending.keys().copied().collect();

    for question_id in keys {
        let Some(answer) = pending.get(&question_id).cloned() else {
            continue;
        };
        match backend
            .save_answers(course_id, exam_id, AnswerMap::from([(question_id, answer)]))
            .await
        {
            Ok(saved) => {
                pending.remove(&question_id);
                saved_at = Some(saved.saved_at);
            }
            Err(Error::ValidationFailed(reason)) => {
                pending.remove(&question_id);
                rejected.push(question_id);
                message = reason;
            }
            Err(Error::Locked | Error::AlreadySubmitted) => return BatchOutcome::Closed,
            Err(e) => return BatchOutcome::Failed(e),
        }
    }

    match (rejected.is_empty(), saved_at) {
        (true, Some(at)) => BatchOutcome::Saved(at),
        _ => BatchOutcome::Rejected {
            question_ids: rejected,
            message,
        },
    }
}

fn absorb(cmd: Command, pending: &mut AnswerMap, waiters: &mut Vec<oneshot::Sender<()>>) {
    match cmd {
        Command::Edit(question_id, answer) => {
            pending.insert(question_id, answer);
        }
        Command::Flush(done) => waiters.push(done),
    }
}

fn release(waiters: Vec<oneshot::Sender<()>>) {
    for done in waiters {
        let _ = done.send(());
    }
}
