use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::Error;

/// What made the exam view lose the learner's attention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FocusLossCause {
    Hidden,
    Blur,
}

impl FocusLossCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            FocusLossCause::Hidden => "hidden",
            FocusLossCause::Blur => "blur",
        }
    }
}

impl FromStr for FocusLossCause {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hidden" => Ok(FocusLossCause::Hidden),
            "blur" => Ok(FocusLossCause::Blur),
            other => Err(Error::Internal(format!("unknown focus-loss cause '{}'", other))),
        }
    }
}

/// Evidence of a lockout, appended while an attempt is in progress. Never
/// changes the attempt itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityEvent {
    pub id: Uuid,
    pub attempt_id: Uuid,
    pub cause: FocusLossCause,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
pub struct IntegrityEventRow {
    pub id: Uuid,
    pub attempt_id: Uuid,
    pub cause: String,
    pub occurred_at: DateTime<Utc>,
}

impl TryFrom<IntegrityEventRow> for IntegrityEvent {
    type Error = Error;

    fn try_from(row: IntegrityEventRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            attempt_id: row.attempt_id,
            cause: row.cause.parse()?,
            occurred_at: row.occurred_at,
        })
    }
}
