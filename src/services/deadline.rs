use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// The single authoritative expiry instant of a timed attempt, derived from
/// the persisted start time and the exam's duration. Every remaining-time
/// computation reads from this, never from an accumulated counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deadline {
    pub at: DateTime<Utc>,
}

impl Deadline {
    /// `None` for untimed exams or attempts whose timer never started.
    pub fn for_attempt(
        started_at: Option<DateTime<Utc>>,
        duration_minutes: Option<i32>,
    ) -> Option<Self> {
        let started_at = started_at?;
        let minutes = duration_minutes?;
        Some(Self {
            at: started_at + Duration::minutes(i64::from(minutes)),
        })
    }

    /// Signed: negative once the deadline has passed.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        self.at - now
    }

    /// Clamped at zero, for display.
    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> i64 {
        self.remaining(now).num_seconds().max(0)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.remaining(now) <= Duration::zero()
    }

    /// Past the deadline by more than `grace`; late payloads are no longer trusted.
    pub fn is_closed(&self, now: DateTime<Utc>, grace: Duration) -> bool {
        now > self.at + grace
    }
}
