use chrono::{DateTime, Utc};

/// Server clock. Every persisted timestamp comes from here, never from a client.
pub fn now() -> DateTime<Utc> {
    Utc::now()
}
