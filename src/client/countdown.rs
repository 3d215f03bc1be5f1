use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::services::deadline::Deadline;
use crate::utils::time;

/// Trips at most once, however many callers race on it.
#[derive(Debug, Default)]
pub struct Latch(AtomicBool);

impl Latch {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` for the first caller only.
    pub fn trip(&self) -> bool {
        !self.0.swap(true, Ordering::AcqRel)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::Release);
    }

    pub fn is_tripped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Display countdown. Each tick recomputes from the deadline, so a suspended
/// or throttled task never drifts; it just catches up on the next tick.
pub struct Countdown {
    remaining: watch::Receiver<i64>,
    expired: Arc<Latch>,
    task: JoinHandle<()>,
}

impl Countdown {
    pub fn spawn<F, Fut>(deadline: Deadline, period: Duration, on_expire: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = watch::channel(deadline.remaining_seconds(time::now()));
        let expired = Arc::new(Latch::new());
        let latch = expired.clone();

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut on_expire = Some(on_expire);
            loop {
                interval.tick().await;
                let now = time::now();
                tx.send_replace(deadline.remaining_seconds(now));
                if deadline.is_expired(now) {
                    if let Some(callback) = on_expire.take().filter(|_| latch.trip()) {
                        tracing::info!(deadline = %deadline.at, "deadline reached, forcing submission");
                        callback().await;
                    }
                    break;
                }
            }
        });

        Self {
            remaining: rx,
            expired,
            task,
        }
    }

    pub fn remaining_seconds(&self) -> i64 {
        *self.remaining.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<i64> {
        self.remaining.clone()
    }

    pub fn has_expired(&self) -> bool {
        self.expired.is_tripped()
    }
}

impl Drop for Countdown {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn latch_trips_once() {
        let latch = Latch::new();
        assert!(latch.trip());
        assert!(!latch.trip());
        latch.reset();
        assert!(latch.trip());
    }

    #[tokio::test]
    async fn expired_deadline_fires_once_and_shows_zero() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let deadline = Deadline {
            at: time::now() - chrono::Duration::seconds(1),
        };

        let countdown = Countdown::spawn(deadline, Duration::from_millis(10), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let mut remaining = countdown.subscribe();
        remaining.changed().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(countdown.remaining_seconds(), 0);
        assert!(countdown.has_expired());
    }

    #[tokio::test]
    async fn future_deadline_counts_down_without_firing() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let deadline = Deadline {
            at: time::now() + chrono::Duration::minutes(60),
        };

        let countdown = Countdown::spawn(deadline, Duration::from_millis(10), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(40)).await;

        let secs = countdown.remaining_seconds();
        assert!(secs > 3590 && secs <= 3600, "remaining {}", secs);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(!countdown.has_expired());
    }
}
