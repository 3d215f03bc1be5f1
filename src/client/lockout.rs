use chrono::{DateTime, Utc};

use crate::models::integrity_event::FocusLossCause;

/// Raw signals from the exam view. Visibility and window focus arrive from
/// separate sources but feed the same reducer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusEvent {
    Hidden,
    Visible,
    Blur,
    Focus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Unlocked,
    Locked {
        cause: FocusLossCause,
        since: DateTime<Utc>,
    },
}

/// Once locked, regaining focus does nothing. Only [`Lockout::release`] unlocks.
pub fn reduce(state: LockState, event: FocusEvent, now: DateTime<Utc>) -> LockState {
    match (state, event) {
        (LockState::Unlocked, FocusEvent::Hidden) => LockState::Locked {
            cause: FocusLossCause::Hidden,
            since: now,
        },
        (LockState::Unlocked, FocusEvent::Blur) => LockState::Locked {
            cause: FocusLossCause::Blur,
            since: now,
        },
        (state, _) => state,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Lockout {
    state: LockState,
}

impl Default for Lockout {
    fn default() -> Self {
        Self::new()
    }
}

impl Lockout {
    pub fn new() -> Self {
        Self {
            state: LockState::Unlocked,
        }
    }

    pub fn state(&self) -> LockState {
        self.state
    }

    pub fn is_locked(&self) -> bool {
        matches!(self.state, LockState::Locked { .. })
    }

    /// Applies one event. Returns the cause only on the transition into the
    /// locked state, so the caller reports each lockout once.
    pub fn apply(&mut self, event: FocusEvent, now: DateTime<Utc>) -> Option<FocusLossCause> {
        let was_locked = self.is_locked();
        self.state = reduce(self.state, event, now);
        match self.state {
            LockState::Locked { cause, .. } if !was_locked => Some(cause),
            _ => None,
        }
    }

    /// Out-of-band unlock by a proctor.
    pub fn release(&mut self) -> bool {
        let was_locked = self.is_locked();
        self.state = LockState::Unlocked;
        was_locked
    }
}
