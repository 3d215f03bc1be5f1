//! The exam view's side of the engine: local answer state, autosave, the
//! display countdown with forced submission, and the focus-loss lockout.
//! Everything here talks to the server through [`backend::ExamBackend`].

pub mod autosave;
pub mod backend;
pub mod countdown;
pub mod http;
pub mod lockout;
pub mod session;
