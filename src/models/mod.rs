pub mod attempt;
pub mod exam;
pub mod integrity_event;
pub mod question;
