pub mod attempt_service;
pub mod certificate_service;
pub mod deadline;
pub mod grading_service;
