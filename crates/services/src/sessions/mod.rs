//! Exam session runtime: drives the proctoring state machine and carries out
//! its side effects.

mod controller;
mod host;
mod service;

pub use crate::error::SessionError;
pub use controller::ExamSessionController;
pub use host::{DisplayError, DisplayHost, HeadlessHost, Notice};
pub use service::ExamSessionService;
