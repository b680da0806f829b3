use exam_core::proctor::Termination;
use thiserror::Error;

/// The display environment refused or failed a request.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("display request failed: {0}")]
pub struct DisplayError(pub String);

/// Something the student has to be shown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    StrikeWarning { strike: u8, max_strikes: u8 },
    FullscreenPrompt,
    AnswerAllQuestions { unanswered: usize },
    Finished(Termination),
    /// The submission could not be stored; the student should not close the exam.
    PersistFailed,
}

/// Browser-side capabilities a session needs. All of them are best effort.
pub trait DisplayHost: Send + Sync {
    /// Enter exclusive full-screen.
    ///
    /// # Errors
    ///
    /// Returns `DisplayError` when the environment denies the request.
    fn request_fullscreen(&self) -> Result<(), DisplayError>;

    fn release_fullscreen(&self);

    /// Stop delivering visibility, blur and full-screen signals.
    fn detach_listeners(&self);

    fn notify(&self, notice: Notice);
}

/// Host with no display: full-screen is always refused and notices are dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeadlessHost;

impl DisplayHost for HeadlessHost {
    fn request_fullscreen(&self) -> Result<(), DisplayError> {
        Err(DisplayError("no display attached".into()))
    }

    fn release_fullscreen(&self) {}

    fn detach_listeners(&self) {}

    fn notify(&self, _notice: Notice) {}
}
