//! Proctoring state machine for a single exam attempt.
//!
//! `Welcome → Active → {Completed | Locked}`. Every browser signal (visibility,
//! blur, full-screen change, timer tick) and every student action is an
//! [`ExamEvent`]; [`ExamSession::apply`] is the only function that changes
//! session state. Events are fed one at a time through an [`EventQueue`], so
//! the order signals arrive in is the order they are judged in.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use thiserror::Error;

use crate::model::{
    CompletionReason, ExamSession, ItemCode, OptionId, SessionState,
};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ExamSessionError {
    #[error("exam has not started")]
    NotStarted,

    #[error("exam already started")]
    AlreadyStarted,

    #[error("exam already finished")]
    Finished,

    #[error("question {0} is not part of this exam")]
    UnknownQuestion(String),

    #[error("option {option} does not belong to question {question}")]
    UnknownOption { question: String, option: String },

    #[error("a warning is waiting for the student's choice")]
    PromptPending,

    #[error("no warning is waiting for a choice")]
    NoPromptPending,
}

//
// ─── EVENTS & EFFECTS ──────────────────────────────────────────────────────────
//

/// Choice offered after an integrity strike below the lock threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrikeChoice {
    Continue,
    EndNow,
}

/// Choice offered after leaving exclusive full-screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FullscreenChoice {
    ReturnToFullscreen,
    ExitAndFinish,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExamEvent {
    Start,
    ClockTick,
    VisibilityLost,
    WindowBlur,
    FullscreenExited,
    SelectOption { question: ItemCode, option: OptionId },
    SubmitRequested,
    Strike(StrikeChoice),
    Fullscreen(FullscreenChoice),
}

impl ExamEvent {
    /// Whether this event is an integrity signal counted as a strike.
    #[must_use]
    pub fn is_strike_signal(&self) -> bool {
        matches!(self, ExamEvent::VisibilityLost | ExamEvent::WindowBlur)
    }
}

/// How a session left `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Completed(CompletionReason),
    Locked,
}

/// Side effect the host must carry out after a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    RequestFullscreen,
    ShowStrikeWarning { strike: u8, max_strikes: u8 },
    ShowFullscreenPrompt,
    ShowAnswerAllWarning { unanswered: usize },
    /// Release full-screen, detach listeners and persist. Emitted exactly once.
    Finalize(Termination),
}

//
// ─── TRANSITIONS ───────────────────────────────────────────────────────────────
//

impl ExamSession {
    /// Apply one event at `now` and return the effects the host must run.
    ///
    /// While `Active`, an elapsed deadline is checked before the event itself:
    /// once time is up the event is dropped and the session completes with
    /// `time_expired = true`.
    ///
    /// # Errors
    ///
    /// Returns `ExamSessionError` when the event is not valid in the current
    /// state. The session is left unchanged in that case.
    pub fn apply(
        &mut self,
        event: ExamEvent,
        now: DateTime<Utc>,
    ) -> Result<Vec<Effect>, ExamSessionError> {
        match self.state {
            SessionState::Welcome => self.apply_welcome(event, now),
            SessionState::Active => {
                if self.deadline().is_some_and(|deadline| now >= deadline) {
                    return Ok(self.terminate(CompletionReason::TimeExpired, now));
                }
                self.apply_active(event, now)
            }
            SessionState::Completed(_) | SessionState::Locked => match event {
                ExamEvent::ClockTick
                | ExamEvent::VisibilityLost
                | ExamEvent::WindowBlur
                | ExamEvent::FullscreenExited => Ok(Vec::new()),
                _ => Err(ExamSessionError::Finished),
            },
        }
    }

    fn apply_welcome(
        &mut self,
        event: ExamEvent,
        now: DateTime<Utc>,
    ) -> Result<Vec<Effect>, ExamSessionError> {
        match event {
            ExamEvent::Start => {
                self.state = SessionState::Active;
                self.started_at = Some(now);
                Ok(vec![Effect::RequestFullscreen])
            }
            // Nothing is listening before the clock starts.
            ExamEvent::ClockTick
            | ExamEvent::VisibilityLost
            | ExamEvent::WindowBlur
            | ExamEvent::FullscreenExited => Ok(Vec::new()),
            _ => Err(ExamSessionError::NotStarted),
        }
    }

    fn apply_active(
        &mut self,
        event: ExamEvent,
        now: DateTime<Utc>,
    ) -> Result<Vec<Effect>, ExamSessionError> {
        match event {
            ExamEvent::Start => Err(ExamSessionError::AlreadyStarted),
            ExamEvent::ClockTick => Ok(Vec::new()),
            ExamEvent::VisibilityLost | ExamEvent::WindowBlur => Ok(self.record_strike(now)),
            ExamEvent::FullscreenExited => {
                self.fullscreen_exits = self.fullscreen_exits.saturating_add(1);
                self.pending.fullscreen = true;
                Ok(vec![Effect::ShowFullscreenPrompt])
            }
            ExamEvent::SelectOption { question, option } => {
                if self.pending.any() {
                    return Err(ExamSessionError::PromptPending);
                }
                let q = self
                    .questions
                    .iter()
                    .find(|q| q.code == question)
                    .ok_or_else(|| ExamSessionError::UnknownQuestion(question.to_string()))?;
                if !q.options.contains(&option) {
                    return Err(ExamSessionError::UnknownOption {
                        question: question.to_string(),
                        option: option.to_string(),
                    });
                }
                self.answers.insert(question, option);
                Ok(Vec::new())
            }
            ExamEvent::SubmitRequested => {
                if self.pending.any() {
                    return Err(ExamSessionError::PromptPending);
                }
                let unanswered = self.unanswered();
                if unanswered > 0 {
                    return Ok(vec![Effect::ShowAnswerAllWarning { unanswered }]);
                }
                Ok(self.terminate(CompletionReason::Submitted, now))
            }
            ExamEvent::Strike(choice) => {
                if self.pending.strike.take().is_none() {
                    return Err(ExamSessionError::NoPromptPending);
                }
                match choice {
                    StrikeChoice::Continue => Ok(Vec::new()),
                    StrikeChoice::EndNow => {
                        Ok(self.terminate(CompletionReason::EndedAfterWarning, now))
                    }
                }
            }
            ExamEvent::Fullscreen(choice) => {
                if !self.pending.fullscreen {
                    return Err(ExamSessionError::NoPromptPending);
                }
                self.pending.fullscreen = false;
                match choice {
                    FullscreenChoice::ReturnToFullscreen => Ok(vec![Effect::RequestFullscreen]),
                    FullscreenChoice::ExitAndFinish => {
                        Ok(self.terminate(CompletionReason::ExitedFullscreen, now))
                    }
                }
            }
        }
    }

    fn record_strike(&mut self, now: DateTime<Utc>) -> Vec<Effect> {
        self.integrity_strikes = self.integrity_strikes.saturating_add(1);
        if self.integrity_strikes >= self.policy.max_strikes {
            self.state = SessionState::Locked;
            self.locked = true;
            self.ended_at = Some(now);
            self.pending = Default::default();
            return vec![Effect::Finalize(Termination::Locked)];
        }
        self.pending.strike = Some(self.integrity_strikes);
        vec![Effect::ShowStrikeWarning {
            strike: self.integrity_strikes,
            max_strikes: self.policy.max_strikes,
        }]
    }

    fn terminate(&mut self, reason: CompletionReason, now: DateTime<Utc>) -> Vec<Effect> {
        self.state = SessionState::Completed(reason);
        self.ended_at = Some(now);
        self.time_expired = reason == CompletionReason::TimeExpired;
        self.pending = Default::default();
        vec![Effect::Finalize(Termination::Completed(reason))]
    }
}

//
// ─── EVENT QUEUE ───────────────────────────────────────────────────────────────
//

/// Outcome of processing one queued event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub event: ExamEvent,
    pub outcome: Result<Vec<Effect>, ExamSessionError>,
}

/// FIFO of pending events for one session.
#[derive(Debug, Clone, Default)]
pub struct EventQueue {
    events: VecDeque<ExamEvent>,
}

impl EventQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: ExamEvent) {
        self.events.push_back(event);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Apply every queued event in arrival order.
    pub fn drain_into(&mut self, session: &mut ExamSession, now: DateTime<Utc>) -> Vec<Step> {
        let mut steps = Vec::with_capacity(self.events.len());
        while let Some(event) = self.events.pop_front() {
            let outcome = session.apply(event.clone(), now);
            steps.push(Step { event, outcome });
        }
        steps
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
