use std::sync::Arc;

use chrono::Duration;
use exam_core::Clock;
use exam_core::model::{AuthoritativeResult, BankItem, ExamSession, Phase, SessionState};
use exam_core::proctor::{Effect, EventQueue, ExamEvent, Step, Termination};
use storage::repository::{ProgressRepository, ResultRepository, StorageError};
use tracing::{debug, info, warn};

use super::host::{DisplayHost, Notice};
use crate::analysis::WeaknessAnalysisService;
use crate::error::SessionError;
use crate::progression::{cache, compat};

/// Runs one exam attempt.
///
/// Signals are queued and judged one at a time by the core state machine; the
/// controller carries out the resulting effects. The only write to the result
/// store happens once, when the session reaches a terminal state.
pub struct ExamSessionController {
    clock: Clock,
    results: Arc<dyn ResultRepository>,
    progress: Arc<dyn ProgressRepository>,
    analysis: Option<Arc<WeaknessAnalysisService>>,
    host: Arc<dyn DisplayHost>,
    session: ExamSession,
    items: Vec<BankItem>,
    queue: EventQueue,
    torn_down: bool,
    graded: Option<AuthoritativeResult>,
    persisted: bool,
}

impl ExamSessionController {
    pub(crate) fn new(
        clock: Clock,
        results: Arc<dyn ResultRepository>,
        progress: Arc<dyn ProgressRepository>,
        analysis: Option<Arc<WeaknessAnalysisService>>,
        host: Arc<dyn DisplayHost>,
        session: ExamSession,
        items: Vec<BankItem>,
    ) -> Self {
        Self {
            clock,
            results,
            progress,
            analysis,
            host,
            session,
            items,
            queue: EventQueue::new(),
            torn_down: false,
            graded: None,
            persisted: false,
        }
    }

    #[must_use]
    pub fn session(&self) -> &ExamSession {
        &self.session
    }

    #[must_use]
    pub fn items(&self) -> &[BankItem] {
        &self.items
    }

    /// The graded result, once the session is terminal.
    #[must_use]
    pub fn result(&self) -> Option<&AuthoritativeResult> {
        self.graded.as_ref()
    }

    #[must_use]
    pub fn is_persisted(&self) -> bool {
        self.persisted
    }

    #[must_use]
    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    #[must_use]
    pub fn pending_events(&self) -> usize {
        self.queue.len()
    }

    /// Time left on the exam clock while `Active`.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.session.remaining(self.clock.now())
    }

    /// Move a fixed clock forward. No effect on the system clock.
    pub fn advance_clock(&mut self, delta: Duration) {
        self.clock.advance(delta);
    }

    /// Queue a signal without processing it.
    pub fn push(&mut self, event: ExamEvent) {
        self.queue.push(event);
    }

    /// Judge every queued signal in arrival order and run the effects.
    ///
    /// Rejected events are reported in their `Step` and leave the session
    /// unchanged.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Persist` when the terminal write fails. The graded
    /// result is kept; call [`Self::retry_persist`].
    pub async fn process(&mut self) -> Result<Vec<Step>, SessionError> {
        let steps = self.queue.drain_into(&mut self.session, self.clock.now());
        let mut failure = None;
        for step in &steps {
            let effects = match &step.outcome {
                Ok(effects) => effects,
                Err(err) => {
                    debug!(attempt = %self.session.attempt_id(), event = ?step.event, error = %err, "event rejected");
                    continue;
                }
            };
            if step.event == ExamEvent::Start {
                self.on_started().await;
            }
            if step.event.is_strike_signal() {
                info!(
                    attempt = %self.session.attempt_id(),
                    strikes = self.session.integrity_strikes(),
                    "integrity strike recorded"
                );
            }
            for effect in effects {
                if let Err(err) = self.run_effect(effect).await {
                    failure.get_or_insert(err);
                }
            }
        }
        match failure {
            Some(err) => Err(err),
            None => Ok(steps),
        }
    }

    /// Queue one event, process the queue and return this event's effects.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Transition` if the event was rejected, or
    /// `SessionError::Persist` if it ended the session and the write failed.
    pub async fn dispatch(&mut self, event: ExamEvent) -> Result<Vec<Effect>, SessionError> {
        self.push(event);
        let mut steps = self.process().await?;
        match steps.pop() {
            Some(step) => step.outcome.map_err(SessionError::from),
            None => Ok(Vec::new()),
        }
    }

    /// Timer tick; completes the session once the deadline has passed.
    ///
    /// # Errors
    ///
    /// See [`Self::dispatch`].
    pub async fn tick(&mut self) -> Result<Vec<Effect>, SessionError> {
        self.dispatch(ExamEvent::ClockTick).await
    }

    /// Retry the terminal write after a `SessionError::Persist`.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotTerminal` before the session has ended, or
    /// `SessionError::Persist` if the write fails again.
    pub async fn retry_persist(&mut self) -> Result<(), SessionError> {
        let termination = self.termination().ok_or(SessionError::NotTerminal)?;
        if self.persisted {
            return Ok(());
        }
        self.persist().await?;
        self.host.notify(Notice::Finished(termination));
        Ok(())
    }

    fn termination(&self) -> Option<Termination> {
        match self.session.state() {
            SessionState::Completed(reason) => Some(Termination::Completed(reason)),
            SessionState::Locked => Some(Termination::Locked),
            SessionState::Welcome | SessionState::Active => None,
        }
    }

    async fn on_started(&self) {
        if let Err(err) = cache::mark_in_progress(
            self.progress.as_ref(),
            self.session.student_id(),
            self.session.phase(),
            self.session.subject(),
        )
        .await
        {
            warn!(attempt = %self.session.attempt_id(), error = %err, "could not mark exam in progress");
        }
    }

    async fn run_effect(&mut self, effect: &Effect) -> Result<(), SessionError> {
        match effect {
            Effect::RequestFullscreen => {
                if let Err(err) = self.host.request_fullscreen() {
                    warn!(attempt = %self.session.attempt_id(), error = %err, "fullscreen denied; continuing");
                }
            }
            Effect::ShowStrikeWarning {
                strike,
                max_strikes,
            } => self.host.notify(Notice::StrikeWarning {
                strike: *strike,
                max_strikes: *max_strikes,
            }),
            Effect::ShowFullscreenPrompt => self.host.notify(Notice::FullscreenPrompt),
            Effect::ShowAnswerAllWarning { unanswered } => {
                self.host.notify(Notice::AnswerAllQuestions {
                    unanswered: *unanswered,
                });
            }
            Effect::Finalize(termination) => self.finalize(*termination).await?,
        }
        Ok(())
    }

    async fn finalize(&mut self, termination: Termination) -> Result<(), SessionError> {
        self.teardown();
        if termination == Termination::Locked {
            warn!(
                attempt = %self.session.attempt_id(),
                strikes = self.session.integrity_strikes(),
                "exam locked"
            );
        }
        if self.graded.is_none() {
            self.graded = Some(AuthoritativeResult::grade(&self.session, &self.items)?);
        }
        self.persist().await?;
        self.host.notify(Notice::Finished(termination));
        Ok(())
    }

    /// Release the display and detach listeners, once.
    fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.host.release_fullscreen();
        self.host.detach_listeners();
        self.torn_down = true;
    }

    async fn persist(&mut self) -> Result<(), SessionError> {
        if self.persisted {
            return Ok(());
        }
        let result = match &self.graded {
            Some(result) => result.clone(),
            None => {
                let result = AuthoritativeResult::grade(&self.session, &self.items)?;
                self.graded = Some(result.clone());
                result
            }
        };

        let group = compat::canonical_group(result.phase);
        match self.results.append_result(group, &result).await {
            Ok(()) => {}
            Err(StorageError::Conflict) => {
                debug!(attempt = %result.id, "result already stored");
            }
            Err(err) => {
                warn!(attempt = %result.id, error = %err, "result write failed");
                self.host.notify(Notice::PersistFailed);
                return Err(SessionError::Persist(err));
            }
        }
        self.persisted = true;
        info!(
            attempt = %result.id,
            student = %result.student_id,
            phase = %result.phase,
            score = result.score,
            "result persisted"
        );

        if let Some(subject) = &result.subject {
            if let Err(err) =
                cache::mark_completed(self.progress.as_ref(), &result.student_id, result.phase, subject)
                    .await
            {
                warn!(attempt = %result.id, error = %err, "could not mark exam completed in cache");
            }
        }

        if result.phase == Phase::First {
            if let Some(analysis) = &self.analysis {
                if let Err(err) = analysis.analyze_result(&result).await {
                    warn!(attempt = %result.id, error = %err, "weakness analysis failed");
                }
            }
        }
        Ok(())
    }
}
