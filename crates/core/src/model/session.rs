use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::model::bank_item::BankItem;
use crate::model::catalog::Subject;
use crate::model::ids::{AttemptId, OptionId, StudentId};
use crate::model::item_code::ItemCode;
use crate::model::phase::Phase;

/// Why an exam reached `Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionReason {
    /// Manual submit with every question answered.
    Submitted,
    /// The countdown reached zero.
    TimeExpired,
    /// The student chose "end now" on an integrity warning.
    EndedAfterWarning,
    /// The student chose "exit and finish" after leaving full-screen.
    ExitedFullscreen,
}

/// Lifecycle of one exam attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum SessionState {
    Welcome,
    Active,
    Completed(CompletionReason),
    Locked,
}

impl SessionState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Completed(_) | SessionState::Locked)
    }
}

/// Timing and escalation limits applied to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProctorPolicy {
    pub max_strikes: u8,
    pub duration: Duration,
}

impl Default for ProctorPolicy {
    fn default() -> Self {
        Self {
            max_strikes: 3,
            duration: Duration::minutes(60),
        }
    }
}

/// Question as the session sees it: its code and the option ids it accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionQuestion {
    pub code: ItemCode,
    pub options: Vec<OptionId>,
}

impl SessionQuestion {
    #[must_use]
    pub fn from_item(item: &BankItem) -> Self {
        Self {
            code: item.code.clone(),
            options: item.options.iter().map(|o| o.id.clone()).collect(),
        }
    }
}

/// Modal prompts currently waiting for an explicit choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PendingPrompts {
    pub strike: Option<u8>,
    pub fullscreen: bool,
}

impl PendingPrompts {
    #[must_use]
    pub fn any(&self) -> bool {
        self.strike.is_some() || self.fullscreen
    }
}

/// One in-progress or finished exam attempt.
///
/// Lives only in memory until it reaches a terminal state; see `crate::proctor`
/// for the transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExamSession {
    pub(crate) attempt_id: AttemptId,
    pub(crate) student_id: StudentId,
    pub(crate) subject: Subject,
    pub(crate) phase: Phase,
    pub(crate) questions: Vec<SessionQuestion>,
    pub(crate) answers: BTreeMap<ItemCode, OptionId>,
    pub(crate) integrity_strikes: u8,
    pub(crate) fullscreen_exits: u32,
    pub(crate) state: SessionState,
    pub(crate) started_at: Option<DateTime<Utc>>,
    pub(crate) ended_at: Option<DateTime<Utc>>,
    pub(crate) time_expired: bool,
    pub(crate) locked: bool,
    pub(crate) policy: ProctorPolicy,
    pub(crate) pending: PendingPrompts,
}

impl ExamSession {
    /// Build a session in the `Welcome` state for the given items, keeping their order.
    #[must_use]
    pub fn new(
        attempt_id: AttemptId,
        student_id: StudentId,
        subject: Subject,
        phase: Phase,
        items: &[BankItem],
        policy: ProctorPolicy,
    ) -> Self {
        Self {
            attempt_id,
            student_id,
            subject,
            phase,
            questions: items.iter().map(SessionQuestion::from_item).collect(),
            answers: BTreeMap::new(),
            integrity_strikes: 0,
            fullscreen_exits: 0,
            state: SessionState::Welcome,
            started_at: None,
            ended_at: None,
            time_expired: false,
            locked: false,
            policy,
            pending: PendingPrompts::default(),
        }
    }

    #[must_use]
    pub fn attempt_id(&self) -> &AttemptId {
        &self.attempt_id
    }

    #[must_use]
    pub fn student_id(&self) -> &StudentId {
        &self.student_id
    }

    #[must_use]
    pub fn subject(&self) -> &Subject {
        &self.subject
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    #[must_use]
    pub fn questions(&self) -> &[SessionQuestion] {
        &self.questions
    }

    #[must_use]
    pub fn question_codes(&self) -> Vec<ItemCode> {
        self.questions.iter().map(|q| q.code.clone()).collect()
    }

    #[must_use]
    pub fn answers(&self) -> &BTreeMap<ItemCode, OptionId> {
        &self.answers
    }

    #[must_use]
    pub fn integrity_strikes(&self) -> u8 {
        self.integrity_strikes
    }

    #[must_use]
    pub fn fullscreen_exits(&self) -> u32 {
        self.fullscreen_exits
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    #[must_use]
    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    #[must_use]
    pub fn time_expired(&self) -> bool {
        self.time_expired
    }

    #[must_use]
    pub fn locked(&self) -> bool {
        self.locked
    }

    #[must_use]
    pub fn policy(&self) -> ProctorPolicy {
        self.policy
    }

    #[must_use]
    pub fn pending_prompts(&self) -> PendingPrompts {
        self.pending
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Number of questions without a selected option.
    #[must_use]
    pub fn unanswered(&self) -> usize {
        self.questions
            .iter()
            .filter(|q| !self.answers.contains_key(&q.code))
            .count()
    }

    /// Deadline of the running clock, once started. Saturates at the latest
    /// representable instant.
    #[must_use]
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.started_at.map(|s| {
            s.checked_add_signed(self.policy.duration)
                .unwrap_or(DateTime::<Utc>::MAX_UTC)
        })
    }

    /// Time left while `Active`; `None` in any other state.
    #[must_use]
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        if self.state != SessionState::Active {
            return None;
        }
        self.deadline()
            .map(|deadline| (deadline - now).max(Duration::zero()))
    }
}
