//! Shared error types for the services crate.

use thiserror::Error;

use exam_core::model::{
    BankItemError, ItemCodeError, Phase, ResultError, Subject, Topic, WeaknessError,
};
use exam_core::proctor::ExamSessionError;
use storage::repository::StorageError;
use storage::sqlite::SqliteInitError;

/// Errors emitted while reading `EngineConfig`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("{key}={value:?} is invalid: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: &'static str,
    },
}

/// Errors emitted by `QuestionBankAllocator`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AllocationError {
    #[error("adaptive allocation needs at least 2 topics, found {found}")]
    InsufficientTopics { found: usize },
    #[error("primary weakness {0} has no items in the candidate pool")]
    UnknownTopic(Topic),
    #[error("counter {key} still contended after {attempts} attempts")]
    ContentionExhausted { key: String, attempts: u32 },
    #[error("item {0} is referenced by stored results")]
    ItemReferenced(String),
    #[error(transparent)]
    InvalidItem(#[from] BankItemError),
    #[error(transparent)]
    InvalidCode(#[from] ItemCodeError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted by the exam session runner.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    #[error("no bank items supplied for the exam")]
    Empty,
    #[error("subject {0} has no code in the catalog")]
    UnknownSubject(Subject),
    #[error(transparent)]
    Transition(#[from] ExamSessionError),
    #[error("session has not reached a terminal state")]
    NotTerminal,
    #[error(transparent)]
    Grading(#[from] ResultError),
    /// The result write failed; the graded result is kept so it can be retried.
    #[error("result could not be persisted: {0}")]
    Persist(StorageError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted by `PhaseProgressionResolver`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ResolverError {
    #[error("no phase of {subject} is open for attempts (showing {displayed})")]
    NoAuthorizedPhase { subject: Subject, displayed: Phase },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted by `WeaknessAnalysisService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AnalysisError {
    #[error("result {0} has no subject and none can be inferred")]
    UnknownSubject(String),
    #[error(transparent)]
    Weakness(#[from] WeaknessError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted by narrative providers.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum NarrativeError {
    #[error("narrative provider is not configured")]
    Disabled,
    #[error("narrative provider returned an empty response")]
    EmptyResponse,
    #[error("narrative request failed with status {0}")]
    HttpStatus(reqwest::StatusCode),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("narrative response is not valid JSON: {0}")]
    Malformed(String),
    #[error("narrative provider did not answer within {0:?}")]
    TimedOut(std::time::Duration),
}

/// Errors emitted while bootstrapping engine services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineServicesError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}
