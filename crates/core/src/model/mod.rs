mod authorization;
mod bank_item;
mod catalog;
mod ids;
mod item_code;
mod media;
mod phase;
mod progress;
mod result;
mod session;
mod weakness;

pub use ids::{AttemptId, OptionId, ParseIdError, StudentId};
pub use media::{MediaRef, MediaValidationError};

pub use authorization::PhaseAuthorization;
pub use bank_item::{
    BankItem, BankItemDraft, BankItemError, BankOption, MAX_OPTIONS, MIN_OPTIONS, OptionDraft,
    ValidatedItem,
};
pub use catalog::{
    CatalogError, DifficultyLevel, Grade, Subject, SubjectCatalog, SubjectCode, SubjectEntry,
    Topic, TopicCode,
};
pub use item_code::{CodeKey, ItemCode, ItemCodeError, MAX_SERIAL};
pub use phase::{Phase, PhaseParseError};
pub use progress::PhaseProgressRecord;
pub use result::{AnswerOutcome, AuthoritativeResult, ResultError, percentage};
pub use session::{
    CompletionReason, ExamSession, PendingPrompts, ProctorPolicy, SessionQuestion, SessionState,
};
pub use weakness::{
    NarrativeSource, STRENGTH_THRESHOLD, TopicPerformance, WEAKNESS_THRESHOLD, WeaknessAnalysis,
    WeaknessError, WeaknessNarrative, weakness_order,
};
