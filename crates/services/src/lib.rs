#![forbid(unsafe_code)]

pub mod allocation;
pub mod analysis;
pub mod config;
pub mod engine_services;
pub mod error;
pub mod progression;
pub mod sessions;

pub use exam_core::Clock;

pub use allocation::{
    Allocation, AllocationMode, AllocationPolicy, ExamRequest, QuestionBankAllocator,
};
pub use analysis::{ChatNarrativeProvider, NarrativeProvider, WeaknessAnalysisService};
pub use config::{EngineConfig, NarrativeConfig};
pub use engine_services::EngineServices;
pub use error::{
    AllocationError, AnalysisError, ConfigError, EngineServicesError, NarrativeError,
    ResolverError, SessionError,
};
pub use progression::{
    PhaseProgressionResolver, PhaseStatus, PhaseView, Resolution, ResolveRequest,
};
pub use sessions::{DisplayHost, ExamSessionController, ExamSessionService, HeadlessHost, Notice};
