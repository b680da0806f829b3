//! Phase progression: which phase a student sees for a subject, and whether
//! they may attempt it.

pub mod cache;
pub mod compat;
mod resolver;

pub use resolver::{
    CacheRepair, PhaseProgressionResolver, PhaseStatus, PhaseView, Resolution, ResolveRequest,
    SubjectBackfill, phase_status, select_display,
};
