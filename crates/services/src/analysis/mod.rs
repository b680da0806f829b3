//! Weakness analysis of first-phase results and the narrative feedback attached to it.

mod narrative;
mod service;

pub use narrative::{
    ChatNarrativeProvider, NarrativeProvider, PerformanceSummary, parse_narrative,
    template_narrative,
};
pub use service::{DEFAULT_NARRATIVE_TIMEOUT, WeaknessAnalysisService};
