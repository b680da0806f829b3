use serde::{Deserialize, Serialize};

use crate::model::catalog::{Grade, Subject};
use crate::model::phase::Phase;

/// Administrator switch permitting a grade to attempt a phase.
///
/// `subjects` is the roster of subjects the phase covers for that grade; it is
/// what "all subjects of the phase completed" is measured against. An empty
/// roster means every subject in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseAuthorization {
    pub grade: Grade,
    pub phase: Phase,
    pub authorized: bool,
    #[serde(default)]
    pub subjects: Vec<Subject>,
}

impl PhaseAuthorization {
    #[must_use]
    pub fn new(grade: Grade, phase: Phase, authorized: bool, subjects: Vec<Subject>) -> Self {
        Self {
            grade,
            phase,
            authorized,
            subjects,
        }
    }

    /// Placeholder used when no authorization document exists.
    #[must_use]
    pub fn denied(grade: Grade, phase: Phase) -> Self {
        Self::new(grade, phase, false, Vec::new())
    }
}
