use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::model::catalog::Subject;
use crate::model::ids::StudentId;
use crate::model::phase::Phase;

/// Cached per-student, per-phase progress.
///
/// This is a performance cache: it may lag behind the result store and is always
/// overridden by it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseProgressRecord {
    pub student_id: StudentId,
    pub phase: Phase,
    #[serde(default)]
    pub subjects_completed: BTreeSet<Subject>,
    #[serde(default)]
    pub subjects_in_progress: BTreeSet<Subject>,
}

impl PhaseProgressRecord {
    #[must_use]
    pub fn empty(student_id: StudentId, phase: Phase) -> Self {
        Self {
            student_id,
            phase,
            subjects_completed: BTreeSet::new(),
            subjects_in_progress: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn is_completed(&self, subject: &Subject) -> bool {
        self.subjects_completed.contains(subject)
    }

    #[must_use]
    pub fn is_in_progress(&self, subject: &Subject) -> bool {
        self.subjects_in_progress.contains(subject)
    }

    /// Mark a subject as started. A subject already completed stays completed.
    pub fn mark_in_progress(&mut self, subject: &Subject) {
        if !self.subjects_completed.contains(subject) {
            self.subjects_in_progress.insert(subject.clone());
        }
    }

    pub fn mark_completed(&mut self, subject: &Subject) {
        self.subjects_in_progress.remove(subject);
        self.subjects_completed.insert(subject.clone());
    }

    pub fn clear_completed(&mut self, subject: &Subject) {
        self.subjects_completed.remove(subject);
    }
}
