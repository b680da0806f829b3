//! Compatibility adapter over the result store's historical layout.
//!
//! Results live in one group per phase. The second phase was once stored under
//! a different group name, so reads for it merge both groups. Older records may
//! also lack a subject tag; those are attributed by the subject code their
//! attempt id starts with. New writes only ever go to the canonical group and
//! always carry a subject.

use std::collections::HashSet;

use exam_core::model::{AuthoritativeResult, Phase, StudentId, Subject, SubjectCatalog};
use storage::repository::{ResultRepository, StorageError};

pub const FIRST_PHASE_GROUP: &str = "first_phase";
pub const SECOND_PHASE_GROUP: &str = "second_phase";
pub const THIRD_PHASE_GROUP: &str = "third_phase";
pub const LEGACY_SECOND_PHASE_GROUP: &str = "phase2";

/// Group new results for `phase` are written to.
#[must_use]
pub fn canonical_group(phase: Phase) -> &'static str {
    match phase {
        Phase::First => FIRST_PHASE_GROUP,
        Phase::Second => SECOND_PHASE_GROUP,
        Phase::Third => THIRD_PHASE_GROUP,
    }
}

/// Every group that may hold results for `phase`, canonical first.
#[must_use]
pub fn read_groups(phase: Phase) -> &'static [&'static str] {
    match phase {
        Phase::First => &[FIRST_PHASE_GROUP],
        Phase::Second => &[SECOND_PHASE_GROUP, LEGACY_SECOND_PHASE_GROUP],
        Phase::Third => &[THIRD_PHASE_GROUP],
    }
}

/// A stored result together with the subject it is counted under.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributedResult {
    pub group: &'static str,
    pub result: AuthoritativeResult,
    /// Explicit tag, or the inferred subject for completed untagged records.
    pub subject: Option<Subject>,
}

impl AttributedResult {
    /// The record has no tag but one was inferred, so it is due a backfill.
    #[must_use]
    pub fn needs_backfill(&self) -> bool {
        self.result.subject.is_none() && self.subject.is_some()
    }

    #[must_use]
    pub fn completes(&self, subject: &Subject) -> bool {
        self.result.completed && self.subject.as_ref() == Some(subject)
    }
}

/// Attribute a record to a subject.
///
/// Untagged records are inferred from their id only when they are completed.
#[must_use]
pub fn attribute(result: &AuthoritativeResult, catalog: &SubjectCatalog) -> Option<Subject> {
    match &result.subject {
        Some(subject) => Some(subject.clone()),
        None if result.completed => catalog.infer_from_identifier(result.id.as_str()).cloned(),
        None => None,
    }
}

/// Read and merge every group for `phase`, dropping repeated attempt ids.
///
/// # Errors
///
/// Returns `StorageError` if any group cannot be read.
pub async fn load_phase_results(
    results: &dyn ResultRepository,
    catalog: &SubjectCatalog,
    student: &StudentId,
    phase: Phase,
) -> Result<Vec<AttributedResult>, StorageError> {
    let mut seen = HashSet::new();
    let mut merged = Vec::new();
    for &group in read_groups(phase) {
        for result in results.list_results(group, student).await? {
            if !seen.insert(result.id.clone()) {
                continue;
            }
            let subject = attribute(&result, catalog);
            merged.push(AttributedResult {
                group,
                result,
                subject,
            });
        }
    }
    Ok(merged)
}
