use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use exam_core::model::{
    AttemptId, Grade, Phase, PhaseAuthorization, StudentId, Subject, SubjectCatalog,
};
use storage::repository::{
    AuthorizationRepository, ProgressRepository, ResultRepository, StorageError,
};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::cache;
use super::compat;
use crate::error::ResolverError;

//
// ─── STATUS ────────────────────────────────────────────────────────────────────
//

/// What a phase shows for one subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhaseStatus {
    LockedUnauthorized,
    Available,
    InProgress,
    /// Finished, waiting on the rest of the phase's subjects or on the next phase opening.
    BlockedAwaitingSiblings,
    Completed,
}

impl PhaseStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            PhaseStatus::LockedUnauthorized => "locked-unauthorized",
            PhaseStatus::Available => "available",
            PhaseStatus::InProgress => "in-progress",
            PhaseStatus::BlockedAwaitingSiblings => "blocked-awaiting-siblings",
            PhaseStatus::Completed => "completed",
        }
    }

    /// Whether the student may start (or resume) an attempt.
    #[must_use]
    pub fn is_attemptable(self) -> bool {
        matches!(self, PhaseStatus::Available | PhaseStatus::InProgress)
    }
}

impl fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status rules for one phase, given already reconciled inputs.
#[must_use]
pub fn phase_status(
    authorized: bool,
    exam_completed: bool,
    siblings_completed: bool,
    next_authorized: bool,
    cache_in_progress: bool,
) -> PhaseStatus {
    if exam_completed {
        if !siblings_completed && !next_authorized {
            PhaseStatus::BlockedAwaitingSiblings
        } else {
            PhaseStatus::Completed
        }
    } else if !authorized {
        PhaseStatus::LockedUnauthorized
    } else if cache_in_progress {
        PhaseStatus::InProgress
    } else {
        PhaseStatus::Available
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseView {
    pub phase: Phase,
    pub status: PhaseStatus,
    pub authorized: bool,
    /// From the result store only; the cache never sets this.
    pub exam_completed: bool,
    pub cache_completed: bool,
    pub siblings_completed: bool,
}

/// Pick the phase to show.
///
/// First available (or in progress) phase; else the first blocked one; else the
/// first authorized, uncompleted one; else `first`.
#[must_use]
pub fn select_display(views: &[PhaseView]) -> Phase {
    views
        .iter()
        .find(|v| v.status.is_attemptable())
        .or_else(|| {
            views
                .iter()
                .find(|v| v.status == PhaseStatus::BlockedAwaitingSiblings)
        })
        .or_else(|| views.iter().find(|v| v.authorized && !v.exam_completed))
        .map_or(Phase::First, |v| v.phase)
}

//
// ─── MAINTENANCE ───────────────────────────────────────────────────────────────
//

/// Cache write that brings the progress cache back in line with the result store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheRepair {
    MarkCompleted { phase: Phase, subject: Subject },
    ClearCompleted { phase: Phase, subject: Subject },
}

/// Missing subject tag to write back onto a legacy result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectBackfill {
    pub group: &'static str,
    pub id: AttemptId,
    pub subject: Subject,
}

//
// ─── RESOLUTION ────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveRequest {
    pub student: StudentId,
    pub grade: Grade,
    pub subject: Subject,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub student: StudentId,
    pub subject: Subject,
    /// One view per phase, in order.
    pub phases: Vec<PhaseView>,
    pub display: Phase,
    pub repairs: Vec<CacheRepair>,
    pub backfills: Vec<SubjectBackfill>,
}

impl Resolution {
    #[must_use]
    pub fn view(&self, phase: Phase) -> Option<&PhaseView> {
        self.phases.iter().find(|v| v.phase == phase)
    }

    #[must_use]
    pub fn status(&self, phase: Phase) -> Option<PhaseStatus> {
        self.view(phase).map(|v| v.status)
    }

    #[must_use]
    pub fn displayed_status(&self) -> Option<PhaseStatus> {
        self.status(self.display)
    }

    /// The displayed phase, if the student can attempt it right now.
    #[must_use]
    pub fn attemptable(&self) -> Option<Phase> {
        self.displayed_status()
            .filter(|s| s.is_attemptable())
            .map(|_| self.display)
    }

    #[must_use]
    pub fn needs_maintenance(&self) -> bool {
        !self.repairs.is_empty() || !self.backfills.is_empty()
    }
}

//
// ─── RESOLVER ──────────────────────────────────────────────────────────────────
//

/// Decides which phase of a subject a student sees, reconciling the progress
/// cache against the authoritative result store.
#[derive(Clone)]
pub struct PhaseProgressionResolver {
    results: Arc<dyn ResultRepository>,
    progress: Arc<dyn ProgressRepository>,
    authorizations: Arc<dyn AuthorizationRepository>,
    catalog: SubjectCatalog,
    background_maintenance: bool,
}

impl PhaseProgressionResolver {
    #[must_use]
    pub fn new(
        results: Arc<dyn ResultRepository>,
        progress: Arc<dyn ProgressRepository>,
        authorizations: Arc<dyn AuthorizationRepository>,
    ) -> Self {
        Self {
            results,
            progress,
            authorizations,
            catalog: SubjectCatalog::default(),
            background_maintenance: true,
        }
    }

    #[must_use]
    pub fn with_catalog(mut self, catalog: SubjectCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// When enabled (the default), `resolve` spawns cache repairs and subject
    /// backfills on the current Tokio runtime without waiting for them.
    #[must_use]
    pub fn with_background_maintenance(mut self, enabled: bool) -> Self {
        self.background_maintenance = enabled;
        self
    }

    /// Resolve every phase of `request.subject` for the student.
    ///
    /// # Errors
    ///
    /// Returns `ResolverError::Storage` when authorizations or results cannot be
    /// read. Cache read failures only degrade the in-progress hint.
    pub async fn resolve(&self, request: &ResolveRequest) -> Result<Resolution, ResolverError> {
        let mut authorizations = Vec::with_capacity(Phase::ALL.len());
        for phase in Phase::ALL {
            let auth = self
                .authorizations
                .get_authorization(request.grade, phase)
                .await?
                .unwrap_or_else(|| PhaseAuthorization::denied(request.grade, phase));
            authorizations.push(auth);
        }
        let authorized = |phase: Phase| {
            authorizations
                .iter()
                .any(|a| a.phase == phase && a.authorized)
        };

        let mut phases = Vec::with_capacity(Phase::ALL.len());
        let mut repairs = Vec::new();
        let mut backfills = Vec::new();

        for (phase, auth) in Phase::ALL.into_iter().zip(&authorizations) {
            let attributed = compat::load_phase_results(
                self.results.as_ref(),
                &self.catalog,
                &request.student,
                phase,
            )
            .await?;

            for record in attributed.iter().filter(|r| r.needs_backfill()) {
                if let Some(subject) = record.subject.clone() {
                    backfills.push(SubjectBackfill {
                        group: record.group,
                        id: record.result.id.clone(),
                        subject,
                    });
                }
            }

            let completed_subjects: BTreeSet<&Subject> = attributed
                .iter()
                .filter(|r| r.result.completed)
                .filter_map(|r| r.subject.as_ref())
                .collect();
            let exam_completed = completed_subjects.contains(&request.subject);

            let cached = match self.progress.get_progress(&request.student, phase).await {
                Ok(record) => record,
                Err(err) => {
                    warn!(student = %request.student, %phase, error = %err, "progress cache unreadable");
                    None
                }
            };
            let cache_completed = cached
                .as_ref()
                .is_some_and(|c| c.is_completed(&request.subject));
            let cache_in_progress = cached
                .as_ref()
                .is_some_and(|c| c.is_in_progress(&request.subject));

            if exam_completed && !cache_completed {
                info!(student = %request.student, subject = %request.subject, %phase, "cache missed a completed result");
                repairs.push(CacheRepair::MarkCompleted {
                    phase,
                    subject: request.subject.clone(),
                });
            } else if !exam_completed && cache_completed {
                warn!(student = %request.student, subject = %request.subject, %phase, "cache claims completion without a result");
                repairs.push(CacheRepair::ClearCompleted {
                    phase,
                    subject: request.subject.clone(),
                });
            }

            // Without an explicit roster the phase covers every catalog subject.
            let siblings_completed = if auth.subjects.is_empty() {
                self.catalog
                    .entries()
                    .iter()
                    .all(|entry| completed_subjects.contains(&entry.subject))
            } else {
                auth.subjects.iter().all(|s| completed_subjects.contains(s))
            };
            let next_authorized = phase.next().is_some_and(authorized);

            let status = phase_status(
                auth.authorized,
                exam_completed,
                siblings_completed,
                next_authorized,
                cache_in_progress,
            );
            debug!(subject = %request.subject, %phase, %status, "phase resolved");

            phases.push(PhaseView {
                phase,
                status,
                authorized: auth.authorized,
                exam_completed,
                cache_completed,
                siblings_completed,
            });
        }

        let resolution = Resolution {
            student: request.student.clone(),
            subject: request.subject.clone(),
            display: select_display(&phases),
            phases,
            repairs,
            backfills,
        };

        if self.background_maintenance {
            // Fire-and-forget: the handle is dropped and the read path never waits.
            let _ = self.spawn_maintenance(&resolution);
        }
        Ok(resolution)
    }

    /// Resolve and return the phase the student may attempt now.
    ///
    /// # Errors
    ///
    /// Returns `ResolverError::NoAuthorizedPhase` when the displayed phase is not
    /// open for attempts.
    pub async fn require_attemptable(
        &self,
        request: &ResolveRequest,
    ) -> Result<Phase, ResolverError> {
        let resolution = self.resolve(request).await?;
        resolution
            .attemptable()
            .ok_or_else(|| ResolverError::NoAuthorizedPhase {
                subject: request.subject.clone(),
                displayed: resolution.display,
            })
    }

    /// Apply the repairs and backfills a resolution found.
    ///
    /// Every write is attempted; the first failure is returned.
    ///
    /// # Errors
    ///
    /// Returns the first `StorageError` encountered.
    pub async fn apply_maintenance(&self, resolution: &Resolution) -> Result<(), StorageError> {
        let mut first_error = None;

        for repair in &resolution.repairs {
            let outcome = match repair {
                CacheRepair::MarkCompleted { phase, subject } => {
                    cache::mark_completed(
                        self.progress.as_ref(),
                        &resolution.student,
                        *phase,
                        subject,
                    )
                    .await
                }
                CacheRepair::ClearCompleted { phase, subject } => {
                    cache::update_progress(
                        self.progress.as_ref(),
                        &resolution.student,
                        *phase,
                        |r| r.clear_completed(subject),
                    )
                    .await
                }
            };
            match outcome {
                Ok(()) => info!(student = %resolution.student, ?repair, "progress cache repaired"),
                Err(err) => {
                    warn!(student = %resolution.student, ?repair, error = %err, "progress cache repair failed");
                    first_error.get_or_insert(err);
                }
            }
        }

        for backfill in &resolution.backfills {
            match self
                .results
                .backfill_subject(backfill.group, &backfill.id, &backfill.subject)
                .await
            {
                Ok(()) => info!(
                    id = %backfill.id,
                    group = backfill.group,
                    subject = %backfill.subject,
                    "legacy result subject backfilled"
                ),
                Err(err) => {
                    warn!(id = %backfill.id, error = %err, "legacy subject backfill failed");
                    first_error.get_or_insert(err);
                }
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    /// Run [`Self::apply_maintenance`] on the current Tokio runtime.
    ///
    /// Returns `None` when there is nothing to do or no runtime is available.
    pub fn spawn_maintenance(&self, resolution: &Resolution) -> Option<JoinHandle<()>> {
        if !resolution.needs_maintenance() {
            return None;
        }
        let Ok(handle) = Handle::try_current() else {
            debug!("no runtime available, skipping cache maintenance");
            return None;
        };
        let resolver = self.clone();
        let resolution = resolution.clone();
        Some(handle.spawn(async move {
            // Failures are already logged per write.
            let _ = resolver.apply_maintenance(&resolution).await;
        }))
    }
}
