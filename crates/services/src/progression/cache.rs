//! Best-effort writes to the progress cache.

use exam_core::model::{Phase, PhaseProgressRecord, StudentId, Subject};
use storage::repository::{ProgressRepository, StorageError};

/// Read-modify-write of one cache record. Skips the write when nothing changed.
///
/// # Errors
///
/// Returns `StorageError` if the record cannot be read or written.
pub async fn update_progress<F>(
    progress: &dyn ProgressRepository,
    student: &StudentId,
    phase: Phase,
    apply: F,
) -> Result<(), StorageError>
where
    F: FnOnce(&mut PhaseProgressRecord) + Send,
{
    let mut record = progress
        .get_progress(student, phase)
        .await?
        .unwrap_or_else(|| PhaseProgressRecord::empty(student.clone(), phase));
    let before = record.clone();
    apply(&mut record);
    if record != before {
        progress.upsert_progress(&record).await?;
    }
    Ok(())
}

/// # Errors
///
/// Returns `StorageError` if the cache cannot be updated.
pub async fn mark_in_progress(
    progress: &dyn ProgressRepository,
    student: &StudentId,
    phase: Phase,
    subject: &Subject,
) -> Result<(), StorageError> {
    update_progress(progress, student, phase, |r| r.mark_in_progress(subject)).await
}

/// # Errors
///
/// Returns `StorageError` if the cache cannot be updated.
pub async fn mark_completed(
    progress: &dyn ProgressRepository,
    student: &StudentId,
    phase: Phase,
    subject: &Subject,
) -> Result<(), StorageError> {
    update_progress(progress, student, phase, |r| r.mark_completed(subject)).await
}
