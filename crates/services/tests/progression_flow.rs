mod common;

use std::sync::Arc;

use common::{ReadOnlyProgress, completed_result, grade, language, math, student};
use exam_core::model::{Phase, PhaseAuthorization, PhaseProgressRecord, Subject, SubjectCatalog};
use services::error::ResolverError;
use services::progression::compat::{LEGACY_SECOND_PHASE_GROUP, SECOND_PHASE_GROUP};
use services::progression::{
    CacheRepair, PhaseProgressionResolver, PhaseStatus, ResolveRequest,
};
use storage::repository::{
    AuthorizationRepository, InMemoryRepository, ProgressRepository, ResultRepository,
};

fn resolver(repo: &InMemoryRepository) -> PhaseProgressionResolver {
    PhaseProgressionResolver::new(
        Arc::new(repo.clone()),
        Arc::new(repo.clone()),
        Arc::new(repo.clone()),
    )
    .with_background_maintenance(false)
}

fn request(subject: Subject) -> ResolveRequest {
    ResolveRequest {
        student: student(),
        grade: grade(),
        subject,
    }
}

async fn authorize(repo: &InMemoryRepository, phase: Phase, authorized: bool) {
    repo.upsert_authorization(&PhaseAuthorization::new(
        grade(),
        phase,
        authorized,
        vec![math(), language()],
    ))
    .await
    .unwrap();
}

#[tokio::test]
async fn fresh_student_sees_first_phase_available() {
    let repo = InMemoryRepository::new();
    authorize(&repo, Phase::First, true).await;

    let resolution = resolver(&repo).resolve(&request(math())).await.unwrap();

    assert_eq!(resolution.display, Phase::First);
    assert_eq!(resolution.status(Phase::First), Some(PhaseStatus::Available));
    assert_eq!(
        resolution.status(Phase::Second),
        Some(PhaseStatus::LockedUnauthorized)
    );
    assert_eq!(resolution.attemptable(), Some(Phase::First));
    assert!(!resolution.needs_maintenance());
}

#[tokio::test]
async fn finished_subject_waits_for_siblings_and_next_phase() {
    let repo = InMemoryRepository::new();
    authorize(&repo, Phase::First, true).await;
    repo.append_result(
        "first_phase",
        &completed_result("MA-1", Some(math()), Phase::First, Vec::new()),
    )
    .await
    .unwrap();

    let resolver = resolver(&repo);
    let resolution = resolver.resolve(&request(math())).await.unwrap();
    assert_eq!(
        resolution.status(Phase::First),
        Some(PhaseStatus::BlockedAwaitingSiblings)
    );
    assert_eq!(resolution.display, Phase::First);
    assert_eq!(resolution.attemptable(), None);

    let err = resolver.require_attemptable(&request(math())).await.unwrap_err();
    assert!(matches!(
        err,
        ResolverError::NoAuthorizedPhase {
            displayed: Phase::First,
            ..
        }
    ));

    // The sibling subject is still open in the same phase.
    let other = resolver.resolve(&request(language())).await.unwrap();
    assert_eq!(other.status(Phase::First), Some(PhaseStatus::Available));

    // Opening the next phase releases the block.
    authorize(&repo, Phase::Second, true).await;
    let resolution = resolver.resolve(&request(math())).await.unwrap();
    assert_eq!(resolution.status(Phase::First), Some(PhaseStatus::Completed));
    assert_eq!(resolution.status(Phase::Second), Some(PhaseStatus::Available));
    assert_eq!(resolution.display, Phase::Second);
    assert_eq!(
        resolver.require_attemptable(&request(math())).await.unwrap(),
        Phase::Second
    );
}

#[tokio::test]
async fn authorization_without_roster_waits_for_every_catalog_subject() {
    let repo = InMemoryRepository::new();
    repo.upsert_authorization(&PhaseAuthorization::new(
        grade(),
        Phase::First,
        true,
        Vec::new(),
    ))
    .await
    .unwrap();
    repo.append_result(
        "first_phase",
        &completed_result("MA-1", Some(math()), Phase::First, Vec::new()),
    )
    .await
    .unwrap();

    let resolver = resolver(&repo);
    let resolution = resolver.resolve(&request(math())).await.unwrap();
    assert_eq!(
        resolution.status(Phase::First),
        Some(PhaseStatus::BlockedAwaitingSiblings)
    );
    assert_eq!(resolution.display, Phase::First);

    let catalog = SubjectCatalog::default();
    for (n, entry) in catalog.entries().iter().enumerate().skip(1) {
        repo.append_result(
            "first_phase",
            &completed_result(
                &format!("{}-{n}", entry.code.as_str()),
                Some(entry.subject.clone()),
                Phase::First,
                Vec::new(),
            ),
        )
        .await
        .unwrap();
    }

    let resolution = resolver.resolve(&request(math())).await.unwrap();
    assert_eq!(resolution.status(Phase::First), Some(PhaseStatus::Completed));
}

#[tokio::test]
async fn completed_siblings_mark_the_phase_completed() {
    let repo = InMemoryRepository::new();
    authorize(&repo, Phase::First, true).await;
    for (id, subject) in [("MA-1", math()), ("LE-1", language())] {
        repo.append_result(
            "first_phase",
            &completed_result(id, Some(subject), Phase::First, Vec::new()),
        )
        .await
        .unwrap();
    }

    let resolution = resolver(&repo).resolve(&request(math())).await.unwrap();
    let first = resolution.view(Phase::First).unwrap();
    assert_eq!(first.status, PhaseStatus::Completed);
    assert!(first.siblings_completed);
    // Nothing attemptable and nothing blocked: fall back to the first phase.
    assert_eq!(resolution.display, Phase::First);
}

#[tokio::test]
async fn result_store_wins_over_stale_cache_and_cache_is_repaired() {
    let repo = InMemoryRepository::new();
    authorize(&repo, Phase::First, true).await;
    let mut stale = PhaseProgressRecord::empty(student(), Phase::First);
    stale.mark_in_progress(&math());
    repo.upsert_progress(&stale).await.unwrap();
    repo.append_result(
        "first_phase",
        &completed_result("MA-1", Some(math()), Phase::First, Vec::new()),
    )
    .await
    .unwrap();

    let resolver = resolver(&repo);
    let resolution = resolver.resolve(&request(math())).await.unwrap();
    let first = resolution.view(Phase::First).unwrap();
    assert!(first.exam_completed);
    assert!(!first.cache_completed);
    assert_ne!(first.status, PhaseStatus::InProgress);
    assert_eq!(
        resolution.repairs,
        vec![CacheRepair::MarkCompleted {
            phase: Phase::First,
            subject: math()
        }]
    );

    resolver.apply_maintenance(&resolution).await.unwrap();
    let cached = repo
        .get_progress(&student(), Phase::First)
        .await
        .unwrap()
        .unwrap();
    assert!(cached.is_completed(&math()));
    assert!(!cached.is_in_progress(&math()));

    let again = resolver.resolve(&request(math())).await.unwrap();
    assert!(again.repairs.is_empty());
}

#[tokio::test]
async fn cache_completion_without_a_result_is_ignored_and_cleared() {
    let repo = InMemoryRepository::new();
    authorize(&repo, Phase::First, true).await;
    let mut lying = PhaseProgressRecord::empty(student(), Phase::First);
    lying.mark_completed(&math());
    repo.upsert_progress(&lying).await.unwrap();

    let resolver = resolver(&repo);
    let resolution = resolver.resolve(&request(math())).await.unwrap();
    assert_eq!(resolution.status(Phase::First), Some(PhaseStatus::Available));
    assert_eq!(
        resolution.repairs,
        vec![CacheRepair::ClearCompleted {
            phase: Phase::First,
            subject: math()
        }]
    );

    let handle = resolver.spawn_maintenance(&resolution).unwrap();
    handle.await.unwrap();
    let cached = repo
        .get_progress(&student(), Phase::First)
        .await
        .unwrap()
        .unwrap();
    assert!(!cached.is_completed(&math()));
}

#[tokio::test]
async fn second_phase_reads_legacy_group_and_backfills_subject() {
    let repo = InMemoryRepository::new();
    authorize(&repo, Phase::First, true).await;
    authorize(&repo, Phase::Second, true).await;
    repo.append_result(
        "first_phase",
        &completed_result("MA-1", Some(math()), Phase::First, Vec::new()),
    )
    .await
    .unwrap();
    // Written before subjects were tagged, under the old group name.
    repo.append_result(
        LEGACY_SECOND_PHASE_GROUP,
        &completed_result("MA-legacy", None, Phase::Second, Vec::new()),
    )
    .await
    .unwrap();

    let resolver = resolver(&repo);
    let resolution = resolver.resolve(&request(math())).await.unwrap();
    assert!(resolution.view(Phase::Second).unwrap().exam_completed);
    assert_eq!(resolution.backfills.len(), 1);
    assert_eq!(resolution.backfills[0].group, LEGACY_SECOND_PHASE_GROUP);
    assert_eq!(resolution.backfills[0].subject, math());

    // Language has no second-phase result in either group.
    let other = resolver.resolve(&request(language())).await.unwrap();
    assert!(!other.view(Phase::Second).unwrap().exam_completed);

    resolver.apply_maintenance(&resolution).await.unwrap();
    let legacy = repo
        .list_results(LEGACY_SECOND_PHASE_GROUP, &student())
        .await
        .unwrap();
    assert_eq!(legacy[0].subject, Some(math()));
    assert!(
        repo.list_results(SECOND_PHASE_GROUP, &student())
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn unfinished_untagged_results_are_not_attributed() {
    let repo = InMemoryRepository::new();
    authorize(&repo, Phase::First, true).await;
    let mut partial = completed_result("MA-partial", None, Phase::First, Vec::new());
    partial.completed = false;
    repo.append_result("first_phase", &partial).await.unwrap();

    let resolution = resolver(&repo).resolve(&request(math())).await.unwrap();
    assert_eq!(resolution.status(Phase::First), Some(PhaseStatus::Available));
    assert!(resolution.backfills.is_empty());
}

#[tokio::test]
async fn failed_repairs_never_fail_the_read() {
    let repo = InMemoryRepository::new();
    authorize(&repo, Phase::First, true).await;
    repo.append_result(
        "first_phase",
        &completed_result("MA-1", Some(math()), Phase::First, Vec::new()),
    )
    .await
    .unwrap();

    let resolver = PhaseProgressionResolver::new(
        Arc::new(repo.clone()),
        Arc::new(ReadOnlyProgress {
            inner: repo.clone(),
        }),
        Arc::new(repo.clone()),
    );

    // Background repair is on and will fail; the read path does not notice.
    let resolution = resolver.resolve(&request(math())).await.unwrap();
    assert!(resolution.view(Phase::First).unwrap().exam_completed);
    assert!(resolver.apply_maintenance(&resolution).await.is_err());

    let handle = resolver.spawn_maintenance(&resolution).unwrap();
    handle.await.unwrap();
}
