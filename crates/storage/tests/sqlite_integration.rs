use exam_core::model::{
    AnswerOutcome, AttemptId, AuthoritativeResult, BankItem, BankItemDraft, DifficultyLevel,
    Grade, ItemCode, OptionDraft, Phase, PhaseAuthorization, PhaseProgressRecord, StudentId,
    Subject, SubjectCode, Topic, TopicCode, WeaknessAnalysis,
};
use exam_core::time::fixed_now;
use storage::repository::{
    AuthorizationRepository, BankItemFilter, BankItemRepository, CounterRepository,
    ProgressRepository, ResultRepository, StorageError, WeaknessRepository,
};
use storage::sqlite::SqliteRepository;

async fn connect(name: &str) -> SqliteRepository {
    let repo = SqliteRepository::connect(&format!("sqlite:file:{name}?mode=memory&cache=shared"))
        .await
        .expect("connect");
    repo.migrate().await.expect("migrate");
    repo
}

fn build_item(serial: u32, topic: &str, topic_code: &str) -> BankItem {
    let draft = BankItemDraft {
        subject: Subject::new("Matemáticas").unwrap(),
        subject_code: SubjectCode::new("MA").unwrap(),
        topic: Topic::new(topic).unwrap(),
        topic_code: TopicCode::new(topic_code).unwrap(),
        grade: Grade::new(7).unwrap(),
        level: DifficultyLevel::Intermediate,
        prompt: format!("Pregunta {serial}"),
        prompt_image: None,
        options: vec![
            OptionDraft::text("uno", false),
            OptionDraft::text("dos", true),
            OptionDraft::text("tres", false),
        ],
    };
    let key = draft.code_key();
    draft
        .validate(fixed_now())
        .unwrap()
        .assign_code(ItemCode::new(key, serial).unwrap())
        .unwrap()
}

fn build_result(id: &str, subject: Option<&str>, answers: Vec<AnswerOutcome>) -> AuthoritativeResult {
    AuthoritativeResult {
        id: AttemptId::new(id).unwrap(),
        student_id: StudentId::new("stu-1").unwrap(),
        subject: subject.map(|s| Subject::new(s).unwrap()),
        phase: Phase::First,
        completed: true,
        score: 50.0,
        correct_count: 1,
        total_questions: 2,
        answers,
        time_expired: false,
        locked: false,
        integrity_strikes: 1,
        started_at: fixed_now(),
        ended_at: fixed_now() + chrono::Duration::minutes(20),
    }
}

#[tokio::test]
async fn sqlite_bank_items_roundtrip_and_filter() {
    let repo = connect("memdb_items").await;

    let a1 = build_item(1, "Álgebra", "ALG");
    let a2 = build_item(2, "Álgebra", "ALG");
    let g1 = build_item(1, "Geometría", "GEO");
    for item in [&a2, &g1, &a1] {
        repo.insert_item(item).await.unwrap();
    }
    assert!(matches!(
        repo.insert_item(&a1).await,
        Err(StorageError::Conflict)
    ));

    let fetched = repo.get_item(&a1.code).await.unwrap();
    assert_eq!(fetched, a1);

    let algebra = repo
        .list_items(
            &BankItemFilter::for_subject(Subject::new("Matemáticas").unwrap())
                .with_topic(Topic::new("Álgebra").unwrap())
                .with_level(DifficultyLevel::Intermediate),
        )
        .await
        .unwrap();
    assert_eq!(algebra, vec![a1.clone(), a2.clone()]);

    repo.delete_item(&g1.code).await.unwrap();
    assert!(matches!(
        repo.get_item(&g1.code).await,
        Err(StorageError::NotFound)
    ));
    assert!(matches!(
        repo.delete_item(&g1.code).await,
        Err(StorageError::NotFound)
    ));
}

#[tokio::test]
async fn sqlite_counter_compare_and_swap() {
    let repo = connect("memdb_counters").await;

    assert_eq!(repo.read_counter("MAALG7I").await.unwrap(), None);
    assert!(repo.compare_and_swap("MAALG7I", None, 1).await.unwrap());
    // A second "first writer" loses.
    assert!(!repo.compare_and_swap("MAALG7I", None, 1).await.unwrap());
    assert!(!repo.compare_and_swap("MAALG7I", Some(5), 6).await.unwrap());
    assert!(repo.compare_and_swap("MAALG7I", Some(1), 2).await.unwrap());
    assert_eq!(repo.read_counter("MAALG7I").await.unwrap(), Some(2));
}

#[tokio::test]
async fn sqlite_results_append_once_and_backfill() {
    let repo = connect("memdb_results").await;
    let item = build_item(1, "Álgebra", "ALG");
    let answers = vec![AnswerOutcome {
        question: item.code.clone(),
        topic: item.topic.clone(),
        selected: None,
        correct: false,
    }];

    let legacy = build_result("MA-legacy", None, answers);
    repo.append_result("first_phase", &legacy).await.unwrap();
    assert!(matches!(
        repo.append_result("first_phase", &legacy).await,
        Err(StorageError::Conflict)
    ));
    assert!(repo.is_item_referenced(&item.code).await.unwrap());
    assert!(
        !repo
            .is_item_referenced(&build_item(9, "Álgebra", "ALG").code)
            .await
            .unwrap()
    );

    let math = Subject::new("Matemáticas").unwrap();
    repo.backfill_subject("first_phase", &legacy.id, &math)
        .await
        .unwrap();
    // A second backfill with another subject does not overwrite the tag.
    repo.backfill_subject("first_phase", &legacy.id, &Subject::new("Lenguaje").unwrap())
        .await
        .unwrap();

    let listed = repo
        .list_results("first_phase", &StudentId::new("stu-1").unwrap())
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].subject.as_ref(), Some(&math));
    assert_eq!(listed[0].answers.len(), 1);
    assert_eq!(listed[0].integrity_strikes, 1);

    assert!(matches!(
        repo.backfill_subject("phase2", &legacy.id, &math).await,
        Err(StorageError::NotFound)
    ));
}

#[tokio::test]
async fn sqlite_unreadable_result_rows_are_skipped() {
    let repo = connect("memdb_bad_rows").await;
    let good = build_result("MA-good", Some("Matemáticas"), Vec::new());
    repo.append_result("phase2", &good).await.unwrap();

    let broken = r#"{"id":"MA-bad","answers":[{"question":"not-a-code"}]}"#;
    sqlx::query(
        r"
        INSERT INTO results (
            group_name, id, student_id, subject, phase, completed, payload, recorded_at
        )
        VALUES ('phase2', 'MA-bad', 'stu-1', NULL, 'second', 1, ?1, '2023-11-14T22:13:20Z')
        ",
    )
    .bind(broken)
    .execute(repo.pool())
    .await
    .unwrap();

    let listed = repo
        .list_results("phase2", &StudentId::new("stu-1").unwrap())
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, good.id);
}

#[tokio::test]
async fn sqlite_progress_authorization_and_analysis() {
    let repo = connect("memdb_progress").await;
    let student = StudentId::new("stu-1").unwrap();
    let math = Subject::new("Matemáticas").unwrap();

    assert!(repo.get_progress(&student, Phase::First).await.unwrap().is_none());
    let mut record = PhaseProgressRecord::empty(student.clone(), Phase::First);
    record.mark_in_progress(&math);
    repo.upsert_progress(&record).await.unwrap();
    record.mark_completed(&math);
    repo.upsert_progress(&record).await.unwrap();
    let cached = repo
        .get_progress(&student, Phase::First)
        .await
        .unwrap()
        .unwrap();
    assert!(cached.is_completed(&math));
    assert!(!cached.is_in_progress(&math));

    let grade = Grade::new(7).unwrap();
    let auth = PhaseAuthorization::new(grade, Phase::Second, true, vec![math.clone()]);
    repo.upsert_authorization(&auth).await.unwrap();
    assert_eq!(
        repo.get_authorization(grade, Phase::Second).await.unwrap(),
        Some(auth)
    );
    assert!(
        repo.get_authorization(grade, Phase::Third)
            .await
            .unwrap()
            .is_none()
    );

    let item = build_item(1, "Álgebra", "ALG");
    let result = build_result(
        "MA-analysis",
        Some("Matemáticas"),
        vec![AnswerOutcome {
            question: item.code.clone(),
            topic: item.topic.clone(),
            selected: None,
            correct: false,
        }],
    );
    let analysis = WeaknessAnalysis::from_result(&result, math.clone(), fixed_now()).unwrap();
    repo.put_analysis(&analysis).await.unwrap();
    let stored = repo.get_analysis(&student, &math).await.unwrap().unwrap();
    assert_eq!(stored.primary_weakness, Topic::new("Álgebra").unwrap());
    assert!(
        repo.get_analysis(&student, &Subject::new("Lenguaje").unwrap())
            .await
            .unwrap()
            .is_none()
    );
}
