use async_trait::async_trait;
use exam_core::model::{
    AttemptId, AuthoritativeResult, BankItem, DifficultyLevel, Grade, ItemCode, Phase,
    PhaseAuthorization, PhaseProgressRecord, StudentId, Subject, Topic, WeaknessAnalysis,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    /// The store was busy with a concurrent writer; the operation may be retried.
    #[error("contention: {0}")]
    Contention(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

//
// ─── BANK ITEMS ────────────────────────────────────────────────────────────────
//

/// Equality filter applied when scanning the bank. `None` fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BankItemFilter {
    pub subject: Option<Subject>,
    pub topic: Option<Topic>,
    pub grade: Option<Grade>,
    pub level: Option<DifficultyLevel>,
}

impl BankItemFilter {
    #[must_use]
    pub fn for_subject(subject: Subject) -> Self {
        Self {
            subject: Some(subject),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_topic(mut self, topic: Topic) -> Self {
        self.topic = Some(topic);
        self
    }

    #[must_use]
    pub fn with_grade(mut self, grade: Grade) -> Self {
        self.grade = Some(grade);
        self
    }

    #[must_use]
    pub fn with_level(mut self, level: DifficultyLevel) -> Self {
        self.level = Some(level);
        self
    }

    #[must_use]
    pub fn matches(&self, item: &BankItem) -> bool {
        self.subject.as_ref().is_none_or(|s| s == &item.subject)
            && self.topic.as_ref().is_none_or(|t| t == &item.topic)
            && self.grade.is_none_or(|g| g == item.grade())
            && self.level.is_none_or(|l| l == item.level())
    }
}

#[async_trait]
pub trait BankItemRepository: Send + Sync {
    /// Store a new item.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if an item with the same code exists.
    async fn insert_item(&self, item: &BankItem) -> Result<(), StorageError>;

    /// Fetch an item by code.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if missing, or other storage errors.
    async fn get_item(&self, code: &ItemCode) -> Result<BankItem, StorageError>;

    /// Scan the bank, ordered by code.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the scan fails.
    async fn list_items(&self, filter: &BankItemFilter) -> Result<Vec<BankItem>, StorageError>;

    /// Remove an item.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if missing.
    async fn delete_item(&self, code: &ItemCode) -> Result<(), StorageError>;
}

//
// ─── COUNTERS ──────────────────────────────────────────────────────────────────
//

/// Serial counters keyed by `{subjectCode}{topicCode}{grade}{levelCode}`.
///
/// The only write is a compare-and-swap; callers build a read-increment-write
/// cycle on top of it and retry when the swap loses.
#[async_trait]
pub trait CounterRepository: Send + Sync {
    /// Current value of the counter, `None` if it was never written.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the read fails.
    async fn read_counter(&self, key: &str) -> Result<Option<u32>, StorageError>;

    /// Set the counter to `next` only if it still holds `expected`.
    ///
    /// Returns `Ok(false)` when another writer got there first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Contention` when the store is busy, or other storage errors.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<u32>,
        next: u32,
    ) -> Result<bool, StorageError>;
}

//
// ─── RESULTS ───────────────────────────────────────────────────────────────────
//

/// Append-only store of authoritative results, partitioned by named groups.
#[async_trait]
pub trait ResultRepository: Send + Sync {
    /// Append a result to `group`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if the attempt id is already present in the group.
    async fn append_result(
        &self,
        group: &str,
        result: &AuthoritativeResult,
    ) -> Result<(), StorageError>;

    /// All results in `group` for a student, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the scan fails or a record is malformed.
    async fn list_results(
        &self,
        group: &str,
        student: &StudentId,
    ) -> Result<Vec<AuthoritativeResult>, StorageError>;

    /// Fill in a missing subject tag. Records that already carry one are left untouched.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the record does not exist.
    async fn backfill_subject(
        &self,
        group: &str,
        id: &AttemptId,
        subject: &Subject,
    ) -> Result<(), StorageError>;

    /// Whether any stored result, in any group, has an answer row for `code`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the scan fails.
    async fn is_item_referenced(&self, code: &ItemCode) -> Result<bool, StorageError>;
}

//
// ─── PROGRESS CACHE / AUTHORIZATIONS / ANALYSES ────────────────────────────────
//

#[async_trait]
pub trait ProgressRepository: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError` if the read fails.
    async fn get_progress(
        &self,
        student: &StudentId,
        phase: Phase,
    ) -> Result<Option<PhaseProgressRecord>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` if the record cannot be stored.
    async fn upsert_progress(&self, record: &PhaseProgressRecord) -> Result<(), StorageError>;
}

#[async_trait]
pub trait AuthorizationRepository: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError` if the read fails.
    async fn get_authorization(
        &self,
        grade: Grade,
        phase: Phase,
    ) -> Result<Option<PhaseAuthorization>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` if the record cannot be stored.
    async fn upsert_authorization(&self, auth: &PhaseAuthorization) -> Result<(), StorageError>;
}

#[async_trait]
pub trait WeaknessRepository: Send + Sync {
    /// Store the analysis, replacing any previous one for the same student and subject.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the analysis cannot be stored.
    async fn put_analysis(&self, analysis: &WeaknessAnalysis) -> Result<(), StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` if the read fails.
    async fn get_analysis(
        &self,
        student: &StudentId,
        subject: &Subject,
    ) -> Result<Option<WeaknessAnalysis>, StorageError>;
}

//
// ─── IN-MEMORY BACKEND ─────────────────────────────────────────────────────────
//

/// Simple in-memory repository implementation for testing and prototyping.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    items: Arc<Mutex<HashMap<ItemCode, BankItem>>>,
    counters: Arc<Mutex<HashMap<String, u32>>>,
    results: Arc<Mutex<HashMap<String, Vec<AuthoritativeResult>>>>,
    progress: Arc<Mutex<HashMap<(StudentId, Phase), PhaseProgressRecord>>>,
    authorizations: Arc<Mutex<HashMap<(Grade, Phase), PhaseAuthorization>>>,
    analyses: Arc<Mutex<HashMap<(StudentId, Subject), WeaknessAnalysis>>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<E: std::fmt::Display>(e: E) -> StorageError {
    StorageError::Connection(e.to_string())
}

#[async_trait]
impl BankItemRepository for InMemoryRepository {
    async fn insert_item(&self, item: &BankItem) -> Result<(), StorageError> {
        let mut guard = self.items.lock().map_err(poisoned)?;
        if guard.contains_key(&item.code) {
            return Err(StorageError::Conflict);
        }
        guard.insert(item.code.clone(), item.clone());
        Ok(())
    }

    async fn get_item(&self, code: &ItemCode) -> Result<BankItem, StorageError> {
        let guard = self.items.lock().map_err(poisoned)?;
        guard.get(code).cloned().ok_or(StorageError::NotFound)
    }

    async fn list_items(&self, filter: &BankItemFilter) -> Result<Vec<BankItem>, StorageError> {
        let guard = self.items.lock().map_err(poisoned)?;
        let mut items: Vec<BankItem> = guard
            .values()
            .filter(|item| filter.matches(item))
            .cloned()
            .collect();
        items.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(items)
    }

    async fn delete_item(&self, code: &ItemCode) -> Result<(), StorageError> {
        let mut guard = self.items.lock().map_err(poisoned)?;
        guard.remove(code).map(|_| ()).ok_or(StorageError::NotFound)
    }
}

#[async_trait]
impl CounterRepository for InMemoryRepository {
    async fn read_counter(&self, key: &str) -> Result<Option<u32>, StorageError> {
        let guard = self.counters.lock().map_err(poisoned)?;
        Ok(guard.get(key).copied())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<u32>,
        next: u32,
    ) -> Result<bool, StorageError> {
        let mut guard = self.counters.lock().map_err(poisoned)?;
        if guard.get(key).copied() != expected {
            return Ok(false);
        }
        guard.insert(key.to_owned(), next);
        Ok(true)
    }
}

#[async_trait]
impl ResultRepository for InMemoryRepository {
    async fn append_result(
        &self,
        group: &str,
        result: &AuthoritativeResult,
    ) -> Result<(), StorageError> {
        let mut guard = self.results.lock().map_err(poisoned)?;
        let rows = guard.entry(group.to_owned()).or_default();
        if rows.iter().any(|r| r.id == result.id) {
            return Err(StorageError::Conflict);
        }
        rows.push(result.clone());
        Ok(())
    }

    async fn list_results(
        &self,
        group: &str,
        student: &StudentId,
    ) -> Result<Vec<AuthoritativeResult>, StorageError> {
        let guard = self.results.lock().map_err(poisoned)?;
        Ok(guard
            .get(group)
            .map(|rows| {
                rows.iter()
                    .filter(|r| &r.student_id == student)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn backfill_subject(
        &self,
        group: &str,
        id: &AttemptId,
        subject: &Subject,
    ) -> Result<(), StorageError> {
        let mut guard = self.results.lock().map_err(poisoned)?;
        let row = guard
            .get_mut(group)
            .and_then(|rows| rows.iter_mut().find(|r| &r.id == id))
            .ok_or(StorageError::NotFound)?;
        if row.subject.is_none() {
            row.subject = Some(subject.clone());
        }
        Ok(())
    }

    async fn is_item_referenced(&self, code: &ItemCode) -> Result<bool, StorageError> {
        let guard = self.results.lock().map_err(poisoned)?;
        Ok(guard.values().flatten().any(|r| r.references(code)))
    }
}

#[async_trait]
impl ProgressRepository for InMemoryRepository {
    async fn get_progress(
        &self,
        student: &StudentId,
        phase: Phase,
    ) -> Result<Option<PhaseProgressRecord>, StorageError> {
        let guard = self.progress.lock().map_err(poisoned)?;
        Ok(guard.get(&(student.clone(), phase)).cloned())
    }

    async fn upsert_progress(&self, record: &PhaseProgressRecord) -> Result<(), StorageError> {
        let mut guard = self.progress.lock().map_err(poisoned)?;
        guard.insert((record.student_id.clone(), record.phase), record.clone());
        Ok(())
    }
}

#[async_trait]
impl AuthorizationRepository for InMemoryRepository {
    async fn get_authorization(
        &self,
        grade: Grade,
        phase: Phase,
    ) -> Result<Option<PhaseAuthorization>, StorageError> {
        let guard = self.authorizations.lock().map_err(poisoned)?;
        Ok(guard.get(&(grade, phase)).cloned())
    }

    async fn upsert_authorization(&self, auth: &PhaseAuthorization) -> Result<(), StorageError> {
        let mut guard = self.authorizations.lock().map_err(poisoned)?;
        guard.insert((auth.grade, auth.phase), auth.clone());
        Ok(())
    }
}

#[async_trait]
impl WeaknessRepository for InMemoryRepository {
    async fn put_analysis(&self, analysis: &WeaknessAnalysis) -> Result<(), StorageError> {
        let mut guard = self.analyses.lock().map_err(poisoned)?;
        guard.insert(
            (analysis.student_id.clone(), analysis.subject.clone()),
            analysis.clone(),
        );
        Ok(())
    }

    async fn get_analysis(
        &self,
        student: &StudentId,
        subject: &Subject,
    ) -> Result<Option<WeaknessAnalysis>, StorageError> {
        let guard = self.analyses.lock().map_err(poisoned)?;
        Ok(guard.get(&(student.clone(), subject.clone())).cloned())
    }
}

/// Aggregates the repositories behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub items: Arc<dyn BankItemRepository>,
    pub counters: Arc<dyn CounterRepository>,
    pub results: Arc<dyn ResultRepository>,
    pub progress: Arc<dyn ProgressRepository>,
    pub authorizations: Arc<dyn AuthorizationRepository>,
    pub analyses: Arc<dyn WeaknessRepository>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        Self::from_repository(InMemoryRepository::new())
    }

    /// Wire every repository slot to one backend.
    #[must_use]
    pub fn from_repository<R>(repo: R) -> Self
    where
        R: BankItemRepository
            + CounterRepository
            + ResultRepository
            + ProgressRepository
            + AuthorizationRepository
            + WeaknessRepository
            + Clone
            + 'static,
    {
        Self {
            items: Arc::new(repo.clone()),
            counters: Arc::new(repo.clone()),
            results: Arc::new(repo.clone()),
            progress: Arc::new(repo.clone()),
            authorizations: Arc::new(repo.clone()),
            analyses: Arc::new(repo),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exam_core::model::{
        BankItemDraft, CodeKey, OptionDraft, SubjectCode, TopicCode,
    };
    use exam_core::time::fixed_now;

    fn build_item(serial: u32, topic: &str, topic_code: &str) -> BankItem {
        let draft = BankItemDraft {
            subject: Subject::new("Matemáticas").unwrap(),
            subject_code: SubjectCode::new("MA").unwrap(),
            topic: Topic::new(topic).unwrap(),
            topic_code: TopicCode::new(topic_code).unwrap(),
            grade: Grade::new(7).unwrap(),
            level: DifficultyLevel::Basic,
            prompt: "Q".into(),
            prompt_image: None,
            options: vec![OptionDraft::text("a", true), OptionDraft::text("b", false)],
        };
        let key: CodeKey = draft.code_key();
        draft
            .validate(fixed_now())
            .unwrap()
            .assign_code(ItemCode::new(key, serial).unwrap())
            .unwrap()
    }

    fn build_result(id: &str, subject: Option<&str>) -> AuthoritativeResult {
        AuthoritativeResult {
            id: AttemptId::new(id).unwrap(),
            student_id: StudentId::new("stu-1").unwrap(),
            subject: subject.map(|s| Subject::new(s).unwrap()),
            phase: Phase::First,
            completed: true,
            score: 100.0,
            correct_count: 0,
            total_questions: 0,
            answers: Vec::new(),
            time_expired: false,
            locked: false,
            integrity_strikes: 0,
            started_at: fixed_now(),
            ended_at: fixed_now(),
        }
    }

    #[tokio::test]
    async fn duplicate_item_codes_conflict() {
        let repo = InMemoryRepository::new();
        let item = build_item(1, "Álgebra", "ALG");
        repo.insert_item(&item).await.unwrap();
        assert!(matches!(
            repo.insert_item(&item).await,
            Err(StorageError::Conflict)
        ));
        assert_eq!(repo.get_item(&item.code).await.unwrap(), item);
    }

    #[tokio::test]
    async fn list_applies_equality_filters() {
        let repo = InMemoryRepository::new();
        repo.insert_item(&build_item(2, "Álgebra", "ALG")).await.unwrap();
        repo.insert_item(&build_item(1, "Álgebra", "ALG")).await.unwrap();
        repo.insert_item(&build_item(1, "Geometría", "GEO")).await.unwrap();

        let all = repo.list_items(&BankItemFilter::default()).await.unwrap();
        assert_eq!(all.len(), 3);

        let algebra = repo
            .list_items(
                &BankItemFilter::for_subject(Subject::new("Matemáticas").unwrap())
                    .with_topic(Topic::new("Álgebra").unwrap()),
            )
            .await
            .unwrap();
        let codes: Vec<String> = algebra.iter().map(|i| i.code.to_string()).collect();
        assert_eq!(codes, vec!["MAALG7B001", "MAALG7B002"]);

        let none = repo
            .list_items(&BankItemFilter::default().with_grade(Grade::new(8).unwrap()))
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn compare_and_swap_rejects_stale_expectations() {
        let repo = InMemoryRepository::new();
        assert_eq!(repo.read_counter("MAALG7B").await.unwrap(), None);
        assert!(repo.compare_and_swap("MAALG7B", None, 1).await.unwrap());
        assert!(!repo.compare_and_swap("MAALG7B", None, 1).await.unwrap());
        assert!(repo.compare_and_swap("MAALG7B", Some(1), 2).await.unwrap());
        assert_eq!(repo.read_counter("MAALG7B").await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn results_are_append_only_per_group() {
        let repo = InMemoryRepository::new();
        let result = build_result("MA-1", Some("Matemáticas"));
        repo.append_result("first_phase", &result).await.unwrap();
        assert!(matches!(
            repo.append_result("first_phase", &result).await,
            Err(StorageError::Conflict)
        ));
        // Other groups are independent collections.
        repo.append_result("phase2", &result).await.unwrap();

        let listed = repo
            .list_results("first_phase", &StudentId::new("stu-1").unwrap())
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        let other_student = repo
            .list_results("first_phase", &StudentId::new("stu-2").unwrap())
            .await
            .unwrap();
        assert!(other_student.is_empty());
    }

    #[tokio::test]
    async fn backfill_only_fills_missing_subjects() {
        let repo = InMemoryRepository::new();
        repo.append_result("first_phase", &build_result("MA-1", None))
            .await
            .unwrap();
        repo.append_result("first_phase", &build_result("LE-2", Some("Lenguaje")))
            .await
            .unwrap();

        let math = Subject::new("Matemáticas").unwrap();
        repo.backfill_subject("first_phase", &AttemptId::new("MA-1").unwrap(), &math)
            .await
            .unwrap();
        repo.backfill_subject("first_phase", &AttemptId::new("LE-2").unwrap(), &math)
            .await
            .unwrap();

        let listed = repo
            .list_results("first_phase", &StudentId::new("stu-1").unwrap())
            .await
            .unwrap();
        assert_eq!(listed[0].subject.as_ref(), Some(&math));
        assert_eq!(listed[1].subject.as_ref().unwrap().as_str(), "Lenguaje");

        assert!(matches!(
            repo.backfill_subject("first_phase", &AttemptId::new("nope").unwrap(), &math)
                .await,
            Err(StorageError::NotFound)
        ));
    }

    #[tokio::test]
    async fn storage_slots_share_one_backend() {
        let storage = Storage::in_memory();
        let item = build_item(1, "Álgebra", "ALG");
        storage.items.insert_item(&item).await.unwrap();
        assert!(!storage.results.is_item_referenced(&item.code).await.unwrap());
        assert!(storage.counters.compare_and_swap("k", None, 1).await.unwrap());
        assert_eq!(storage.counters.read_counter("k").await.unwrap(), Some(1));
    }
}
