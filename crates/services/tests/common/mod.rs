#![allow(dead_code)]

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use exam_core::model::{
    AnswerOutcome, AttemptId, AuthoritativeResult, BankItem, BankItemDraft, DifficultyLevel,
    Grade, ItemCode, OptionDraft, Phase, PhaseProgressRecord, StudentId, Subject, SubjectCode,
    Topic, TopicCode, WeaknessNarrative,
};
use exam_core::time::fixed_now;
use services::analysis::{NarrativeProvider, PerformanceSummary};
use services::error::NarrativeError;
use services::sessions::{DisplayError, DisplayHost, Notice};
use storage::repository::{
    CounterRepository, InMemoryRepository, ProgressRepository, ResultRepository, StorageError,
};

pub fn math() -> Subject {
    Subject::new("Matemáticas").unwrap()
}

pub fn language() -> Subject {
    Subject::new("Lenguaje").unwrap()
}

pub fn student() -> StudentId {
    StudentId::new("stu-1").unwrap()
}

pub fn grade() -> Grade {
    Grade::new(7).unwrap()
}

pub fn topic(name: &str) -> Topic {
    Topic::new(name).unwrap()
}

pub fn math_draft(topic_name: &str, topic_code: &str, prompt: &str) -> BankItemDraft {
    BankItemDraft {
        subject: math(),
        subject_code: SubjectCode::new("MA").unwrap(),
        topic: topic(topic_name),
        topic_code: TopicCode::new(topic_code).unwrap(),
        grade: grade(),
        level: DifficultyLevel::Basic,
        prompt: prompt.to_string(),
        prompt_image: None,
        options: vec![
            OptionDraft::text("correct", true),
            OptionDraft::text("wrong", false),
            OptionDraft::text("also wrong", false),
        ],
    }
}

/// A math item with an explicit serial, bypassing the counter.
pub fn math_item(serial: u32, topic_name: &str, topic_code: &str) -> BankItem {
    let draft = math_draft(topic_name, topic_code, &format!("{topic_name} #{serial}"));
    let key = draft.code_key();
    draft
        .validate(fixed_now())
        .unwrap()
        .assign_code(ItemCode::new(key, serial).unwrap())
        .unwrap()
}

pub fn completed_result(
    id: &str,
    subject: Option<Subject>,
    phase: Phase,
    answers: Vec<AnswerOutcome>,
) -> AuthoritativeResult {
    let total = u32::try_from(answers.len()).unwrap();
    let correct = u32::try_from(answers.iter().filter(|a| a.correct).count()).unwrap();
    AuthoritativeResult {
        id: AttemptId::new(id).unwrap(),
        student_id: student(),
        subject,
        phase,
        completed: true,
        score: exam_core::model::percentage(correct, total),
        correct_count: correct,
        total_questions: total,
        answers,
        time_expired: false,
        locked: false,
        integrity_strikes: 0,
        started_at: fixed_now(),
        ended_at: fixed_now() + chrono::Duration::minutes(30),
    }
}

//
// ─── DISPLAY HOST ──────────────────────────────────────────────────────────────
//

/// Records every call; full-screen can be made to fail.
#[derive(Default)]
pub struct RecordingHost {
    pub deny_fullscreen: bool,
    pub fullscreen_requests: AtomicUsize,
    pub releases: AtomicUsize,
    pub detaches: AtomicUsize,
    pub notices: Mutex<Vec<Notice>>,
}

impl RecordingHost {
    pub fn denying() -> Self {
        Self {
            deny_fullscreen: true,
            ..Self::default()
        }
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().unwrap().clone()
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

impl DisplayHost for RecordingHost {
    fn request_fullscreen(&self) -> Result<(), DisplayError> {
        self.fullscreen_requests.fetch_add(1, Ordering::SeqCst);
        if self.deny_fullscreen {
            Err(DisplayError("permission denied".into()))
        } else {
            Ok(())
        }
    }

    fn release_fullscreen(&self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }

    fn detach_listeners(&self) {
        self.detaches.fetch_add(1, Ordering::SeqCst);
    }

    fn notify(&self, notice: Notice) {
        self.notices.lock().unwrap().push(notice);
    }
}

//
// ─── FAULTY STORES ─────────────────────────────────────────────────────────────
//

/// Result store whose appends fail while `failing` is set.
pub struct FlakyResults {
    pub inner: InMemoryRepository,
    pub failing: Mutex<bool>,
    pub appends: AtomicUsize,
}

impl FlakyResults {
    pub fn new(inner: InMemoryRepository, failing: bool) -> Self {
        Self {
            inner,
            failing: Mutex::new(failing),
            appends: AtomicUsize::new(0),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }
}

#[async_trait]
impl ResultRepository for FlakyResults {
    async fn append_result(
        &self,
        group: &str,
        result: &AuthoritativeResult,
    ) -> Result<(), StorageError> {
        self.appends.fetch_add(1, Ordering::SeqCst);
        let failing = *self.failing.lock().unwrap();
        if failing {
            return Err(StorageError::Connection("network unreachable".into()));
        }
        self.inner.append_result(group, result).await
    }

    async fn list_results(
        &self,
        group: &str,
        student: &StudentId,
    ) -> Result<Vec<AuthoritativeResult>, StorageError> {
        self.inner.list_results(group, student).await
    }

    async fn backfill_subject(
        &self,
        group: &str,
        id: &AttemptId,
        subject: &Subject,
    ) -> Result<(), StorageError> {
        self.inner.backfill_subject(group, id, subject).await
    }

    async fn is_item_referenced(&self, code: &ItemCode) -> Result<bool, StorageError> {
        self.inner.is_item_referenced(code).await
    }
}

/// Progress cache that can be read but never written.
pub struct ReadOnlyProgress {
    pub inner: InMemoryRepository,
}

#[async_trait]
impl ProgressRepository for ReadOnlyProgress {
    async fn get_progress(
        &self,
        student: &StudentId,
        phase: Phase,
    ) -> Result<Option<PhaseProgressRecord>, StorageError> {
        self.inner.get_progress(student, phase).await
    }

    async fn upsert_progress(&self, _record: &PhaseProgressRecord) -> Result<(), StorageError> {
        Err(StorageError::Connection("cache offline".into()))
    }
}

/// Counter that always loses the swap.
#[derive(Default)]
pub struct AlwaysContended {
    pub swaps: AtomicUsize,
}

#[async_trait]
impl CounterRepository for AlwaysContended {
    async fn read_counter(&self, _key: &str) -> Result<Option<u32>, StorageError> {
        Ok(Some(4))
    }

    async fn compare_and_swap(
        &self,
        _key: &str,
        _expected: Option<u32>,
        _next: u32,
    ) -> Result<bool, StorageError> {
        let n = self.swaps.fetch_add(1, Ordering::SeqCst);
        if n % 2 == 0 {
            Ok(false)
        } else {
            Err(StorageError::Contention("database is locked".into()))
        }
    }
}

//
// ─── NARRATIVE PROVIDERS ───────────────────────────────────────────────────────
//

/// Returns a fixed narrative and counts calls.
#[derive(Default)]
pub struct CannedNarrator {
    pub calls: AtomicUsize,
}

#[async_trait]
impl NarrativeProvider for CannedNarrator {
    async fn narrate(
        &self,
        summary: &PerformanceSummary,
    ) -> Result<WeaknessNarrative, NarrativeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(WeaknessNarrative {
            summary: format!("Work on {}", summary.primary_weakness),
            key_findings: vec!["one finding".into()],
            action_plan: "practice".into(),
            motivation: "keep going".into(),
        })
    }
}

/// Always fails, as an unreachable provider would.
#[derive(Default)]
pub struct DownNarrator {
    pub calls: AtomicUsize,
}

#[async_trait]
impl NarrativeProvider for DownNarrator {
    async fn narrate(
        &self,
        _summary: &PerformanceSummary,
    ) -> Result<WeaknessNarrative, NarrativeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(NarrativeError::EmptyResponse)
    }
}

/// Accepts the request and never answers.
#[derive(Default)]
pub struct StalledNarrator {
    pub calls: AtomicUsize,
}

#[async_trait]
impl NarrativeProvider for StalledNarrator {
    async fn narrate(
        &self,
        _summary: &PerformanceSummary,
    ) -> Result<WeaknessNarrative, NarrativeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }
}
