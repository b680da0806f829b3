use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::model::bank_item::BankItem;
use crate::model::catalog::{Subject, Topic};
use crate::model::ids::{AttemptId, OptionId, StudentId};
use crate::model::item_code::ItemCode;
use crate::model::phase::Phase;
use crate::model::session::ExamSession;

#[derive(Debug, Error, Clone, PartialEq)]
#[non_exhaustive]
pub enum ResultError {
    #[error("session has not reached a terminal state")]
    NotTerminal,

    #[error("no bank item supplied for question {0}")]
    MissingItem(String),

    #[error("score must be within 0..=100, got {0}")]
    InvalidScore(f64),

    #[error("correct answers ({correct}) exceed total questions ({total})")]
    CountMismatch { correct: u32, total: u32 },

    #[error("ended_at is before started_at")]
    InvalidTimeRange,

    #[error("too many questions for a single result: {0}")]
    TooManyQuestions(usize),
}

/// Per-question outcome stored with a result; feeds weakness analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerOutcome {
    pub question: ItemCode,
    pub topic: Topic,
    pub selected: Option<OptionId>,
    pub correct: bool,
}

/// Append-only record of a finished exam attempt.
///
/// `subject` is optional only because older records were written without it;
/// every record produced by this engine carries one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthoritativeResult {
    pub id: AttemptId,
    pub student_id: StudentId,
    #[serde(default)]
    pub subject: Option<Subject>,
    pub phase: Phase,
    pub completed: bool,
    pub score: f64,
    pub correct_count: u32,
    pub total_questions: u32,
    #[serde(default)]
    pub answers: Vec<AnswerOutcome>,
    #[serde(default)]
    pub time_expired: bool,
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub integrity_strikes: u8,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl AuthoritativeResult {
    /// Grade a finished session against its bank items.
    ///
    /// Unanswered questions count as incorrect. The score is a percentage
    /// rounded to two decimals.
    ///
    /// # Errors
    ///
    /// Returns `ResultError::NotTerminal` for sessions still in progress and
    /// `ResultError::MissingItem` when a question's item is not supplied.
    pub fn grade(session: &ExamSession, items: &[BankItem]) -> Result<Self, ResultError> {
        if !session.is_terminal() {
            return Err(ResultError::NotTerminal);
        }
        let (Some(started_at), Some(ended_at)) = (session.started_at(), session.ended_at())
        else {
            return Err(ResultError::NotTerminal);
        };

        let by_code: HashMap<&ItemCode, &BankItem> =
            items.iter().map(|item| (&item.code, item)).collect();

        let mut answers = Vec::with_capacity(session.questions().len());
        for question in session.questions() {
            let item = by_code
                .get(&question.code)
                .ok_or_else(|| ResultError::MissingItem(question.code.to_string()))?;
            let selected = session.answers().get(&question.code).cloned();
            let correct = selected.as_ref().is_some_and(|s| item.correct_option() == Some(s));
            answers.push(AnswerOutcome {
                question: question.code.clone(),
                topic: item.topic.clone(),
                selected,
                correct,
            });
        }

        let total_questions = u32::try_from(answers.len())
            .map_err(|_| ResultError::TooManyQuestions(answers.len()))?;
        let correct_count = u32::try_from(answers.iter().filter(|a| a.correct).count())
            .map_err(|_| ResultError::TooManyQuestions(answers.len()))?;

        Self::from_persisted(Self {
            id: session.attempt_id().clone(),
            student_id: session.student_id().clone(),
            subject: Some(session.subject().clone()),
            phase: session.phase(),
            completed: true,
            score: percentage(correct_count, total_questions),
            correct_count,
            total_questions,
            answers,
            time_expired: session.time_expired(),
            locked: session.locked(),
            integrity_strikes: session.integrity_strikes(),
            started_at,
            ended_at,
        })
    }

    /// Reject malformed records at the storage boundary.
    ///
    /// # Errors
    ///
    /// Returns `ResultError` when the score, counts or time range are inconsistent.
    pub fn from_persisted(result: Self) -> Result<Self, ResultError> {
        if !result.score.is_finite() || !(0.0..=100.0).contains(&result.score) {
            return Err(ResultError::InvalidScore(result.score));
        }
        if result.correct_count > result.total_questions {
            return Err(ResultError::CountMismatch {
                correct: result.correct_count,
                total: result.total_questions,
            });
        }
        if result.ended_at < result.started_at {
            return Err(ResultError::InvalidTimeRange);
        }
        Ok(result)
    }

    /// Whether any answer row references the given item.
    #[must_use]
    pub fn references(&self, code: &ItemCode) -> bool {
        self.answers.iter().any(|a| &a.question == code)
    }
}

/// Percentage rounded to two decimals; zero when there is nothing to score.
#[must_use]
pub fn percentage(correct: u32, total: u32) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let raw = f64::from(correct) / f64::from(total) * 100.0;
    (raw * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        BankItemDraft, DifficultyLevel, Grade, OptionDraft, ProctorPolicy, SubjectCode, TopicCode,
    };
    use crate::proctor::{ExamEvent, StrikeChoice};
    use crate::time::fixed_now;
    use chrono::Duration;

    fn item(serial: u32, topic: &str, topic_code: &str) -> BankItem {
        let draft = BankItemDraft {
            subject: Subject::new("Matemáticas").unwrap(),
            subject_code: SubjectCode::new("MA").unwrap(),
            topic: Topic::new(topic).unwrap(),
            topic_code: TopicCode::new(topic_code).unwrap(),
            grade: Grade::new(7).unwrap(),
            level: DifficultyLevel::Basic,
            prompt: format!("Q{serial}"),
            prompt_image: None,
            options: vec![OptionDraft::text("right", true), OptionDraft::text("wrong", false)],
        };
        let key = draft.code_key();
        draft
            .validate(fixed_now())
            .unwrap()
            .assign_code(ItemCode::new(key, serial).unwrap())
            .unwrap()
    }

    fn items() -> Vec<BankItem> {
        vec![
            item(1, "Álgebra", "ALG"),
            item(2, "Álgebra", "ALG"),
            item(3, "Geometría", "GEO"),
        ]
    }

    fn session(items: &[BankItem]) -> ExamSession {
        ExamSession::new(
            AttemptId::new("MA-graded").unwrap(),
            StudentId::new("stu-1").unwrap(),
            Subject::new("Matemáticas").unwrap(),
            Phase::First,
            items,
            ProctorPolicy::default(),
        )
    }

    #[test]
    fn grading_requires_terminal_session() {
        let items = items();
        let mut s = session(&items);
        assert_eq!(
            AuthoritativeResult::grade(&s, &items).unwrap_err(),
            ResultError::NotTerminal
        );
        s.apply(ExamEvent::Start, fixed_now()).unwrap();
        assert_eq!(
            AuthoritativeResult::grade(&s, &items).unwrap_err(),
            ResultError::NotTerminal
        );
    }

    #[test]
    fn grades_answers_and_counts_unanswered_as_wrong() {
        let items = items();
        let mut s = session(&items);
        s.apply(ExamEvent::Start, fixed_now()).unwrap();
        s.apply(
            ExamEvent::SelectOption {
                question: items[0].code.clone(),
                option: OptionId::new("A").unwrap(),
            },
            fixed_now(),
        )
        .unwrap();
        s.apply(
            ExamEvent::SelectOption {
                question: items[1].code.clone(),
                option: OptionId::new("B").unwrap(),
            },
            fixed_now(),
        )
        .unwrap();
        s.apply(ExamEvent::WindowBlur, fixed_now()).unwrap();
        s.apply(
            ExamEvent::Strike(StrikeChoice::EndNow),
            fixed_now() + Duration::minutes(5),
        )
        .unwrap();

        let result = AuthoritativeResult::grade(&s, &items).unwrap();
        assert!(result.completed);
        assert_eq!(result.correct_count, 1);
        assert_eq!(result.total_questions, 3);
        assert!((result.score - 33.33).abs() < f64::EPSILON);
        assert_eq!(result.integrity_strikes, 1);
        assert_eq!(result.subject.as_ref().unwrap().as_str(), "Matemáticas");
        assert!(result.answers[2].selected.is_none());
        assert!(!result.answers[2].correct);
        assert!(result.references(&items[2].code));
    }

    #[test]
    fn missing_items_are_reported() {
        let items = items();
        let mut s = session(&items);
        s.apply(ExamEvent::Start, fixed_now()).unwrap();
        s.apply(ExamEvent::ClockTick, fixed_now() + Duration::hours(2))
            .unwrap();
        assert!(matches!(
            AuthoritativeResult::grade(&s, &items[..2]),
            Err(ResultError::MissingItem(_))
        ));
    }

    #[test]
    fn persisted_records_are_validated() {
        let base = AuthoritativeResult {
            id: AttemptId::new("MA-1").unwrap(),
            student_id: StudentId::new("stu-1").unwrap(),
            subject: None,
            phase: Phase::Second,
            completed: true,
            score: 50.0,
            correct_count: 1,
            total_questions: 2,
            answers: Vec::new(),
            time_expired: false,
            locked: false,
            integrity_strikes: 0,
            started_at: fixed_now(),
            ended_at: fixed_now(),
        };
        assert!(AuthoritativeResult::from_persisted(base.clone()).is_ok());

        let mut bad_score = base.clone();
        bad_score.score = 120.0;
        assert!(AuthoritativeResult::from_persisted(bad_score).is_err());

        let mut bad_counts = base.clone();
        bad_counts.correct_count = 3;
        assert!(AuthoritativeResult::from_persisted(bad_counts).is_err());

        let mut bad_time = base;
        bad_time.ended_at = fixed_now() - Duration::seconds(1);
        assert_eq!(
            AuthoritativeResult::from_persisted(bad_time).unwrap_err(),
            ResultError::InvalidTimeRange
        );
    }

    #[test]
    fn percentage_rounds_to_two_decimals() {
        assert_eq!(percentage(0, 0), 0.0);
        assert_eq!(percentage(2, 3), 66.67);
        assert_eq!(percentage(5, 5), 100.0);
    }

    #[test]
    fn legacy_records_without_subject_deserialize() {
        let json = r#"{
            "id": "CN-legacy-7",
            "studentId": "stu-9",
            "phase": "second",
            "completed": true,
            "score": 80.0,
            "correctCount": 8,
            "totalQuestions": 10,
            "startedAt": "2023-11-14T22:13:20Z",
            "endedAt": "2023-11-14T22:43:20Z"
        }"#;
        let result: AuthoritativeResult = serde_json::from_str(json).unwrap();
        assert!(result.subject.is_none());
        assert!(result.answers.is_empty());
    }
}
