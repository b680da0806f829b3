use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::model::catalog::{Subject, Topic};
use crate::model::ids::{AttemptId, StudentId};
use crate::model::phase::Phase;
use crate::model::result::{AuthoritativeResult, percentage};

/// Topics at or above this percentage are reported as strengths.
pub const STRENGTH_THRESHOLD: f64 = 70.0;
/// Topics below this percentage are reported as weaknesses.
pub const WEAKNESS_THRESHOLD: f64 = 60.0;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum WeaknessError {
    #[error("weakness analysis is derived from first-phase results, got {0}")]
    NotFirstPhase(Phase),

    #[error("result {0} is not completed")]
    NotCompleted(String),

    #[error("result {0} has no per-question answers to analyze")]
    NoAnswers(String),
}

//
// ─── TOPIC PERFORMANCE ─────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicPerformance {
    pub topic: Topic,
    pub correct: u32,
    pub incorrect: u32,
    pub percentage: f64,
}

impl TopicPerformance {
    #[must_use]
    pub fn new(topic: Topic, correct: u32, incorrect: u32) -> Self {
        let total = correct.saturating_add(incorrect);
        Self {
            topic,
            correct,
            incorrect,
            percentage: percentage(correct, total),
        }
    }

    #[must_use]
    pub fn total(&self) -> u32 {
        self.correct.saturating_add(self.incorrect)
    }
}

/// Ordering that puts the weakest topic first.
///
/// Lowest percentage first; then most incorrect answers; then most questions;
/// then topic name so the ranking is total.
#[must_use]
pub fn weakness_order(a: &TopicPerformance, b: &TopicPerformance) -> Ordering {
    // Compare correct/total exactly via cross-multiplication.
    let lhs = u64::from(a.correct) * u64::from(b.total());
    let rhs = u64::from(b.correct) * u64::from(a.total());
    lhs.cmp(&rhs)
        .then_with(|| b.incorrect.cmp(&a.incorrect))
        .then_with(|| b.total().cmp(&a.total()))
        .then_with(|| a.topic.cmp(&b.topic))
}

//
// ─── NARRATIVE ─────────────────────────────────────────────────────────────────
//

/// Free-text feedback produced by the narrative service, or its template fallback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeaknessNarrative {
    pub summary: String,
    #[serde(default)]
    pub key_findings: Vec<String>,
    pub action_plan: String,
    pub motivation: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NarrativeSource {
    Generated,
    Template,
}

//
// ─── ANALYSIS ──────────────────────────────────────────────────────────────────
//

/// Per-student, per-subject diagnosis computed from a completed first-phase result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeaknessAnalysis {
    pub student_id: StudentId,
    pub subject: Subject,
    pub source_attempt: AttemptId,
    pub primary_weakness: Topic,
    /// All topics, weakest first.
    pub topics: Vec<TopicPerformance>,
    pub strengths: Vec<Topic>,
    pub weaknesses: Vec<Topic>,
    #[serde(default)]
    pub narrative: Option<WeaknessNarrative>,
    #[serde(default)]
    pub narrative_source: Option<NarrativeSource>,
    pub generated_at: DateTime<Utc>,
}

impl WeaknessAnalysis {
    /// Derive the analysis for `subject` from a completed first-phase result.
    ///
    /// The same result always yields the same ranking.
    ///
    /// # Errors
    ///
    /// Returns `WeaknessError` if the result is not a completed first-phase
    /// attempt or carries no per-question answers.
    pub fn from_result(
        result: &AuthoritativeResult,
        subject: Subject,
        now: DateTime<Utc>,
    ) -> Result<Self, WeaknessError> {
        if result.phase != Phase::First {
            return Err(WeaknessError::NotFirstPhase(result.phase));
        }
        if !result.completed {
            return Err(WeaknessError::NotCompleted(result.id.to_string()));
        }

        let mut tally: BTreeMap<&Topic, (u32, u32)> = BTreeMap::new();
        for answer in &result.answers {
            let entry = tally.entry(&answer.topic).or_default();
            if answer.correct {
                entry.0 = entry.0.saturating_add(1);
            } else {
                entry.1 = entry.1.saturating_add(1);
            }
        }

        let mut topics: Vec<TopicPerformance> = tally
            .into_iter()
            .map(|(topic, (correct, incorrect))| {
                TopicPerformance::new(topic.clone(), correct, incorrect)
            })
            .collect();
        topics.sort_by(weakness_order);

        let primary_weakness = topics
            .first()
            .map(|t| t.topic.clone())
            .ok_or_else(|| WeaknessError::NoAnswers(result.id.to_string()))?;

        let weaknesses = topics
            .iter()
            .filter(|t| t.percentage < WEAKNESS_THRESHOLD)
            .map(|t| t.topic.clone())
            .collect();
        let mut strengths: Vec<&TopicPerformance> = topics
            .iter()
            .filter(|t| t.percentage >= STRENGTH_THRESHOLD)
            .collect();
        strengths.reverse();
        let strengths = strengths.into_iter().map(|t| t.topic.clone()).collect();

        Ok(Self {
            student_id: result.student_id.clone(),
            subject,
            source_attempt: result.id.clone(),
            primary_weakness,
            topics,
            strengths,
            weaknesses,
            narrative: None,
            narrative_source: None,
            generated_at: now,
        })
    }

    #[must_use]
    pub fn topic(&self, topic: &Topic) -> Option<&TopicPerformance> {
        self.topics.iter().find(|t| &t.topic == topic)
    }

    #[must_use]
    pub fn with_narrative(mut self, narrative: WeaknessNarrative, source: NarrativeSource) -> Self {
        self.narrative = Some(narrative);
        self.narrative_source = Some(source);
        self
    }
}
