use std::sync::Arc;
use std::time::Duration;

use exam_core::Clock;
use exam_core::model::{
    AuthoritativeResult, NarrativeSource, Phase, StudentId, Subject, SubjectCatalog,
    WeaknessAnalysis,
};
use storage::repository::{ResultRepository, WeaknessRepository};
use tracing::{debug, info, warn};

use super::narrative::{NarrativeProvider, PerformanceSummary, template_narrative};
use crate::error::{AnalysisError, NarrativeError};
use crate::progression::compat;

/// Upper bound on one narrative request.
pub const DEFAULT_NARRATIVE_TIMEOUT: Duration = Duration::from_secs(20);

/// Computes and stores the per-subject weakness analysis after a first-phase exam.
#[derive(Clone)]
pub struct WeaknessAnalysisService {
    clock: Clock,
    results: Arc<dyn ResultRepository>,
    analyses: Arc<dyn WeaknessRepository>,
    narrator: Arc<dyn NarrativeProvider>,
    narrative_timeout: Duration,
    catalog: SubjectCatalog,
}

impl WeaknessAnalysisService {
    #[must_use]
    pub fn new(
        clock: Clock,
        results: Arc<dyn ResultRepository>,
        analyses: Arc<dyn WeaknessRepository>,
        narrator: Arc<dyn NarrativeProvider>,
    ) -> Self {
        Self {
            clock,
            results,
            analyses,
            narrator,
            narrative_timeout: DEFAULT_NARRATIVE_TIMEOUT,
            catalog: SubjectCatalog::default(),
        }
    }

    /// A provider that has not answered within `timeout` is treated as failed.
    #[must_use]
    pub fn with_narrative_timeout(mut self, timeout: Duration) -> Self {
        self.narrative_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_catalog(mut self, catalog: SubjectCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Stored analysis for a student and subject, if any.
    ///
    /// # Errors
    ///
    /// Returns `AnalysisError::Storage` if the read fails.
    pub async fn analysis(
        &self,
        student: &StudentId,
        subject: &Subject,
    ) -> Result<Option<WeaknessAnalysis>, AnalysisError> {
        Ok(self.analyses.get_analysis(student, subject).await?)
    }

    /// Analyze one completed first-phase result and store the outcome.
    ///
    /// Re-running for a result that already has a stored, narrated analysis
    /// returns it without asking the provider again. Provider failures fall
    /// back to the template narrative, as does a provider that stalls past the
    /// narrative timeout.
    ///
    /// # Errors
    ///
    /// Returns `AnalysisError` if the result cannot be analyzed or stored.
    pub async fn analyze_result(
        &self,
        result: &AuthoritativeResult,
    ) -> Result<WeaknessAnalysis, AnalysisError> {
        let subject = compat::attribute(result, &self.catalog)
            .ok_or_else(|| AnalysisError::UnknownSubject(result.id.to_string()))?;

        if let Some(existing) = self.analyses.get_analysis(&result.student_id, &subject).await? {
            if existing.source_attempt == result.id && existing.narrative.is_some() {
                debug!(attempt = %result.id, "analysis already stored");
                return Ok(existing);
            }
        }

        let analysis = WeaknessAnalysis::from_result(result, subject, self.clock.now())?;
        let summary = PerformanceSummary::from_analysis(&analysis);
        let narrated = tokio::time::timeout(self.narrative_timeout, self.narrator.narrate(&summary))
            .await
            .unwrap_or(Err(NarrativeError::TimedOut(self.narrative_timeout)));
        let analysis = match narrated {
            Ok(narrative) => analysis.with_narrative(narrative, NarrativeSource::Generated),
            Err(err) => {
                warn!(attempt = %result.id, error = %err, "narrative unavailable; using template");
                let narrative = template_narrative(&analysis);
                analysis.with_narrative(narrative, NarrativeSource::Template)
            }
        };

        self.analyses.put_analysis(&analysis).await?;
        info!(
            attempt = %result.id,
            subject = %analysis.subject,
            primary = %analysis.primary_weakness,
            "weakness analysis stored"
        );
        Ok(analysis)
    }

    /// Analyze the most recent completed first-phase result for the subject.
    ///
    /// Returns `None` when the student has not completed the first phase.
    ///
    /// # Errors
    ///
    /// Returns `AnalysisError` if results cannot be read or the analysis fails.
    pub async fn analyze_latest(
        &self,
        student: &StudentId,
        subject: &Subject,
    ) -> Result<Option<WeaknessAnalysis>, AnalysisError> {
        let attributed = compat::load_phase_results(
            self.results.as_ref(),
            &self.catalog,
            student,
            Phase::First,
        )
        .await?;
        let Some(latest) = attributed.into_iter().rev().find(|r| r.completes(subject)) else {
            return Ok(None);
        };
        self.analyze_result(&latest.result).await.map(Some)
    }
}
