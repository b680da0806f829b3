use std::sync::Arc;

use exam_core::Clock;
use exam_core::model::{
    AttemptId, BankItem, ExamSession, Phase, ProctorPolicy, StudentId, Subject, SubjectCatalog,
};
use storage::repository::{ProgressRepository, ResultRepository};
use tracing::debug;

use super::controller::ExamSessionController;
use super::host::DisplayHost;
use crate::analysis::WeaknessAnalysisService;
use crate::error::SessionError;

/// Opens exam sessions wired to the result store, the progress cache and,
/// optionally, weakness analysis for first-phase results.
#[derive(Clone)]
pub struct ExamSessionService {
    clock: Clock,
    results: Arc<dyn ResultRepository>,
    progress: Arc<dyn ProgressRepository>,
    catalog: SubjectCatalog,
    policy: ProctorPolicy,
    analysis: Option<Arc<WeaknessAnalysisService>>,
}

impl ExamSessionService {
    #[must_use]
    pub fn new(
        clock: Clock,
        results: Arc<dyn ResultRepository>,
        progress: Arc<dyn ProgressRepository>,
    ) -> Self {
        Self {
            clock,
            results,
            progress,
            catalog: SubjectCatalog::default(),
            policy: ProctorPolicy::default(),
            analysis: None,
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: ProctorPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn with_catalog(mut self, catalog: SubjectCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    #[must_use]
    pub fn with_analysis(mut self, analysis: Arc<WeaknessAnalysisService>) -> Self {
        self.analysis = Some(analysis);
        self
    }

    #[must_use]
    pub fn policy(&self) -> ProctorPolicy {
        self.policy
    }

    /// Open a session in `Welcome` over `items`, keeping their order.
    ///
    /// The attempt id is issued here and prefixed with the subject code.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Empty` if no items are provided and
    /// `SessionError::UnknownSubject` if the subject is not in the catalog.
    pub fn open_session(
        &self,
        student: StudentId,
        subject: Subject,
        phase: Phase,
        items: Vec<BankItem>,
        host: Arc<dyn DisplayHost>,
    ) -> Result<ExamSessionController, SessionError> {
        if items.is_empty() {
            return Err(SessionError::Empty);
        }
        let code = self
            .catalog
            .code_for(&subject)
            .ok_or_else(|| SessionError::UnknownSubject(subject.clone()))?;
        let attempt = AttemptId::generate(code);
        debug!(%attempt, %student, %subject, %phase, questions = items.len(), "exam session opened");

        let session = ExamSession::new(attempt, student, subject, phase, &items, self.policy);
        Ok(ExamSessionController::new(
            self.clock,
            Arc::clone(&self.results),
            Arc::clone(&self.progress),
            self.analysis.clone(),
            host,
            session,
            items,
        ))
    }
}
