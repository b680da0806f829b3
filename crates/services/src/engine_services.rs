use std::sync::Arc;

use storage::repository::Storage;

use crate::Clock;
use crate::allocation::QuestionBankAllocator;
use crate::analysis::{ChatNarrativeProvider, NarrativeProvider, WeaknessAnalysisService};
use crate::config::EngineConfig;
use crate::error::EngineServicesError;
use crate::progression::PhaseProgressionResolver;
use crate::sessions::ExamSessionService;

/// Assembles the engine's services over one storage backend.
#[derive(Clone)]
pub struct EngineServices {
    config: EngineConfig,
    storage: Storage,
    allocator: Arc<QuestionBankAllocator>,
    sessions: Arc<ExamSessionService>,
    resolver: Arc<PhaseProgressionResolver>,
    analysis: Arc<WeaknessAnalysisService>,
}

impl EngineServices {
    /// Build services over `storage`, using the chat narrative provider from `config`.
    #[must_use]
    pub fn new(storage: Storage, config: EngineConfig, clock: Clock) -> Self {
        let narrator = Arc::new(ChatNarrativeProvider::new(config.narrative.clone()));
        Self::with_narrator(storage, config, clock, narrator)
    }

    #[must_use]
    pub fn with_narrator(
        storage: Storage,
        config: EngineConfig,
        clock: Clock,
        narrator: Arc<dyn NarrativeProvider>,
    ) -> Self {
        let analysis = Arc::new(WeaknessAnalysisService::new(
            clock,
            Arc::clone(&storage.results),
            Arc::clone(&storage.analyses),
            narrator,
        )
        .with_narrative_timeout(config.narrative_timeout));
        let allocator = Arc::new(
            QuestionBankAllocator::new(
                clock,
                Arc::clone(&storage.items),
                Arc::clone(&storage.counters),
                Arc::clone(&storage.results),
                Arc::clone(&storage.analyses),
            )
            .with_policy(config.allocation_policy()),
        );
        let sessions = Arc::new(
            ExamSessionService::new(
                clock,
                Arc::clone(&storage.results),
                Arc::clone(&storage.progress),
            )
            .with_policy(config.proctor_policy())
            .with_analysis(Arc::clone(&analysis)),
        );
        let resolver = Arc::new(PhaseProgressionResolver::new(
            Arc::clone(&storage.results),
            Arc::clone(&storage.progress),
            Arc::clone(&storage.authorizations),
        ));

        Self {
            config,
            storage,
            allocator,
            sessions,
            resolver,
            analysis,
        }
    }

    /// Build services backed by `SQLite` at `config.db_url`.
    ///
    /// # Errors
    ///
    /// Returns `EngineServicesError` if the database cannot be opened or migrated.
    pub async fn new_sqlite(config: EngineConfig, clock: Clock) -> Result<Self, EngineServicesError> {
        let storage = Storage::sqlite(&config.db_url).await?;
        Ok(Self::new(storage, config, clock))
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    #[must_use]
    pub fn allocator(&self) -> Arc<QuestionBankAllocator> {
        Arc::clone(&self.allocator)
    }

    #[must_use]
    pub fn sessions(&self) -> Arc<ExamSessionService> {
        Arc::clone(&self.sessions)
    }

    #[must_use]
    pub fn resolver(&self) -> Arc<PhaseProgressionResolver> {
        Arc::clone(&self.resolver)
    }

    #[must_use]
    pub fn analysis(&self) -> Arc<WeaknessAnalysisService> {
        Arc::clone(&self.analysis)
    }
}
