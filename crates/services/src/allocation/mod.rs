//! QuestionBankAllocator: item codes, sampling and adaptive weighting.

pub mod adaptive;
pub mod codes;
pub mod sampling;

use std::sync::Arc;

use exam_core::Clock;
use exam_core::model::{
    BankItem, BankItemDraft, CodeKey, Grade, ItemCode, Phase, StudentId, Subject, Topic,
};
use rand::Rng;
use storage::repository::{
    BankItemFilter, BankItemRepository, CounterRepository, ResultRepository, WeaknessRepository,
};
use tracing::{info, warn};

use crate::error::AllocationError;
use adaptive::{AdaptiveSplit, weighted_sample};

/// Sizing and retry knobs for allocation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AllocationPolicy {
    pub question_count: usize,
    pub weakness_ratio: f64,
    pub counter_max_attempts: u32,
}

impl Default for AllocationPolicy {
    fn default() -> Self {
        Self {
            question_count: 10,
            weakness_ratio: 0.5,
            counter_max_attempts: 32,
        }
    }
}

/// Who the exam is for; drives the candidate filter and the weighting mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExamRequest {
    pub student: StudentId,
    pub subject: Subject,
    pub grade: Grade,
    pub phase: Phase,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllocationMode {
    Plain,
    Adaptive { primary_weakness: Topic },
}

/// Question set for one exam instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub items: Vec<BankItem>,
    pub mode: AllocationMode,
    pub requested: usize,
}

impl Allocation {
    /// Fewer items than requested is a valid outcome of an undersized pool.
    #[must_use]
    pub fn is_short(&self) -> bool {
        self.items.len() < self.requested
    }
}

#[derive(Clone)]
pub struct QuestionBankAllocator {
    clock: Clock,
    items: Arc<dyn BankItemRepository>,
    counters: Arc<dyn CounterRepository>,
    results: Arc<dyn ResultRepository>,
    analyses: Arc<dyn WeaknessRepository>,
    policy: AllocationPolicy,
}

impl QuestionBankAllocator {
    #[must_use]
    pub fn new(
        clock: Clock,
        items: Arc<dyn BankItemRepository>,
        counters: Arc<dyn CounterRepository>,
        results: Arc<dyn ResultRepository>,
        analyses: Arc<dyn WeaknessRepository>,
    ) -> Self {
        Self {
            clock,
            items,
            counters,
            results,
            analyses,
            policy: AllocationPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: AllocationPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn policy(&self) -> AllocationPolicy {
        self.policy
    }

    /// Issue the next collision-free code for `key`.
    ///
    /// # Errors
    ///
    /// See [`codes::issue_code`].
    pub async fn issue_code(&self, key: &CodeKey) -> Result<ItemCode, AllocationError> {
        codes::issue_code(
            self.counters.as_ref(),
            key,
            self.policy.counter_max_attempts,
        )
        .await
    }

    /// Validate a draft, issue its code and store it.
    ///
    /// # Errors
    ///
    /// Returns `AllocationError::InvalidItem` for drafts that break content rules,
    /// and code issuance or storage errors otherwise.
    pub async fn create_item(&self, draft: BankItemDraft) -> Result<BankItem, AllocationError> {
        let validated = draft.validate(self.clock.now())?;
        let code = self.issue_code(&validated.key).await?;
        let item = validated.assign_code(code)?;
        self.items.insert_item(&item).await?;
        info!(code = %item.code, topic = %item.topic, "bank item created");
        Ok(item)
    }

    /// Delete an item unless a stored result still points at it.
    ///
    /// # Errors
    ///
    /// Returns `AllocationError::ItemReferenced` when results reference the code.
    pub async fn delete_item(&self, code: &ItemCode) -> Result<(), AllocationError> {
        if self.results.is_item_referenced(code).await? {
            warn!(%code, "refusing to delete referenced bank item");
            return Err(AllocationError::ItemReferenced(code.to_string()));
        }
        self.items.delete_item(code).await?;
        Ok(())
    }

    /// Plain sampling of up to `count` items matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns `AllocationError::Storage` if the pool cannot be read.
    pub async fn allocate<R: Rng + Send + ?Sized>(
        &self,
        filter: &BankItemFilter,
        count: usize,
        rng: &mut R,
    ) -> Result<Vec<BankItem>, AllocationError> {
        let pool = self.items.list_items(filter).await?;
        Ok(sampling::sample(pool, count, rng))
    }

    /// Sampling weighted toward `primary`.
    ///
    /// # Errors
    ///
    /// Returns `AllocationError::InsufficientTopics` or `AllocationError::UnknownTopic`
    /// when the pool cannot support weighting; these are not downgraded to plain sampling.
    pub async fn allocate_adaptive<R: Rng + Send + ?Sized>(
        &self,
        filter: &BankItemFilter,
        primary: &Topic,
        count: usize,
        rng: &mut R,
    ) -> Result<Vec<BankItem>, AllocationError> {
        let pool = self.items.list_items(filter).await?;
        let split = AdaptiveSplit::new(count, self.policy.weakness_ratio);
        weighted_sample(pool, primary, split, rng)
    }

    /// Build the question set for one attempt.
    ///
    /// The second phase is weighted by the student's weakness analysis when one
    /// exists; every other case uses plain sampling.
    ///
    /// # Errors
    ///
    /// Propagates adaptive-mode failures and storage errors.
    pub async fn allocate_for_phase<R: Rng + Send + ?Sized>(
        &self,
        request: &ExamRequest,
        rng: &mut R,
    ) -> Result<Allocation, AllocationError> {
        let filter =
            BankItemFilter::for_subject(request.subject.clone()).with_grade(request.grade);
        let requested = self.policy.question_count;

        let analysis = if request.phase == Phase::Second {
            self.analyses
                .get_analysis(&request.student, &request.subject)
                .await?
        } else {
            None
        };

        let allocation = match analysis {
            Some(analysis) => {
                let primary_weakness = analysis.primary_weakness;
                let items = self
                    .allocate_adaptive(&filter, &primary_weakness, requested, rng)
                    .await?;
                Allocation {
                    items,
                    mode: AllocationMode::Adaptive { primary_weakness },
                    requested,
                }
            }
            None => Allocation {
                items: self.allocate(&filter, requested, rng).await?,
                mode: AllocationMode::Plain,
                requested,
            },
        };

        if allocation.is_short() {
            info!(
                subject = %request.subject,
                phase = %request.phase,
                got = allocation.items.len(),
                requested,
                "candidate pool smaller than requested"
            );
        }
        Ok(allocation)
    }
}
