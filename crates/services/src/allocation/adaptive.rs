//! Weighting an exam toward a student's primary weakness.

use std::collections::BTreeMap;

use exam_core::model::{BankItem, Topic};
use rand::Rng;
use rand::seq::SliceRandom;

use super::sampling::sample;
use crate::error::AllocationError;

/// How many questions come from the primary weakness and how many from the rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdaptiveSplit {
    pub primary: usize,
    pub remainder: usize,
}

impl AdaptiveSplit {
    /// `primary = floor(total * ratio)`, `remainder = total - primary`.
    #[must_use]
    pub fn new(total: usize, ratio: f64) -> Self {
        let ratio = ratio.clamp(0.0, 1.0);
        // Exact for the counts an exam can realistically hold.
        #[allow(
            clippy::cast_precision_loss,
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss
        )]
        let primary = ((total as f64) * ratio).floor() as usize;
        let primary = primary.min(total);
        Self {
            primary,
            remainder: total - primary,
        }
    }
}

/// Build a weighted question set from `pool`.
///
/// The primary topic contributes up to `split.primary` items; the remainder is
/// drawn round-robin across the other topics so no single topic dominates.
/// Shortfalls are not backfilled from other topics.
///
/// # Errors
///
/// Returns `AllocationError::InsufficientTopics` when the pool spans fewer than
/// two topics and `AllocationError::UnknownTopic` when the primary topic has no items.
pub fn weighted_sample<R: Rng + ?Sized>(
    pool: Vec<BankItem>,
    primary: &Topic,
    split: AdaptiveSplit,
    rng: &mut R,
) -> Result<Vec<BankItem>, AllocationError> {
    let mut by_topic: BTreeMap<Topic, Vec<BankItem>> = BTreeMap::new();
    for item in pool {
        by_topic.entry(item.topic.clone()).or_default().push(item);
    }
    if by_topic.len() < 2 {
        return Err(AllocationError::InsufficientTopics {
            found: by_topic.len(),
        });
    }
    let primary_pool = by_topic
        .remove(primary)
        .ok_or_else(|| AllocationError::UnknownTopic(primary.clone()))?;

    let mut selected = sample(primary_pool, split.primary, rng);

    let mut others: Vec<Vec<BankItem>> = by_topic
        .into_values()
        .map(|mut items| {
            items.as_mut_slice().shuffle(rng);
            items
        })
        .collect();
    others.as_mut_slice().shuffle(rng);

    let mut remaining = split.remainder;
    while remaining > 0 && others.iter().any(|items| !items.is_empty()) {
        for items in &mut others {
            if remaining == 0 {
                break;
            }
            if let Some(item) = items.pop() {
                selected.push(item);
                remaining -= 1;
            }
        }
    }

    selected.as_mut_slice().shuffle(rng);
    Ok(selected)
}
