//! Collision-free serial issuance on top of a compare-and-swap counter.

use exam_core::model::{CodeKey, ItemCode, ItemCodeError, MAX_SERIAL};
use storage::repository::{CounterRepository, StorageError};
use tracing::{debug, warn};

use crate::error::AllocationError;

/// Issue the next code for `key`.
///
/// Runs read, increment, compare-and-swap; a lost swap or a busy store is
/// retried up to `max_attempts` times before giving up.
///
/// # Errors
///
/// Returns `AllocationError::ContentionExhausted` when every attempt lost the
/// race, `AllocationError::InvalidCode` once the three-digit serial space is
/// used up, or `AllocationError::Storage` for other storage failures.
pub async fn issue_code(
    counters: &dyn CounterRepository,
    key: &CodeKey,
    max_attempts: u32,
) -> Result<ItemCode, AllocationError> {
    let counter_key = key.counter_key();

    for attempt in 1..=max_attempts {
        if let Some(serial) = try_increment(counters, &counter_key, attempt).await? {
            debug!(counter = %counter_key, serial, attempt, "issued item serial");
            return Ok(ItemCode::new(key.clone(), serial)?);
        }
        tokio::task::yield_now().await;
    }

    warn!(counter = %counter_key, max_attempts, "counter contention exhausted");
    Err(AllocationError::ContentionExhausted {
        key: counter_key,
        attempts: max_attempts,
    })
}

/// One read-increment-swap round. `Ok(None)` means the round lost to another
/// writer or found the store busy.
async fn try_increment(
    counters: &dyn CounterRepository,
    counter_key: &str,
    attempt: u32,
) -> Result<Option<u32>, AllocationError> {
    let current = match counters.read_counter(counter_key).await {
        Ok(current) => current,
        Err(StorageError::Contention(reason)) => {
            debug!(counter = %counter_key, attempt, %reason, "counter busy on read, retrying");
            return Ok(None);
        }
        Err(err) => return Err(err.into()),
    };
    let next = current.unwrap_or(0).saturating_add(1);
    if next > MAX_SERIAL {
        return Err(ItemCodeError::SerialOverflow(next).into());
    }

    match counters.compare_and_swap(counter_key, current, next).await {
        Ok(true) => Ok(Some(next)),
        Ok(false) => {
            debug!(counter = %counter_key, attempt, "counter swap lost, retrying");
            Ok(None)
        }
        Err(StorageError::Contention(reason)) => {
            debug!(counter = %counter_key, attempt, %reason, "counter busy, retrying");
            Ok(None)
        }
        Err(err) => Err(err.into()),
    }
}
