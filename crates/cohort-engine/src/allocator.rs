//! Sequence allocation.
//!
//! A study publishes a pool of task orderings. Each new participant gets
//! one slot of the pool; the registry keeps a per-slot assignment count so
//! orderings stay balanced across participants.

use cohort_types::Sequence;
use serde::{Deserialize, Serialize};

/// How a slot is chosen for a new participant.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationPolicy {
    /// Always the first slot.
    FirstSlot,
    /// The slot with the fewest assignments; ties go to the lowest position.
    #[default]
    LeastAssigned,
}

/// A participant's assigned ordering.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Allocation {
    pub assignment: Sequence,
    /// 1-based position of the slot within the pool.
    pub index: u64,
}

impl Allocation {
    /// 0-based slot position.
    pub fn slot(&self) -> usize {
        (self.index - 1) as usize
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AllocationError {
    #[error("sequence pool is empty")]
    EmptyPool,
}

/// Picks pool slots for new participants.
#[derive(Clone, Copy, Debug, Default)]
pub struct SequenceAllocator {
    policy: AllocationPolicy,
}

impl SequenceAllocator {
    pub fn new(policy: AllocationPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> AllocationPolicy {
        self.policy
    }

    /// Pick a slot as if no participant had been assigned yet.
    pub fn allocate(&self, pool: &[Sequence]) -> Result<Allocation, AllocationError> {
        self.peek(pool, &[])
    }

    /// Pick a slot given the current counts, without recording it.
    pub fn peek(&self, pool: &[Sequence], counts: &[u64]) -> Result<Allocation, AllocationError> {
        let slot = self.choose(pool, counts)?;
        Ok(Allocation {
            assignment: pool[slot].clone(),
            index: slot as u64 + 1,
        })
    }

    /// Pick a slot and record the assignment in `counts`.
    ///
    /// `counts` is first reconciled with the pool length: extra entries are
    /// dropped and missing ones start at zero.
    pub fn assign(
        &self,
        pool: &[Sequence],
        counts: &mut Vec<u64>,
    ) -> Result<Allocation, AllocationError> {
        counts.resize(pool.len(), 0);
        let allocation = self.peek(pool, counts)?;
        counts[allocation.slot()] += 1;
        Ok(allocation)
    }

    fn choose(&self, pool: &[Sequence], counts: &[u64]) -> Result<usize, AllocationError> {
        if pool.is_empty() {
            return Err(AllocationError::EmptyPool);
        }
        let slot = match self.policy {
            AllocationPolicy::FirstSlot => 0,
            AllocationPolicy::LeastAssigned => (0..pool.len())
                .min_by_key(|&slot| (counts.get(slot).copied().unwrap_or(0), slot))
                .unwrap_or(0),
        };
        Ok(slot)
    }
}
