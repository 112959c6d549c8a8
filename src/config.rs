//! Construction-time settings for `ReclaimableSet`.

use crate::error::SetError;

/// Upper bound on the number of shards a set may be split into.
pub const MAX_CONCURRENCY_LEVEL: usize = 1 << 16;

/// Upper bound on the number of elements a set may be presized for.
pub const MAX_INITIAL_CAPACITY: usize = 1 << 30;

/// Which kind of reference a handle keeps to its element.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum ReferenceKind {
    /// The accessor yields the element until its last owner is dropped.
    #[default]
    Weak,
    /// The accessor never yields the element. The set only tracks
    /// presence: `len` counts handles and reclamation is still reported,
    /// but lookups, iteration and duplicate detection always see "absent".
    Phantom,
}

/// What a sweep does when the reclamation listener panics.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum PanicPolicy {
    /// Log the panic and keep processing the drained batch.
    #[default]
    LogAndContinue,
    /// Finish the drained batch, then resume the first panic on the
    /// calling thread.
    Escalate,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SetConfig {
    /// Number of elements the set can hold before any shard reallocates.
    pub initial_capacity: usize,
    /// Estimated number of concurrently updating threads. Rounded up to a
    /// power of two to pick the shard count.
    pub concurrency_level: usize,
    pub reference_kind: ReferenceKind,
    pub panic_policy: PanicPolicy,
}

impl Default for SetConfig {
    fn default() -> Self {
        Self {
            initial_capacity: 16,
            concurrency_level: 16,
            reference_kind: ReferenceKind::Weak,
            panic_policy: PanicPolicy::LogAndContinue,
        }
    }
}

impl SetConfig {
    pub fn validate(&self) -> Result<(), SetError> {
        if self.concurrency_level == 0 {
            return Err(SetError::invalid(
                "concurrency_level",
                "must be at least 1",
            ));
        }
        if self.concurrency_level > MAX_CONCURRENCY_LEVEL {
            return Err(SetError::invalid(
                "concurrency_level",
                format!("must not exceed {}", MAX_CONCURRENCY_LEVEL),
            ));
        }
        if self.initial_capacity > MAX_INITIAL_CAPACITY {
            return Err(SetError::invalid(
                "initial_capacity",
                format!("must not exceed {}", MAX_INITIAL_CAPACITY),
            ));
        }
        Ok(())
    }

    /// Number of shards derived from `concurrency_level`.
    pub(crate) fn shard_count(&self) -> usize {
        self.concurrency_level.next_power_of_two()
    }

    /// Per-shard capacity so that the shards together hold
    /// `initial_capacity` elements.
    pub(crate) fn shard_capacity(&self) -> usize {
        self.initial_capacity.min(MAX_INITIAL_CAPACITY).div_ceil(self.shard_count())
    }
}
