//! # Diagnostic Log Budget
//!
//! A fixed-ceiling counter that decides whether one more diagnostic line may be
//! written. Once the ceiling is reached every further request is refused, so the
//! cost of diagnostic logging stays bounded no matter how much traffic flows.
//!
//! The check and the increment are a single compare-and-swap, so a shared
//! budget never overshoots its ceiling.

use std::sync::atomic::{AtomicUsize, Ordering};

pub struct LogBudget {
    /// Maximum number of lines this budget will ever grant.
    ceiling: usize,
    /// Lines granted so far.
    used: AtomicUsize,
}

impl LogBudget {
    pub fn new(ceiling: usize) -> Self {
        Self { ceiling, used: AtomicUsize::new(0) }
    }

    /// # Try Consume
    ///
    /// Claims one line from the budget.
    ///
    /// # Returns
    /// - `true` if the caller may log; the counter has been incremented.
    /// - `false` once the ceiling has been reached; the counter is unchanged.
    pub fn try_consume(&self) -> bool {
        self.used
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |used| {
                (used < self.ceiling).then_some(used + 1)
            })
            .is_ok()
    }

    /// Lines granted so far.
    pub fn used(&self) -> usize {
        self.used.load(Ordering::Relaxed)
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    pub fn is_exhausted(&self) -> bool {
        self.used() >= self.ceiling
    }
}
