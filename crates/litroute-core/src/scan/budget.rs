//! Treated-item budget.

/// Counts processed (non-skipped) items against a limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Budget {
    limit: usize,
    used: usize,
}

impl Budget {
    /// A fresh budget.
    #[must_use]
    pub const fn new(limit: usize) -> Self {
        Self { limit, used: 0 }
    }

    /// A budget with `used` items already spent, as restored from a checkpoint.
    #[must_use]
    pub const fn resume(limit: usize, used: usize) -> Self {
        Self { limit, used }
    }

    /// Spends one item. Returns `false` (and spends nothing) when exhausted.
    pub const fn try_consume(&mut self) -> bool {
        if self.is_exhausted() {
            return false;
        }
        self.used += 1;
        true
    }

    /// Whether no more items may be processed.
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.used >= self.limit
    }

    /// Maximum number of items.
    #[must_use]
    pub const fn limit(&self) -> usize {
        self.limit
    }

    /// Items spent so far.
    #[must_use]
    pub const fn used(&self) -> usize {
        self.used
    }

    /// Items still available.
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.limit.saturating_sub(self.used)
    }
}
