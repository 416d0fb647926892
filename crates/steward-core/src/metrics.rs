//! Process-wide counters for steward runs.
//!
//! Increment at the call site; [`Metrics::flush`] emits everything as one
//! `info!` event at the end of a run.

use std::sync::atomic::{AtomicU64, Ordering};

pub static METRICS: Metrics = Metrics::new();

/// Atomic counters, no locking.
pub struct Metrics {
    prs_evaluated: AtomicU64,
    evaluations_failed: AtomicU64,
    mutations_applied: AtomicU64,
    mutations_failed: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            prs_evaluated: AtomicU64::new(0),
            evaluations_failed: AtomicU64::new(0),
            mutations_applied: AtomicU64::new(0),
            mutations_failed: AtomicU64::new(0),
        }
    }

    pub fn inc_prs_evaluated(&self) {
        self.prs_evaluated.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "prs_evaluated", "counter incremented");
    }

    pub fn inc_evaluations_failed(&self) {
        self.evaluations_failed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "evaluations_failed", "counter incremented");
    }

    pub fn inc_mutations_applied(&self) {
        self.mutations_applied.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "mutations_applied", "counter incremented");
    }

    pub fn inc_mutations_failed(&self) {
        self.mutations_failed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "mutations_failed", "counter incremented");
    }

    /// Emit all counters as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            prs_evaluated = self.prs_evaluated(),
            evaluations_failed = self.evaluations_failed(),
            mutations_applied = self.mutations_applied(),
            mutations_failed = self.mutations_failed(),
        );
    }

    pub fn prs_evaluated(&self) -> u64 {
        self.prs_evaluated.load(Ordering::Relaxed)
    }

    pub fn evaluations_failed(&self) -> u64 {
        self.evaluations_failed.load(Ordering::Relaxed)
    }

    pub fn mutations_applied(&self) -> u64 {
        self.mutations_applied.load(Ordering::Relaxed)
    }

    pub fn mutations_failed(&self) -> u64 {
        self.mutations_failed.load(Ordering::Relaxed)
    }

    /// Zero every counter.
    pub fn reset(&self) {
        self.prs_evaluated.store(0, Ordering::Relaxed);
        self.evaluations_failed.store(0, Ordering::Relaxed);
        self.mutations_applied.store(0, Ordering::Relaxed);
        self.mutations_failed.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment_and_reset() {
        let m = Metrics::new();
        m.inc_prs_evaluated();
        m.inc_prs_evaluated();
        m.inc_evaluations_failed();
        m.inc_mutations_applied();
        m.inc_mutations_failed();
        m.inc_mutations_failed();
        assert_eq!(m.prs_evaluated(), 2);
        assert_eq!(m.evaluations_failed(), 1);
        assert_eq!(m.mutations_applied(), 1);
        assert_eq!(m.mutations_failed(), 2);

        m.reset();
        assert_eq!(m.prs_evaluated(), 0);
        assert_eq!(m.mutations_failed(), 0);
    }
}
