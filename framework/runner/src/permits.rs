use std::sync::atomic::{AtomicU64, Ordering};

/// The shared pool of iterations that virtual users claim from before each run of the behaviour.
///
/// In a bounded pool each successful claim takes exactly one permit, so across any number of
/// concurrent claimants the total number of successful claims equals the pool size.
#[derive(Debug)]
pub struct IterationPermits {
    remaining: Option<AtomicU64>,
}

impl IterationPermits {
    pub fn unbounded() -> Self {
        Self { remaining: None }
    }

    pub fn bounded(total: u64) -> Self {
        Self {
            remaining: Some(AtomicU64::new(total)),
        }
    }

    /// Claim one iteration. Returns false once a bounded pool is empty.
    pub fn try_claim(&self) -> bool {
        match &self.remaining {
            None => true,
            Some(remaining) => remaining
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
                .is_ok(),
        }
    }

    pub fn remaining(&self) -> Option<u64> {
        self.remaining
            .as_ref()
            .map(|remaining| remaining.load(Ordering::Acquire))
    }
}
