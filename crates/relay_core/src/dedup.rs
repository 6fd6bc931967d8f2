use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

use crate::CanonicalAddress;

/// Admits each canonical address at most once per run.
///
/// Shared by every harvester; the seen-set sits behind a single mutex so the
/// test-and-insert is atomic.
#[derive(Debug, Default)]
pub struct Deduplicator {
    seen: Mutex<HashSet<CanonicalAddress>>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` the first time `address` is offered, `false` afterwards.
    pub fn admit(&self, address: &CanonicalAddress) -> bool {
        let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
        if seen.contains(address) {
            return false;
        }
        seen.insert(address.clone())
    }

    pub fn admitted(&self) -> usize {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
