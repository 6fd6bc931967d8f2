use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use thiserror::Error;

use crate::{CanonicalAddress, Verdict};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("verdict for {0} already recorded")]
pub struct DuplicateVerdict(pub CanonicalAddress);

/// Verdicts keyed by canonical address, iterated in address order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultSet {
    verdicts: BTreeMap<CanonicalAddress, Verdict>,
}

impl ResultSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the verdict for a new address. The first verdict wins; a
    /// second one for the same address is rejected.
    pub fn insert(&mut self, verdict: Verdict) -> Result<(), DuplicateVerdict> {
        match self.verdicts.entry(verdict.address().clone()) {
            Entry::Occupied(entry) => Err(DuplicateVerdict(entry.key().clone())),
            Entry::Vacant(entry) => {
                entry.insert(verdict);
                Ok(())
            }
        }
    }

    pub fn get(&self, address: &CanonicalAddress) -> Option<&Verdict> {
        self.verdicts.get(address)
    }

    pub fn len(&self) -> usize {
        self.verdicts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.verdicts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Verdict> {
        self.verdicts.values()
    }

    pub fn live(&self) -> impl Iterator<Item = &Verdict> {
        self.iter().filter(|v| v.is_live())
    }

    pub fn dead(&self) -> impl Iterator<Item = &Verdict> {
        self.iter().filter(|v| !v.is_live())
    }

    pub fn live_addresses(&self) -> Vec<String> {
        self.live().map(|v| v.address().to_string()).collect()
    }

    pub fn dead_addresses(&self) -> Vec<String> {
        self.dead().map(|v| v.address().to_string()).collect()
    }
}
