use std::collections::{BTreeMap, HashSet};

use crate::hash::Hash;

/// Per-block sets of hashes whose reference count has dropped to zero. A
/// hash sits here for the pruning window before its keys are physically
/// deleted, giving short reorganizations a chance to reclaim it.
///
/// A hash appears in at most one block's set at any moment.
#[derive(Default)]
pub(crate) struct DeathrowIndex {
    rows: BTreeMap<u64, HashSet<Hash>>,
}

impl DeathrowIndex {
    /// Block whose set currently holds `h`, if any.
    pub fn membership_block(&self, h: &Hash) -> Option<u64> {
        self.rows
            .iter()
            .find(|(_, set)| set.contains(h))
            .map(|(block, _)| *block)
    }

    /// Schedules `h` for deletion at `block`. A later add supersedes an
    /// earlier one: any existing membership is removed first.
    pub fn add(&mut self, block: u64, h: Hash) {
        if let Some(prev) = self.membership_block(&h) {
            if prev == block {
                return;
            }
            self.remove(prev, &h);
        }
        self.rows.entry(block).or_default().insert(h);
    }

    pub fn remove(&mut self, block: u64, h: &Hash) {
        if let Some(set) = self.rows.get_mut(&block) {
            set.remove(h);
            if set.is_empty() {
                self.rows.remove(&block);
            }
        }
    }

    /// Removes and returns the set scheduled at `block`.
    pub fn drain_block(&mut self, block: u64) -> HashSet<Hash> {
        self.rows.remove(&block).unwrap_or_default()
    }

    pub fn erase_block(&mut self, block: u64) {
        self.rows.remove(&block);
    }
}

#[test]
fn test_single_membership() {
    let mut deathrow = DeathrowIndex::default();
    let h = Hash([1; 32]);
    deathrow.add(3, h);
    assert_eq!(deathrow.membership_block(&h), Some(3));
    // re-scheduling at a later block moves the hash, it does not duplicate
    deathrow.add(7, h);
    assert_eq!(deathrow.membership_block(&h), Some(7));
    assert!(deathrow.drain_block(3).is_empty());
    let drained = deathrow.drain_block(7);
    assert_eq!(drained.len(), 1);
    assert!(drained.contains(&h));
    assert_eq!(deathrow.membership_block(&h), None);
}

#[test]
fn test_remove_and_erase() {
    let mut deathrow = DeathrowIndex::default();
    let (a, b) = (Hash([1; 32]), Hash([2; 32]));
    deathrow.add(5, a);
    deathrow.add(5, b);
    deathrow.remove(5, &a);
    assert_eq!(deathrow.membership_block(&a), None);
    assert_eq!(deathrow.membership_block(&b), Some(5));
    deathrow.erase_block(5);
    assert_eq!(deathrow.membership_block(&b), None);
}
