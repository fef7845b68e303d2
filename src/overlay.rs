use std::collections::HashMap;

use tracing::warn;

use crate::hash::{Hash, EMPTY_TRIE_HASH};

/// A node staged in memory, waiting for the next commit.
pub(crate) struct PendingNode {
    /// Most recent non-empty payload staged for this hash.
    pub value: Vec<u8>,
    /// Net reference delta accumulated since the last commit: positive
    /// inserts, negative releases.
    pub delta: i64,
}

/// In-process buffer of node and auxiliary writes between commits. Entries
/// live here until the next commit consumes them or a rollback discards
/// them; nothing touches the backend.
#[derive(Default)]
pub(crate) struct MemoryOverlay {
    pending: HashMap<Hash, PendingNode>,
    aux: HashMap<Hash, Vec<u8>>,
}

impl MemoryOverlay {
    pub fn insert(&mut self, h: Hash, value: &[u8]) {
        if h == EMPTY_TRIE_HASH {
            return;
        }
        if value.is_empty() {
            warn!(hash = %h, "rejecting insert of empty node value");
            return;
        }
        let node = self.pending.entry(h).or_insert(PendingNode {
            value: Vec::new(),
            delta: 0,
        });
        node.value = value.to_vec();
        node.delta += 1;
    }

    pub fn kill(&mut self, h: &Hash) {
        if *h == EMPTY_TRIE_HASH {
            return;
        }
        self.pending
            .entry(*h)
            .or_insert(PendingNode {
                value: Vec::new(),
                delta: 0,
            })
            .delta -= 1;
    }

    pub fn insert_aux(&mut self, h: Hash, value: &[u8]) {
        if h == EMPTY_TRIE_HASH {
            return;
        }
        self.aux.insert(h, value.to_vec());
    }

    /// Pending value for `h`, if it is being inserted in this commit window.
    pub fn lookup(&self, h: &Hash) -> Option<&[u8]> {
        self.pending
            .get(h)
            .filter(|node| node.delta > 0 && !node.value.is_empty())
            .map(|node| node.value.as_slice())
    }

    pub fn exists(&self, h: &Hash) -> bool {
        self.pending.get(h).map_or(false, |node| node.delta > 0)
    }

    pub fn lookup_aux(&self, h: &Hash) -> Option<&[u8]> {
        self.aux.get(h).map(Vec::as_slice)
    }

    pub fn pending(&self) -> &HashMap<Hash, PendingNode> {
        &self.pending
    }

    pub fn aux(&self) -> &HashMap<Hash, Vec<u8>> {
        &self.aux
    }

    /// Drops everything; called after a successful commit.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.aux.clear();
    }

    /// Drops pending nodes only; aux entries survive until the next commit.
    pub fn clear_pending(&mut self) {
        self.pending.clear();
    }
}

#[test]
fn test_deltas_accumulate() {
    let mut overlay = MemoryOverlay::default();
    let h = Hash([1; 32]);
    overlay.insert(h, b"old");
    overlay.insert(h, b"new");
    overlay.kill(&h);
    let node = &overlay.pending()[&h];
    assert_eq!(node.delta, 1);
    assert_eq!(node.value, b"new");
    assert_eq!(overlay.lookup(&h), Some(&b"new"[..]));
    assert!(overlay.exists(&h));
    overlay.kill(&h);
    assert_eq!(overlay.lookup(&h), None);
    assert!(!overlay.exists(&h));
}

#[test]
fn test_empty_trie_hash_is_opaque() {
    let mut overlay = MemoryOverlay::default();
    overlay.insert(EMPTY_TRIE_HASH, b"x");
    overlay.kill(&EMPTY_TRIE_HASH);
    overlay.insert_aux(EMPTY_TRIE_HASH, b"y");
    assert!(overlay.pending().is_empty());
    assert!(overlay.aux().is_empty());
}

#[test]
fn test_empty_value_rejected() {
    let mut overlay = MemoryOverlay::default();
    overlay.insert(Hash([2; 32]), b"");
    assert!(overlay.pending().is_empty());
}
