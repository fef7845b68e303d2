use std::collections::HashMap;

use tracing::warn;

use crate::backend::{KVBackend, WriteBatch};
use crate::hash::Hash;
use crate::journal::ReorgJournal;
use crate::keys;

/// Staged view of persisted reference counts scoped to one atomic batch.
/// Adjustments staged earlier in the batch are visible to later reads, so
/// a commit sees its own writes before the backend does.
pub(crate) struct RefCounts<'a, B: KVBackend> {
    backend: &'a B,
    staged: HashMap<Hash, i64>,
    block: u64,
}

impl<'a, B: KVBackend> RefCounts<'a, B> {
    pub fn new(backend: &'a B, block: u64) -> Self {
        Self {
            backend,
            staged: HashMap::new(),
            block,
        }
    }

    /// Current count for `h`: the staged value if this batch already touched
    /// it, the persisted value otherwise. Absent counts read as 0.
    pub fn get(&self, h: &Hash) -> i64 {
        match self.staged.get(h) {
            Some(count) => *count,
            None => persisted(self.backend, h),
        }
    }

    /// Stages `get(h) + delta` into `batch` and returns the raw sum. The
    /// stored count is clamped at zero; a negative return tells the caller
    /// a node was released more times than it was referenced. With
    /// `journal` set the delta is logged under this batch's block so a
    /// reorg can invert it; the undo path passes `None`.
    pub fn adjust(
        &mut self,
        batch: &mut WriteBatch,
        h: &Hash,
        delta: i64,
        journal: Option<&mut ReorgJournal>,
    ) -> i64 {
        let count = self.get(h) + delta;
        let clamped = count.max(0);
        self.staged.insert(*h, clamped);
        batch.put(keys::refcount(h), clamped.to_string().into_bytes());
        if let Some(journal) = journal {
            journal.record(self.block, h, delta);
        }
        count
    }
}

/// Reads the decimal count stored for `h` straight from the backend.
/// Absent, empty, and undecodable counts all read as 0; the latter is a
/// consistency anomaly worth a warning but not worth dying over.
pub(crate) fn persisted<B: KVBackend>(backend: &B, h: &Hash) -> i64 {
    let raw = match backend.get(&keys::refcount(h)) {
        Ok(Some(raw)) => raw,
        Ok(None) => return 0,
        Err(e) => {
            warn!(hash = %h, error = %e, "refcount read failed, treating as 0");
            return 0;
        }
    };
    if raw.is_empty() {
        return 0;
    }
    match std::str::from_utf8(&raw).ok().and_then(|s| s.parse().ok()) {
        Some(count) => count,
        None => {
            warn!(hash = %h, "undecodable stored refcount, treating as 0");
            0
        }
    }
}
