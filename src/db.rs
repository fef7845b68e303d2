use std::time::Duration;

use parking_lot::{RwLock, RwLockUpgradableReadGuard};
use thiserror::Error;
use tracing::{error, warn};
use typed_builder::TypedBuilder;

use crate::backend::{KVBackend, WriteBatch};
use crate::deathrow::DeathrowIndex;
use crate::hash::{Hash, EMPTY_TRIE_HASH};
use crate::journal::ReorgJournal;
use crate::keys;
use crate::overlay::MemoryOverlay;
use crate::refcount::{self, RefCounts};

/// Blocks a zero-count node stays on deathrow before its keys are deleted.
/// Reorganizations shorter than this are fully recoverable. The value is
/// part of the store's behavioral contract: every reader of the same state
/// must agree on it.
pub const PRUNING_WINDOW: u64 = 100;

#[derive(Debug, Error)]
pub enum DBError {
    #[error("invalid config params")]
    InvalidParams,
}

#[derive(Clone, TypedBuilder)]
pub struct DBConfig {
    /// Block distance between a node entering deathrow and its deletion.
    #[builder(default = PRUNING_WINDOW)]
    pruning_window: u64,
    /// Attempts before a failed batch write aborts the process.
    #[builder(default = 10)]
    write_retries: u32,
    /// Backoff unit between write retries; the i-th retry sleeps i units.
    #[builder(default = Duration::from_secs(1))]
    retry_backoff: Duration,
}

#[derive(Default)]
struct DBInner {
    overlay: MemoryOverlay,
    deathrow: DeathrowIndex,
    journal: ReorgJournal,
    /// Number of the block being (or last) committed. Read-side
    /// reanimation journals its +1 under this block.
    block_number: u64,
}

/// Reference-counted pruning overlay over an ordered key-value backend.
///
/// Node writes staged with [`insert`](Self::insert)/[`kill`](Self::kill)
/// buffer in memory until [`commit`](Self::commit) lands them in one atomic
/// batch, raising and lowering per-node reference counts as it goes. Nodes
/// whose count reaches zero are scheduled on deathrow and physically
/// deleted once they have sat there for the pruning window; until then a
/// read can reanimate them. Re-committing a block number inverts everything
/// the journal recorded for it first, so a chain reorganization leaves the
/// store as if only the replacement block had ever been committed.
pub struct DB<B: KVBackend> {
    backend: B,
    inner: RwLock<DBInner>,
    cfg: DBConfig,
}

impl<B: KVBackend> DB<B> {
    pub fn new(backend: B, cfg: DBConfig) -> Result<Self, DBError> {
        if cfg.pruning_window == 0 || cfg.write_retries == 0 {
            return Err(DBError::InvalidParams);
        }
        Ok(Self {
            backend,
            inner: RwLock::new(DBInner::default()),
            cfg,
        })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Stages `value` under `h` and raises its pending reference delta.
    pub fn insert(&self, h: Hash, value: &[u8]) {
        self.inner.write().overlay.insert(h, value);
    }

    /// Lowers the pending reference delta for `h`.
    pub fn kill(&self, h: &Hash) {
        self.inner.write().overlay.kill(h);
    }

    /// Stages an auxiliary payload for `h`; aux records are not refcounted.
    pub fn insert_aux(&self, h: Hash, value: &[u8]) {
        self.inner.write().overlay.insert_aux(h, value);
    }

    /// Value stored under `h`, consulting pending entries first. A backend
    /// hit for a node whose persisted count is zero reanimates it before
    /// the read returns.
    pub fn lookup(&self, h: &Hash) -> Option<Vec<u8>> {
        let inner = self.inner.upgradable_read();
        if let Some(value) = inner.overlay.lookup(h) {
            return Some(value.to_vec());
        }
        let value = match self.backend.get(&keys::value(h)) {
            Ok(value) => value?,
            Err(e) => {
                warn!(hash = %h, error = %e, "node read failed");
                return None;
            }
        };
        self.reanimate(inner, h);
        Some(value)
    }

    pub fn exists(&self, h: &Hash) -> bool {
        let inner = self.inner.upgradable_read();
        if inner.overlay.exists(h) {
            return true;
        }
        match self.backend.get(&keys::value(h)) {
            Ok(Some(_)) => {
                self.reanimate(inner, h);
                true
            }
            Ok(None) => false,
            Err(e) => {
                warn!(hash = %h, error = %e, "node read failed");
                false
            }
        }
    }

    /// Auxiliary payload for `h`, empty on miss.
    pub fn lookup_aux(&self, h: &Hash) -> Vec<u8> {
        {
            let inner = self.inner.read();
            if let Some(value) = inner.overlay.lookup_aux(h) {
                return value.to_vec();
            }
        }
        match self.backend.get(&keys::aux(h)) {
            Ok(Some(value)) => value,
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(hash = %h, error = %e, "aux read failed");
                Vec::new()
            }
        }
    }

    /// A persisted node read back with a zero stored count was orphaned by
    /// a reverted block; re-attach it before the read returns. The +1 lands
    /// through its own atomic batch, is journaled under the current block,
    /// and pulls the hash off deathrow in the same exclusive section.
    fn reanimate(&self, inner: RwLockUpgradableReadGuard<'_, DBInner>, h: &Hash) {
        if *h == EMPTY_TRIE_HASH || refcount::persisted(&self.backend, h) != 0 {
            return;
        }
        let mut inner = RwLockUpgradableReadGuard::upgrade(inner);
        let mut batch = WriteBatch::new();
        let mut counts = RefCounts::new(&self.backend, inner.block_number);
        counts.adjust(&mut batch, h, 1, Some(&mut inner.journal));
        self.safe_write(batch);
        if let Some(block) = inner.deathrow.membership_block(h) {
            inner.deathrow.remove(block, h);
        }
    }

    /// Atomically lands everything staged since the last commit as block
    /// `block_number`: inverts journaled changes first if this height was
    /// already committed (chain reorg), writes new nodes and adjusts
    /// counts, schedules dying nodes on deathrow, and deletes whatever
    /// expired from deathrow `pruning_window` blocks ago.
    pub fn commit(&self, block_number: u64) {
        let mut guard = self.inner.write();
        guard.block_number = block_number;
        let DBInner {
            overlay,
            deathrow,
            journal,
            ..
        } = &mut *guard;

        // A journal entry at this height means the chain retreated and this
        // block and everything after it are being replaced; unwind their
        // refcount changes block by block before replaying.
        let mut undo_block = block_number;
        while journal.contains(undo_block) {
            warn!(block = undo_block, "chain reorg, reverting refcount changes");
            let mut undo = WriteBatch::new();
            let mut counts = RefCounts::new(&self.backend, block_number);
            for (h, delta) in journal.take(undo_block) {
                counts.adjust(&mut undo, &h, -delta, None);
            }
            deathrow.erase_block(undo_block);
            self.safe_write(undo);
            undo_block += 1;
        }

        let mut batch = WriteBatch::new();
        let mut counts = RefCounts::new(&self.backend, block_number);

        for (h, node) in overlay.pending() {
            if node.delta > 0 {
                batch.put(keys::value(h), node.value.clone());
                counts.adjust(&mut batch, h, node.delta, Some(&mut *journal));
                if let Some(block) = deathrow.membership_block(h) {
                    deathrow.remove(block, h);
                }
            } else if node.delta < 0 || block_number == 0 {
                // at genesis even released nodes persist their value: block
                // zero is the authoritative first write
                if block_number == 0 && !node.value.is_empty() {
                    batch.put(keys::value(h), node.value.clone());
                }
                let count = counts.adjust(&mut batch, h, node.delta, Some(&mut *journal));
                if count < 0 {
                    warn!(
                        hash = %h,
                        count,
                        "refcount went negative, clamping to zero; node released more times than referenced"
                    );
                }
                if count <= 0 && node.delta < 0 {
                    deathrow.add(block_number, *h);
                }
            }
        }

        for (h, value) in overlay.aux() {
            if !value.is_empty() {
                batch.put(keys::aux(h), value.clone());
            }
        }

        if block_number >= self.cfg.pruning_window {
            let expire = block_number - self.cfg.pruning_window;
            for h in deathrow.drain_block(expire) {
                batch.delete(keys::value(&h));
                batch.delete(keys::aux(&h));
                batch.delete(keys::refcount(&h));
            }
            journal.erase(expire);
        }

        self.safe_write(batch);
        overlay.clear();
    }

    /// Discards all pending node writes staged since the last commit.
    pub fn rollback(&self) {
        self.inner.write().overlay.clear_pending();
    }

    /// Hands `batch` to the backend, retrying with linear backoff. Losing a
    /// state write is irrecoverable: once the retry budget is exhausted the
    /// process terminates rather than run on a store that dropped a commit.
    fn safe_write(&self, batch: WriteBatch) {
        for i in 0..self.cfg.write_retries {
            match self.backend.write(&batch) {
                Ok(()) => return,
                Err(e) => {
                    if i + 1 == self.cfg.write_retries {
                        error!(error = %e, ops = batch.len(), "giving up writing state batch, bombing out");
                        std::process::exit(1);
                    }
                    warn!(error = %e, attempt = i + 1, "state batch write failed, will retry");
                    std::thread::sleep(self.cfg.retry_backoff * (i + 1));
                }
            }
        }
    }
}
