use std::cell::{Cell, RefCell};
use std::time::{Duration, Instant};

use deadwood::backend::{KVBackend, MemBackend, StoreError, WriteBatch};
use deadwood::db::{DBConfig, DB};
use deadwood::hash::{Hash, EMPTY_TRIE_HASH};

fn test_db(window: u64) -> DB<MemBackend> {
    DB::new(
        MemBackend::new(),
        DBConfig::builder().pruning_window(window).build(),
    )
    .unwrap()
}

fn value_key(h: &Hash) -> Vec<u8> {
    h.to_vec()
}

fn refcount_key(h: &Hash) -> Vec<u8> {
    let mut key = h.to_vec();
    key.push(0xfe);
    key
}

fn aux_key(h: &Hash) -> Vec<u8> {
    let mut key = h.to_vec();
    key.push(0xff);
    key
}

#[test]
fn test_insert_and_retrieve() {
    let db = test_db(4);
    let h1 = Hash::keccak(b"v1");
    db.insert(h1, b"v1");
    db.commit(1);
    assert_eq!(db.lookup(&h1), Some(b"v1".to_vec()));
    assert_eq!(
        db.backend().get(&value_key(&h1)).unwrap(),
        Some(b"v1".to_vec())
    );
    assert_eq!(
        db.backend().get(&refcount_key(&h1)).unwrap(),
        Some(b"1".to_vec())
    );
}

#[test]
fn test_kill_then_prune() {
    let db = test_db(4);
    let h1 = Hash::keccak(b"v1");
    db.insert(h1, b"v1");
    db.insert_aux(h1, b"a1");
    db.commit(1);
    db.kill(&h1);
    db.commit(2);
    // dead but within the window: keys still present, count at zero
    assert_eq!(
        db.backend().get(&refcount_key(&h1)).unwrap(),
        Some(b"0".to_vec())
    );
    assert_eq!(
        db.backend().get(&value_key(&h1)).unwrap(),
        Some(b"v1".to_vec())
    );
    db.commit(3);
    db.commit(4);
    db.commit(5);
    db.commit(6);
    // at commit 6 the window (4 blocks) since death at 2 has elapsed
    assert_eq!(db.backend().get(&value_key(&h1)).unwrap(), None);
    assert_eq!(db.backend().get(&refcount_key(&h1)).unwrap(), None);
    assert_eq!(db.backend().get(&aux_key(&h1)).unwrap(), None);
    assert_eq!(db.lookup(&h1), None);
}

#[test]
fn test_revive_before_prune() {
    let db = test_db(4);
    let h1 = Hash::keccak(b"v1");
    db.insert(h1, b"v1");
    db.commit(1);
    db.kill(&h1);
    db.commit(2);
    db.commit(3);
    db.commit(4);

    // the read reattaches the orphaned node: count 0 -> 1, off deathrow
    assert_eq!(db.lookup(&h1), Some(b"v1".to_vec()));
    assert_eq!(
        db.backend().get(&refcount_key(&h1)).unwrap(),
        Some(b"1".to_vec())
    );

    db.commit(5);
    db.commit(6);
    assert_eq!(db.lookup(&h1), Some(b"v1".to_vec()));
    assert_eq!(
        db.backend().get(&value_key(&h1)).unwrap(),
        Some(b"v1".to_vec())
    );
}

#[test]
fn test_exists_reanimates_too() {
    let db = test_db(4);
    let h1 = Hash::keccak(b"v1");
    db.insert(h1, b"v1");
    db.commit(1);
    db.kill(&h1);
    db.commit(2);
    assert!(db.exists(&h1));
    assert_eq!(
        db.backend().get(&refcount_key(&h1)).unwrap(),
        Some(b"1".to_vec())
    );
    db.commit(3);
    db.commit(4);
    db.commit(5);
    db.commit(6);
    assert!(db.exists(&h1));
}

#[test]
fn test_aux_decoupled_from_refcount() {
    let db = test_db(4);
    let h1 = Hash::keccak(b"v1");
    db.insert_aux(h1, b"a1");
    db.commit(1);
    assert_eq!(db.lookup_aux(&h1), b"a1".to_vec());
    assert_eq!(db.backend().get(&refcount_key(&h1)).unwrap(), None);
    assert_eq!(db.backend().get(&value_key(&h1)).unwrap(), None);
    assert_eq!(db.lookup(&h1), None);
    // aux misses read as empty
    assert_eq!(db.lookup_aux(&Hash::keccak(b"other")), Vec::<u8>::new());
}

#[test]
fn test_rollback_discards_pending() {
    let db = test_db(4);
    let (h1, h2) = (Hash::keccak(b"v1"), Hash::keccak(b"v2"));
    db.insert(h1, b"v1");
    db.commit(1);

    db.insert(h2, b"v2");
    db.kill(&h1);
    db.rollback();
    assert_eq!(db.lookup(&h1), Some(b"v1".to_vec()));
    assert_eq!(db.lookup(&h2), None);

    // nothing staged survives into the next commit
    db.commit(2);
    assert_eq!(
        db.backend().get(&refcount_key(&h1)).unwrap(),
        Some(b"1".to_vec())
    );
    assert_eq!(db.backend().get(&value_key(&h2)).unwrap(), None);
}

#[test]
fn test_repeated_inserts_sum_their_deltas() {
    let db = test_db(4);
    let h1 = Hash::keccak(b"v1");
    db.insert(h1, b"v1");
    db.insert(h1, b"v1");
    db.insert(h1, b"v1");
    db.commit(1);
    assert_eq!(
        db.backend().get(&refcount_key(&h1)).unwrap(),
        Some(b"3".to_vec())
    );
    db.kill(&h1);
    db.commit(2);
    // two references remain, nothing is scheduled for deletion
    assert_eq!(
        db.backend().get(&refcount_key(&h1)).unwrap(),
        Some(b"2".to_vec())
    );
    db.commit(3);
    db.commit(4);
    db.commit(5);
    db.commit(6);
    assert_eq!(db.lookup(&h1), Some(b"v1".to_vec()));
}

#[test]
fn test_empty_trie_hash_never_touches_backend() {
    let db = test_db(4);
    db.insert(EMPTY_TRIE_HASH, b"boo");
    db.kill(&EMPTY_TRIE_HASH);
    db.insert_aux(EMPTY_TRIE_HASH, b"aux");
    db.commit(1);
    assert!(db.backend().is_empty());
    assert_eq!(db.lookup(&EMPTY_TRIE_HASH), None);
    assert!(!db.exists(&EMPTY_TRIE_HASH));
    assert_eq!(db.lookup_aux(&EMPTY_TRIE_HASH), Vec::<u8>::new());
}

/// Backend that refuses the first few batch writes, for exercising the
/// retry loop the way a flaky disk would.
struct FlakyBackend {
    inner: MemBackend,
    failures_left: Cell<u32>,
    attempts: RefCell<Vec<Instant>>,
}

impl FlakyBackend {
    fn new(failures: u32) -> Self {
        Self {
            inner: MemBackend::new(),
            failures_left: Cell::new(failures),
            attempts: RefCell::new(Vec::new()),
        }
    }
}

impl KVBackend for FlakyBackend {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.inner.get(key)
    }

    fn write(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        self.attempts.borrow_mut().push(Instant::now());
        let left = self.failures_left.get();
        if left > 0 {
            self.failures_left.set(left - 1);
            return Err(StoreError::Write("injected failure".into()));
        }
        self.inner.write(batch)
    }
}

#[test]
fn test_retries_transient_write_failures() {
    let unit = Duration::from_millis(20);
    let db = DB::new(
        FlakyBackend::new(3),
        DBConfig::builder()
            .pruning_window(4)
            .retry_backoff(unit)
            .build(),
    )
    .unwrap();
    let h1 = Hash::keccak(b"v1");
    db.insert(h1, b"v1");
    db.commit(1);

    let attempts = db.backend().attempts.borrow();
    assert_eq!(attempts.len(), 4);
    // linear backoff: the i-th retry waits i units
    for (i, pair) in attempts.windows(2).enumerate() {
        assert!(pair[1] - pair[0] >= unit * (i as u32 + 1));
    }
    drop(attempts);
    assert_eq!(db.lookup(&h1), Some(b"v1".to_vec()));
}

#[test]
fn test_random_insert_kill_model() {
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use std::collections::{HashMap, HashSet};

    const WINDOW: u64 = 8;

    struct ModelNode {
        value: Vec<u8>,
        count: i64,
        doomed_at: Option<u64>,
    }

    let mut rng = StdRng::seed_from_u64(42);
    let db = test_db(WINDOW);
    let mut model: HashMap<Hash, ModelNode> = HashMap::new();
    let mut gone: HashSet<Hash> = HashSet::new();

    for block in 1..=80u64 {
        let mut staged: HashMap<Hash, (Vec<u8>, i64)> = HashMap::new();
        let live: Vec<Hash> = model
            .iter()
            .filter(|(_, node)| node.count > 0)
            .map(|(h, _)| *h)
            .collect();

        for _ in 0..rng.gen_range(1..8) {
            if rng.gen_bool(0.6) || live.is_empty() {
                let (h, value) = if rng.gen_bool(0.2) && !live.is_empty() {
                    // nodes are content-addressed, a re-insert carries the
                    // same payload
                    let h = live[rng.gen_range(0..live.len())];
                    (h, model[&h].value.clone())
                } else {
                    let value: Vec<u8> = (0..8).map(|_| rng.gen()).collect();
                    (Hash::keccak(&value), value)
                };
                db.insert(h, &value);
                let entry = staged.entry(h).or_insert((Vec::new(), 0));
                entry.0 = value;
                entry.1 += 1;
            } else {
                let h = live[rng.gen_range(0..live.len())];
                db.kill(&h);
                staged.entry(h).or_insert((Vec::new(), 0)).1 -= 1;
            }
        }
        db.commit(block);

        for (h, (value, delta)) in staged {
            if delta > 0 {
                let node = model.entry(h).or_insert(ModelNode {
                    value: Vec::new(),
                    count: 0,
                    doomed_at: None,
                });
                node.value = value;
                node.count += delta;
                node.doomed_at = None;
                gone.remove(&h);
            } else if delta < 0 {
                if let Some(node) = model.get_mut(&h) {
                    node.count = (node.count + delta).max(0);
                    if node.count == 0 {
                        node.doomed_at = Some(block);
                    }
                }
            }
        }
        if block >= WINDOW {
            let expire = block - WINDOW;
            model.retain(|h, node| {
                if node.doomed_at == Some(expire) {
                    gone.insert(*h);
                    false
                } else {
                    true
                }
            });
        }

        // raw reads only: lookup would reanimate the zero-count nodes
        for (h, node) in &model {
            assert_eq!(
                db.backend().get(&value_key(h)).unwrap().as_deref(),
                Some(node.value.as_slice()),
                "value mismatch for {} at block {}",
                h,
                block
            );
            assert_eq!(
                db.backend().get(&refcount_key(h)).unwrap(),
                Some(node.count.to_string().into_bytes()),
                "refcount mismatch for {} at block {}",
                h,
                block
            );
        }
        for h in &gone {
            assert_eq!(db.backend().get(&value_key(h)).unwrap(), None);
            assert_eq!(db.backend().get(&refcount_key(h)).unwrap(), None);
        }
    }
}
