use std::collections::BTreeMap;

use parking_lot::RwLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("read failed: {0}")]
    Read(String),
    #[error("write failed: {0}")]
    Write(String),
}

/// One operation inside an atomic batch.
#[derive(Debug)]
pub enum BatchOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

/// Move-only builder for an atomic group of writes. A commit accumulates
/// puts and deletes here and hands the finished group to
/// [`KVBackend::write`]; nothing lands until then.
#[derive(Default)]
pub struct WriteBatch(Vec<BatchOp>);

impl WriteBatch {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.0.push(BatchOp::Put { key, value });
    }

    pub fn delete(&mut self, key: Vec<u8>) {
        self.0.push(BatchOp::Delete { key });
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.0
    }
}

/// Ordered byte-keyed store the overlay persists into. All mutations go
/// through [`write`](Self::write), which must apply the whole batch
/// atomically; a batch that puts and deletes the same key applies in order.
pub trait KVBackend {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;
    fn write(&self, batch: &WriteBatch) -> Result<(), StoreError>;

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        let mut batch = WriteBatch::new();
        batch.put(key.to_vec(), value.to_vec());
        self.write(&batch)
    }

    fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        let mut batch = WriteBatch::new();
        batch.delete(key.to_vec());
        self.write(&batch)
    }
}

/// In-memory ordered backend over a `BTreeMap`.
#[derive(Default)]
pub struct MemBackend {
    map: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }
}

impl KVBackend for MemBackend {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.map.read().get(key).cloned())
    }

    fn write(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        let mut map = self.map.write();
        for op in batch.ops() {
            match op {
                BatchOp::Put { key, value } => {
                    map.insert(key.clone(), value.clone());
                }
                BatchOp::Delete { key } => {
                    map.remove(key);
                }
            }
        }
        Ok(())
    }
}

#[test]
fn test_batch_applies_in_order() {
    let backend = MemBackend::new();
    let mut batch = WriteBatch::new();
    batch.put(b"a".to_vec(), b"1".to_vec());
    batch.put(b"b".to_vec(), b"2".to_vec());
    batch.put(b"a".to_vec(), b"3".to_vec());
    batch.delete(b"b".to_vec());
    backend.write(&batch).unwrap();
    assert_eq!(backend.get(b"a").unwrap(), Some(b"3".to_vec()));
    assert_eq!(backend.get(b"b").unwrap(), None);
    assert_eq!(backend.len(), 1);
}

#[test]
fn test_single_op_helpers() {
    let backend = MemBackend::new();
    backend.put(b"k", b"v").unwrap();
    assert_eq!(backend.get(b"k").unwrap(), Some(b"v".to_vec()));
    backend.delete(b"k").unwrap();
    assert!(backend.is_empty());
}
