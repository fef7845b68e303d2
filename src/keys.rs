//! On-disk key namespaces. Three kinds of record share the backend, told
//! apart by a suffix byte appended to the 32-byte node hash:
//!
//! - 32 bytes exact: the node value itself
//! - hash + `0xFE`: its reference count, stored as ASCII decimal
//! - hash + `0xFF`: an auxiliary payload
//!
//! The layout is shared with existing on-disk state and must stay bit-exact.

use crate::hash::Hash;

const REFCOUNT: u8 = 0xfe;
const AUX: u8 = 0xff;

pub(crate) fn value(h: &Hash) -> Vec<u8> {
    h.to_vec()
}

pub(crate) fn refcount(h: &Hash) -> Vec<u8> {
    suffixed(h, REFCOUNT)
}

pub(crate) fn aux(h: &Hash) -> Vec<u8> {
    suffixed(h, AUX)
}

fn suffixed(h: &Hash, tag: u8) -> Vec<u8> {
    let mut key = h.to_vec();
    key.push(tag);
    key
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum DbKey {
    Value(Hash),
    RefCount(Hash),
    Aux(Hash),
}

pub(crate) fn decode(raw: &[u8]) -> Option<DbKey> {
    match raw.len() {
        32 => Some(DbKey::Value(Hash(raw.try_into().ok()?))),
        33 => {
            let h = Hash(raw[..32].try_into().ok()?);
            match raw[32] {
                REFCOUNT => Some(DbKey::RefCount(h)),
                AUX => Some(DbKey::Aux(h)),
                _ => None,
            }
        }
        _ => None,
    }
}

#[test]
fn test_key_layout() {
    let h = Hash([0xab; 32]);
    assert_eq!(value(&h).len(), 32);
    assert_eq!(refcount(&h)[..32], h[..]);
    assert_eq!(refcount(&h)[32], 0xfe);
    assert_eq!(aux(&h)[32], 0xff);
}

#[test]
fn test_key_decode() {
    let h = Hash([7; 32]);
    assert_eq!(decode(&value(&h)), Some(DbKey::Value(h)));
    assert_eq!(decode(&refcount(&h)), Some(DbKey::RefCount(h)));
    assert_eq!(decode(&aux(&h)), Some(DbKey::Aux(h)));
    let mut bad = h.to_vec();
    bad.push(0x00);
    assert_eq!(decode(&bad), None);
    assert_eq!(decode(&h[..31]), None);
    assert_eq!(decode(&[]), None);
}
