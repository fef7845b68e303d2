use std::fmt;
use std::ops::Deref;

use sha3::{Digest, Keccak256};

/// 32-byte Keccak digest identifying a node by content.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Hash(pub [u8; 32]);

/// Digest of the RLP encoding of the empty string, the root of an empty
/// trie. Nodes carrying this hash are never persisted, refcounted, or
/// scheduled for deletion; every overlay operation treats it as a no-op.
pub const EMPTY_TRIE_HASH: Hash = Hash([
    0x56, 0xe8, 0x1f, 0x17, 0x1b, 0xcc, 0x55, 0xa6, 0xff, 0x83, 0x45, 0xe6, 0x92, 0xc0, 0xf8,
    0x6e, 0x5b, 0x48, 0xe0, 0x1b, 0x99, 0x6c, 0xad, 0xc0, 0x01, 0x62, 0x2f, 0xb5, 0xe3, 0x63,
    0xb4, 0x21,
]);

impl Hash {
    pub fn keccak<T: AsRef<[u8]>>(data: T) -> Self {
        Self(Keccak256::digest(data.as_ref()).into())
    }
}

impl Deref for Hash {
    type Target = [u8; 32];
    fn deref(&self) -> &[u8; 32] {
        &self.0
    }
}

impl From<[u8; 32]> for Hash {
    fn from(raw: [u8; 32]) -> Self {
        Self(raw)
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

#[test]
fn test_empty_trie_hash() {
    assert_eq!(Hash::keccak(rlp::NULL_RLP), EMPTY_TRIE_HASH);
    assert_eq!(
        format!("{}", EMPTY_TRIE_HASH),
        "56e81f171bcc55a6ff8345e692c0f86e5b48e01b996cadc001622fb5e363b421"
    );
}
