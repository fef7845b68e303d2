//! # Deadwood: reference-counted pruning overlay for blockchain state storage.
//!
//! Deadwood is the buffering and reclamation layer that sits between a blockchain's
//! in-memory working set and a persistent ordered key-value engine. While a block
//! executes, node-level mutations accumulate in an in-process overlay; nothing
//! touches disk. When the block commits, the overlay materializes every staged node
//! into the backend in one atomic batch, and from then on the node's life is
//! governed by an integer reference count stored next to its value.
//!
//! Storing state nodes by content hash means many tries share the same node, and a
//! node only becomes garbage when the last trie referencing it lets go. Deadwood
//! tracks that moment explicitly: each commit raises counts for inserted nodes and
//! lowers them for released ones. A node whose count reaches zero is not deleted.
//! It is enqueued on that block's *deathrow*, where it sits for a fixed number of
//! blocks (the pruning window) before its keys are physically removed. The window
//! exists because blockchains reorganize: a short-lived fork can orphan nodes that
//! the canonical chain will want back minutes later. Until the window expires, any
//! read that finds a zero-count node in the backend *reanimates* it, bumping its
//! count back to one and pulling it off deathrow.
//!
//! Reorganizations are handled head-on rather than by versioning the store. Every
//! count adjustment a commit makes is journaled under its block number. If the
//! same block number is committed again, the chain has retreated: the committer
//! first inverts everything journaled at that height and above, block by block,
//! then replays the replacement block. The net effect is as if only the second
//! commit had ever happened.
//!
//! Three kinds of record share the backend, told apart by a suffix byte on the
//! 32-byte node hash: the bare hash keys the node value, hash+`0xFE` keys the
//! reference count (stored as ASCII decimal for compatibility with existing
//! state), and hash+`0xFF` keys an auxiliary payload that is neither refcounted
//! nor consulted by pruning decisions beyond deletion alongside its node.
//!
//! The backend itself is abstract: anything that can `get` a key and atomically
//! apply a batch of puts and deletes can sit under the overlay (see
//! [`backend::KVBackend`]; an ordered in-memory implementation ships for tests
//! and embedding). Batch writes are retried with linear backoff and, if the
//! backend stays down, the process exits: a validator that silently lost a state
//! write is worse than a dead one.
pub mod backend;
pub mod db;
pub(crate) mod deathrow;
pub mod hash;
pub(crate) mod journal;
pub(crate) mod keys;
pub(crate) mod overlay;
pub(crate) mod refcount;
