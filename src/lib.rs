//! A thread-safe hashmap guarded by a single reader-writer lock.
//!
//! # Overview
//! `syncmap` provides [`SyncMap`], a key-value store that can be shared between
//! threads. Every access goes through one reader-writer lock: reads run in
//! parallel, writes are serialised and exclude readers.
//!
//! # Features
//! - Single-key operations: `get`, `set`, check-and-set (`cas`), `remove`
//! - Batch operations under one lock: `delete`, `merge`, `filter`, `raw`, `keys`
//! - Independent copies through `Clone`
//! - A live iterator ([`Iter`]) that keeps writers out while it is open
//! - A snapshot iterator ([`SnapshotIter`]) over a private copy, movable in both
//!   directions and lock-free after construction
//!
//! # Examples
//! ```
//! use syncmap::SyncMap;
//!
//! let map = SyncMap::<String, u32>::new();
//!
//! // Basic operations
//! map.set("key1".into(), 42);
//! assert_eq!(map.get("key1"), Some(42));
//! assert!(!map.cas("key1".into(), 7));
//!
//! // Ordered traversal holding the read lock
//! map.set("key2".into(), 123);
//! let mut it = map.iter_by(|a, b| a < b);
//! while it.next() {
//!     println!("{} => {}", it.key().unwrap(), it.val().unwrap());
//! }
//! it.close();
//!
//! // Remove values
//! map.delete(["key1", "key2"]);
//! assert!(map.is_empty());
//! ```
mod error;
mod futex;
mod iter;
mod snapshot;
#[doc = include_str!("../README.md")]
mod syncmap;

pub use error::*;
use futex::*;
pub use iter::*;
pub use snapshot::*;
pub use syncmap::*;
