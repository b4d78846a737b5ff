#![deny(missing_docs)]

//! A persistent sorted set backed by a B-tree with structural sharing.
//!
//! This crate provides [`SortedSet`], an ordered set of keys that supports
//! lookups, insertions, removals and bounded range traversal in both
//! directions. The ordering comes from a [`Comparator`], which is either the
//! keys' own [`Ord`] implementation or any total order supplied by the
//! caller.
//!
//! Sets are persistent data structures. Operations like [`SortedSet::insert`]
//! and [`SortedSet::remove`] return a new [`SortedSet`] instance rather than
//! modifying in place. Versions share every node that an operation did not
//! touch, which enables:
//!
//! - **Version History**: Keep multiple versions of the set simultaneously
//! - **Cheap Copies**: An update copies only the path from the root to the
//!   leaf it changes
//! - **Safe Concurrency**: Multiple readers can access any version from any
//!   thread without coordination
//!
//! For bulk updates, [`SortedSet::as_transient`] opens a batch in which
//! [`SortedSet::conj`] and [`SortedSet::disj`] change nodes created by that
//! batch in place, and [`SortedSet::persistent`] closes it again.
//!
//! Sets can be paged out to a [`Storage`]. Every node is either resident in
//! memory, stored (reachable through an address), or both:
//!
//! 1. **Resident Nodes**: Nodes created since the set was last stored are
//!    held in memory until [`SortedSet::store`] writes them, children first.
//!
//! 2. **Node Cache**: Depending on the [`ReferenceType`] in the set's
//!    [`Settings`], restored nodes are held strongly, weakly, or weakly with a
//!    bounded [`NodeCache`] keeping recently used ones alive. The cache is
//!    shared by every version derived from the same set.
//!
//! 3. **Storage**: Nodes that are not resident are restored through the
//!    [`Storage`] the first time a lookup or traversal reaches them.
//!
//! Basic usage:
//!
//! ```
//! use dialog_sorted_set::SortedSet;
//!
//! let set = SortedSet::<u32>::new();
//!
//! // Insert keys
//! let set = set.insert(3).unwrap();
//! let set = set.insert(1).unwrap();
//! let set = set.insert(2).unwrap();
//!
//! // Query membership
//! assert!(set.contains(&2).unwrap());
//! assert!(!set.contains(&4).unwrap());
//!
//! // Iterate in order
//! let keys = set.iter().collect::<Result<Vec<_>, _>>().unwrap();
//! assert_eq!(keys, vec![1, 2, 3]);
//! ```
//!
//! Storing and restoring a set:
//!
//! ```
//! use std::sync::Arc;
//! use dialog_sorted_set::{Comparator, MemoryStorage, Settings, SortedSet};
//!
//! let storage = Arc::new(MemoryStorage::<u32>::default());
//! let mut batch = SortedSet::stored(storage.clone(), Comparator::natural(), Settings::default())
//!     .unwrap()
//!     .as_transient()
//!     .unwrap();
//!
//! for key in 0..1000 {
//!     batch.conj(key).unwrap();
//! }
//!
//! // Write every node and keep the root's address
//! let set = batch.persistent().unwrap();
//! let root = set.store().unwrap();
//!
//! // Reopen the set; nodes are restored as they are reached
//! let set = SortedSet::restore(root, storage, Comparator::natural(), Settings::default()).unwrap();
//! assert!(set.contains(&500).unwrap());
//! assert_eq!(set.count().unwrap(), 1000);
//! ```
//!
//! Traversing a range backwards:
//!
//! ```
//! use dialog_sorted_set::SortedSet;
//!
//! let set: SortedSet<u32> = (1..=100).collect();
//!
//! let mut cursor = set.rslice(Some(&80), Some(&20)).unwrap();
//! let mut keys = Vec::new();
//! while let Some(key) = cursor.current().unwrap() {
//!     keys.push(*key);
//!     cursor.advance().unwrap();
//! }
//!
//! assert_eq!(keys.first(), Some(&80));
//! assert_eq!(keys.last(), Some(&20));
//! assert_eq!(keys.len(), 61);
//! ```

mod key;
pub use key::*;

mod error;
pub use error::*;

mod settings;
pub use settings::*;

mod edit;
pub use edit::*;

mod compare;
pub use compare::*;

mod storage;
pub use storage::*;

mod cache;
pub use cache::*;

mod node;
pub use node::*;

mod leaf;
pub use leaf::*;

mod branch;
pub use branch::*;

mod set;
pub use set::*;

mod cursor;
pub use cursor::*;

mod iter;
pub use iter::*;

mod context;
pub(crate) use context::*;

mod link;
pub(crate) use link::*;

mod rebalance;
pub(crate) use rebalance::*;

mod memory;
pub use memory::*;

mod stitch;
