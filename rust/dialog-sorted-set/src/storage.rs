use std::convert::Infallible;

use crate::{Address, DialogSortedSetError, Key, Node};

/// The contract between a [`crate::SortedSet`] and whatever medium holds its
/// nodes when they are not resident in memory.
///
/// Implementations only ever see one node at a time. A branch is handed to
/// [`Storage::store`] strictly after every one of its children has been
/// stored, so [`Node::child_addresses`] is always complete at that point.
pub trait Storage<K>
where
    K: Key,
{
    /// The opaque identifier of a stored node.
    type Address: Address;

    /// Errors raised by this storage; they are propagated to callers of the
    /// set unchanged.
    type Error: Into<DialogSortedSetError>;

    /// Reconstructs the node stored at `address`.
    ///
    /// A restored branch holds only the addresses of its children; they are
    /// restored on demand as the set descends into them.
    fn restore(&self, address: &Self::Address) -> Result<Node<K, Self::Address>, Self::Error>;

    /// Persists the keys of `node` (and, for a branch, its level and child
    /// addresses) and returns the address it can be restored from.
    fn store(&self, node: &Node<K, Self::Address>) -> Result<Self::Address, Self::Error>;
}

/// The [`Storage`] of a purely in-memory set.
///
/// Nothing can be stored and no address can ever exist, so every node of a
/// set using [`NoStorage`] stays resident.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoStorage;

impl<K> Storage<K> for NoStorage
where
    K: Key,
{
    type Address = Infallible;
    type Error = DialogSortedSetError;

    fn restore(&self, address: &Self::Address) -> Result<Node<K, Self::Address>, Self::Error> {
        match *address {}
    }

    fn store(&self, _node: &Node<K, Self::Address>) -> Result<Self::Address, Self::Error> {
        Err(DialogSortedSetError::Storage(
            "Cannot store a set that was created without storage".into(),
        ))
    }
}
