use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, AtomicUsize, Ordering},
};

use parking_lot::RwLock;

use crate::{DialogSortedSetError, Key, Node, Storage};

enum Record<K> {
    Leaf(Vec<K>),
    Branch {
        level: usize,
        keys: Vec<K>,
        addresses: Vec<u64>,
    },
}

/// A [`Storage`] that keeps stored nodes in a [`HashMap`] and counts how
/// many times it has been read from and written to.
///
/// Addresses are handed out sequentially, starting at zero.
pub struct MemoryStorage<K>
where
    K: Key,
{
    records: RwLock<HashMap<u64, Record<K>>>,
    next: AtomicU64,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl<K> Default for MemoryStorage<K>
where
    K: Key,
{
    fn default() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            next: AtomicU64::default(),
            reads: AtomicUsize::default(),
            writes: AtomicUsize::default(),
        }
    }
}

impl<K> MemoryStorage<K>
where
    K: Key,
{
    /// The aggregate number of nodes restored from this storage
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }

    /// The aggregate number of nodes written to this storage
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }

    /// The number of nodes currently held
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Whether nothing has been stored yet
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Drops every node whose address is not in `live`, returning how many
    /// were dropped.
    pub fn retain(&self, live: &std::collections::HashSet<u64>) -> usize {
        let mut records = self.records.write();
        let before = records.len();
        records.retain(|address, _| live.contains(address));
        before - records.len()
    }
}

impl<K> Storage<K> for MemoryStorage<K>
where
    K: Key,
{
    type Address = u64;
    type Error = DialogSortedSetError;

    fn restore(&self, address: &u64) -> Result<Node<K, u64>, Self::Error> {
        self.reads.fetch_add(1, Ordering::Relaxed);

        let records = self.records.read();
        match records.get(address) {
            Some(Record::Leaf(keys)) => Ok(Node::leaf(keys.clone())),
            Some(Record::Branch {
                level,
                keys,
                addresses,
            }) => Node::branch(*level, keys.clone(), addresses.clone()),
            None => Err(DialogSortedSetError::Storage(format!(
                "No node stored at address {address}"
            ))),
        }
    }

    fn store(&self, node: &Node<K, u64>) -> Result<u64, Self::Error> {
        let record = match node.is_leaf() {
            true => Record::Leaf(node.keys().to_vec()),
            false => Record::Branch {
                level: node.level(),
                keys: node.keys().to_vec(),
                addresses: node.child_addresses()?,
            },
        };

        self.writes.fetch_add(1, Ordering::Relaxed);
        let address = self.next.fetch_add(1, Ordering::Relaxed);
        self.records.write().insert(address, record);

        Ok(address)
    }
}
