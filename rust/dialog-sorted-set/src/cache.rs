use sieve_cache::ShardedSieveCache;

use crate::{Address, DialogSortedSetError, Key, Node};

/// A bounded, thread-safe cache of stored nodes, keyed by address.
///
/// This is what makes a [`crate::ReferenceType::Soft`] link "soft": the link
/// itself only holds a weak handle to its child, and the child stays resident
/// for as long as the cache retains it. Eviction follows the SIEVE policy.
///
/// Clones share the same underlying cache, so every version derived from one
/// set (by insertion, removal or a transient batch) benefits from nodes
/// loaded by any of the others.
#[derive(Clone)]
pub struct NodeCache<K, A>
where
    K: Key,
    A: Address,
{
    cache: Option<ShardedSieveCache<A, Node<K, A>>>,
}

impl<K, A> std::fmt::Debug for NodeCache<K, A>
where
    K: Key,
    A: Address,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeCache")
            .field("len", &self.len())
            .finish()
    }
}

impl<K, A> NodeCache<K, A>
where
    K: Key,
    A: Address,
{
    /// Creates a cache that retains up to `capacity` nodes.
    pub fn new(capacity: usize) -> Result<Self, DialogSortedSetError> {
        let cache = ShardedSieveCache::new(capacity)
            .map_err(|error| DialogSortedSetError::Configuration(error.to_string()))?;

        Ok(Self { cache: Some(cache) })
    }

    /// A cache that never retains anything.
    pub fn disabled() -> Self {
        Self { cache: None }
    }

    /// Whether this cache can retain nodes at all.
    pub fn is_enabled(&self) -> bool {
        self.cache.is_some()
    }

    /// Retrieves the node stored at `address`, if it is still retained.
    pub fn get(&self, address: &A) -> Option<Node<K, A>> {
        self.cache.as_ref().and_then(|cache| cache.get(address))
    }

    /// Retains `node` under `address`.
    pub fn insert(&self, address: A, node: Node<K, A>) -> bool {
        match &self.cache {
            Some(cache) => cache.insert(address, node),
            None => false,
        }
    }

    /// The number of nodes currently retained.
    pub fn len(&self) -> usize {
        self.cache.as_ref().map(|cache| cache.len()).unwrap_or_default()
    }

    /// Whether no node is currently retained.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn it_retains_nodes_by_address() -> Result<()> {
        let cache = NodeCache::<u32, u64>::new(16)?;
        let node = Node::leaf(vec![1, 2, 3]);

        cache.insert(7, node.clone());

        let cached = cache.get(&7).ok_or_else(|| anyhow::anyhow!("node was not cached"))?;
        assert!(cached.ptr_eq(&node));
        assert!(cache.get(&8).is_none());
        assert_eq!(cache.len(), 1);

        Ok(())
    }

    #[test]
    fn it_is_shared_between_clones() -> Result<()> {
        let cache = NodeCache::<u32, u64>::new(16)?;
        let clone = cache.clone();

        clone.insert(1, Node::leaf(vec![1]));

        assert!(cache.get(&1).is_some());
        Ok(())
    }

    #[test]
    fn it_retains_nothing_when_disabled() {
        let cache = NodeCache::<u32, u64>::disabled();

        assert!(!cache.insert(1, Node::leaf(vec![1])));
        assert!(cache.get(&1).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn it_rejects_a_zero_capacity() {
        assert!(NodeCache::<u32, u64>::new(0).is_err());
    }
}
