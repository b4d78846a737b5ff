use std::sync::Arc;

use crate::{
    Comparator, DialogSortedSetError, Edit, Key, Node, NodeCache, ReferenceType, Settings,
    Storage,
};

/// Everything a node operation needs besides the node itself: where to load
/// missing children from, how to order keys, how large nodes may grow and
/// where softly referenced children are retained.
///
/// A context is cheap to clone and is shared by every version of a set.
pub(crate) struct Context<K, S>
where
    K: Key,
    S: Storage<K>,
{
    pub storage: Option<Arc<S>>,
    pub settings: Settings,
    pub cache: NodeCache<K, S::Address>,
    pub cmp: Comparator<K>,
}

impl<K, S> Clone for Context<K, S>
where
    K: Key,
    S: Storage<K>,
{
    fn clone(&self) -> Self {
        Self {
            storage: self.storage.clone(),
            settings: self.settings.clone(),
            cache: self.cache.clone(),
            cmp: self.cmp.clone(),
        }
    }
}

impl<K, S> Context<K, S>
where
    K: Key,
    S: Storage<K>,
{
    pub fn new(
        storage: Option<Arc<S>>,
        cmp: Comparator<K>,
        settings: Settings,
    ) -> Result<Self, DialogSortedSetError> {
        settings.validate()?;

        let cache = if storage.is_some() && settings.reference == ReferenceType::Soft {
            NodeCache::new(settings.cache_capacity)?
        } else {
            NodeCache::disabled()
        };

        Ok(Self {
            storage,
            settings,
            cache,
            cmp,
        })
    }

    /// The same storage, settings and cache, ordered by a different
    /// comparator.
    pub fn with_comparator(&self, cmp: Comparator<K>) -> Self {
        Self {
            cmp,
            ..self.clone()
        }
    }

    /// Allocation size for a node of `len` keys created under `edit`.
    pub fn capacity(&self, len: usize, edit: Option<&Edit>) -> usize {
        self.settings
            .capacity(len, edit.is_some_and(Edit::is_editable))
    }

    pub fn storage(&self) -> Result<&S, DialogSortedSetError> {
        self.storage.as_deref().ok_or_else(|| {
            DialogSortedSetError::Storage("No storage is configured for this set".into())
        })
    }

    /// Loads the node stored at `address`, preferring the soft cache over the
    /// storage.
    pub fn load(&self, address: &S::Address) -> Result<Node<K, S::Address>, DialogSortedSetError> {
        if let Some(node) = self.cache.get(address) {
            return Ok(node);
        }

        let node = self.storage()?.restore(address).map_err(Into::into)?;
        tracing::trace!(?address, level = node.level(), "Restored node");

        Ok(node)
    }
}
