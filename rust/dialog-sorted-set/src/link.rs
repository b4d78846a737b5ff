use parking_lot::{RwLock, RwLockUpgradableReadGuard};

use crate::{Context, DialogSortedSetError, Key, Node, ReferenceType, Storage, WeakNode};

/// A branch's reference to one of its children.
///
/// A link pairs the child's durable identity (its address, once the child
/// has been stored) with an in-memory handle to the child. The handle is an
/// accelerator and never the sole owner of reachability: a child that has
/// an address may be dropped from memory according to the set's
/// [`ReferenceType`] and is restored from storage on next access. A child
/// that has no address is always held strongly.
pub(crate) struct Link<K, A>
where
    K: Key,
    A: crate::Address,
{
    slot: RwLock<Slot<K, A>>,
}

struct Slot<K, A>
where
    K: Key,
    A: crate::Address,
{
    address: Option<A>,
    handle: Handle<K, A>,
}

enum Handle<K, A>
where
    K: Key,
    A: crate::Address,
{
    Empty,
    Strong(Node<K, A>),
    Weak(WeakNode<K, A>),
}

impl<K, A> Handle<K, A>
where
    K: Key,
    A: crate::Address,
{
    fn upgrade(&self) -> Option<Node<K, A>> {
        match self {
            Handle::Empty => None,
            Handle::Strong(node) => Some(node.clone()),
            Handle::Weak(node) => node.upgrade(),
        }
    }

    /// The handle a link should keep for a child that now has `address`.
    fn hold<S>(
        address: &A,
        node: &Node<K, A>,
        reference: ReferenceType,
        cx: &Context<K, S>,
    ) -> Self
    where
        S: Storage<K, Address = A>,
    {
        match reference {
            ReferenceType::Strong => Handle::Strong(node.clone()),
            ReferenceType::Weak => Handle::Weak(node.downgrade()),
            ReferenceType::Soft => {
                cx.cache.insert(address.clone(), node.clone());
                Handle::Weak(node.downgrade())
            }
        }
    }
}

impl<K, A> Clone for Handle<K, A>
where
    K: Key,
    A: crate::Address,
{
    fn clone(&self) -> Self {
        match self {
            Handle::Empty => Handle::Empty,
            Handle::Strong(node) => Handle::Strong(node.clone()),
            Handle::Weak(node) => Handle::Weak(node.clone()),
        }
    }
}

impl<K, A> Link<K, A>
where
    K: Key,
    A: crate::Address,
{
    /// A link to a node that has not been stored.
    pub fn resident(node: Node<K, A>) -> Self {
        Self {
            slot: RwLock::new(Slot {
                address: None,
                handle: Handle::Strong(node),
            }),
        }
    }

    /// A link to a stored node that has not been loaded yet.
    pub fn stored(address: A) -> Self {
        Self {
            slot: RwLock::new(Slot {
                address: Some(address),
                handle: Handle::Empty,
            }),
        }
    }

    pub fn address(&self) -> Option<A> {
        self.slot.read().address.clone()
    }

    /// The child, if it is currently in memory.
    pub fn peek(&self) -> Option<Node<K, A>> {
        self.slot.read().handle.upgrade()
    }

    /// The child, restored from storage if it is not in memory.
    pub fn resolve<S>(&self, cx: &Context<K, S>) -> Result<Node<K, A>, DialogSortedSetError>
    where
        S: Storage<K, Address = A>,
    {
        self.resolve_with(cx, cx.settings.reference)
    }

    /// Like [`Link::resolve`], but a restored child is held according to
    /// `reference` instead of the set's configured strategy.
    ///
    /// Concurrent readers of the same missing child are serialized on the
    /// link's upgradable lock, so the child is restored exactly once.
    pub fn resolve_with<S>(
        &self,
        cx: &Context<K, S>,
        reference: ReferenceType,
    ) -> Result<Node<K, A>, DialogSortedSetError>
    where
        S: Storage<K, Address = A>,
    {
        if let Some(node) = self.peek() {
            return Ok(node);
        }

        let slot = self.slot.upgradable_read();

        if let Some(node) = slot.handle.upgrade() {
            return Ok(node);
        }

        let address = slot.address.clone().ok_or_else(|| {
            DialogSortedSetError::Node("Link has neither a resident node nor an address".into())
        })?;
        let node = cx.load(&address)?;

        let mut slot = RwLockUpgradableReadGuard::upgrade(slot);
        slot.handle = Handle::hold(&address, &node, reference, cx);

        Ok(node)
    }

    /// Exclusive access to the child, which becomes strongly held.
    ///
    /// This is how a transient batch reaches children it may mutate in place.
    pub fn resolve_mut<S>(
        &mut self,
        cx: &Context<K, S>,
    ) -> Result<&mut Node<K, A>, DialogSortedSetError>
    where
        S: Storage<K, Address = A>,
    {
        let slot = self.slot.get_mut();

        let node = match slot.handle.upgrade() {
            Some(node) => node,
            None => {
                let address = slot.address.as_ref().ok_or_else(|| {
                    DialogSortedSetError::Node(
                        "Link has neither a resident node nor an address".into(),
                    )
                })?;
                cx.load(address)?
            }
        };

        slot.handle = Handle::Strong(node);

        match &mut slot.handle {
            Handle::Strong(node) => Ok(node),
            _ => Err(DialogSortedSetError::Invariant(
                "Link handle was not strong after being pinned".into(),
            )),
        }
    }

    /// Forgets the address of a child that has been changed in place.
    pub fn clear_address(&mut self) {
        self.slot.get_mut().address = None;
    }

    /// Stores the child (and, first, every unstored node below it) unless it
    /// already has an address, and returns that address.
    pub fn store<S>(
        &self,
        cx: &Context<K, S>,
        reference: ReferenceType,
    ) -> Result<A, DialogSortedSetError>
    where
        S: Storage<K, Address = A>,
    {
        if let Some(address) = self.address() {
            return Ok(address);
        }

        let node = self.resolve_with(cx, reference)?;
        let address = node.store(cx)?;

        let mut slot = self.slot.write();
        slot.handle = Handle::hold(&address, &node, reference, cx);
        slot.address = Some(address.clone());

        Ok(address)
    }
}

impl<K, A> Clone for Link<K, A>
where
    K: Key,
    A: crate::Address,
{
    fn clone(&self) -> Self {
        let slot = self.slot.read();
        Self {
            slot: RwLock::new(Slot {
                address: slot.address.clone(),
                handle: slot.handle.clone(),
            }),
        }
    }
}

impl<K, A> std::fmt::Debug for Link<K, A>
where
    K: Key,
    A: crate::Address,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slot = self.slot.read();
        let handle = match &slot.handle {
            Handle::Empty => "empty",
            Handle::Strong(_) => "strong",
            Handle::Weak(node) if node.upgrade().is_some() => "weak",
            Handle::Weak(_) => "dropped",
        };

        f.debug_struct("Link")
            .field("address", &slot.address)
            .field("handle", &handle)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{Comparator, MemoryStorage, Settings};
    use anyhow::Result;

    fn context(reference: ReferenceType) -> Result<(Arc<MemoryStorage<u32>>, Context<u32, MemoryStorage<u32>>)> {
        let storage = Arc::new(MemoryStorage::default());
        let cx = Context::new(
            Some(storage.clone()),
            Comparator::natural(),
            Settings::new(4).with_reference(reference),
        )?;
        Ok((storage, cx))
    }

    #[test]
    fn it_restores_a_stored_child_once() -> Result<()> {
        let (storage, cx) = context(ReferenceType::Strong)?;
        let address = storage.store(&Node::leaf(vec![1, 2, 3]))?;
        let link = Link::stored(address);

        assert!(link.peek().is_none());

        let first = link.resolve(&cx)?;
        let second = link.resolve(&cx)?;

        assert!(first.ptr_eq(&second));
        assert_eq!(first.keys(), &[1, 2, 3]);
        assert_eq!(storage.reads(), 1);

        Ok(())
    }

    #[test]
    fn it_drops_weakly_held_children() -> Result<()> {
        let (storage, cx) = context(ReferenceType::Weak)?;
        let address = storage.store(&Node::leaf(vec![1]))?;
        let link = Link::stored(address);

        let node = link.resolve(&cx)?;
        assert!(link.peek().is_some());

        drop(node);
        assert!(link.peek().is_none());

        link.resolve(&cx)?;
        assert_eq!(storage.reads(), 2);

        Ok(())
    }

    #[test]
    fn it_retains_softly_held_children_in_the_cache() -> Result<()> {
        let (storage, cx) = context(ReferenceType::Soft)?;
        let address = storage.store(&Node::leaf(vec![1]))?;
        let link = Link::stored(address);

        drop(link.resolve(&cx)?);
        assert!(link.peek().is_some());
        assert_eq!(storage.reads(), 1);

        Ok(())
    }

    #[test]
    fn it_stores_a_resident_child_and_records_its_address() -> Result<()> {
        let (storage, cx) = context(ReferenceType::Weak)?;
        let link = Link::resident(Node::leaf(vec![1, 2]));

        assert_eq!(link.address(), None);

        let address = link.store(&cx, ReferenceType::Weak)?;
        assert_eq!(link.address(), Some(address));
        assert_eq!(storage.writes(), 1);

        // Already stored, so nothing is written again
        link.store(&cx, ReferenceType::Weak)?;
        assert_eq!(storage.writes(), 1);

        Ok(())
    }

    #[test]
    fn it_pins_a_child_for_exclusive_access() -> Result<()> {
        let (storage, cx) = context(ReferenceType::Weak)?;
        let address = storage.store(&Node::leaf(vec![1]))?;
        let mut link = Link::stored(address);

        let node = link.resolve_mut(&cx)?;
        assert_eq!(node.keys(), &[1]);

        link.clear_address();
        assert_eq!(link.address(), None);
        assert!(link.peek().is_some());

        Ok(())
    }

    #[test]
    fn it_reports_a_link_without_node_or_address() -> Result<()> {
        let (_, cx) = context(ReferenceType::Strong)?;
        let link = Link::<u32, u64> {
            slot: RwLock::new(Slot {
                address: None,
                handle: Handle::Empty,
            }),
        };

        assert!(matches!(
            link.resolve(&cx),
            Err(DialogSortedSetError::Node(_))
        ));

        Ok(())
    }
}
