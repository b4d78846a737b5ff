use std::{
    cmp::Ordering,
    sync::{Arc, Weak},
};

use crate::{
    Address, Branch, Context, DialogSortedSetError, Edit, Key, Leaf, Link, Pieces, Settings,
    Storage, compare::search, compare::search_first,
};

/// A node of a sorted set's B-tree.
///
/// Leaves hold set members directly. Branches hold, for each child, the
/// child's maximum key and a link to the child, plus their `level` (the
/// height above the leaves; every leaf sits at level 0).
///
/// Nodes are reference counted and immutable once they are reachable from a
/// persistent set, so cloning one is cheap and a node can be shared by any
/// number of set versions and cursors at once.
pub enum Node<K, A>
where
    K: Key,
    A: Address,
{
    /// A node at level 0.
    Leaf(Arc<Leaf<K>>),
    /// A node at level 1 or above.
    Branch(Arc<Branch<K, A>>),
}

impl<K, A> Clone for Node<K, A>
where
    K: Key,
    A: Address,
{
    fn clone(&self) -> Self {
        match self {
            Node::Leaf(leaf) => Node::Leaf(leaf.clone()),
            Node::Branch(branch) => Node::Branch(branch.clone()),
        }
    }
}

impl<K, A> std::fmt::Debug for Node<K, A>
where
    K: Key,
    A: Address,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Node::Leaf(leaf) => f.debug_struct("Leaf").field("keys", &leaf.keys()).finish(),
            Node::Branch(branch) => f
                .debug_struct("Branch")
                .field("level", &branch.level())
                .field("keys", &branch.keys())
                .field("links", &branch.links())
                .finish(),
        }
    }
}

/// A non-owning handle to a [`Node`].
pub(crate) enum WeakNode<K, A>
where
    K: Key,
    A: Address,
{
    Leaf(Weak<Leaf<K>>),
    Branch(Weak<Branch<K, A>>),
}

impl<K, A> WeakNode<K, A>
where
    K: Key,
    A: Address,
{
    pub fn upgrade(&self) -> Option<Node<K, A>> {
        match self {
            WeakNode::Leaf(leaf) => leaf.upgrade().map(Node::Leaf),
            WeakNode::Branch(branch) => branch.upgrade().map(Node::Branch),
        }
    }
}

impl<K, A> Clone for WeakNode<K, A>
where
    K: Key,
    A: Address,
{
    fn clone(&self) -> Self {
        match self {
            WeakNode::Leaf(leaf) => WeakNode::Leaf(leaf.clone()),
            WeakNode::Branch(branch) => WeakNode::Branch(branch.clone()),
        }
    }
}

/// The outcome of adding a key to a node.
pub(crate) enum Added<K, A>
where
    K: Key,
    A: Address,
{
    /// The key was already present.
    Unchanged,
    /// The node was changed in place. `max_changed` is set when its last
    /// key is now different, so the parent must refresh its copy of it.
    InPlace { max_changed: bool },
    /// The node was replaced by a single new node.
    One(Node<K, A>),
    /// The node overflowed and was replaced by two new nodes.
    Split(Node<K, A>, Node<K, A>),
}

/// The outcome of removing a key from a node.
pub(crate) enum Removed<K, A>
where
    K: Key,
    A: Address,
{
    /// The key was not present.
    Unchanged,
    /// The node was changed in place; see [`Added::InPlace`].
    InPlace { max_changed: bool },
    /// The node (and possibly one of its siblings) was rebuilt.
    Rebalanced(Pieces<Node<K, A>>),
}

impl<K, A> Node<K, A>
where
    K: Key,
    A: Address,
{
    /// A leaf holding `keys`, which must be strictly increasing under the
    /// comparator of the set it will belong to.
    ///
    /// This is how a [`Storage`] reconstructs a stored leaf.
    pub fn leaf(keys: Vec<K>) -> Self {
        Node::Leaf(Arc::new(Leaf::new(keys, None)))
    }

    /// A branch at `level` whose `i`th child is stored at `addresses[i]` and
    /// has `keys[i]` as its maximum key.
    ///
    /// This is how a [`Storage`] reconstructs a stored branch. Its children
    /// are restored lazily.
    pub fn branch(
        level: usize,
        keys: Vec<K>,
        addresses: Vec<A>,
    ) -> Result<Self, DialogSortedSetError> {
        if level == 0 {
            return Err(DialogSortedSetError::Node(
                "A branch must sit above level 0".into(),
            ));
        }

        if keys.len() != addresses.len() {
            return Err(DialogSortedSetError::Node(format!(
                "A branch needs one address per key (got {} keys and {} addresses)",
                keys.len(),
                addresses.len()
            )));
        }

        let links = addresses.into_iter().map(Link::stored).collect();
        Ok(Node::Branch(Arc::new(Branch::new(level, keys, links, None))))
    }

    /// The keys held by this node: set members for a leaf, the maximum key
    /// of each child for a branch.
    pub fn keys(&self) -> &[K] {
        match self {
            Node::Leaf(leaf) => leaf.keys(),
            Node::Branch(branch) => branch.keys(),
        }
    }

    /// The number of keys (or children) held by this node.
    pub fn len(&self) -> usize {
        self.keys().len()
    }

    /// Whether this node holds no keys at all, which only an empty set's root
    /// may do.
    pub fn is_empty(&self) -> bool {
        self.keys().is_empty()
    }

    /// The height of this node above the leaves.
    pub fn level(&self) -> usize {
        match self {
            Node::Leaf(_) => 0,
            Node::Branch(branch) => branch.level(),
        }
    }

    /// Whether this node is a leaf.
    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf(_))
    }

    /// The largest key in the subtree rooted at this node.
    pub fn max_key(&self) -> Option<&K> {
        self.keys().last()
    }

    /// The storage address of every child of a branch, in order; empty for a
    /// leaf.
    ///
    /// Fails if a child has not been stored yet, which cannot happen while a
    /// set is storing its nodes bottom up.
    pub fn child_addresses(&self) -> Result<Vec<A>, DialogSortedSetError> {
        match self {
            Node::Leaf(_) => Ok(Vec::new()),
            Node::Branch(branch) => branch
                .links()
                .iter()
                .enumerate()
                .map(|(index, link)| {
                    link.address().ok_or_else(|| {
                        DialogSortedSetError::Storage(format!(
                            "Child {index} of a level {} branch has not been stored",
                            branch.level()
                        ))
                    })
                })
                .collect(),
        }
    }

    /// Whether `self` and `other` are the very same node in memory.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Node::Leaf(left), Node::Leaf(right)) => Arc::ptr_eq(left, right),
            (Node::Branch(left), Node::Branch(right)) => Arc::ptr_eq(left, right),
            _ => false,
        }
    }

    pub(crate) fn downgrade(&self) -> WeakNode<K, A> {
        match self {
            Node::Leaf(leaf) => WeakNode::Leaf(Arc::downgrade(leaf)),
            Node::Branch(branch) => WeakNode::Branch(Arc::downgrade(branch)),
        }
    }

    pub(crate) fn as_branch(&self) -> Option<&Branch<K, A>> {
        match self {
            Node::Leaf(_) => None,
            Node::Branch(branch) => Some(branch),
        }
    }

    /// An owned copy of the maximum key, which every non-root node has.
    pub(crate) fn max_key_owned(&self) -> Result<K, DialogSortedSetError> {
        self.max_key().cloned().ok_or_else(|| {
            DialogSortedSetError::Invariant(format!(
                "Expected a non-empty node at level {}",
                self.level()
            ))
        })
    }

    pub(crate) fn add<S>(
        &mut self,
        key: K,
        cx: &Context<K, S>,
        edit: Option<&Edit>,
    ) -> Result<Added<K, A>, DialogSortedSetError>
    where
        S: Storage<K, Address = A>,
    {
        match self {
            Node::Leaf(leaf) => Leaf::add(leaf, key, cx, edit),
            Node::Branch(branch) => Branch::add(branch, key, cx, edit),
        }
    }

    /// Removes `key` from the subtree rooted at this node. `left` and
    /// `right` are this node's immediate siblings under the same parent, if
    /// any; they are consulted (never changed) when this node underflows.
    pub(crate) fn remove<S>(
        &mut self,
        key: &K,
        left: Option<&Node<K, A>>,
        right: Option<&Node<K, A>>,
        cx: &Context<K, S>,
        edit: Option<&Edit>,
    ) -> Result<Removed<K, A>, DialogSortedSetError>
    where
        S: Storage<K, Address = A>,
    {
        match self {
            Node::Leaf(leaf) => Leaf::remove(leaf, key, left, right, cx, edit),
            Node::Branch(branch) => Branch::remove(branch, key, left, right, cx, edit),
        }
    }

    pub(crate) fn contains<S>(
        &self,
        key: &K,
        cx: &Context<K, S>,
    ) -> Result<bool, DialogSortedSetError>
    where
        S: Storage<K, Address = A>,
    {
        let mut node = self.clone();

        loop {
            let next = match &node {
                Node::Leaf(leaf) => return Ok(search(leaf.keys(), key, &cx.cmp).is_ok()),
                Node::Branch(branch) => {
                    let index = search_first(branch.keys(), key, &cx.cmp);
                    match branch.keys().get(index) {
                        None => return Ok(false),
                        Some(max) if cx.cmp.compare(max, key) == Ordering::Equal => {
                            return Ok(true);
                        }
                        Some(_) => branch.child(index, cx)?,
                    }
                }
            };
            node = next;
        }
    }

    /// The number of keys in the subtree rooted at this node.
    pub(crate) fn count<S>(&self, cx: &Context<K, S>) -> Result<usize, DialogSortedSetError>
    where
        S: Storage<K, Address = A>,
    {
        match self {
            Node::Leaf(leaf) => Ok(leaf.keys().len()),
            Node::Branch(branch) => {
                let mut count = 0;
                for link in branch.links() {
                    count += link.resolve(cx)?.count(cx)?;
                }
                Ok(count)
            }
        }
    }

    /// Stores every child that has no address yet, then this node, and
    /// returns this node's new address.
    pub(crate) fn store<S>(&self, cx: &Context<K, S>) -> Result<A, DialogSortedSetError>
    where
        S: Storage<K, Address = A>,
    {
        if let Node::Branch(branch) = self {
            for link in branch.links() {
                link.store(cx, cx.settings.reference)?;
            }
        }

        cx.storage()?.store(self).map_err(Into::into)
    }

    /// Visits this node and then, if `visit` returns true, each of its
    /// children in order.
    pub(crate) fn walk<S, F>(
        &self,
        address: Option<&A>,
        cx: &Context<K, S>,
        visit: &mut F,
    ) -> Result<(), DialogSortedSetError>
    where
        S: Storage<K, Address = A>,
        F: FnMut(&Node<K, A>, Option<&A>) -> bool,
    {
        if !visit(self, address) {
            return Ok(());
        }

        if let Node::Branch(branch) = self {
            for link in branch.links() {
                let child = link.resolve(cx)?;
                child.walk(link.address().as_ref(), cx, visit)?;
            }
        }

        Ok(())
    }

    /// Checks the structural invariants of the subtree rooted at this node.
    pub(crate) fn validate<S>(
        &self,
        cx: &Context<K, S>,
        is_root: bool,
    ) -> Result<(), DialogSortedSetError>
    where
        S: Storage<K, Address = A>,
    {
        let keys = self.keys();
        let level = self.level();
        let settings = &cx.settings;

        if keys.len() > settings.max_len || (!is_root && keys.len() < settings.min_len()) {
            return Err(DialogSortedSetError::Invariant(format!(
                "Node at level {level} holds {} keys, outside of [{}, {}]",
                keys.len(),
                settings.min_len(),
                settings.max_len
            )));
        }

        if keys
            .windows(2)
            .any(|pair| cx.cmp.compare(&pair[0], &pair[1]) != Ordering::Less)
        {
            return Err(DialogSortedSetError::Invariant(format!(
                "Keys of a node at level {level} are not strictly increasing"
            )));
        }

        let Node::Branch(branch) = self else {
            return Ok(());
        };

        if branch.is_empty() || branch.links().len() != keys.len() {
            return Err(DialogSortedSetError::Invariant(format!(
                "Branch at level {level} has {} keys and {} children",
                keys.len(),
                branch.links().len()
            )));
        }

        for (index, key) in keys.iter().enumerate() {
            let child = branch.child(index, cx)?;

            if child.level() + 1 != level {
                return Err(DialogSortedSetError::Invariant(format!(
                    "Child {index} of a level {level} branch sits at level {}",
                    child.level()
                )));
            }

            match child.max_key() {
                Some(max) if cx.cmp.compare(max, key) == Ordering::Equal => (),
                _ => {
                    return Err(DialogSortedSetError::Invariant(format!(
                        "Key {index} of a level {level} branch is not its child's maximum key"
                    )));
                }
            }

            child.validate(cx, false)?;
        }

        Ok(())
    }

    /// Builds a balanced tree over `keys`, which must already be strictly
    /// increasing.
    ///
    /// Every level is cut into the fewest groups that fit `max_len`, with
    /// group sizes differing by at most one, so every non-root node ends up
    /// at least half full.
    pub(crate) fn build(keys: Vec<K>, settings: &Settings) -> Result<Self, DialogSortedSetError> {
        let max_len = settings.max_len;

        if keys.len() <= max_len {
            return Ok(Node::leaf(keys));
        }

        let mut nodes: Vec<Node<K, A>> = partition(keys, max_len)
            .into_iter()
            .map(Node::leaf)
            .collect();
        let mut level = 1;

        while nodes.len() > max_len {
            nodes = partition(nodes, max_len)
                .into_iter()
                .map(|children| Branch::from_children(level, children, None).map(Node::from))
                .collect::<Result<_, _>>()?;
            level += 1;
        }

        Ok(Node::from(Branch::from_children(level, nodes, None)?))
    }
}

impl<K, A> From<Branch<K, A>> for Node<K, A>
where
    K: Key,
    A: Address,
{
    fn from(branch: Branch<K, A>) -> Self {
        Node::Branch(Arc::new(branch))
    }
}

impl<K, A> From<Leaf<K>> for Node<K, A>
where
    K: Key,
    A: Address,
{
    fn from(leaf: Leaf<K>) -> Self {
        Node::Leaf(Arc::new(leaf))
    }
}

/// Splits `items` into the fewest runs of at most `max_len` items, with run
/// lengths that differ by at most one.
fn partition<T>(items: Vec<T>, max_len: usize) -> Vec<Vec<T>> {
    let total = items.len();
    let groups = total.div_ceil(max_len).max(1);
    let base = total / groups;
    let extra = total % groups;

    let mut items = items.into_iter();
    (0..groups)
        .map(|group| {
            let len = if group < extra { base + 1 } else { base };
            items.by_ref().take(len).collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Comparator, MemoryStorage, NoStorage};
    use anyhow::Result;

    fn context(max_len: usize) -> Result<Context<u32, NoStorage>> {
        Ok(Context::new(None, Comparator::natural(), Settings::new(max_len))?)
    }

    #[test]
    fn it_partitions_into_even_groups() {
        let groups = partition((0..10).collect::<Vec<u32>>(), 4);
        let lengths: Vec<usize> = groups.iter().map(Vec::len).collect();

        assert_eq!(lengths, vec![4, 3, 3]);
        assert_eq!(groups.concat(), (0..10).collect::<Vec<u32>>());
    }

    #[test]
    fn it_builds_a_balanced_tree() -> Result<()> {
        let cx = context(4)?;

        for len in [0u32, 1, 4, 5, 17, 100, 257] {
            let node = Node::<u32, _>::build((0..len).collect(), &cx.settings)?;

            node.validate(&cx, true)?;
            assert_eq!(node.count(&cx)?, len as usize);
        }

        Ok(())
    }

    #[test]
    fn it_finds_keys_in_leaves_and_branches() -> Result<()> {
        let cx = context(4)?;
        let node = Node::build((0..50).map(|key| key * 2).collect(), &cx.settings)?;

        assert!(node.level() > 1);
        assert!(node.contains(&0, &cx)?);
        assert!(node.contains(&42, &cx)?);
        assert!(node.contains(&98, &cx)?);
        assert!(!node.contains(&43, &cx)?);
        assert!(!node.contains(&100, &cx)?);

        Ok(())
    }

    #[test]
    fn it_adds_in_place_only_within_the_owning_batch() -> Result<()> {
        let cx = context(8)?;
        let edit = Edit::transient(0);
        let mut node: Node<u32, _> = Node::from(Leaf::new(vec![1, 3], Some(edit.clone())));

        assert!(matches!(
            node.add(4, &cx, Some(&edit))?,
            Added::InPlace { max_changed: true }
        ));
        assert!(matches!(
            node.add(2, &cx, Some(&edit))?,
            Added::InPlace { max_changed: false }
        ));
        assert_eq!(node.keys(), &[1, 2, 3, 4]);

        let other = Edit::transient(0);
        let Added::One(copy) = node.add(5, &cx, Some(&other))? else {
            anyhow::bail!("expected a copy");
        };
        assert_eq!(copy.keys(), &[1, 2, 3, 4, 5]);
        assert_eq!(node.keys(), &[1, 2, 3, 4]);

        Ok(())
    }

    #[test]
    fn it_never_changes_a_shared_node_in_place() -> Result<()> {
        let cx = context(8)?;
        let edit = Edit::transient(0);
        let mut node: Node<u32, _> = Node::from(Leaf::new(vec![1, 3], Some(edit.clone())));
        let snapshot = node.clone();

        assert!(matches!(node.add(2, &cx, Some(&edit))?, Added::One(_)));
        assert_eq!(snapshot.keys(), &[1, 3]);

        Ok(())
    }

    #[test]
    fn it_splits_a_full_leaf() -> Result<()> {
        let cx = context(4)?;
        let mut node: Node<u32, _> = Node::leaf(vec![10, 20, 30, 40]);

        let Added::Split(left, right) = node.add(25, &cx, None)? else {
            anyhow::bail!("expected a split");
        };

        assert_eq!(left.keys(), &[10, 20]);
        assert_eq!(right.keys(), &[25, 30, 40]);
        assert_eq!(node.keys(), &[10, 20, 30, 40]);

        Ok(())
    }

    #[test]
    fn it_reports_keys_already_present() -> Result<()> {
        let cx = context(4)?;
        let mut node: Node<u32, _> = Node::build((0..20).collect(), &cx.settings)?;

        assert!(matches!(node.add(7, &cx, None)?, Added::Unchanged));
        assert!(matches!(
            node.remove(&70, None, None, &cx, None)?,
            Removed::Unchanged
        ));

        Ok(())
    }

    #[test]
    fn it_rejects_malformed_branches() {
        assert!(Node::<u32, u64>::branch(0, vec![1], vec![1]).is_err());
        assert!(Node::<u32, u64>::branch(1, vec![1, 2], vec![1]).is_err());
        assert!(Node::<u32, u64>::branch(1, vec![1, 2], vec![1, 2]).is_ok());
    }

    #[test]
    fn it_stores_children_before_their_parent() -> Result<()> {
        let storage = Arc::new(MemoryStorage::default());
        let cx = Context::new(Some(storage.clone()), Comparator::natural(), Settings::new(4))?;
        let node = Node::build((0..30u32).collect(), &cx.settings)?;

        let mut nodes = 0;
        node.walk(None, &cx, &mut |_, _| {
            nodes += 1;
            true
        })?;

        let address = node.store(&cx)?;
        assert_eq!(storage.writes(), nodes);

        let restored = storage.restore(&address)?;
        assert_eq!(restored.keys(), node.keys());
        assert_eq!(restored.child_addresses()?.len(), node.len());

        Ok(())
    }

    #[test]
    fn it_can_prune_a_walk() -> Result<()> {
        let cx = context(4)?;
        let node = Node::build((0..100u32).collect(), &cx.settings)?;

        let mut visited = 0;
        node.walk(None, &cx, &mut |_, _| {
            visited += 1;
            false
        })?;

        assert_eq!(visited, 1);
        Ok(())
    }
}
