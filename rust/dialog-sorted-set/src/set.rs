use std::{
    cmp::Ordering as KeyOrdering,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use crate::{
    Added, Comparator, Context, Cursor, DialogSortedSetError, Edit, Iter, Key, Link, Node,
    NoStorage, ReferenceType, Removed, Settings, Storage,
};

const UNKNOWN_COUNT: usize = usize::MAX;

/// A sorted set of keys backed by a persistent B-tree.
///
/// A [`SortedSet`] is either **persistent** or **transient**:
///
/// - A persistent set is immutable. [`SortedSet::insert`] and
///   [`SortedSet::remove`] return a new version that shares every untouched
///   node with the original, so old versions remain valid and can be read
///   from any number of threads.
/// - A transient set (see [`SortedSet::as_transient`]) is owned by a single
///   writer that applies a batch of changes through [`SortedSet::conj`] and
///   [`SortedSet::disj`]. Nodes created during the batch are changed in
///   place rather than copied. [`SortedSet::persistent`] closes the batch.
///
/// A set may be backed by a [`Storage`]. [`SortedSet::store`] writes every
/// node that has not been stored yet and returns the root's address, and
/// [`SortedSet::restore`] reopens a set from such an address, loading nodes
/// lazily as they are reached.
///
/// ```
/// use dialog_sorted_set::SortedSet;
///
/// let empty = SortedSet::<u32>::new();
/// let one = empty.insert(1).unwrap();
/// let two = one.insert(2).unwrap();
///
/// assert!(!empty.contains(&1).unwrap());
/// assert_eq!(two.count().unwrap(), 2);
///
/// let mut batch = two.as_transient().unwrap();
/// for key in 3..=100 {
///     batch.conj(key).unwrap();
/// }
/// let hundred = batch.persistent().unwrap();
///
/// let keys = hundred
///     .slice(Some(&40), Some(&45))
///     .unwrap()
///     .into_iter()
///     .collect::<Result<Vec<_>, _>>()
///     .unwrap();
/// assert_eq!(keys, vec![40, 41, 42, 43, 44, 45]);
/// ```
pub struct SortedSet<K, S = NoStorage>
where
    K: Key,
    S: Storage<K>,
{
    root: Link<K, S::Address>,
    context: Context<K, S>,
    count: AtomicUsize,
    version: u64,
    edit: Option<Edit>,
}

impl<K> SortedSet<K, NoStorage>
where
    K: Key + Ord,
{
    /// Creates an empty in-memory set ordered by `K`'s [`Ord`]
    /// implementation.
    pub fn new() -> Self {
        Self::with_comparator(Comparator::natural())
    }
}

impl<K> Default for SortedSet<K, NoStorage>
where
    K: Key + Ord,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> SortedSet<K, NoStorage>
where
    K: Key,
{
    /// Creates an empty in-memory set ordered by `cmp`.
    pub fn with_comparator(cmp: Comparator<K>) -> Self {
        Self {
            root: Link::resident(Node::leaf(Vec::new())),
            context: Context {
                storage: None,
                settings: Settings::default(),
                cache: crate::NodeCache::disabled(),
                cmp,
            },
            count: AtomicUsize::new(0),
            version: 0,
            edit: None,
        }
    }

    /// Creates an empty in-memory set ordered by `cmp`, with custom
    /// [`Settings`].
    pub fn with_settings(
        cmp: Comparator<K>,
        settings: Settings,
    ) -> Result<Self, DialogSortedSetError> {
        Self::from_parts(None, cmp, settings)
    }

    /// Builds a set holding `keys`, which may come in any order and may
    /// repeat; of several keys that compare equal, the first one is kept.
    ///
    /// The tree is built bottom up in one pass, which is much faster than
    /// inserting the keys one by one.
    pub fn from_sorted_keys(
        keys: impl IntoIterator<Item = K>,
        cmp: Comparator<K>,
        settings: Settings,
    ) -> Result<Self, DialogSortedSetError> {
        let mut set = Self::from_parts(None, cmp, settings)?;
        let cx = &set.context;

        let mut keys: Vec<K> = keys.into_iter().collect();
        if !keys
            .windows(2)
            .all(|pair| cx.cmp.compare(&pair[0], &pair[1]) == KeyOrdering::Less)
        {
            keys.sort_by(|left, right| cx.cmp.compare(left, right));
            keys.dedup_by(|next, kept| cx.cmp.compare(next, kept) == KeyOrdering::Equal);
        }

        let count = keys.len();
        let root = Node::build(keys, &cx.settings)?;

        set.root = Link::resident(root);
        set.count = AtomicUsize::new(count);

        Ok(set)
    }
}

impl<K, S> SortedSet<K, S>
where
    K: Key,
    S: Storage<K>,
{
    fn from_parts(
        storage: Option<Arc<S>>,
        cmp: Comparator<K>,
        settings: Settings,
    ) -> Result<Self, DialogSortedSetError> {
        Ok(Self {
            root: Link::resident(Node::leaf(Vec::new())),
            context: Context::new(storage, cmp, settings)?,
            count: AtomicUsize::new(0),
            version: 0,
            edit: None,
        })
    }

    /// Creates an empty set whose nodes can be written to `storage`.
    pub fn stored(
        storage: Arc<S>,
        cmp: Comparator<K>,
        settings: Settings,
    ) -> Result<Self, DialogSortedSetError> {
        Self::from_parts(Some(storage), cmp, settings)
    }

    /// Reopens the set whose root was stored at `address`.
    ///
    /// Nothing is read from `storage` until the set is first accessed, and
    /// the set's count is unknown until it is first asked for.
    pub fn restore(
        address: S::Address,
        storage: Arc<S>,
        cmp: Comparator<K>,
        settings: Settings,
    ) -> Result<Self, DialogSortedSetError> {
        tracing::debug!(?address, "Restoring sorted set");

        Ok(Self {
            root: Link::stored(address),
            context: Context::new(Some(storage), cmp, settings)?,
            count: AtomicUsize::new(UNKNOWN_COUNT),
            version: 0,
            edit: None,
        })
    }

    fn root(&self) -> Result<Node<K, S::Address>, DialogSortedSetError> {
        self.root.resolve_with(&self.context, ReferenceType::Strong)
    }

    /// A persistent successor of this set with a different root.
    fn derive(&self, root: Node<K, S::Address>, count: Option<usize>) -> Self {
        Self {
            root: Link::resident(root),
            context: self.context.clone(),
            count: AtomicUsize::new(count.unwrap_or(UNKNOWN_COUNT)),
            version: self.version + 1,
            edit: None,
        }
    }

    fn known_count(&self) -> Option<usize> {
        match self.count.load(Ordering::Acquire) {
            UNKNOWN_COUNT => None,
            count => Some(count),
        }
    }

    fn expect_persistent(&self, operation: &str) -> Result<(), DialogSortedSetError> {
        match self.edit {
            None => Ok(()),
            Some(_) => Err(DialogSortedSetError::NotPersistent(format!(
                "{operation} is not available while a transient batch is open"
            ))),
        }
    }

    fn expect_transient(&self, operation: &str) -> Result<Edit, DialogSortedSetError> {
        self.edit.clone().ok_or_else(|| {
            DialogSortedSetError::NotTransient(format!(
                "{operation} requires a transient set (see `as_transient`)"
            ))
        })
    }

    /// Whether this set is an open transient batch.
    pub fn is_transient(&self) -> bool {
        self.edit.is_some()
    }

    /// The number of changes applied since the lineage of this set began.
    ///
    /// Cursors over a transient set use this to detect that the set changed
    /// underneath them.
    pub fn version(&self) -> u64 {
        match &self.edit {
            Some(edit) => edit.version(),
            None => self.version,
        }
    }

    /// The comparator that orders this set.
    pub fn comparator(&self) -> &Comparator<K> {
        &self.context.cmp
    }

    /// The settings this set was created with.
    pub fn settings(&self) -> &Settings {
        &self.context.settings
    }

    /// The address the root of this set was last stored at, if it has been
    /// stored and not changed since.
    pub fn root_address(&self) -> Option<S::Address> {
        self.root.address()
    }

    /// Whether `key` is a member of this set.
    pub fn contains(&self, key: &K) -> Result<bool, DialogSortedSetError> {
        self.root()?.contains(key, &self.context)
    }

    /// The number of members of this set.
    ///
    /// For a restored set this walks the whole tree the first time it is
    /// called (loading every node); the result is remembered.
    pub fn count(&self) -> Result<usize, DialogSortedSetError> {
        if let Some(count) = self.known_count() {
            return Ok(count);
        }

        let count = self.root()?.count(&self.context)?;
        self.count.store(count, Ordering::Release);

        Ok(count)
    }

    /// Whether this set has no members.
    pub fn is_empty(&self) -> Result<bool, DialogSortedSetError> {
        if let Some(count) = self.known_count() {
            return Ok(count == 0);
        }

        Ok(self.root()?.is_empty())
    }

    /// An empty set with the same comparator, settings and storage.
    pub fn empty(&self) -> Self {
        Self {
            root: Link::resident(Node::leaf(Vec::new())),
            context: self.context.clone(),
            count: AtomicUsize::new(0),
            version: 0,
            edit: None,
        }
    }

    /// Returns a new version of this persistent set that includes `key`.
    ///
    /// If `key` is already present, the new version is simply a copy of this
    /// one.
    pub fn insert(&self, key: K) -> Result<Self, DialogSortedSetError> {
        self.insert_in(key, &self.context)
    }

    /// Like [`SortedSet::insert`], but locates `key` with `cmp` instead of the
    /// set's comparator.
    ///
    /// `cmp` must order keys consistently with the set's comparator. A key
    /// that `cmp` considers equal to a member is not added. The new version
    /// keeps the set's own comparator.
    pub fn insert_by(&self, key: K, cmp: Comparator<K>) -> Result<Self, DialogSortedSetError> {
        self.insert_in(key, &self.context.with_comparator(cmp))
    }

    fn insert_in(&self, key: K, cx: &Context<K, S>) -> Result<Self, DialogSortedSetError> {
        self.expect_persistent("insert")?;

        let mut root = self.root()?;
        let root = match root.add(key, cx, None)? {
            Added::Unchanged => return Ok(self.clone()),
            Added::InPlace { .. } => root,
            Added::One(node) => node,
            Added::Split(first, second) => Self::grow(first, second, None)?,
        };

        Ok(self.derive(root, self.known_count().map(|count| count + 1)))
    }

    /// Returns a new version of this persistent set that excludes `key`.
    ///
    /// If `key` is absent, the new version is simply a copy of this one.
    pub fn remove(&self, key: &K) -> Result<Self, DialogSortedSetError> {
        self.remove_in(key, &self.context)
    }

    /// Like [`SortedSet::remove`], but locates `key` with `cmp` instead of the
    /// set's comparator.
    ///
    /// `cmp` must order keys consistently with the set's comparator. If `cmp`
    /// considers several members equal to `key`, one of them is removed. The
    /// new version keeps the set's own comparator.
    pub fn remove_by(&self, key: &K, cmp: Comparator<K>) -> Result<Self, DialogSortedSetError> {
        self.remove_in(key, &self.context.with_comparator(cmp))
    }

    fn remove_in(&self, key: &K, cx: &Context<K, S>) -> Result<Self, DialogSortedSetError> {
        self.expect_persistent("remove")?;

        let mut root = self.root()?;
        let root = match root.remove(key, None, None, cx, None)? {
            Removed::Unchanged => return Ok(self.clone()),
            Removed::InPlace { .. } => root,
            Removed::Rebalanced(pieces) => pieces.center,
        };
        let root = Self::shrink(root, cx)?;

        Ok(self.derive(root, self.known_count().map(|count| count - 1)))
    }

    /// Adds `key` to this transient set, returning whether it was absent.
    pub fn conj(&mut self, key: K) -> Result<bool, DialogSortedSetError> {
        let edit = self.expect_transient("conj")?;

        let root = self.root.resolve_mut(&self.context)?;
        let replacement = match root.add(key, &self.context, Some(&edit))? {
            Added::Unchanged => return Ok(false),
            Added::InPlace { .. } => None,
            Added::One(node) => Some(node),
            Added::Split(first, second) => Some(Self::grow(first, second, Some(&edit))?),
        };

        match replacement {
            Some(root) => self.root = Link::resident(root),
            None => self.root.clear_address(),
        }

        self.changed(&edit, 1, true);
        Ok(true)
    }

    /// Removes `key` from this transient set, returning whether it was
    /// present.
    pub fn disj(&mut self, key: &K) -> Result<bool, DialogSortedSetError> {
        let edit = self.expect_transient("disj")?;

        let root = self.root.resolve_mut(&self.context)?;
        let root = match root.remove(key, None, None, &self.context, Some(&edit))? {
            Removed::Unchanged => return Ok(false),
            Removed::InPlace { .. } => root.clone(),
            Removed::Rebalanced(pieces) => pieces.center,
        };

        self.root = Link::resident(Self::shrink(root, &self.context)?);

        self.changed(&edit, 1, false);
        Ok(true)
    }

    fn changed(&mut self, edit: &Edit, delta: usize, added: bool) {
        if let Some(count) = self.known_count() {
            let count = if added { count + delta } else { count - delta };
            *self.count.get_mut() = count;
        }
        self.version = edit.bump();
    }

    /// A new root one level above the two halves of a split root.
    fn grow(
        first: Node<K, S::Address>,
        second: Node<K, S::Address>,
        edit: Option<&Edit>,
    ) -> Result<Node<K, S::Address>, DialogSortedSetError> {
        let level = first.level() + 1;
        tracing::trace!(level, "Root grew by one level");

        Ok(Node::from(crate::Branch::from_children(
            level,
            vec![first, second],
            edit.cloned(),
        )?))
    }

    /// Replaces a root branch that is left with a single child by that child.
    fn shrink(
        root: Node<K, S::Address>,
        cx: &Context<K, S>,
    ) -> Result<Node<K, S::Address>, DialogSortedSetError> {
        match &root {
            Node::Branch(branch) if branch.len() == 1 => {
                tracing::trace!(level = branch.level() - 1, "Root shrank by one level");
                branch.child(0, cx)
            }
            _ => Ok(root),
        }
    }

    /// Opens a transient batch over this persistent set.
    ///
    /// The batch starts out sharing every node with this set, which stays
    /// untouched by anything the batch does.
    pub fn as_transient(&self) -> Result<Self, DialogSortedSetError> {
        self.expect_persistent("as_transient")?;

        let edit = Edit::transient(self.version);
        tracing::debug!(version = self.version, "Opened transient batch");

        Ok(Self {
            root: self.root.clone(),
            context: self.context.clone(),
            count: AtomicUsize::new(self.count.load(Ordering::Acquire)),
            version: self.version,
            edit: Some(edit),
        })
    }

    /// Closes this transient batch and returns the resulting persistent set.
    ///
    /// Every node the batch created becomes immutable, so the result may be
    /// freely shared.
    pub fn persistent(self) -> Result<Self, DialogSortedSetError> {
        let edit = self.expect_transient("persistent")?;

        edit.close();
        let version = edit.version();
        tracing::debug!(version, "Closed transient batch");

        Ok(Self {
            version,
            edit: None,
            ..self
        })
    }

    /// Writes every node of this set that has not been stored yet, children
    /// before parents, and returns the address of the root.
    ///
    /// Nodes that were already stored (including every node of a restored
    /// set that has not changed since) are not written again.
    pub fn store(&self) -> Result<S::Address, DialogSortedSetError> {
        self.expect_persistent("store")?;
        self.context.storage()?;

        let address = self.root.store(&self.context, ReferenceType::Strong)?;
        tracing::debug!(?address, "Stored sorted set");

        Ok(address)
    }

    /// Visits every node of this set, parents before children, together
    /// with its storage address (if it has one).
    ///
    /// When `visit` returns `false` the children of that node are skipped,
    /// which lets a caller that tracks live addresses avoid reloading
    /// subtrees it has already seen.
    pub fn walk<F>(&self, mut visit: F) -> Result<(), DialogSortedSetError>
    where
        F: FnMut(&Node<K, S::Address>, Option<&S::Address>) -> bool,
    {
        let root = self.root()?;
        root.walk(self.root.address().as_ref(), &self.context, &mut visit)
    }

    /// Checks the structural invariants of the whole tree: strictly
    /// increasing keys, node lengths within bounds, branch keys matching
    /// their children's maximum keys, and leaves at equal depth.
    pub fn validate(&self) -> Result<(), DialogSortedSetError> {
        self.root()?.validate(&self.context, true)
    }

    /// The number of levels in the tree; a set whose root is a leaf has a
    /// depth of one.
    pub fn depth(&self) -> Result<usize, DialogSortedSetError> {
        Ok(self.root()?.level() + 1)
    }

    /// The smallest member of this set.
    pub fn first(&self) -> Result<Option<K>, DialogSortedSetError> {
        Ok(self.slice(None, None)?.current()?.cloned())
    }

    /// The largest member of this set.
    pub fn last(&self) -> Result<Option<K>, DialogSortedSetError> {
        Ok(self.rslice(None, None)?.current()?.cloned())
    }

    fn guard(&self) -> Option<(Edit, u64)> {
        self.edit.as_ref().map(|edit| (edit.clone(), edit.version()))
    }

    /// An ascending cursor over the members between `from` and `to`
    /// (both inclusive, either may be omitted).
    pub fn slice(
        &self,
        from: Option<&K>,
        to: Option<&K>,
    ) -> Result<Cursor<K, S>, DialogSortedSetError> {
        self.slice_by(from, to, self.context.cmp.clone())
    }

    /// Like [`SortedSet::slice`], with bounds compared by `cmp`.
    ///
    /// `cmp` must order keys consistently with the set's own comparator, but
    /// may be coarser (for instance, comparing only a prefix of each key).
    pub fn slice_by(
        &self,
        from: Option<&K>,
        to: Option<&K>,
        cmp: Comparator<K>,
    ) -> Result<Cursor<K, S>, DialogSortedSetError> {
        if let (Some(from), Some(to)) = (from, to) {
            if cmp.compare(from, to) == KeyOrdering::Greater {
                return Err(DialogSortedSetError::InvalidRange(format!(
                    "Ascending slice starts at {from:?}, after its end {to:?}"
                )));
            }
        }

        Cursor::ascending(
            self.root()?,
            self.context.with_comparator(cmp),
            from,
            to.cloned(),
            self.guard(),
        )
    }

    /// A descending cursor over the members between `from` and `to`
    /// (both inclusive, either may be omitted); `from` is the larger bound.
    pub fn rslice(
        &self,
        from: Option<&K>,
        to: Option<&K>,
    ) -> Result<Cursor<K, S>, DialogSortedSetError> {
        self.rslice_by(from, to, self.context.cmp.clone())
    }

    /// Like [`SortedSet::rslice`], with bounds compared by `cmp`.
    pub fn rslice_by(
        &self,
        from: Option<&K>,
        to: Option<&K>,
        cmp: Comparator<K>,
    ) -> Result<Cursor<K, S>, DialogSortedSetError> {
        if let (Some(from), Some(to)) = (from, to) {
            if cmp.compare(from, to) == KeyOrdering::Less {
                return Err(DialogSortedSetError::InvalidRange(format!(
                    "Descending slice starts at {from:?}, before its end {to:?}"
                )));
            }
        }

        Cursor::descending(
            self.root()?,
            self.context.with_comparator(cmp),
            from,
            to.cloned(),
            self.guard(),
        )
    }

    /// An iterator over every member of this set, in order.
    pub fn iter(&self) -> Iter<K, S> {
        Iter::new(self.slice(None, None))
    }
}

impl<K, S> Clone for SortedSet<K, S>
where
    K: Key,
    S: Storage<K>,
{
    fn clone(&self) -> Self {
        Self {
            root: self.root.clone(),
            context: self.context.clone(),
            count: AtomicUsize::new(self.count.load(Ordering::Acquire)),
            version: self.version,
            edit: self.edit.clone(),
        }
    }
}

impl<K, S> std::fmt::Debug for SortedSet<K, S>
where
    K: Key,
    S: Storage<K>,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SortedSet")
            .field("root", &self.root)
            .field("count", &self.known_count())
            .field("version", &self.version())
            .field("transient", &self.is_transient())
            .finish()
    }
}

impl<'a, K, S> IntoIterator for &'a SortedSet<K, S>
where
    K: Key,
    S: Storage<K>,
{
    type Item = Result<K, DialogSortedSetError>;
    type IntoIter = Iter<K, S>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<K> FromIterator<K> for SortedSet<K, NoStorage>
where
    K: Key + Ord,
{
    fn from_iter<I: IntoIterator<Item = K>>(keys: I) -> Self {
        let mut keys: Vec<K> = keys.into_iter().collect();
        keys.sort();
        keys.dedup();

        let mut set = Self::new();
        let count = keys.len();

        // Default settings always admit a balanced build
        match Node::build(keys, &set.context.settings) {
            Ok(root) => {
                set.root = Link::resident(root);
                set.count = AtomicUsize::new(count);
            }
            Err(error) => {
                debug_assert!(false, "Balanced build failed: {error}");
                tracing::warn!(%error, count, "Balanced build failed, collected set is empty");
            }
        }

        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStorage;
    use anyhow::Result;

    fn small() -> Result<SortedSet<u32>> {
        Ok(SortedSet::with_settings(
            Comparator::natural(),
            Settings::new(4),
        )?)
    }

    type Stored = SortedSet<u32, MemoryStorage<u32>>;

    fn stored(reference: ReferenceType) -> Result<(Arc<MemoryStorage<u32>>, Stored)> {
        let storage = Arc::new(MemoryStorage::default());
        let set = SortedSet::stored(
            storage.clone(),
            Comparator::natural(),
            Settings::new(4).with_reference(reference),
        )?;
        Ok((storage, set))
    }

    #[test]
    fn it_leaves_old_versions_untouched() -> Result<()> {
        let mut versions = vec![small()?];
        for key in 0..50 {
            let next = versions[versions.len() - 1].insert(key)?;
            versions.push(next);
        }

        for (len, version) in versions.iter().enumerate() {
            assert_eq!(version.count()?, len);
            assert!(!version.contains(&(len as u32))?);
            if len > 0 {
                assert!(version.contains(&(len as u32 - 1))?);
            }
        }

        Ok(())
    }

    #[test]
    fn it_bumps_the_version_of_every_change() -> Result<()> {
        let set = small()?;
        let one = set.insert(1)?;
        let same = one.insert(1)?;

        assert_eq!(set.version(), 0);
        assert_eq!(one.version(), 1);
        assert_eq!(same.version(), 1);

        let mut batch = one.as_transient()?;
        batch.conj(2)?;
        batch.conj(2)?;
        batch.disj(&1)?;
        assert_eq!(batch.version(), 3);

        let done = batch.persistent()?;
        assert_eq!(done.version(), 3);

        Ok(())
    }

    #[test]
    fn it_rejects_operations_in_the_wrong_mode() -> Result<()> {
        let mut set = small()?;

        assert!(matches!(
            set.conj(1),
            Err(DialogSortedSetError::NotTransient(_))
        ));
        assert!(matches!(
            set.clone().persistent(),
            Err(DialogSortedSetError::NotTransient(_))
        ));

        let batch = set.as_transient()?;
        assert!(matches!(
            batch.insert(1),
            Err(DialogSortedSetError::NotPersistent(_))
        ));
        assert!(matches!(
            batch.as_transient(),
            Err(DialogSortedSetError::NotPersistent(_))
        ));

        Ok(())
    }

    #[test]
    fn it_grows_and_shrinks_the_root() -> Result<()> {
        let mut set = small()?;
        for key in 0..5 {
            set = set.insert(key)?;
        }
        assert_eq!(set.depth()?, 2);

        for key in 0..4 {
            set = set.remove(&key)?;
        }
        assert_eq!(set.depth()?, 1);
        assert_eq!(set.first()?, Some(4));
        set.validate()?;

        Ok(())
    }

    #[test]
    fn it_mutates_only_nodes_created_by_the_batch() -> Result<()> {
        let base = SortedSet::from_sorted_keys(0..100u32, Comparator::natural(), Settings::new(4))?;
        let mut batch = base.as_transient()?;

        for key in 100..200 {
            batch.conj(key)?;
        }
        for key in (0..200).step_by(3) {
            batch.disj(&key)?;
        }

        let result = batch.persistent()?;
        result.validate()?;
        base.validate()?;

        assert_eq!(base.count()?, 100);
        assert_eq!(
            base.iter().collect::<Result<Vec<_>, _>>()?,
            (0..100).collect::<Vec<_>>()
        );
        assert_eq!(
            result.iter().collect::<Result<Vec<_>, _>>()?,
            (0..200).filter(|key| key % 3 != 0).collect::<Vec<_>>()
        );

        Ok(())
    }

    #[test]
    fn it_stores_only_what_changed() -> Result<()> {
        let (storage, set) = stored(ReferenceType::Strong)?;
        let mut batch = set.as_transient()?;
        for key in 0..100 {
            batch.conj(key)?;
        }
        let set = batch.persistent()?;

        let mut nodes = 0;
        set.walk(|_, _| {
            nodes += 1;
            true
        })?;

        let address = set.store()?;
        assert_eq!(storage.writes(), nodes);
        assert_eq!(set.root_address(), Some(address));
        assert_eq!(set.store()?, address);
        assert_eq!(storage.writes(), nodes);

        let next = set.insert(1000)?.remove(&50)?;
        let mut unstored = 0;
        next.walk(|_, address| {
            if address.is_none() {
                unstored += 1;
            }
            address.is_none()
        })?;

        assert!(unstored > 0);
        next.store()?;
        assert_eq!(storage.writes(), nodes + unstored);

        Ok(())
    }

    #[test]
    fn it_restores_lazily() -> Result<()> {
        let (storage, set) = stored(ReferenceType::Weak)?;
        let mut batch = set.as_transient()?;
        for key in 0..500 {
            batch.conj(key)?;
        }
        let set = batch.persistent()?;

        let address = set.store()?;
        let restored = SortedSet::restore(
            address,
            storage.clone(),
            Comparator::natural(),
            Settings::new(4).with_reference(ReferenceType::Weak),
        )?;

        let reads = storage.reads();
        assert!(restored.contains(&250)?);
        assert_eq!(storage.reads() - reads, restored.depth()?);

        assert_eq!(restored.count()?, 500);
        assert_eq!(
            restored.iter().collect::<Result<Vec<_>, _>>()?,
            (0..500).collect::<Vec<_>>()
        );
        restored.validate()?;

        Ok(())
    }

    #[test]
    fn it_round_trips_an_empty_set() -> Result<()> {
        let (storage, set) = stored(ReferenceType::Soft)?;
        let address = set.store()?;

        let restored = SortedSet::restore(address, storage, Comparator::natural(), Settings::new(4))?;
        assert!(restored.is_empty()?);
        assert_eq!(restored.count()?, 0);
        assert_eq!(restored.first()?, None);

        Ok(())
    }

    #[test]
    fn it_refuses_to_store_without_storage() -> Result<()> {
        let set = small()?.insert(1)?;
        assert!(matches!(
            set.store(),
            Err(DialogSortedSetError::Storage(_))
        ));
        Ok(())
    }

    #[test]
    fn it_builds_from_unsorted_keys() -> Result<()> {
        let set = SortedSet::from_sorted_keys(
            vec![5u32, 3, 9, 3, 1, 5],
            Comparator::natural(),
            Settings::new(4),
        )?;

        assert_eq!(set.count()?, 4);
        assert_eq!(
            set.iter().collect::<Result<Vec<_>, _>>()?,
            vec![1, 3, 5, 9]
        );

        let collected: SortedSet<u32> = (0..1000).rev().collect();
        assert_eq!(collected.count()?, 1000);
        assert_eq!(collected.first()?, Some(0));
        assert_eq!(collected.last()?, Some(999));
        collected.validate()?;

        Ok(())
    }

    #[test]
    fn it_collects_every_key_around_fanout_boundaries() -> Result<()> {
        let max_len = Settings::default().max_len as u32;
        let sizes = [
            0,
            1,
            max_len - 1,
            max_len,
            max_len + 1,
            max_len * 2 + 1,
            max_len * max_len,
            max_len * max_len + 1,
            max_len * max_len * 2 + 3,
        ];

        for size in sizes {
            let collected: SortedSet<u32> = (0..size).rev().chain(0..size / 2).collect();
            assert_eq!(collected.count()?, size as usize);
            assert_eq!(collected.last()?, size.checked_sub(1));
            collected.validate()?;
        }

        Ok(())
    }

    #[test]
    fn it_orders_by_a_custom_comparator() -> Result<()> {
        let mut set = SortedSet::with_comparator(Comparator::<u32>::natural().reversed());
        for key in [3, 1, 2] {
            set = set.insert(key)?;
        }

        assert_eq!(
            (&set).into_iter().collect::<Result<Vec<_>, _>>()?,
            vec![3, 2, 1]
        );
        Ok(())
    }
}
