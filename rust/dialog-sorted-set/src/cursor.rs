use std::cmp::Ordering;

use crate::{
    Context, DialogSortedSetError, Edit, Iter, Key, Node, Storage,
    compare::{search_first, search_last},
};

/// One level of a [`Cursor`]'s path: a node and the position within it.
struct Frame<K, A>
where
    K: Key,
    A: crate::Address,
{
    node: Node<K, A>,
    index: usize,
}

impl<K, A> Clone for Frame<K, A>
where
    K: Key,
    A: crate::Address,
{
    fn clone(&self) -> Self {
        Self {
            node: self.node.clone(),
            index: self.index,
        }
    }
}

/// A position in a bounded, ordered traversal of a [`crate::SortedSet`].
///
/// A cursor is created by [`crate::SortedSet::slice`] (ascending) or
/// [`crate::SortedSet::rslice`] (descending). It keeps the path from the root
/// to its current leaf, so stepping past the end of a leaf climbs only as far
/// as needed and descends again into the neighbouring leaf.
///
/// A cursor holds its own references to the nodes it traverses, so it stays
/// valid for persistent sets no matter what happens to other versions. A
/// cursor over a transient set remembers the set's version and fails with
/// [`DialogSortedSetError::ConcurrentModification`] on any read after the
/// set has changed.
pub struct Cursor<K, S>
where
    K: Key,
    S: Storage<K>,
{
    cx: Context<K, S>,
    path: Vec<Frame<K, S::Address>>,
    bound: Option<K>,
    ascending: bool,
    guard: Option<(Edit, u64)>,
}

impl<K, S> Cursor<K, S>
where
    K: Key,
    S: Storage<K>,
{
    pub(crate) fn ascending(
        root: Node<K, S::Address>,
        cx: Context<K, S>,
        from: Option<&K>,
        to: Option<K>,
        guard: Option<(Edit, u64)>,
    ) -> Result<Self, DialogSortedSetError> {
        Self::open(root, cx, from, to, true, guard)
    }

    pub(crate) fn descending(
        root: Node<K, S::Address>,
        cx: Context<K, S>,
        from: Option<&K>,
        to: Option<K>,
        guard: Option<(Edit, u64)>,
    ) -> Result<Self, DialogSortedSetError> {
        Self::open(root, cx, from, to, false, guard)
    }

    fn open(
        root: Node<K, S::Address>,
        cx: Context<K, S>,
        from: Option<&K>,
        bound: Option<K>,
        ascending: bool,
        guard: Option<(Edit, u64)>,
    ) -> Result<Self, DialogSortedSetError> {
        let mut cursor = Self {
            cx,
            path: Vec::new(),
            bound,
            ascending,
            guard,
        };

        cursor.check()?;
        cursor.position(root, from)?;

        Ok(cursor)
    }

    /// Whether this cursor traverses the set in ascending order.
    pub fn is_ascending(&self) -> bool {
        self.ascending
    }

    /// Whether this cursor has moved past its last key.
    pub fn is_exhausted(&self) -> bool {
        self.path.is_empty()
    }

    /// The key the cursor is positioned at, or `None` once it is exhausted.
    pub fn current(&self) -> Result<Option<&K>, DialogSortedSetError> {
        self.check()?;
        Ok(self.peek())
    }

    /// Moves to the next key in the traversal order, returning `false` once
    /// the cursor is exhausted.
    pub fn advance(&mut self) -> Result<bool, DialogSortedSetError> {
        self.check()?;
        self.step(false)
    }

    /// Every key from the current one to the end of the current leaf (or to
    /// the bound, if it comes first), in traversal order.
    ///
    /// Read a chunk once and then move past it with
    /// [`Cursor::advance_chunk`].
    pub fn chunk(&self) -> Result<Chunk<'_, K>, DialogSortedSetError> {
        self.check()?;

        let Some(frame) = self.path.last() else {
            return Ok(Chunk {
                keys: &[],
                ascending: self.ascending,
            });
        };

        let keys = frame.node.keys();
        let index = frame.index;
        let keys = if self.ascending {
            let mut end = keys.len() - 1;
            if let Some(bound) = &self.bound {
                while end > index && self.cx.cmp.compare(&keys[end], bound) == Ordering::Greater {
                    end -= 1;
                }
            }
            &keys[index..=end]
        } else {
            let mut end = 0;
            if let Some(bound) = &self.bound {
                while end < index && self.cx.cmp.compare(&keys[end], bound) == Ordering::Less {
                    end += 1;
                }
            }
            &keys[end..=index]
        };

        Ok(Chunk {
            keys,
            ascending: self.ascending,
        })
    }

    /// Moves to the first key of the next leaf, skipping whatever remains of
    /// the current one. Returns `false` once the cursor is exhausted.
    pub fn advance_chunk(&mut self) -> Result<bool, DialogSortedSetError> {
        self.check()?;
        self.step(true)
    }

    /// Moves forward to the first key at or past `key` in traversal order.
    ///
    /// A cursor never moves backwards: seeking a key the cursor has already
    /// passed leaves it where it is. Returns `false` if the cursor is (or
    /// becomes) exhausted.
    pub fn seek(&mut self, key: &K) -> Result<bool, DialogSortedSetError> {
        self.check()?;

        let Some(current) = self.peek() else {
            return Ok(false);
        };
        let ahead = match self.cx.cmp.compare(key, current) {
            Ordering::Greater => self.ascending,
            Ordering::Less => !self.ascending,
            Ordering::Equal => false,
        };
        if !ahead {
            return Ok(true);
        }

        let root = self.path[0].node.clone();
        self.position(root, Some(key))?;

        Ok(!self.is_exhausted())
    }

    /// A cursor that walks back from the far end of this cursor's range to
    /// its current key, in the opposite direction.
    ///
    /// The reversed cursor covers exactly the keys this cursor has left to
    /// visit (including the current one).
    pub fn reverse(&self) -> Result<Self, DialogSortedSetError> {
        self.check()?;

        let Some(root) = self.path.first().map(|frame| frame.node.clone()) else {
            return Ok(Self {
                cx: self.cx.clone(),
                path: Vec::new(),
                bound: None,
                ascending: !self.ascending,
                guard: self.guard.clone(),
            });
        };

        let at_start = if self.ascending {
            self.path.iter().all(|frame| frame.index == 0)
        } else {
            self.path
                .iter()
                .all(|frame| frame.index + 1 == frame.node.len())
        };
        let to = match at_start {
            true => None,
            false => self.peek().cloned(),
        };

        Self::open(
            root,
            self.cx.clone(),
            self.bound.as_ref(),
            to,
            !self.ascending,
            self.guard.clone(),
        )
    }

    fn check(&self) -> Result<(), DialogSortedSetError> {
        match &self.guard {
            Some((edit, expected)) if edit.version() != *expected => {
                Err(DialogSortedSetError::ConcurrentModification {
                    expected: *expected,
                    found: edit.version(),
                })
            }
            _ => Ok(()),
        }
    }

    fn peek(&self) -> Option<&K> {
        self.path
            .last()
            .and_then(|frame| frame.node.keys().get(frame.index))
    }

    /// Whether the current key lies beyond the bound.
    fn over(&self) -> bool {
        match (self.peek(), &self.bound) {
            (Some(current), Some(bound)) => {
                let order = self.cx.cmp.compare(current, bound);
                match self.ascending {
                    true => order == Ordering::Greater,
                    false => order == Ordering::Less,
                }
            }
            _ => false,
        }
    }

    /// Exhausts the cursor if it stands past its bound.
    fn settle(&mut self) -> bool {
        if self.over() {
            self.path.clear();
        }
        !self.path.is_empty()
    }

    /// Descends from `root` to the first key at or past `from` in traversal
    /// order (or to the first key overall).
    fn position(
        &mut self,
        root: Node<K, S::Address>,
        from: Option<&K>,
    ) -> Result<(), DialogSortedSetError> {
        self.path.clear();
        if root.is_empty() {
            return Ok(());
        }

        let mut node = root;
        loop {
            let keys = node.keys();
            let len = keys.len();
            let index = match from {
                None if self.ascending => 0,
                None => len - 1,
                Some(from) if self.ascending => search_first(keys, from, &self.cx.cmp),
                Some(from) if node.is_leaf() => match search_last(keys, from, &self.cx.cmp) {
                    Some(index) => index,
                    None => {
                        // Every key here is past `from`, so the cursor starts
                        // at the end of the previous leaf
                        self.path.push(Frame { node, index: 0 });
                        self.step(true)?;
                        return Ok(());
                    }
                },
                // The first child whose maximum is past `from`, so keys that
                // compare equal to `from` are never skipped
                Some(from) => search_last(keys, from, &self.cx.cmp)
                    .map_or(0, |index| index + 1)
                    .min(len - 1),
            };

            if index == len {
                self.path.clear();
                return Ok(());
            }

            let child = match node.as_branch() {
                Some(branch) => Some(branch.child(index, &self.cx)?),
                None => None,
            };
            self.path.push(Frame { node, index });

            match child {
                Some(child) => node = child,
                None => break,
            }
        }

        self.settle();
        Ok(())
    }

    /// Moves one key (or, with `leave_leaf`, one leaf) along the traversal.
    fn step(&mut self, leave_leaf: bool) -> Result<bool, DialogSortedSetError> {
        let stepped = self.try_step(leave_leaf);
        if stepped.is_err() {
            self.path.clear();
        }
        stepped
    }

    fn try_step(&mut self, leave_leaf: bool) -> Result<bool, DialogSortedSetError> {
        if self.path.is_empty() {
            return Ok(false);
        }

        if !leave_leaf && self.shift_last() {
            return Ok(self.settle());
        }

        self.path.pop();
        loop {
            if self.path.is_empty() {
                return Ok(false);
            }
            if self.shift_last() {
                break;
            }
            self.path.pop();
        }

        loop {
            let child = {
                let Some(frame) = self.path.last() else {
                    break;
                };
                let Some(branch) = frame.node.as_branch() else {
                    break;
                };
                branch.child(frame.index, &self.cx)?
            };
            let index = match self.ascending {
                true => 0,
                false => child.len().saturating_sub(1),
            };
            self.path.push(Frame { node: child, index });
        }

        Ok(self.settle())
    }

    /// Moves the deepest frame one position along, if it has room.
    fn shift_last(&mut self) -> bool {
        let ascending = self.ascending;
        let Some(frame) = self.path.last_mut() else {
            return false;
        };

        if ascending && frame.index + 1 < frame.node.len() {
            frame.index += 1;
            true
        } else if !ascending && frame.index > 0 {
            frame.index -= 1;
            true
        } else {
            false
        }
    }
}

impl<K, S> Clone for Cursor<K, S>
where
    K: Key,
    S: Storage<K>,
{
    fn clone(&self) -> Self {
        Self {
            cx: self.cx.clone(),
            path: self.path.clone(),
            bound: self.bound.clone(),
            ascending: self.ascending,
            guard: self.guard.clone(),
        }
    }
}

impl<K, S> std::fmt::Debug for Cursor<K, S>
where
    K: Key,
    S: Storage<K>,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("current", &self.peek())
            .field("depth", &self.path.len())
            .field("bound", &self.bound)
            .field("ascending", &self.ascending)
            .finish()
    }
}

impl<K, S> IntoIterator for Cursor<K, S>
where
    K: Key,
    S: Storage<K>,
{
    type Item = Result<K, DialogSortedSetError>;
    type IntoIter = Iter<K, S>;

    fn into_iter(self) -> Self::IntoIter {
        Iter::new(Ok(self))
    }
}

/// A run of keys from a single leaf, as returned by [`Cursor::chunk`].
#[derive(Debug, Clone, Copy)]
pub struct Chunk<'a, K> {
    keys: &'a [K],
    ascending: bool,
}

impl<'a, K> Chunk<'a, K> {
    /// The number of keys in this chunk.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether this chunk holds no keys.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// The key `index` positions into the chunk, in traversal order.
    pub fn get(&self, index: usize) -> Option<&'a K> {
        match self.ascending {
            true => self.keys.get(index),
            false => self
                .keys
                .len()
                .checked_sub(index + 1)
                .and_then(|index| self.keys.get(index)),
        }
    }

    /// The keys of this chunk, in traversal order.
    pub fn iter(&self) -> impl Iterator<Item = &'a K> + 'a {
        let keys = self.keys;
        let ascending = self.ascending;
        (0..keys.len()).map(move |index| match ascending {
            true => &keys[index],
            false => &keys[keys.len() - 1 - index],
        })
    }
}
