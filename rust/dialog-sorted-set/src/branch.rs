use std::{cmp::Ordering, sync::Arc};

use crate::{
    Added, Address, Context, DialogSortedSetError, Edit, Key, Link, Node, Pieces, Plan, Removed,
    Side, Storage,
    compare::{search, search_first},
    edit::editable_by,
    stitch::{Stitch, range},
};

/// A node above level 0.
///
/// For every child `i`, `keys[i]` is the largest key in that child's subtree.
/// Children are reached through links that may hold the child in memory, its
/// storage address, or both.
pub struct Branch<K, A>
where
    K: Key,
    A: Address,
{
    level: usize,
    keys: Vec<K>,
    links: Vec<Link<K, A>>,
    edit: Option<Edit>,
}

impl<K, A> Branch<K, A>
where
    K: Key,
    A: Address,
{
    pub(crate) fn new(level: usize, keys: Vec<K>, links: Vec<Link<K, A>>, edit: Option<Edit>) -> Self {
        debug_assert_eq!(keys.len(), links.len());
        Self {
            level,
            keys,
            links,
            edit,
        }
    }

    /// A branch at `level` over freshly built `children`.
    pub(crate) fn from_children(
        level: usize,
        children: Vec<Node<K, A>>,
        edit: Option<Edit>,
    ) -> Result<Self, DialogSortedSetError> {
        let keys = children
            .iter()
            .map(Node::max_key_owned)
            .collect::<Result<Vec<_>, _>>()?;
        let links = children.into_iter().map(Link::resident).collect();

        Ok(Self::new(level, keys, links, edit))
    }

    /// The height of this branch above the leaves.
    pub fn level(&self) -> usize {
        self.level
    }

    /// The maximum key of each child, in order.
    pub fn keys(&self) -> &[K] {
        &self.keys
    }

    /// The number of children.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether this branch has no children.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub(crate) fn links(&self) -> &[Link<K, A>] {
        &self.links
    }

    /// The child at `index`, restored from storage if needed.
    pub(crate) fn child<S>(
        &self,
        index: usize,
        cx: &Context<K, S>,
    ) -> Result<Node<K, A>, DialogSortedSetError>
    where
        S: Storage<K, Address = A>,
    {
        self.links
            .get(index)
            .ok_or_else(|| {
                DialogSortedSetError::Invariant(format!(
                    "Level {} branch has no child {index}",
                    self.level
                ))
            })?
            .resolve(cx)
    }

    /// Exclusive access to a branch that the batch holding `edit` may change
    /// in place.
    fn unique<'a>(this: &'a mut Arc<Self>, edit: Option<&Edit>) -> Option<&'a mut Self> {
        if editable_by(this.edit.as_ref(), edit) {
            Arc::get_mut(this)
        } else {
            None
        }
    }

    fn node(&self, keys: Vec<K>, links: Vec<Link<K, A>>, edit: Option<&Edit>) -> Node<K, A> {
        Node::from(Self::new(self.level, keys, links, edit.cloned()))
    }

    pub(crate) fn add<S>(
        this: &mut Arc<Self>,
        key: K,
        cx: &Context<K, S>,
        edit: Option<&Edit>,
    ) -> Result<Added<K, A>, DialogSortedSetError>
    where
        S: Storage<K, Address = A>,
    {
        let len = this.keys.len();
        if len == 0 {
            return Err(DialogSortedSetError::Invariant(
                "Cannot descend into an empty branch".into(),
            ));
        }

        let idx = match search(&this.keys, &key, &cx.cmp) {
            Ok(_) => return Ok(Added::Unchanged),
            Err(ins) => ins.min(len - 1),
        };

        let added = match Self::unique(this, edit) {
            Some(branch) => {
                let child = branch.links[idx].resolve_mut(cx)?;
                match child.add(key, cx, edit)? {
                    Added::InPlace { max_changed } => {
                        let max_key = if max_changed {
                            Some(child.max_key_owned()?)
                        } else {
                            None
                        };
                        debug_assert!(
                            max_changed
                                || child
                                    .max_key()
                                    .is_some_and(|max| cx.cmp.compare(max, &branch.keys[idx]).is_eq())
                        );

                        branch.links[idx].clear_address();
                        if let Some(max_key) = max_key {
                            branch.keys[idx] = max_key;
                        }

                        return Ok(Added::InPlace {
                            max_changed: max_changed && idx == len - 1,
                        });
                    }
                    added => added,
                }
            }
            None => {
                let mut child = this.links[idx].resolve(cx)?;
                match child.add(key, cx, edit)? {
                    Added::InPlace { .. } => Added::One(child),
                    added => added,
                }
            }
        };

        match added {
            Added::Unchanged => Ok(Added::Unchanged),
            Added::One(node) => Self::replace_child(this, idx, node, cx, edit),
            Added::Split(first, second) => Self::split_child(this, idx, first, second, cx, edit),
            Added::InPlace { .. } => Err(DialogSortedSetError::Invariant(
                "Child was changed in place under a shared branch".into(),
            )),
        }
    }

    /// Points slot `idx` at `node`, which replaced the child there.
    fn replace_child<S>(
        this: &mut Arc<Self>,
        idx: usize,
        node: Node<K, A>,
        cx: &Context<K, S>,
        edit: Option<&Edit>,
    ) -> Result<Added<K, A>, DialogSortedSetError>
    where
        S: Storage<K, Address = A>,
    {
        let len = this.keys.len();
        let max_key = node.max_key_owned()?;

        if let Some(branch) = Self::unique(this, edit) {
            let max_changed =
                idx == len - 1 && cx.cmp.compare(&branch.keys[idx], &max_key) != Ordering::Equal;

            branch.keys[idx] = max_key;
            branch.links[idx] = Link::resident(node);

            return Ok(Added::InPlace { max_changed });
        }

        let keys = Stitch::with_capacity(cx.capacity(len, edit))
            .copy_all(&this.keys[..idx])
            .copy_one(max_key)
            .copy_all(&this.keys[idx + 1..])
            .finish();
        let links = Stitch::with_capacity(cx.capacity(len, edit))
            .copy_all(&this.links[..idx])
            .copy_one(Link::resident(node))
            .copy_all(&this.links[idx + 1..])
            .finish();

        Ok(Added::One(this.node(keys, links, edit)))
    }

    /// Replaces the child in slot `idx` by the two halves it split into,
    /// splitting this branch too when it is already full.
    fn split_child<S>(
        this: &mut Arc<Self>,
        idx: usize,
        first: Node<K, A>,
        second: Node<K, A>,
        cx: &Context<K, S>,
        edit: Option<&Edit>,
    ) -> Result<Added<K, A>, DialogSortedSetError>
    where
        S: Storage<K, Address = A>,
    {
        let len = this.keys.len();
        let first_max = first.max_key_owned()?;
        let second_max = second.max_key_owned()?;

        if len < cx.settings.max_len {
            if let Some(branch) = Self::unique(this, edit) {
                let max_changed = idx == len - 1
                    && cx.cmp.compare(&branch.keys[idx], &second_max) != Ordering::Equal;

                branch.keys[idx] = first_max;
                branch.links[idx] = Link::resident(first);
                branch.keys.insert(idx + 1, second_max);
                branch.links.insert(idx + 1, Link::resident(second));

                return Ok(Added::InPlace { max_changed });
            }

            let keys = Stitch::with_capacity(cx.capacity(len + 1, edit))
                .copy_all(&this.keys[..idx])
                .copy_one(first_max)
                .copy_one(second_max)
                .copy_all(&this.keys[idx + 1..])
                .finish();
            let links = Stitch::with_capacity(cx.capacity(len + 1, edit))
                .copy_all(&this.links[..idx])
                .copy_one(Link::resident(first))
                .copy_one(Link::resident(second))
                .copy_all(&this.links[idx + 1..])
                .finish();

            return Ok(Added::One(this.node(keys, links, edit)));
        }

        // Both halves of the child must land on the same side of the split
        let mut half1 = (len + 1) / 2;
        if idx + 1 == half1 {
            half1 += 1;
        }
        let half2 = len + 1 - half1;

        let (keys1, links1, keys2, links2) = if idx < half1 {
            (
                Stitch::with_capacity(cx.capacity(half1, edit))
                    .copy_all(&this.keys[..idx])
                    .copy_one(first_max)
                    .copy_one(second_max)
                    .copy_all(range(&this.keys, idx + 1, half1 - 1))
                    .finish(),
                Stitch::with_capacity(cx.capacity(half1, edit))
                    .copy_all(&this.links[..idx])
                    .copy_one(Link::resident(first))
                    .copy_one(Link::resident(second))
                    .copy_all(range(&this.links, idx + 1, half1 - 1))
                    .finish(),
                Stitch::with_capacity(cx.capacity(half2, edit))
                    .copy_all(&this.keys[half1 - 1..])
                    .finish(),
                Stitch::with_capacity(cx.capacity(half2, edit))
                    .copy_all(&this.links[half1 - 1..])
                    .finish(),
            )
        } else {
            (
                Stitch::with_capacity(cx.capacity(half1, edit))
                    .copy_all(&this.keys[..half1])
                    .finish(),
                Stitch::with_capacity(cx.capacity(half1, edit))
                    .copy_all(&this.links[..half1])
                    .finish(),
                Stitch::with_capacity(cx.capacity(half2, edit))
                    .copy_all(range(&this.keys, half1, idx))
                    .copy_one(first_max)
                    .copy_one(second_max)
                    .copy_all(&this.keys[idx + 1..])
                    .finish(),
                Stitch::with_capacity(cx.capacity(half2, edit))
                    .copy_all(range(&this.links, half1, idx))
                    .copy_one(Link::resident(first))
                    .copy_one(Link::resident(second))
                    .copy_all(&this.links[idx + 1..])
                    .finish(),
            )
        };

        Ok(Added::Split(
            this.node(keys1, links1, edit),
            this.node(keys2, links2, edit),
        ))
    }

    pub(crate) fn remove<S>(
        this: &mut Arc<Self>,
        key: &K,
        left: Option<&Node<K, A>>,
        right: Option<&Node<K, A>>,
        cx: &Context<K, S>,
        edit: Option<&Edit>,
    ) -> Result<Removed<K, A>, DialogSortedSetError>
    where
        S: Storage<K, Address = A>,
    {
        let len = this.keys.len();
        let idx = search_first(&this.keys, key, &cx.cmp);
        if idx == len {
            return Ok(Removed::Unchanged);
        }

        let left_child = if idx > 0 {
            Some(this.links[idx - 1].resolve(cx)?)
        } else {
            None
        };
        let right_child = if idx + 1 < len {
            Some(this.links[idx + 1].resolve(cx)?)
        } else {
            None
        };

        let removed = match Self::unique(this, edit) {
            Some(branch) => {
                let child = branch.links[idx].resolve_mut(cx)?;
                match child.remove(key, left_child.as_ref(), right_child.as_ref(), cx, edit)? {
                    Removed::InPlace { max_changed } => {
                        let max_key = if max_changed {
                            Some(child.max_key_owned()?)
                        } else {
                            None
                        };
                        debug_assert!(
                            max_changed
                                || child
                                    .max_key()
                                    .is_some_and(|max| cx.cmp.compare(max, &branch.keys[idx]).is_eq())
                        );

                        branch.links[idx].clear_address();
                        if let Some(max_key) = max_key {
                            branch.keys[idx] = max_key;
                        }

                        return Ok(Removed::InPlace {
                            max_changed: max_changed && idx == len - 1,
                        });
                    }
                    removed => removed,
                }
            }
            None => {
                let mut child = this.links[idx].resolve(cx)?;
                match child.remove(key, left_child.as_ref(), right_child.as_ref(), cx, edit)? {
                    Removed::InPlace { .. } => Removed::Rebalanced(Pieces::keep(child)),
                    removed => removed,
                }
            }
        };

        let pieces = match removed {
            Removed::Unchanged => return Ok(Removed::Unchanged),
            Removed::Rebalanced(pieces) => pieces,
            Removed::InPlace { .. } => {
                return Err(DialogSortedSetError::Invariant(
                    "Child was changed in place under a shared branch".into(),
                ));
            }
        };

        // The slots [start, end) are replaced by the child's window
        let start = if left_child.is_some() { idx - 1 } else { idx };
        let end = if right_child.is_some() { idx + 2 } else { idx + 1 };

        let mut window_keys = Vec::with_capacity(3);
        let mut window_links = Vec::with_capacity(3);

        let mut push_side = |side: Side<Node<K, A>>, slot: Option<usize>| -> Result<(), DialogSortedSetError> {
            match (side, slot) {
                (Side::Untouched, Some(slot)) => {
                    window_keys.push(this.keys[slot].clone());
                    window_links.push(this.links[slot].clone());
                }
                (Side::Replaced(node), Some(_)) => {
                    window_keys.push(node.max_key_owned()?);
                    window_links.push(Link::resident(node));
                }
                (Side::Absorbed, Some(_)) | (Side::Untouched, None) => (),
                (_, None) => {
                    return Err(DialogSortedSetError::Invariant(
                        "Child rebalanced with a sibling it does not have".into(),
                    ));
                }
            }
            Ok(())
        };

        push_side(pieces.left, left_child.as_ref().map(|_| idx - 1))?;
        push_side(Side::Replaced(pieces.center), Some(idx))?;
        push_side(pieces.right, right_child.as_ref().map(|_| idx + 1))?;

        let new_len = len - (end - start) + window_keys.len();
        let plan = Plan::choose(
            new_len,
            left.map(Node::len),
            right.map(Node::len),
            &cx.settings,
        )?;

        if plan == Plan::Keep {
            if let Some(branch) = Self::unique(this, edit) {
                let max_changed = end == len
                    && window_keys
                        .last()
                        .is_none_or(|max| cx.cmp.compare(max, &branch.keys[len - 1]) != Ordering::Equal);

                branch.keys.splice(start..end, window_keys);
                branch.links.splice(start..end, window_links);

                return Ok(Removed::InPlace { max_changed });
            }
        }

        let center_keys = Stitch::with_capacity(cx.capacity(new_len, edit))
            .copy_all(&this.keys[..start])
            .copy_all(&window_keys)
            .copy_all(&this.keys[end..])
            .finish();
        let center_links = Stitch::with_capacity(cx.capacity(new_len, edit))
            .copy_all(&this.links[..start])
            .copy_all(&window_links)
            .copy_all(&this.links[end..])
            .finish();

        let left = left.map(Self::sibling).transpose()?;
        let right = right.map(Self::sibling).transpose()?;
        let capacity = |len| cx.capacity(len, edit);

        let keys = plan.distribute(
            left.map(|branch| branch.keys.as_slice()),
            center_keys,
            right.map(|branch| branch.keys.as_slice()),
            capacity,
        )?;
        let links = plan.distribute(
            left.map(|branch| branch.links.as_slice()),
            center_links,
            right.map(|branch| branch.links.as_slice()),
            capacity,
        )?;

        Ok(Removed::Rebalanced(
            keys.zip(links)?
                .map(|(keys, links)| this.node(keys, links, edit)),
        ))
    }

    fn sibling(node: &Node<K, A>) -> Result<&Self, DialogSortedSetError> {
        node.as_branch().ok_or_else(|| {
            DialogSortedSetError::Invariant("A branch has a sibling that is a leaf".into())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Comparator, NoStorage, Settings};
    use anyhow::Result;
    use std::convert::Infallible;

    fn context() -> Result<Context<u32, NoStorage>> {
        Ok(Context::new(None, Comparator::natural(), Settings::new(4))?)
    }

    fn branch(leaves: &[&[u32]]) -> Result<Node<u32, Infallible>> {
        let children = leaves.iter().map(|keys| Node::leaf(keys.to_vec())).collect();
        Ok(Node::from(Branch::from_children(1, children, None)?))
    }

    #[test]
    fn it_refreshes_the_max_key_of_a_grown_child() -> Result<()> {
        let cx = context()?;
        let mut node = branch(&[&[1, 2], &[3, 4]])?;

        let Added::One(copy) = node.add(5, &cx, None)? else {
            anyhow::bail!("expected a copy");
        };

        assert_eq!(copy.keys(), &[2, 5]);
        copy.validate(&cx, true)?;
        Ok(())
    }

    #[test]
    fn it_absorbs_a_split_child() -> Result<()> {
        let cx = context()?;
        let mut node = branch(&[&[1, 2], &[3, 4, 5, 6]])?;

        let Added::One(copy) = node.add(7, &cx, None)? else {
            anyhow::bail!("expected a copy");
        };

        assert_eq!(copy.keys(), &[2, 4, 7]);
        copy.validate(&cx, true)?;
        Ok(())
    }

    #[test]
    fn it_splits_a_full_branch_keeping_halves_together() -> Result<()> {
        let cx = context()?;
        let full = || {
            branch(&[
                &[10, 20, 30, 40],
                &[50, 60, 70, 80],
                &[90, 100, 110, 120],
                &[130, 140, 150, 160],
            ])
        };

        let Added::Split(left, right) = full()?.add(5, &cx, None)? else {
            anyhow::bail!("expected a split");
        };
        assert_eq!(left.keys(), &[10, 40]);
        assert_eq!(right.keys(), &[80, 120, 160]);

        let Added::Split(left, right) = full()?.add(55, &cx, None)? else {
            anyhow::bail!("expected a split");
        };
        assert_eq!(left.keys(), &[40, 55, 80]);
        assert_eq!(right.keys(), &[120, 160]);

        let Added::Split(left, right) = full()?.add(125, &cx, None)? else {
            anyhow::bail!("expected a split");
        };
        assert_eq!(left.keys(), &[40, 80]);
        assert_eq!(right.keys(), &[120, 130, 160]);

        for node in [left, right] {
            node.validate(&cx, false)?;
        }

        Ok(())
    }

    #[test]
    fn it_merges_underflowing_children() -> Result<()> {
        let cx = context()?;
        let mut node = branch(&[&[1, 2], &[3, 4], &[5, 6]])?;

        let Removed::Rebalanced(pieces) = node.remove(&3, None, None, &cx, None)? else {
            anyhow::bail!("expected a rebalance");
        };

        assert!(matches!(pieces.left, Side::Untouched));
        assert!(matches!(pieces.right, Side::Untouched));
        assert_eq!(pieces.center.keys(), &[4, 6]);
        pieces.center.validate(&cx, true)?;
        assert_eq!(pieces.center.count(&cx)?, 5);
        Ok(())
    }

    #[test]
    fn it_reports_missing_keys_past_the_last_child() -> Result<()> {
        let cx = context()?;
        let mut node = branch(&[&[1, 2], &[3, 4]])?;

        assert!(matches!(
            node.remove(&9, None, None, &cx, None)?,
            Removed::Unchanged
        ));
        Ok(())
    }
}
