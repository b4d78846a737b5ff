use std::sync::Arc;

use crate::{
    Added, Address, Context, DialogSortedSetError, Edit, Key, Node, Plan, Removed, Storage,
    compare::search, edit::editable_by, stitch::Stitch,
};

/// A node at level 0, holding set members directly.
pub struct Leaf<K>
where
    K: Key,
{
    keys: Vec<K>,
    edit: Option<Edit>,
}

impl<K> Leaf<K>
where
    K: Key,
{
    pub(crate) fn new(keys: Vec<K>, edit: Option<Edit>) -> Self {
        Self { keys, edit }
    }

    /// The members held by this leaf, in order.
    pub fn keys(&self) -> &[K] {
        &self.keys
    }

    /// Exclusive access to a leaf that the batch holding `edit` may change in
    /// place.
    fn unique<'a>(this: &'a mut Arc<Self>, edit: Option<&Edit>) -> Option<&'a mut Self> {
        if editable_by(this.edit.as_ref(), edit) {
            Arc::get_mut(this)
        } else {
            None
        }
    }

    fn node<A>(keys: Vec<K>, edit: Option<&Edit>) -> Node<K, A>
    where
        A: Address,
    {
        Node::from(Self::new(keys, edit.cloned()))
    }

    pub(crate) fn add<A, S>(
        this: &mut Arc<Self>,
        key: K,
        cx: &Context<K, S>,
        edit: Option<&Edit>,
    ) -> Result<Added<K, A>, DialogSortedSetError>
    where
        A: Address,
        S: Storage<K, Address = A>,
    {
        let ins = match search(&this.keys, &key, &cx.cmp) {
            Ok(_) => return Ok(Added::Unchanged),
            Err(ins) => ins,
        };
        let len = this.keys.len();
        let max_len = cx.settings.max_len;

        if len < max_len {
            if let Some(leaf) = Self::unique(this, edit) {
                leaf.keys.insert(ins, key);
                return Ok(Added::InPlace {
                    max_changed: ins == len,
                });
            }

            let keys = Stitch::with_capacity(cx.capacity(len + 1, edit))
                .copy_all(&this.keys[..ins])
                .copy_one(key)
                .copy_all(&this.keys[ins..])
                .finish();

            return Ok(Added::One(Self::node(keys, edit)));
        }

        let half1 = (len + 1) / 2;
        let half2 = len + 1 - half1;

        let (keys1, keys2) = if ins < half1 {
            (
                Stitch::with_capacity(cx.capacity(half1, edit))
                    .copy_all(&this.keys[..ins])
                    .copy_one(key)
                    .copy_all(&this.keys[ins..half1 - 1])
                    .finish(),
                Stitch::with_capacity(cx.capacity(half2, edit))
                    .copy_all(&this.keys[half1 - 1..])
                    .finish(),
            )
        } else {
            (
                Stitch::with_capacity(cx.capacity(half1, edit))
                    .copy_all(&this.keys[..half1])
                    .finish(),
                Stitch::with_capacity(cx.capacity(half2, edit))
                    .copy_all(&this.keys[half1..ins])
                    .copy_one(key)
                    .copy_all(&this.keys[ins..])
                    .finish(),
            )
        };

        Ok(Added::Split(
            Self::node(keys1, edit),
            Self::node(keys2, edit),
        ))
    }

    pub(crate) fn remove<A, S>(
        this: &mut Arc<Self>,
        key: &K,
        left: Option<&Node<K, A>>,
        right: Option<&Node<K, A>>,
        cx: &Context<K, S>,
        edit: Option<&Edit>,
    ) -> Result<Removed<K, A>, DialogSortedSetError>
    where
        A: Address,
        S: Storage<K, Address = A>,
    {
        let Ok(idx) = search(&this.keys, key, &cx.cmp) else {
            return Ok(Removed::Unchanged);
        };

        if left.is_some_and(|node| !node.is_leaf()) || right.is_some_and(|node| !node.is_leaf()) {
            return Err(DialogSortedSetError::Invariant(
                "A leaf has a sibling that is not a leaf".into(),
            ));
        }

        let new_len = this.keys.len() - 1;
        let plan = Plan::choose(
            new_len,
            left.map(Node::len),
            right.map(Node::len),
            &cx.settings,
        )?;

        if plan == Plan::Keep {
            if let Some(leaf) = Self::unique(this, edit) {
                leaf.keys.remove(idx);
                return Ok(Removed::InPlace {
                    max_changed: idx == new_len,
                });
            }
        }

        let center = Stitch::with_capacity(cx.capacity(new_len, edit))
            .copy_all(&this.keys[..idx])
            .copy_all(&this.keys[idx + 1..])
            .finish();

        let pieces = plan.distribute(
            left.map(Node::keys),
            center,
            right.map(Node::keys),
            |len| cx.capacity(len, edit),
        )?;

        Ok(Removed::Rebalanced(
            pieces.map(|keys| Self::node(keys, edit)),
        ))
    }
}
