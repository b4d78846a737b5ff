use std::{cmp::Ordering, sync::Arc};

/// A shareable total order over keys.
///
/// The set never assumes the natural ordering of its keys; every search,
/// split and range bound goes through the [`Comparator`] the set was created
/// with (or the one handed to [`crate::SortedSet::slice_by`]).
pub struct Comparator<K>(Arc<dyn Fn(&K, &K) -> Ordering + Send + Sync>);

impl<K> Comparator<K> {
    /// Wraps an ordering function.
    pub fn new<F>(compare: F) -> Self
    where
        F: Fn(&K, &K) -> Ordering + Send + Sync + 'static,
    {
        Self(Arc::new(compare))
    }

    /// The natural [`Ord`] ordering of `K`.
    pub fn natural() -> Self
    where
        K: Ord,
    {
        Self::new(|left: &K, right: &K| left.cmp(right))
    }

    /// The reverse of this ordering.
    pub fn reversed(&self) -> Self
    where
        K: 'static,
    {
        let inner = self.0.clone();
        Self(Arc::new(move |left: &K, right: &K| inner(right, left)))
    }

    /// Compares two keys.
    #[inline]
    pub fn compare(&self, left: &K, right: &K) -> Ordering {
        (self.0)(left, right)
    }
}

impl<K> Clone for Comparator<K> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<K> std::fmt::Debug for Comparator<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Comparator")
    }
}

impl<K> Default for Comparator<K>
where
    K: Ord,
{
    fn default() -> Self {
        Self::natural()
    }
}

/// Exact binary search over `keys`: `Ok(index)` when found, otherwise
/// `Err(insertion point)`.
pub(crate) fn search<K>(keys: &[K], key: &K, cmp: &Comparator<K>) -> Result<usize, usize> {
    keys.binary_search_by(|probe| cmp.compare(probe, key))
}

/// Smallest index whose key is `>= key` (`keys.len()` if none).
pub(crate) fn search_first<K>(keys: &[K], key: &K, cmp: &Comparator<K>) -> usize {
    keys.partition_point(|probe| cmp.compare(probe, key) == Ordering::Less)
}

/// Largest index whose key is `<= key`, or `None` if every key is greater.
pub(crate) fn search_last<K>(keys: &[K], key: &K, cmp: &Comparator<K>) -> Option<usize> {
    keys.partition_point(|probe| cmp.compare(probe, key) != Ordering::Greater)
        .checked_sub(1)
}
