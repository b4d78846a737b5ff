/// A left-to-right array builder that interleaves copied ranges with single
/// elements.
///
/// Every split, merge and borrow routine assembles its new key (and link)
/// arrays with a [`Stitch`], so the shape of each new node reads as a
/// sequence of "copy this run, then this element, then that run".
pub(crate) struct Stitch<T> {
    target: Vec<T>,
}

impl<T> Stitch<T>
where
    T: Clone,
{
    /// Starts an empty target with room for `capacity` elements.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            target: Vec::with_capacity(capacity),
        }
    }

    /// Appends a clone of every element in `source`.
    pub fn copy_all(mut self, source: &[T]) -> Self {
        self.target.extend_from_slice(source);
        self
    }

    /// Appends a single element.
    pub fn copy_one(mut self, value: T) -> Self {
        self.target.push(value);
        self
    }

    /// Finishes the build and yields the assembled array.
    pub fn finish(self) -> Vec<T> {
        self.target
    }
}

/// Clamped sub-slice `source[from..to]`; empty when `to <= from`.
pub(crate) fn range<T>(source: &[T], from: usize, to: usize) -> &[T] {
    let to = to.min(source.len());
    if to <= from { &[] } else { &source[from..to] }
}
