use crate::{DialogSortedSetError, Settings, stitch::Stitch};

/// What became of one of a node's immediate siblings after a removal.
#[derive(Debug)]
pub(crate) enum Side<T> {
    /// The sibling is unchanged; the parent keeps its existing slot.
    Untouched,
    /// The sibling was merged into the center node; the parent drops its slot.
    Absorbed,
    /// The sibling lent keys to the center node and was rebuilt.
    Replaced(T),
}

impl<T> Side<T> {
    pub fn map<U, F>(self, f: F) -> Side<U>
    where
        F: FnOnce(T) -> U,
    {
        match self {
            Side::Untouched => Side::Untouched,
            Side::Absorbed => Side::Absorbed,
            Side::Replaced(value) => Side::Replaced(f(value)),
        }
    }

    fn zip<U>(self, other: Side<U>) -> Result<Side<(T, U)>, DialogSortedSetError> {
        match (self, other) {
            (Side::Untouched, Side::Untouched) => Ok(Side::Untouched),
            (Side::Absorbed, Side::Absorbed) => Ok(Side::Absorbed),
            (Side::Replaced(left), Side::Replaced(right)) => Ok(Side::Replaced((left, right))),
            _ => Err(DialogSortedSetError::Invariant(
                "Keys and links were rebalanced differently".into(),
            )),
        }
    }
}

/// The three-slot window `[left, center, right]` a removal hands back to the
/// parent of the node it removed from.
#[derive(Debug)]
pub(crate) struct Pieces<T> {
    pub left: Side<T>,
    pub center: T,
    pub right: Side<T>,
}

impl<T> Pieces<T> {
    /// A center that was rebuilt without involving either sibling.
    pub fn keep(center: T) -> Self {
        Self {
            left: Side::Untouched,
            center,
            right: Side::Untouched,
        }
    }

    pub fn map<U, F>(self, mut f: F) -> Pieces<U>
    where
        F: FnMut(T) -> U,
    {
        Pieces {
            left: self.left.map(&mut f),
            center: f(self.center),
            right: self.right.map(&mut f),
        }
    }

    /// Pairs up two windows produced by the same [`Plan`].
    pub fn zip<U>(self, other: Pieces<U>) -> Result<Pieces<(T, U)>, DialogSortedSetError> {
        Ok(Pieces {
            left: self.left.zip(other.left)?,
            center: (self.center, other.center),
            right: self.right.zip(other.right)?,
        })
    }
}

/// How a node that just lost an entry is reconciled with its siblings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Plan {
    /// The node is still at least half full (or is the root).
    Keep,
    /// The node fits entirely into its left sibling.
    JoinLeft,
    /// The node fits entirely into its right sibling.
    JoinRight,
    /// The left sibling keeps its first `left_len` entries and hands the
    /// rest to the node.
    BorrowLeft { left_len: usize },
    /// The node grows to `center_len` entries by taking the head of its
    /// right sibling.
    BorrowRight { center_len: usize },
}

impl Plan {
    /// Picks the first applicable plan for a node that is left with
    /// `center_len` entries, given the lengths of its siblings.
    pub fn choose(
        center_len: usize,
        left_len: Option<usize>,
        right_len: Option<usize>,
        settings: &Settings,
    ) -> Result<Self, DialogSortedSetError> {
        let max_len = settings.max_len;

        if center_len >= settings.min_len() || (left_len.is_none() && right_len.is_none()) {
            return Ok(Plan::Keep);
        }

        if left_len.is_some_and(|left_len| left_len + center_len <= max_len) {
            return Ok(Plan::JoinLeft);
        }

        if right_len.is_some_and(|right_len| center_len + right_len <= max_len) {
            return Ok(Plan::JoinRight);
        }

        if let Some(left_len) = left_len {
            if right_len.is_none_or(|right_len| left_len >= right_len) {
                return Ok(Plan::BorrowLeft {
                    left_len: (left_len + center_len) / 2,
                });
            }
        }

        if let Some(right_len) = right_len {
            return Ok(Plan::BorrowRight {
                center_len: (center_len + right_len) / 2,
            });
        }

        Err(DialogSortedSetError::Invariant(format!(
            "No way to rebalance a node of {center_len} entries"
        )))
    }

    /// Carries out this plan over one array of entries (keys, or links).
    ///
    /// `capacity` sizes every newly allocated array from its length.
    pub fn distribute<T, F>(
        &self,
        left: Option<&[T]>,
        center: Vec<T>,
        right: Option<&[T]>,
        capacity: F,
    ) -> Result<Pieces<Vec<T>>, DialogSortedSetError>
    where
        T: Clone,
        F: Fn(usize) -> usize,
    {
        let missing = |side: &str| {
            DialogSortedSetError::Invariant(format!("Plan {self:?} requires a {side} sibling"))
        };

        Ok(match *self {
            Plan::Keep => Pieces::keep(center),
            Plan::JoinLeft => {
                let left = left.ok_or_else(|| missing("left"))?;
                let join = Stitch::with_capacity(capacity(left.len() + center.len()))
                    .copy_all(left)
                    .copy_all(&center)
                    .finish();
                Pieces {
                    left: Side::Absorbed,
                    center: join,
                    right: Side::Untouched,
                }
            }
            Plan::JoinRight => {
                let right = right.ok_or_else(|| missing("right"))?;
                let join = Stitch::with_capacity(capacity(center.len() + right.len()))
                    .copy_all(&center)
                    .copy_all(right)
                    .finish();
                Pieces {
                    left: Side::Untouched,
                    center: join,
                    right: Side::Absorbed,
                }
            }
            Plan::BorrowLeft { left_len } => {
                let left = left.ok_or_else(|| missing("left"))?;
                let tail = &left[left_len..];
                let new_left = Stitch::with_capacity(capacity(left_len))
                    .copy_all(&left[..left_len])
                    .finish();
                let new_center = Stitch::with_capacity(capacity(tail.len() + center.len()))
                    .copy_all(tail)
                    .copy_all(&center)
                    .finish();
                Pieces {
                    left: Side::Replaced(new_left),
                    center: new_center,
                    right: Side::Untouched,
                }
            }
            Plan::BorrowRight { center_len } => {
                let right = right.ok_or_else(|| missing("right"))?;
                let head = center_len - center.len();
                let new_center = Stitch::with_capacity(capacity(center_len))
                    .copy_all(&center)
                    .copy_all(&right[..head])
                    .finish();
                let new_right = Stitch::with_capacity(capacity(right.len() - head))
                    .copy_all(&right[head..])
                    .finish();
                Pieces {
                    left: Side::Untouched,
                    center: new_center,
                    right: Side::Replaced(new_right),
                }
            }
        })
    }
}
