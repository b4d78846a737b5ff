use std::{fmt::Debug, hash::Hash};

/// Trait for types that can be used as members of a sorted set.
///
/// Ordering is never taken from the key itself; it always comes from the
/// set's [`crate::Comparator`]. Keys must be cheap enough to clone, since
/// branch nodes keep a copy of the maximum key of each of their children.
pub trait Key: Clone + Debug + Send + Sync + 'static {}

impl<T> Key for T where T: Clone + Debug + Send + Sync + 'static {}

/// Trait for the opaque identifiers a [`crate::Storage`] hands out for
/// stored nodes.
pub trait Address: Clone + Debug + Eq + Hash + Send + Sync + 'static {}

impl<T> Address for T where T: Clone + Debug + Eq + Hash + Send + Sync + 'static {}
