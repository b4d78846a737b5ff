use thiserror::Error;

/// Errors that can occur when working with sorted sets.
#[derive(Error, Debug)]
pub enum DialogSortedSetError {
    /// A transient-only operation was invoked on a persistent set.
    #[error("Expected a transient set: {0}")]
    NotTransient(String),

    /// A persistent-only operation was invoked on a transient set.
    #[error("Expected a persistent set: {0}")]
    NotPersistent(String),

    /// Range bounds that contradict the requested traversal direction.
    #[error("Invalid range: {0}")]
    InvalidRange(String),

    /// A cursor observed that its transient set was mutated after the cursor
    /// was created.
    #[error("Set was modified during iteration (expected version {expected}, found {found})")]
    ConcurrentModification {
        /// The version of the set when the cursor was created
        expected: u64,
        /// The version of the set when the cursor was read
        found: u64,
    },

    /// An internal invariant of the tree was violated.
    #[error("Tree invariant violated: {0}")]
    Invariant(String),

    /// An error raised by (or about) the storage collaborator.
    #[error("Storage error: {0}")]
    Storage(String),

    /// An error that occurs when accessing a node.
    #[error("Problem accessing node: {0}")]
    Node(String),

    /// Rejected [`crate::Settings`].
    #[error("Invalid configuration: {0}")]
    Configuration(String),
}

impl From<std::convert::Infallible> for DialogSortedSetError {
    fn from(value: std::convert::Infallible) -> Self {
        match value {}
    }
}
