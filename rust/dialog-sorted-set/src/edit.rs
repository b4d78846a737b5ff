use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, Ordering},
};

/// The session token of one transient batch.
///
/// Every node allocated while a batch is open carries a clone of the batch's
/// [`Edit`]. Such a node may be mutated in place for as long as the token is
/// on and the mutation is performed by the same batch. Closing the batch
/// (see [`crate::SortedSet::persistent`]) turns the token off, after which the
/// nodes it touched are ordinary immutable structure.
///
/// The token also carries the batch's mutation counter, which cursors use to
/// detect that the set changed underneath them.
#[derive(Clone)]
pub struct Edit(Arc<EditState>);

struct EditState {
    editable: AtomicBool,
    version: AtomicU64,
}

impl Edit {
    /// Opens a batch whose mutation counter starts at `version`.
    pub(crate) fn transient(version: u64) -> Self {
        Self(Arc::new(EditState {
            editable: AtomicBool::new(true),
            version: AtomicU64::new(version),
        }))
    }

    /// Whether the batch is still open.
    pub fn is_editable(&self) -> bool {
        self.0.editable.load(Ordering::Acquire)
    }

    /// The number of structural mutations observed so far.
    pub fn version(&self) -> u64 {
        self.0.version.load(Ordering::Acquire)
    }

    /// Whether `self` and `other` are the token of the same batch.
    pub fn same(&self, other: &Edit) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn bump(&self) -> u64 {
        self.0.version.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn close(&self) {
        self.0.editable.store(false, Ordering::Release);
    }
}

impl std::fmt::Debug for Edit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Edit")
            .field("editable", &self.is_editable())
            .field("version", &self.version())
            .finish()
    }
}

/// Whether a node stamped with `owner` may be changed in place by an
/// operation running under `edit`.
pub(crate) fn editable_by(owner: Option<&Edit>, edit: Option<&Edit>) -> bool {
    match (owner, edit) {
        (Some(owner), Some(edit)) => owner.same(edit) && owner.is_editable(),
        _ => false,
    }
}
