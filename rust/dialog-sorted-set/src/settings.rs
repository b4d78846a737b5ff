use serde::{Deserialize, Serialize};

use crate::DialogSortedSetError;

/// Default upper bound on the number of keys held by one node.
pub const DEFAULT_MAX_LEN: usize = 64;

/// Default number of spare slots allocated for nodes that belong to an active
/// transient batch.
pub const DEFAULT_EXPAND_LEN: usize = 8;

/// Default capacity of the cache that retains softly referenced children.
pub const DEFAULT_CACHE_CAPACITY: usize = 2048;

/// How a branch holds on to a child that has already been written to storage.
///
/// Children that have never been stored are always held strongly; the
/// strategy only decides what happens once a child also has an address that
/// it can be restored from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceType {
    /// Keep stored children resident for as long as their parent lives.
    Strong,
    /// Keep stored children in a bounded cache; children evicted from it are
    /// dropped once nothing else uses them and restored on next access.
    #[default]
    Soft,
    /// Drop stored children as soon as nothing else uses them.
    Weak,
}

/// Tuning knobs for a [`crate::SortedSet`].
///
/// Settings can be deserialized from any serde format; missing fields take
/// their defaults:
///
/// ```
/// use dialog_sorted_set::{ReferenceType, Settings};
///
/// let settings: Settings = serde_json::from_str(r#"{ "max_len": 32, "reference": "weak" }"#).unwrap();
///
/// assert_eq!(settings.max_len, 32);
/// assert_eq!(settings.min_len(), 16);
/// assert_eq!(settings.reference, ReferenceType::Weak);
/// assert_eq!(settings.expand_len, 8);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Upper bound on the length of any node.
    pub max_len: usize,
    /// Extra capacity given to nodes allocated inside a transient batch.
    pub expand_len: usize,
    /// Child reference strategy for stored subtrees.
    pub reference: ReferenceType,
    /// Number of softly referenced children retained in memory.
    pub cache_capacity: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_len: DEFAULT_MAX_LEN,
            expand_len: DEFAULT_EXPAND_LEN,
            reference: ReferenceType::default(),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

impl Settings {
    /// Default settings with the given maximum node length.
    pub fn new(max_len: usize) -> Self {
        Self {
            max_len,
            ..Self::default()
        }
    }

    /// Returns these settings with a different child reference strategy.
    pub fn with_reference(mut self, reference: ReferenceType) -> Self {
        self.reference = reference;
        self
    }

    /// Returns these settings with a different growth increment.
    pub fn with_expand_len(mut self, expand_len: usize) -> Self {
        self.expand_len = expand_len;
        self
    }

    /// Returns these settings with a different soft cache capacity.
    pub fn with_cache_capacity(mut self, cache_capacity: usize) -> Self {
        self.cache_capacity = cache_capacity;
        self
    }

    /// Lower bound on the length of any non-root node.
    pub fn min_len(&self) -> usize {
        self.max_len / 2
    }

    /// Checks that these settings describe a tree that can stay balanced.
    pub fn validate(&self) -> Result<(), DialogSortedSetError> {
        if self.max_len < 4 {
            return Err(DialogSortedSetError::Configuration(format!(
                "max_len must be at least 4 (got {})",
                self.max_len
            )));
        }

        if self.cache_capacity == 0 {
            return Err(DialogSortedSetError::Configuration(
                "cache_capacity must be greater than zero".into(),
            ));
        }

        Ok(())
    }

    /// Allocation size for a node of `len` keys.
    pub(crate) fn capacity(&self, len: usize, editable: bool) -> usize {
        if editable {
            self.max_len.min(len + self.expand_len).max(len)
        } else {
            len
        }
    }
}
