use crate::{Cursor, DialogSortedSetError, Key, Storage};

/// An [`Iterator`] over the keys a [`Cursor`] visits.
///
/// Errors (a failed storage read, or a transient set changing underneath the
/// cursor) are yielded once, after which the iterator is finished.
pub struct Iter<K, S>
where
    K: Key,
    S: Storage<K>,
{
    cursor: Option<Cursor<K, S>>,
    error: Option<DialogSortedSetError>,
    started: bool,
}

impl<K, S> Iter<K, S>
where
    K: Key,
    S: Storage<K>,
{
    pub(crate) fn new(cursor: Result<Cursor<K, S>, DialogSortedSetError>) -> Self {
        match cursor {
            Ok(cursor) => Self {
                cursor: Some(cursor),
                error: None,
                started: false,
            },
            Err(error) => Self {
                cursor: None,
                error: Some(error),
                started: false,
            },
        }
    }
}

impl<K, S> Iterator for Iter<K, S>
where
    K: Key,
    S: Storage<K>,
{
    type Item = Result<K, DialogSortedSetError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(error) = self.error.take() {
            return Some(Err(error));
        }

        let cursor = self.cursor.as_mut()?;

        let item = match self.started {
            true => cursor.advance().and_then(|_| cursor.current().map(|key| key.cloned())),
            false => cursor.current().map(|key| key.cloned()),
        };
        self.started = true;

        match item {
            Ok(Some(key)) => Some(Ok(key)),
            Ok(None) => {
                self.cursor = None;
                None
            }
            Err(error) => {
                self.cursor = None;
                Some(Err(error))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{DialogSortedSetError, SortedSet};
    use anyhow::Result;

    #[test]
    fn it_iterates_every_key_in_order() -> Result<()> {
        let set: SortedSet<u32> = [5, 1, 4, 2, 3].into_iter().collect();

        let keys = set.iter().collect::<Result<Vec<_>, _>>()?;
        assert_eq!(keys, vec![1, 2, 3, 4, 5]);

        let mut iter = set.iter();
        for _ in 0..5 {
            iter.next();
        }
        assert!(iter.next().is_none());
        assert!(iter.next().is_none());
        Ok(())
    }

    #[test]
    fn it_yields_nothing_for_an_empty_set() -> Result<()> {
        let set = SortedSet::<u32>::new();
        assert!(set.iter().next().is_none());
        Ok(())
    }

    #[test]
    fn it_yields_an_error_once() -> Result<()> {
        let set: SortedSet<u32> = (0..10).collect();
        let mut iter = crate::Iter::new(set.slice(Some(&9), Some(&1)));
        assert!(matches!(
            iter.next(),
            Some(Err(DialogSortedSetError::InvalidRange(_)))
        ));
        assert!(iter.next().is_none());
        Ok(())
    }
}
