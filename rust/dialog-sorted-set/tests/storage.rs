use std::{collections::HashSet, sync::Arc, thread};

use anyhow::Result;
use dialog_sorted_set::{Comparator, MemoryStorage, ReferenceType, Settings, SortedSet};

type StoredSet = SortedSet<u64, MemoryStorage<u64>>;

fn settings(reference: ReferenceType) -> Settings {
    Settings::new(8).with_reference(reference)
}

fn build(storage: &Arc<MemoryStorage<u64>>, reference: ReferenceType, len: u64) -> Result<StoredSet> {
    let mut batch = SortedSet::stored(storage.clone(), Comparator::natural(), settings(reference))?
        .as_transient()?;
    for key in 0..len {
        batch.conj(key * 2)?;
    }
    Ok(batch.persistent()?)
}

fn reopen(storage: &Arc<MemoryStorage<u64>>, reference: ReferenceType, address: u64) -> Result<StoredSet> {
    Ok(SortedSet::restore(
        address,
        storage.clone(),
        Comparator::natural(),
        settings(reference),
    )?)
}

#[test]
fn every_reference_type_round_trips() -> Result<()> {
    for reference in [ReferenceType::Strong, ReferenceType::Soft, ReferenceType::Weak] {
        let storage = Arc::new(MemoryStorage::default());
        let set = build(&storage, reference, 2000)?;
        let address = set.store()?;

        let restored = reopen(&storage, reference, address)?;
        assert_eq!(restored.count()?, 2000);
        assert!(restored.contains(&1998)?);
        assert!(!restored.contains(&1999)?);
        assert_eq!(
            restored.slice(Some(&100), Some(&110))?.into_iter().collect::<Result<Vec<_>, _>>()?,
            vec![100, 102, 104, 106, 108, 110]
        );
        restored.validate()?;
    }

    Ok(())
}

#[test]
fn strong_references_read_each_node_once() -> Result<()> {
    let storage = Arc::new(MemoryStorage::default());
    let address = build(&storage, ReferenceType::Strong, 2000)?.store()?;
    let nodes = storage.len();

    let restored = reopen(&storage, ReferenceType::Strong, address)?;
    restored.count()?;
    restored.count()?;
    restored.iter().collect::<Result<Vec<_>, _>>()?;

    assert_eq!(storage.reads(), nodes);
    Ok(())
}

#[test]
fn weak_references_reload_dropped_nodes() -> Result<()> {
    let storage = Arc::new(MemoryStorage::default());
    let address = build(&storage, ReferenceType::Weak, 2000)?.store()?;

    let restored = reopen(&storage, ReferenceType::Weak, address)?;
    restored.contains(&1000)?;
    let first = storage.reads();

    restored.contains(&1000)?;
    let second = storage.reads() - first;

    // Only the root is held strongly, so everything below it is read again
    assert_eq!(second, restored.depth()? - 1);
    Ok(())
}

#[test]
fn soft_references_are_served_from_the_cache() -> Result<()> {
    let storage = Arc::new(MemoryStorage::default());
    let address = build(&storage, ReferenceType::Soft, 2000)?.store()?;

    let restored = reopen(&storage, ReferenceType::Soft, address)?;
    restored.contains(&1000)?;
    let first = storage.reads();

    restored.contains(&1000)?;
    assert_eq!(storage.reads(), first);

    let derived = restored.insert(999)?;
    derived.contains(&1000)?;
    assert_eq!(storage.reads(), first);
    Ok(())
}

#[test]
fn updates_after_a_restore_only_store_new_nodes() -> Result<()> {
    let storage = Arc::new(MemoryStorage::default());
    let address = build(&storage, ReferenceType::Soft, 2000)?.store()?;
    let writes = storage.writes();

    let restored = reopen(&storage, ReferenceType::Soft, address)?;
    let changed = restored.insert(1)?;
    let depth = changed.depth()?;
    let next = changed.store()?;

    assert_ne!(next, address);
    assert!(storage.writes() - writes >= depth);
    assert!(storage.writes() - writes <= depth * 2 + 1);

    let reopened = reopen(&storage, ReferenceType::Soft, next)?;
    assert!(reopened.contains(&1)?);
    assert_eq!(reopened.count()?, 2001);
    assert_eq!(reopen(&storage, ReferenceType::Soft, address)?.count()?, 2000);
    Ok(())
}

#[test]
fn walking_finds_the_nodes_to_keep() -> Result<()> {
    let storage = Arc::new(MemoryStorage::default());
    let first = build(&storage, ReferenceType::Strong, 500)?;
    first.store()?;

    let second = first.remove(&0)?;
    let address = second.store()?;

    let mut live = HashSet::new();
    second.walk(|_, address| match address {
        Some(address) => live.insert(*address),
        None => true,
    })?;

    let dropped = storage.retain(&live);
    assert!(dropped > 0);

    let restored = reopen(&storage, ReferenceType::Strong, address)?;
    assert_eq!(restored.count()?, 499);
    assert!(!restored.contains(&0)?);
    restored.validate()?;
    Ok(())
}

#[test]
fn readers_on_many_threads_share_one_restored_set() -> Result<()> {
    let storage = Arc::new(MemoryStorage::default());
    let address = build(&storage, ReferenceType::Strong, 5000)?.store()?;
    let nodes = storage.len();

    let restored = Arc::new(reopen(&storage, ReferenceType::Strong, address)?);
    let readers = (0..8)
        .map(|reader| {
            let set = restored.clone();
            thread::spawn(move || -> Result<usize> {
                let mut found = 0;
                for key in (reader..10_000).step_by(8) {
                    if set.contains(&(key as u64))? {
                        found += 1;
                    }
                }
                Ok(found)
            })
        })
        .collect::<Vec<_>>();

    let mut found = 0;
    for reader in readers {
        found += reader
            .join()
            .map_err(|_| anyhow::anyhow!("reader thread panicked"))??;
    }

    assert_eq!(found, 5000);
    assert_eq!(storage.reads(), nodes);
    Ok(())
}

#[test]
fn an_empty_set_round_trips() -> Result<()> {
    let storage = Arc::new(MemoryStorage::default());
    let address = build(&storage, ReferenceType::Soft, 0)?.store()?;

    let restored = reopen(&storage, ReferenceType::Soft, address)?;
    assert!(restored.is_empty()?);
    assert_eq!(restored.iter().count(), 0);
    Ok(())
}
