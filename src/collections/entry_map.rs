//! An ordered set of composite keys with no associated value.
//!
//! `validators_by_power` is the motivating case: the validator power index
//! needs to be walked in descending-power order (ties broken by address),
//! but carries no payload beyond "this validator is currently at this
//! power" — the key bytes themselves are the index entry. [`Entry::into_entry`]
//! (usually via `#[derive(Entry)]`) packs an entry's `#[key]`-tagged fields
//! into bytes whose lexicographic order matches the desired sort order (see
//! `ValidatorPowerEntry`'s big-endian-power-then-one's-complement-address
//! encoding in `staking::ValidatorPowerEntry`), and `EntryMap` stores those bytes as bare
//! store keys.

use crate::store::{Read, Store, Write};
use crate::Result;

/// A value that can be packed into an ordered-index key. Implementors
/// usually derive this; the generated impl concatenates each `#[key]`
/// field's canonical encoding in declaration order.
pub trait Entry: Sized {
    fn into_entry(self) -> Result<Vec<u8>>;
}

pub struct EntryMap<T> {
    store: Store,
    _marker: std::marker::PhantomData<T>,
}

impl<T> Default for EntryMap<T> {
    fn default() -> Self {
        EntryMap {
            store: Store::new(crate::store::MapStore::new()),
            _marker: std::marker::PhantomData,
        }
    }
}

impl<T> crate::state::State for EntryMap<T> {
    fn attach(&mut self, store: Store) -> Result<()> {
        self.store = store;
        Ok(())
    }

    fn flush<W: std::io::Write>(self, _out: &mut W) -> Result<()> {
        Ok(())
    }

    fn load(store: Store, _bytes: &mut &[u8]) -> Result<Self> {
        Ok(EntryMap {
            store,
            _marker: std::marker::PhantomData,
        })
    }
}

impl<T: Entry> EntryMap<T> {
    pub fn insert(&mut self, entry: T) -> Result<()> {
        let key = entry.into_entry()?;
        self.store.put(key, vec![])
    }

    pub fn delete(&mut self, entry: T) -> Result<()> {
        let key = entry.into_entry()?;
        self.store.delete(&key)
    }

    /// Ascending order over the raw entry-key bytes.
    pub fn iter(&self) -> Vec<Vec<u8>> {
        self.store
            .range((std::ops::Bound::Unbounded, std::ops::Bound::Unbounded))
            .into_iter()
            .map(|(k, _)| k)
            .collect()
    }

    /// Descending order; `validators_by_power` is walked this way to find
    /// the highest-power validators first.
    pub fn iter_rev(&self) -> Vec<Vec<u8>> {
        let mut entries = self.iter();
        entries.reverse();
        entries
    }

    pub fn contains(&self, entry: T) -> Result<bool> {
        let key = entry.into_entry()?;
        Ok(self.store.get(&key)?.is_some())
    }
}
