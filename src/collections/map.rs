//! A store-backed key/value map.
//!
//! Unlike a field holding a plain `State` value, a `Map`'s entries are not
//! held in memory between calls — each is read from (and written directly
//! back to) its own store subtree, keyed by the entry's canonically-encoded
//! key. This is what lets a chain have millions of delegator records
//! without loading them all into the in-memory state tree on every block.

use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};

use crate::encoding::{Decode, Encode};
use crate::state::State;
use crate::store::{Read, Store, Write};
use crate::Result;

pub struct Map<K, V> {
    store: Store,
    _marker: PhantomData<(K, V)>,
}

impl<K, V> Default for Map<K, V> {
    fn default() -> Self {
        Map {
            store: Store::new(crate::store::MapStore::new()),
            _marker: PhantomData,
        }
    }
}

impl<K: Encode, V: State> State for Map<K, V> {
    fn attach(&mut self, store: Store) -> Result<()> {
        self.store = store;
        Ok(())
    }

    fn flush<W: std::io::Write>(self, _out: &mut W) -> Result<()> {
        // Entries are written straight through to the store on every
        // mutation; there is nothing left to serialize at this level.
        Ok(())
    }

    fn load(store: Store, _bytes: &mut &[u8]) -> Result<Self> {
        Ok(Map {
            store,
            _marker: PhantomData,
        })
    }
}

impl<K: Encode, V: State> Map<K, V> {
    fn key_bytes(key: &K) -> Result<Vec<u8>> {
        Ok(Encode::encode(key)?)
    }

    fn load_value(&self, key_bytes: &[u8]) -> Result<Option<V>> {
        match self.store.get(key_bytes)? {
            Some(bytes) => {
                let mut slice: &[u8] = &bytes;
                let value = V::load(self.store.sub(key_bytes), &mut slice)?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn save_value(&mut self, key_bytes: Vec<u8>, mut value: V) -> Result<()> {
        value.attach(self.store.sub(&key_bytes))?;
        let mut bytes = vec![];
        value.flush(&mut bytes)?;
        self.store.put(key_bytes, bytes)
    }

    pub fn get(&self, key: K) -> Result<Option<V>> {
        self.load_value(&Self::key_bytes(&key)?)
    }

    pub fn contains_key(&self, key: K) -> Result<bool> {
        Ok(self.store.get(&Self::key_bytes(&key)?)?.is_some())
    }

    pub fn insert(&mut self, key: K, value: V) -> Result<()> {
        let key_bytes = Self::key_bytes(&key)?;
        self.save_value(key_bytes, value)
    }

    pub fn remove(&mut self, key: K) -> Result<Option<V>> {
        let key_bytes = Self::key_bytes(&key)?;
        let existing = self.load_value(&key_bytes)?;
        self.store.delete(&key_bytes)?;
        Ok(existing)
    }

    /// Loads `key`'s value (inserting `V::default()`-equivalent via
    /// `or_insert` if absent), hands back a guard that writes the value
    /// back to the store when dropped.
    pub fn entry(&mut self, key: K) -> Result<Entry<'_, K, V>> {
        let key_bytes = Self::key_bytes(&key)?;
        let value = self.load_value(&key_bytes)?;
        Ok(Entry {
            map: self,
            key_bytes,
            value,
        })
    }
}

impl<K: Encode + Decode, V: State> Map<K, V> {
    /// Iterates every entry in ascending key order.
    pub fn iter(&self) -> Result<Vec<(K, V)>> {
        let mut out = vec![];
        for (key_bytes, value_bytes) in self
            .store
            .range((std::ops::Bound::Unbounded, std::ops::Bound::Unbounded))
        {
            let mut key_slice: &[u8] = &key_bytes;
            let key = K::decode(&mut key_slice)?;
            let mut value_slice: &[u8] = &value_bytes;
            let value = V::load(self.store.sub(&key_bytes), &mut value_slice)?;
            out.push((key, value));
        }
        Ok(out)
    }
}

/// A loaded-or-default map entry; writes back to the store on drop so
/// `map.entry(k)?.some_field += 1` persists without an explicit `insert`.
pub struct Entry<'a, K: Encode, V: State> {
    map: &'a mut Map<K, V>,
    key_bytes: Vec<u8>,
    value: Option<V>,
}

impl<'a, K: Encode, V: State + Default> Entry<'a, K, V> {
    pub fn or_default(&mut self) -> &mut V {
        self.value.get_or_insert_with(V::default)
    }

    pub fn or_insert(&mut self, default: V) -> &mut V {
        self.value.get_or_insert(default)
    }
}

impl<'a, K: Encode, V: State> Entry<'a, K, V> {
    pub fn get(&self) -> Option<&V> {
        self.value.as_ref()
    }

    pub fn get_mut(&mut self) -> Option<&mut V> {
        self.value.as_mut()
    }
}

impl<'a, K: Encode, V: State> Drop for Entry<'a, K, V> {
    fn drop(&mut self) {
        if let Some(value) = self.value.take() {
            let _ = self.map.save_value(std::mem::take(&mut self.key_bytes), value);
        }
    }
}

/// A mutable handle onto a loaded value, flushing it back to the store on
/// drop. Returned by [`Map::get_mut`].
pub struct ChildMut<'a, K: Encode, V: State> {
    map: &'a mut Map<K, V>,
    key_bytes: Vec<u8>,
    value: Option<V>,
}

impl<K: Encode, V: State> Map<K, V> {
    pub fn get_mut(&mut self, key: K) -> Result<Option<ChildMut<'_, K, V>>> {
        let key_bytes = Self::key_bytes(&key)?;
        match self.load_value(&key_bytes)? {
            Some(value) => Ok(Some(ChildMut {
                map: self,
                key_bytes,
                value: Some(value),
            })),
            None => Ok(None),
        }
    }

    pub fn get_mut_or_insert_default(&mut self, key: K) -> Result<ChildMut<'_, K, V>>
    where
        V: Default,
    {
        let key_bytes = Self::key_bytes(&key)?;
        let value = self.load_value(&key_bytes)?.unwrap_or_default();
        Ok(ChildMut {
            map: self,
            key_bytes,
            value: Some(value),
        })
    }
}

impl<'a, K: Encode, V: State> Deref for ChildMut<'a, K, V> {
    type Target = V;
    fn deref(&self) -> &V {
        self.value.as_ref().expect("value taken before drop")
    }
}

impl<'a, K: Encode, V: State> DerefMut for ChildMut<'a, K, V> {
    fn deref_mut(&mut self) -> &mut V {
        self.value.as_mut().expect("value taken before drop")
    }
}

impl<'a, K: Encode, V: State> Drop for ChildMut<'a, K, V> {
    fn drop(&mut self) {
        if let Some(value) = self.value.take() {
            let _ = self
                .map
                .save_value(std::mem::take(&mut self.key_bytes), value);
        }
    }
}
