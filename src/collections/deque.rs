//! A FIFO queue over a store-backed [`Map`], used for the unbonding and
//! redelegation maturation queues.
//!
//! Indices walk a `u64` space starting at the midpoint so that pushing to
//! the front is possible (not currently exercised, but keeps `head`/`tail`
//! symmetric) without renumbering existing entries.

use crate::collections::map::Map;
use crate::state::{Attacher, Flusher, Loader, State};
use crate::store::Store;
use crate::Result;

pub struct Deque<T> {
    head: u64,
    tail: u64,
    map: Map<u64, T>,
}

impl<T> Default for Deque<T> {
    fn default() -> Self {
        let midpoint = u64::MAX / 2;
        Deque {
            head: midpoint,
            tail: midpoint,
            map: Map::default(),
        }
    }
}

impl<T: State> State for Deque<T> {
    fn attach(&mut self, store: Store) -> Result<()> {
        Attacher::new(store).attach_child(&mut self.map)?;
        Ok(())
    }

    fn flush<W: std::io::Write>(self, out: &mut W) -> Result<()> {
        Flusher::new(out)
            .flush_child(self.head)?
            .flush_child(self.tail)?
            .flush_child(self.map)?;
        Ok(())
    }

    fn load(store: Store, bytes: &mut &[u8]) -> Result<Self> {
        let mut loader = Loader::new(store, bytes);
        let head = loader.load_child()?;
        let tail = loader.load_child()?;
        let map = loader.load_child()?;
        Ok(Deque { head, tail, map })
    }
}

impl<T: State> Deque<T> {
    pub fn len(&self) -> u64 {
        self.tail - self.head
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: u64) -> Result<Option<T>> {
        self.map.get(index + self.head)
    }

    /// Overwrites the entry at `index` (already within bounds) in place.
    pub fn set(&mut self, index: u64, value: T) -> Result<()> {
        self.map.insert(index + self.head, value)
    }

    pub fn front(&self) -> Result<Option<T>> {
        if self.is_empty() {
            Ok(None)
        } else {
            self.map.get(self.head)
        }
    }

    pub fn push_back(&mut self, value: T) -> Result<u64> {
        let index = self.tail;
        self.map.insert(index, value)?;
        self.tail += 1;
        Ok(index - self.head)
    }

    pub fn pop_front(&mut self) -> Result<Option<T>> {
        if self.is_empty() {
            return Ok(None);
        }
        let value = self.map.remove(self.head)?;
        self.head += 1;
        Ok(value)
    }

    /// Iterates front-to-back without removing entries.
    pub fn iter(&self) -> Result<Vec<T>>
    where
        T: crate::encoding::Decode,
    {
        let mut entries = self.map.iter()?;
        entries.sort_by_key(|(k, _)| *k);
        Ok(entries.into_iter().map(|(_, v)| v).collect())
    }
}
