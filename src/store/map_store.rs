use super::{Read, Write};
use crate::Result;
use std::collections::BTreeMap;

/// An in-memory backing store, used for unit tests and for `check_state`
/// in binaries that haven't wired up a `merk`-backed store.
#[derive(Default, Clone)]
pub struct MapStore {
    map: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl MapStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(super) fn iter(&self) -> impl Iterator<Item = (&Vec<u8>, &Vec<u8>)> {
        self.map.iter()
    }
}

impl Read for MapStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.map.get(key).cloned())
    }

    fn get_next(&self, key: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        Ok(self
            .map
            .range::<[u8], _>((std::ops::Bound::Excluded(key), std::ops::Bound::Unbounded))
            .next()
            .map(|(k, v)| (k.clone(), v.clone())))
    }

    fn get_prev(&self, key: Option<&[u8]>) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let range = match key {
            Some(key) => self
                .map
                .range::<[u8], _>((std::ops::Bound::Unbounded, std::ops::Bound::Excluded(key))),
            None => self.map.range::<[u8], _>(..),
        };
        Ok(range.last().map(|(k, v)| (k.clone(), v.clone())))
    }
}

impl Write for MapStore {
    fn put(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        self.map.insert(key, value);
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<()> {
        self.map.remove(key);
        Ok(())
    }
}
