//! A keyed collection with an incrementally-maintained total.
//!
//! `Staking` keeps its validators in a `Pool<Address, Validator>` and each
//! validator keeps its delegators in a `Pool<Address, Delegator>`. Besides
//! keyed access, a pool tracks the sum of its members' stake without an
//! O(n) rescan on every read — callers report balance deltas through
//! [`Pool::adjust_total`] as they mutate a member, the same way the
//! reference framework's `Pool::balance` decorator observes `Give`/`Take`
//! calls on members that implement `Balance`.

use crate::coins::amount::Amount;
use crate::collections::map::{ChildMut, Map};
use crate::encoding::Encode;
use crate::state::{Attacher, Flusher, Loader, State};
use crate::store::Store;
use crate::Result;

pub struct Pool<K, V> {
    map: Map<K, V>,
    total: Amount,
}

impl<K, V> Default for Pool<K, V> {
    fn default() -> Self {
        Pool {
            map: Map::default(),
            total: Amount::zero(),
        }
    }
}

impl<K: Encode, V: State> State for Pool<K, V> {
    fn attach(&mut self, store: Store) -> Result<()> {
        Attacher::new(store).attach_child(&mut self.map)?;
        Ok(())
    }

    fn flush<W: std::io::Write>(self, out: &mut W) -> Result<()> {
        Flusher::new(out)
            .flush_child(self.total)?
            .flush_child(self.map)?;
        Ok(())
    }

    fn load(store: Store, bytes: &mut &[u8]) -> Result<Self> {
        let mut loader = Loader::new(store, bytes);
        let total = loader.load_child()?;
        let map = loader.load_child()?;
        Ok(Pool { map, total })
    }
}

impl<K: Encode, V: State> Pool<K, V> {
    pub fn total(&self) -> Amount {
        self.total
    }

    pub fn adjust_total_up(&mut self, delta: Amount) -> Result<()> {
        self.total = self.total.checked_add(delta)?;
        Ok(())
    }

    pub fn adjust_total_down(&mut self, delta: Amount) -> Result<()> {
        self.total = self.total.checked_sub(delta)?;
        Ok(())
    }

    pub fn get(&self, key: K) -> Result<Option<V>> {
        self.map.get(key)
    }

    pub fn get_mut(&mut self, key: K) -> Result<Option<ChildMut<'_, K, V>>> {
        self.map.get_mut(key)
    }

    pub fn get_mut_or_insert_default(&mut self, key: K) -> Result<ChildMut<'_, K, V>>
    where
        V: Default,
    {
        self.map.get_mut_or_insert_default(key)
    }

    pub fn insert(&mut self, key: K, value: V) -> Result<()> {
        self.map.insert(key, value)
    }

    pub fn contains_key(&self, key: K) -> Result<bool> {
        self.map.contains_key(key)
    }
}

impl<K: Encode + crate::encoding::Decode, V: State> Pool<K, V> {
    pub fn iter(&self) -> Result<Vec<(K, V)>> {
        self.map.iter()
    }
}
