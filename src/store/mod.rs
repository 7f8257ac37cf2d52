//! Cache-layered key/value storage.
//!
//! A [`Store`] is a cheaply-clonable handle onto a byte-keyed,
//! lexicographically-ordered backing store, scoped to a key prefix. Calling
//! [`Store::sub`] derives a child scoped to a longer prefix; calling
//! [`Store::cache`] wraps the current store in a copy-on-write overlay whose
//! writes are invisible until [`Cache::write`] propagates them to the
//! parent. This is the mechanism described in spec.md's cache-layering
//! design note: committed store -> check/deliver state -> per-transaction
//! cache -> per-message cache, each frame an instance of this same type.

mod map_store;
pub use map_store::MapStore;

use crate::Result;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::rc::Rc;

/// Read access to a byte-keyed store.
pub trait Read {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Returns the first entry with a key strictly greater than `key`.
    fn get_next(&self, key: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>>;

    /// Returns the last entry with a key strictly less than `key`.
    fn get_prev(&self, key: Option<&[u8]>) -> Result<Option<(Vec<u8>, Vec<u8>)>>;
}

/// Write access to a byte-keyed store.
pub trait Write {
    fn put(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<()>;
    fn delete(&mut self, key: &[u8]) -> Result<()>;
}

/// The backing store trait object every [`Store`] ultimately reads through.
pub trait Backing: Read + Write {}
impl<T: Read + Write> Backing for T {}

#[derive(Clone)]
pub struct Shared<T>(Rc<RefCell<T>>);

impl<T> Shared<T> {
    pub fn new(inner: T) -> Self {
        Shared(Rc::new(RefCell::new(inner)))
    }

    pub fn borrow(&self) -> std::cell::Ref<T> {
        self.0.borrow()
    }

    pub fn borrow_mut(&self) -> std::cell::RefMut<T> {
        self.0.borrow_mut()
    }
}

enum Backend {
    Map(Shared<MapStore>),
    Cache(Shared<CacheInner>),
    /// A trait-object-backed store — used for the `merk`-backed tree the
    /// `abci` feature commits to disk, which isn't reachable from this
    /// crate's core without pulling `merk` into every build.
    Dyn(Shared<Box<dyn BackingIter>>),
}

impl Clone for Backend {
    fn clone(&self) -> Self {
        match self {
            Backend::Map(m) => Backend::Map(m.clone()),
            Backend::Cache(c) => Backend::Cache(c.clone()),
            Backend::Dyn(d) => Backend::Dyn(d.clone()),
        }
    }
}

/// A [`Backing`] store that can also enumerate its entries, needed for
/// `Store::range`/`get_next`/`get_prev` over a backend this crate doesn't
/// otherwise know the internal layout of.
pub trait BackingIter: Read + Write {
    fn iter_all(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Persists pending writes as a new committed root. A no-op for
    /// backends (like [`MapStore`]) that already write straight through.
    fn commit(&mut self) -> Result<()> {
        Ok(())
    }

    /// The backend's Merkle root hash, if it has one.
    fn root_hash(&self) -> Option<[u8; 32]> {
        None
    }

    /// A Merkle proof covering `keys`, if this backend can produce one.
    fn prove(&self, keys: Vec<Vec<u8>>) -> Result<Option<Vec<u8>>> {
        let _ = keys;
        Ok(None)
    }
}

impl BackingIter for MapStore {
    fn iter_all(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        Ok(self.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }
}

/// A copy-on-write overlay over a parent [`Store`]. Reads fall through to
/// the parent when absent locally; a tombstone records an explicit delete so
/// the parent's value doesn't leak back through on read.
struct CacheInner {
    parent: Store,
    writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl CacheInner {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.writes.get(key) {
            Some(Some(value)) => Ok(Some(value.clone())),
            Some(None) => Ok(None),
            None => self.parent.get(key),
        }
    }
}

/// A handle onto a byte-keyed store, scoped to a key prefix.
///
/// Cloning a `Store` is cheap (an `Rc` bump); clones share the same
/// underlying writes.
#[derive(Clone)]
pub struct Store {
    backend: Backend,
    prefix: Vec<u8>,
}

impl Store {
    pub fn new(backing: MapStore) -> Self {
        Store {
            backend: Backend::Map(Shared::new(backing)),
            prefix: vec![],
        }
    }

    /// Builds a store over an arbitrary [`BackingIter`] implementation —
    /// how the `abci` feature's `merk`-backed tree plugs in without this
    /// module needing to know about `merk` directly.
    pub fn new_dyn(backing: Box<dyn BackingIter>) -> Self {
        Store {
            backend: Backend::Dyn(Shared::new(backing)),
            prefix: vec![],
        }
    }

    /// Commits pending writes to a new root. A no-op over `MapStore`.
    pub fn commit(&self) -> Result<()> {
        match &self.backend {
            Backend::Dyn(shared) => shared.borrow_mut().commit(),
            Backend::Map(_) => Ok(()),
            Backend::Cache(_) => Ok(()),
        }
    }

    /// The backend's Merkle root hash, if it has one.
    pub fn root_hash(&self) -> Option<[u8; 32]> {
        match &self.backend {
            Backend::Dyn(shared) => shared.borrow().root_hash(),
            _ => None,
        }
    }

    /// A Merkle proof over `keys` (prefixed by this store's scope), if the
    /// backend can produce one.
    pub fn prove(&self, keys: Vec<Vec<u8>>) -> Result<Option<Vec<u8>>> {
        let keys = keys.into_iter().map(|k| self.prefixed(&k)).collect();
        match &self.backend {
            Backend::Dyn(shared) => shared.borrow().prove(keys),
            _ => Ok(None),
        }
    }

    /// Returns a handle scoped to `self`'s prefix extended by `suffix`.
    pub fn sub(&self, suffix: &[u8]) -> Store {
        let mut prefix = self.prefix.clone();
        prefix.extend_from_slice(suffix);
        Store {
            backend: self.backend.clone(),
            prefix,
        }
    }

    /// Wraps `self` in a fresh copy-on-write overlay.
    pub fn cache(&self) -> Cache {
        let inner = CacheInner {
            parent: self.clone(),
            writes: BTreeMap::new(),
        };
        Cache {
            store: Store {
                backend: Backend::Cache(Shared::new(inner)),
                prefix: vec![],
            },
        }
    }

    fn prefixed(&self, key: &[u8]) -> Vec<u8> {
        let mut full = self.prefix.clone();
        full.extend_from_slice(key);
        full
    }

    fn strip_prefix(&self, key: Vec<u8>) -> Vec<u8> {
        key[self.prefix.len()..].to_vec()
    }
}

/// A writable [`Store`] cache frame; call [`Cache::write`] to propagate its
/// accumulated writes to the parent, or simply drop it to discard them.
pub struct Cache {
    store: Store,
}

impl Cache {
    pub fn store(&self) -> Store {
        self.store.clone()
    }

    /// Propagates every write recorded in this frame to its parent.
    pub fn write(self) -> Result<()> {
        let inner = match &self.store.backend {
            Backend::Cache(shared) => shared,
            Backend::Map(_) | Backend::Dyn(_) => return Ok(()),
        };
        let mut inner = inner.borrow_mut();
        let writes = std::mem::take(&mut inner.writes);
        drop(inner);

        let parent = match &self.store.backend {
            Backend::Cache(shared) => shared.borrow().parent.clone(),
            Backend::Map(_) | Backend::Dyn(_) => unreachable!(),
        };
        for (key, value) in writes {
            match value {
                Some(value) => parent.put(key, value)?,
                None => parent.delete(&key)?,
            }
        }
        Ok(())
    }
}

impl Read for Store {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let full_key = self.prefixed(key);
        match &self.backend {
            Backend::Map(shared) => shared.borrow().get(&full_key),
            Backend::Cache(shared) => shared.borrow().get(&full_key),
            Backend::Dyn(shared) => shared.borrow().get(&full_key),
        }
    }

    fn get_next(&self, key: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let full_key = self.prefixed(key);
        let entries = self.collect_prefixed();
        let res = entries
            .into_iter()
            .find(|(k, _)| k.as_slice() > full_key.as_slice());
        Ok(res.map(|(k, v)| (self.strip_prefix(k), v)))
    }

    fn get_prev(&self, key: Option<&[u8]>) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let bound = key.map(|k| self.prefixed(k));
        let entries = self.collect_prefixed();
        let res = entries
            .into_iter()
            .rev()
            .find(|(k, _)| bound.as_ref().map(|b| k.as_slice() < b.as_slice()).unwrap_or(true));
        Ok(res.map(|(k, v)| (self.strip_prefix(k), v)))
    }
}

impl Write for Store {
    fn put(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        let full_key = self.prefixed(&key);
        match &self.backend {
            Backend::Map(shared) => shared.borrow_mut().put(full_key, value),
            Backend::Dyn(shared) => shared.borrow_mut().put(full_key, value),
            Backend::Cache(shared) => {
                shared.borrow_mut().writes.insert(full_key, Some(value));
                Ok(())
            }
        }
    }

    fn delete(&mut self, key: &[u8]) -> Result<()> {
        let full_key = self.prefixed(key);
        match &self.backend {
            Backend::Map(shared) => shared.borrow_mut().delete(&full_key),
            Backend::Dyn(shared) => shared.borrow_mut().delete(&full_key),
            Backend::Cache(shared) => {
                shared.borrow_mut().writes.insert(full_key, None);
                Ok(())
            }
        }
    }
}

impl Store {
    /// Collects every key/value pair visible through this store whose key
    /// starts with this store's prefix, in ascending key order. Used to
    /// implement `get_next`/`get_prev`/range iteration; adequate for the
    /// `MapStore`-backed test and single-process scale this crate targets
    /// (the `merk`-backed store behind the `abci` feature implements true
    /// range scans directly against its backing tree).
    fn collect_prefixed(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut merged: BTreeMap<Vec<u8>, Option<Vec<u8>>> = BTreeMap::new();
        self.collect_into(&mut merged);
        merged
            .into_iter()
            .filter(|(k, _)| k.starts_with(&self.prefix))
            .filter_map(|(k, v)| v.map(|v| (k, v)))
            .collect()
    }

    fn collect_into(&self, merged: &mut BTreeMap<Vec<u8>, Option<Vec<u8>>>) {
        match &self.backend {
            Backend::Map(shared) => {
                for (k, v) in shared.borrow().iter() {
                    merged.entry(k.clone()).or_insert_with(|| Some(v.clone()));
                }
            }
            Backend::Dyn(shared) => {
                if let Ok(entries) = shared.borrow().iter_all() {
                    for (k, v) in entries {
                        merged.entry(k).or_insert(Some(v));
                    }
                }
            }
            Backend::Cache(shared) => {
                let inner = shared.borrow();
                inner.parent.collect_into(merged);
                for (k, v) in inner.writes.iter() {
                    merged.insert(k.clone(), v.clone());
                }
            }
        }
    }

    /// Iterates every key/value pair under this store's prefix, with the
    /// prefix stripped, in ascending order. Used by collection types to
    /// implement `iter()`.
    pub fn range(&self, bounds: (Bound<Vec<u8>>, Bound<Vec<u8>>)) -> Vec<(Vec<u8>, Vec<u8>)> {
        let entries = self.collect_prefixed();
        entries
            .into_iter()
            .map(|(k, v)| (self.strip_prefix(k), v))
            .filter(|(k, _)| match &bounds.0 {
                Bound::Included(b) => k >= b,
                Bound::Excluded(b) => k > b,
                Bound::Unbounded => true,
            })
            .filter(|(k, _)| match &bounds.1 {
                Bound::Included(b) => k <= b,
                Bound::Excluded(b) => k < b,
                Bound::Unbounded => true,
            })
            .collect()
    }
}
