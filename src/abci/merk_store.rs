//! Adapts `merk::Merk` — a Merkle-AVL tree backed by RocksDB — to this
//! crate's [`Read`]/[`Write`]/[`BackingIter`] traits, so `App` runs over it
//! exactly the way it runs over `MapStore` in tests.
//!
//! Only reachable behind the `abci` feature: nothing in `store/mod.rs`
//! knows `merk` exists, it only knows about `BackingIter` trait objects.

use std::path::Path;

use merk::proofs::Query;
use merk::{Merk, Op};

use crate::error::Error;
use crate::store::{BackingIter, Read, Write};
use crate::Result;

pub struct MerkBackend {
    merk: Merk,
}

impl MerkBackend {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let merk = Merk::open(path).map_err(|e| Error::Store(e.to_string()))?;
        Ok(MerkBackend { merk })
    }

    pub fn root_hash(&self) -> [u8; 32] {
        self.merk.root_hash()
    }

    /// Builds a Merkle proof covering every key touched by `query`'s
    /// accesses, the bytes `abci::query` hands back as `ResponseQuery::value`.
    pub fn prove(&self, keys: Vec<Vec<u8>>) -> Result<Vec<u8>> {
        let mut query = Query::new();
        for key in keys {
            query.insert_key(key);
        }
        self.merk.prove(query).map_err(|e| Error::Store(e.to_string()))
    }

    pub fn commit(&mut self) -> Result<()> {
        self.merk.commit(&[]).map_err(|e| Error::Store(e.to_string()))
    }
}

impl Read for MerkBackend {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.merk.get(key).map_err(|e| Error::Store(e.to_string()))
    }

    fn get_next(&self, key: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        Ok(self
            .iter_all()?
            .into_iter()
            .find(|(k, _)| k.as_slice() > key))
    }

    fn get_prev(&self, key: Option<&[u8]>) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        Ok(self
            .iter_all()?
            .into_iter()
            .rev()
            .find(|(k, _)| key.map(|b| k.as_slice() < b).unwrap_or(true)))
    }
}

impl Write for MerkBackend {
    fn put(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        self.merk.apply(&[(key, Op::Put(value))]).map_err(|e| Error::Store(e.to_string()))
    }

    fn delete(&mut self, key: &[u8]) -> Result<()> {
        self.merk.apply(&[(key.to_vec(), Op::Delete)]).map_err(|e| Error::Store(e.to_string()))
    }
}

impl BackingIter for MerkBackend {
    /// Full-tree walk via `merk`'s raw iterator. Adequate for the single
    /// validator-node scale this crate targets; a production-scale
    /// deployment would push `get_next`/`get_prev` down into `merk`'s own
    /// ordered cursor instead of materializing every entry.
    fn iter_all(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut out = vec![];
        let mut iter = self.merk.raw_iter();
        iter.seek_to_first();
        while iter.valid() {
            if let (Some(k), Some(v)) = (iter.key(), iter.value()) {
                out.push((k.to_vec(), v.to_vec()));
            }
            iter.next();
        }
        Ok(out)
    }

    fn commit(&mut self) -> Result<()> {
        MerkBackend::commit(self)
    }

    fn root_hash(&self) -> Option<[u8; 32]> {
        Some(MerkBackend::root_hash(self))
    }

    fn prove(&self, keys: Vec<Vec<u8>>) -> Result<Option<Vec<u8>>> {
        MerkBackend::prove(self, keys).map(Some)
    }
}
