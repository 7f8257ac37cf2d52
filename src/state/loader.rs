use super::State;
use crate::store::Store;
use crate::Result;

/// Assigns each attached child a sequential one-byte store prefix, in the
/// order `attach_child` is called — this must match the order `Flusher`
/// and `Loader` are driven in, or children silently attach to the wrong
/// subtree.
pub struct Attacher {
    store: Store,
    index: u8,
}

impl Attacher {
    pub fn new(store: Store) -> Self {
        Attacher { store, index: 0 }
    }

    pub fn attach_child<T: State>(mut self, child: &mut T) -> Result<Self> {
        child.attach(self.store.sub(&[self.index]))?;
        self.index += 1;
        Ok(self)
    }
}

/// Writes a one-byte version tag followed by each child's flushed bytes, in
/// call order.
pub struct Flusher<'a, W> {
    out: &'a mut W,
}

impl<'a, W: std::io::Write> Flusher<'a, W> {
    pub fn new(out: &'a mut W) -> Self {
        Flusher { out }
    }

    pub fn version(self, version: u8) -> Result<Self> {
        self.out.write_all(&[version])?;
        Ok(self)
    }

    pub fn flush_child<T: State>(self, child: T) -> Result<Self> {
        child.flush(self.out)?;
        Ok(self)
    }
}

/// The `load`-side counterpart to [`Attacher`]/[`Flusher`]: reads the
/// version tag `Flusher::version` wrote, then reconstructs each child in
/// call order from the same subtree `Attacher` would have assigned it.
pub struct Loader<'a> {
    store: Store,
    bytes: &'a mut &'a [u8],
    index: u8,
}

impl<'a> Loader<'a> {
    pub fn new(store: Store, bytes: &'a mut &'a [u8]) -> Self {
        Loader {
            store,
            bytes,
            index: 0,
        }
    }

    /// Reads and discards the version tag written by `Flusher::version`.
    /// Call once, before the first `load_child`, if the encoding carries a
    /// version byte.
    pub fn skip_version(&mut self) -> Result<u8> {
        let version = self.bytes[0];
        *self.bytes = &self.bytes[1..];
        Ok(version)
    }

    pub fn load_child<T: State>(&mut self) -> Result<T> {
        let sub = self.store.sub(&[self.index]);
        self.index += 1;
        T::load(sub, self.bytes)
    }
}
