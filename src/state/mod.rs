//! Typed persistence on top of [`Store`](crate::store::Store).
//!
//! A [`State`] type knows how to attach itself to a store (wiring up any
//! child collections to their own key prefixes), flush its in-memory value
//! to bytes for the parent to persist at the root of its prefix, and load
//! itself back from a store plus the bytes previously flushed there.
//! `#[derive(State)]` generates the three methods below by threading an
//! [`Attacher`]/[`Flusher`]/[`Loader`] through each field in declaration
//! order; hand-written impls exist for leaf types (integers, `bool`, fixed
//! arrays) and for composite collections that need index-specific layout
//! control (`Map`, `Deque`, `EntryMap`, `Pool`).

mod loader;
pub use loader::{Attacher, Flusher, Loader};

use crate::encoding::{Decode, Encode};
use crate::store::Store;
use crate::Result;

pub trait State: Sized {
    /// Wires this value's children up to subtrees of `store`. Leaf types
    /// (ints, decimals, fixed arrays) ignore the store entirely.
    fn attach(&mut self, store: Store) -> Result<()>;

    /// Serializes this value's *own* fields (not the state held in already-
    /// attached child stores, which persist directly through their own
    /// writes) to `out`.
    fn flush<W: std::io::Write>(self, out: &mut W) -> Result<()>;

    /// Reconstructs a value from a store plus the bytes previously written
    /// by `flush`.
    fn load(store: Store, bytes: &mut &[u8]) -> Result<Self>;
}

macro_rules! state_leaf_impl {
    ($ty:ty) => {
        impl State for $ty {
            fn attach(&mut self, _store: Store) -> Result<()> {
                Ok(())
            }

            fn flush<W: std::io::Write>(self, out: &mut W) -> Result<()> {
                out.write_all(&Encode::encode(&self)?)?;
                Ok(())
            }

            fn load(_store: Store, bytes: &mut &[u8]) -> Result<Self> {
                Decode::decode(bytes)
            }
        }
    };
}

state_leaf_impl!(());
state_leaf_impl!(bool);
state_leaf_impl!(u8);
state_leaf_impl!(u16);
state_leaf_impl!(u32);
state_leaf_impl!(u64);
state_leaf_impl!(u128);
state_leaf_impl!(i8);
state_leaf_impl!(i16);
state_leaf_impl!(i32);
state_leaf_impl!(i64);
state_leaf_impl!(i128);
state_leaf_impl!([u8; 20]);
state_leaf_impl!([u8; 32]);

impl State for Vec<u8> {
    fn attach(&mut self, _store: Store) -> Result<()> {
        Ok(())
    }

    fn flush<W: std::io::Write>(self, out: &mut W) -> Result<()> {
        out.write_all(&Encode::encode(&(self.len() as u32))?)?;
        out.write_all(&self)?;
        Ok(())
    }

    fn load(_store: Store, bytes: &mut &[u8]) -> Result<Self> {
        let len = u32::decode(bytes)? as usize;
        let value = bytes[..len].to_vec();
        *bytes = &bytes[len..];
        Ok(value)
    }
}

impl<T: State> State for Option<T> {
    fn attach(&mut self, store: Store) -> Result<()> {
        if let Some(inner) = self {
            inner.attach(store)?;
        }
        Ok(())
    }

    fn flush<W: std::io::Write>(self, out: &mut W) -> Result<()> {
        match self {
            Some(inner) => {
                out.write_all(&[1])?;
                inner.flush(out)
            }
            None => {
                out.write_all(&[0])?;
                Ok(())
            }
        }
    }

    fn load(store: Store, bytes: &mut &[u8]) -> Result<Self> {
        let tag = u8::decode(bytes)?;
        Ok(match tag {
            0 => None,
            _ => Some(T::load(store, bytes)?),
        })
    }
}
