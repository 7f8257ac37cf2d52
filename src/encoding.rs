//! Canonical binary encoding, re-exported from the `ed` crate.
//!
//! `ed::Encode`/`ed::Decode` give every on-chain type a canonical byte
//! representation with no padding ambiguity — the same representation is
//! used for store keys/values and for wire-format messages, so two
//! semantically-equal values always round-trip to the same bytes.
pub use ed::{Decode, Encode, Error, Result};

/// Marker for types whose encoding is self-delimiting, i.e. decoding one
/// value from a byte stream never needs to know how many bytes follow.
/// `Vec<T>`/`Deque<T>` encodings rely on `T: Terminated` to know they can
/// decode a sequence of `T` without a length prefix between entries.
pub trait Terminated {}

macro_rules! terminated_impl {
    ($ty:ty) => {
        impl Terminated for $ty {}
    };
}

terminated_impl!(());
terminated_impl!(bool);
terminated_impl!(u8);
terminated_impl!(u16);
terminated_impl!(u32);
terminated_impl!(u64);
terminated_impl!(u128);
terminated_impl!(i8);
terminated_impl!(i16);
terminated_impl!(i32);
terminated_impl!(i64);
terminated_impl!(i128);
terminated_impl!([u8; 20]);
terminated_impl!([u8; 32]);
