//! Store-backed collection types shared by every application module.

pub mod deque;
pub mod entry_map;
pub mod map;
pub mod pool;

pub use deque::Deque;
pub use entry_map::{Entry, EntryMap};
pub use map::Map;
pub use pool::Pool;
