//! Cross-version state migration.
//!
//! The reference framework carries a `compat_mode` dual-encoding path so a
//! running chain can migrate its binary state format across upgrades. This
//! crate targets a fresh chain with no prior on-disk format, so the
//! dual-encoding branch itself is dropped (noted in `DESIGN.md`); the
//! `MigrateFrom` trait survives as the seam a future upgrade would hang a
//! real migration off of.
pub trait MigrateFrom<T = Self>: Sized {
    fn migrate_from(other: T) -> crate::Result<Self>;
}

impl<T> MigrateFrom<T> for T {
    fn migrate_from(other: T) -> crate::Result<Self> {
        Ok(other)
    }
}
