use thiserror::Error;

/// The crate-wide error type.
///
/// Variants are grouped by the subsystem that raised them rather than by
/// HTTP-style status code: nothing outside this crate inspects which variant
/// an `Err` carries, so a message string is enough. See `DESIGN.md` for why
/// this is flatter than a typical Cosmos-SDK `codespace`/`code` pair.
#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Coins(String),

    #[error("{0}")]
    Governance(String),

    #[error("{0}")]
    App(String),

    #[error("{0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Encoding error: {0}")]
    Encoding(#[from] ed::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
