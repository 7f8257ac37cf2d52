use crate::Result;

/// A value that can answer an externally-encoded, read-only query.
pub trait Query {
    type Query;

    fn query(&self, query: Self::Query) -> Result<()>;
}
