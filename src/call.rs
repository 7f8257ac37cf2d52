use crate::Result;

/// A value that can receive an externally-encoded, state-mutating call.
/// Container types (`Map`, `Deque`, `Pool`) implement this generically by
/// routing to a child's `Call`; application modules route an `App`-level
/// [`crate::msg::Msg`] to the right module by hand in `app::App::handle_msg`
/// rather than via a derived dispatch enum (see `DESIGN.md`).
pub trait Call {
    type Call;

    fn call(&mut self, call: Self::Call) -> Result<()>;
}
