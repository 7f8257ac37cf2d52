//! Typed RPC client support.
//!
//! `spec.md` places CLI/REST/broadcast client code out of scope for this
//! crate — only the state machine itself. `Client` survives here as a
//! marker trait so module types stay derivable and symmetrical with the
//! reference framework's `#[derive(Client)]`, for whatever out-of-process
//! client crate eventually wants typed call-builders against these types.
pub trait Client<T> {
    type Client;

    fn create_client(parent: T) -> Self::Client;
}
