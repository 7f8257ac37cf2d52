use proc_macro::TokenStream;

mod call;
mod entry;
mod next;
mod query;
mod state;
mod utils;

/// Derives [`State`](../chainkit/state/trait.State.html) for a struct by
/// threading `attach`/`flush`/`load` through each field in declaration order.
#[proc_macro_derive(State)]
pub fn derive_state(item: TokenStream) -> TokenStream {
    state::derive(item)
}

/// Derives [`Entry`] for a struct annotated with `#[key]` on one or more
/// fields, producing a fixed-width, lexicographically-ordered key.
#[proc_macro_derive(Entry, attributes(key))]
pub fn derive_entry(item: TokenStream) -> TokenStream {
    entry::derive(item)
}

/// Derives a passthrough [`Query`] impl for structs with no queryable
/// methods of their own (container types compose their children's queries
/// by hand).
#[proc_macro_derive(Query)]
pub fn derive_query(item: TokenStream) -> TokenStream {
    query::derive(item)
}

/// Marks a method as reachable from the query side of the ABCI boundary.
/// A no-op at the token level; the attribute exists so the method is
/// documented and greppable the same way `#[call]` is.
#[proc_macro_attribute]
pub fn query(_args: TokenStream, input: TokenStream) -> TokenStream {
    input
}

/// Derives a passthrough [`Call`] impl, mirroring [`derive_query`].
#[proc_macro_derive(Call)]
pub fn derive_call(item: TokenStream) -> TokenStream {
    call::derive(item)
}

/// Marks a method as reachable from `DeliverTx`. A no-op at the token level.
#[proc_macro_attribute]
pub fn call(_args: TokenStream, input: TokenStream) -> TokenStream {
    input
}

/// Derives [`Next`], giving a type the successor operation needed to define
/// half-open range scans over it as a [`Map`] key.
#[proc_macro_derive(Next)]
pub fn derive_next(item: TokenStream) -> TokenStream {
    next::derive(item)
}
