use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, DeriveInput};

use crate::utils::named_fields;

pub fn derive(item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as DeriveInput);
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();
    let fields = named_fields(&input);

    let field_names: Vec<_> = fields.iter().map(|f| f.ident.clone().unwrap()).collect();

    let attach_calls = field_names
        .iter()
        .map(|name| quote! { .attach_child(&mut self.#name)? });
    let flush_calls = field_names
        .iter()
        .map(|name| quote! { .flush_child(self.#name)? });
    let load_calls = field_names
        .iter()
        .map(|name| quote! { #name: loader.load_child()? });

    let expanded = quote! {
        impl #impl_generics ::chainkit::state::State for #name #ty_generics #where_clause {
            fn attach(&mut self, store: ::chainkit::store::Store) -> ::chainkit::Result<()> {
                ::chainkit::state::Attacher::new(store)
                    #(#attach_calls)*;
                Ok(())
            }

            fn flush<W: ::std::io::Write>(self, out: &mut W) -> ::chainkit::Result<()> {
                ::chainkit::state::Flusher::new(out)
                    #(#flush_calls)*;
                Ok(())
            }

            fn load(store: ::chainkit::store::Store, bytes: &mut &[u8]) -> ::chainkit::Result<Self> {
                let mut loader = ::chainkit::state::Loader::new(store.clone(), bytes);
                let mut value = Self {
                    #(#load_calls,)*
                };
                value.attach(store)?;
                Ok(value)
            }
        }
    };

    expanded.into()
}
