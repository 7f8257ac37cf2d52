use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, DeriveInput};

pub fn derive(item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as DeriveInput);
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let expanded = quote! {
        impl #impl_generics ::chainkit::query::Query for #name #ty_generics #where_clause {
            type Query = ();

            fn query(&self, _query: Self::Query) -> ::chainkit::Result<()> {
                Ok(())
            }
        }
    };

    expanded.into()
}
