use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, DeriveInput};

use crate::utils::named_fields;

/// A field tagged `#[key]` participates, in declaration order, in the
/// entry's composite key; untagged fields are carried only in the encoded
/// value.
pub fn derive(item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as DeriveInput);
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();
    let fields = named_fields(&input);

    let key_fields: Vec<_> = fields
        .iter()
        .filter(|f| f.attrs.iter().any(|a| a.path.is_ident("key")))
        .collect();

    let key_names: Vec<_> = key_fields.iter().map(|f| f.ident.clone().unwrap()).collect();

    let expanded = quote! {
        impl #impl_generics ::chainkit::collections::Entry for #name #ty_generics #where_clause {
            fn into_entry(self) -> ::chainkit::Result<Vec<u8>> {
                let mut bytes = Vec::new();
                #(
                    bytes.extend_from_slice(&::chainkit::encoding::Encode::encode(&self.#key_names)?);
                )*
                Ok(bytes)
            }
        }
    };

    expanded.into()
}
