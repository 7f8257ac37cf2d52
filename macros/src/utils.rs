use syn::{Data, DeriveInput, Fields};

/// Returns the named fields of a struct in declaration order, or panics on
/// anything else the derive macros in this crate don't support.
pub fn named_fields(input: &DeriveInput) -> Vec<&syn::Field> {
    match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => fields.named.iter().collect(),
            _ => panic!("only structs with named fields are supported"),
        },
        _ => panic!("only structs are supported"),
    }
}
