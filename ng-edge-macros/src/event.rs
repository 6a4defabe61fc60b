use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, DeriveInput};

/// Derives EdgeEvent trait implementation for structs
pub fn derive_edge_event(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = &input.ident;

    let expanded = quote! {
        impl EdgeEvent for #name {}
    };

    TokenStream::from(expanded)
}
