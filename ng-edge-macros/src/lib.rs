mod event;

use proc_macro::TokenStream;

/// Derives the `EdgeEvent` marker trait implementation for structs
///
/// The target struct becomes publishable on the `EdgeEventBus`. The trait
/// must be in scope at the derive site.
#[proc_macro_derive(Event)]
pub fn derive_edge_event(input: TokenStream) -> TokenStream {
    event::derive_edge_event(input)
}
