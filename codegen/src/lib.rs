use proc_macro::TokenStream;

mod component;
mod util;

/// Implements `archstore::comp::Component`.
///
/// Options, inside `#[component(...)]`:
/// - at most one of `tag`, `buffer`, `shared` and `chunk` selects the storage category;
///   the default is a regular per-entity value.
/// - `managed` stores the value in the managed object table instead of the chunk.
/// - `archstore_as(path)` sets the path of the `archstore` crate.
#[proc_macro_derive(Component, attributes(component))]
pub fn component(input: TokenStream) -> TokenStream {
    component::derive(input.into()).unwrap_or_else(|err| err.to_compile_error()).into()
}
