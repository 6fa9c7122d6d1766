use proc_macro2::TokenStream;
use quote::quote;

/// Emits `impl Trait for Input` carrying over the generics and bounds of the input type.
pub(crate) fn impl_for_input(
    input: &syn::DeriveInput,
    trait_path: TokenStream,
    items: TokenStream,
) -> TokenStream {
    let ident = &input.ident;
    let (impl_generics, type_generics, where_clause) = input.generics.split_for_impl();
    quote! {
        impl #impl_generics #trait_path for #ident #type_generics #where_clause {
            #items
        }
    }
}
