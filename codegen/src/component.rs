use matches2::option_match;
use proc_macro2::{Span, TokenStream};
use quote::quote;
use syn::parse::{Parse, ParseStream};
use syn::punctuated::Punctuated;
use syn::{Error, Result};

use crate::util;

pub(crate) fn derive(input: TokenStream) -> Result<TokenStream> {
    let input: syn::DeriveInput = syn::parse2(input)?;

    let mut options = Vec::new();
    for attr in &input.attrs {
        if attr.path().is_ident("component") {
            let attr: Attr = attr.parse_args()?;
            options.extend(attr.options);
        }
    }

    let crate_name = options
        .iter()
        .find_map(|opt| option_match!(opt, Opt::ArchstoreAs(_, path) => path.clone()))
        .unwrap_or_else(|| quote!(::archstore));

    let mut category: Option<(&syn::Ident, Category)> = None;
    let mut managed = None;
    for opt in &options {
        match opt {
            Opt::Category(name, _) if category.is_some() => {
                return Err(Error::new_spanned(
                    name,
                    "Only one of `tag`, `buffer`, `shared` and `chunk` is allowed",
                ));
            }
            Opt::Category(name, value) => category = Some((name, *value)),
            Opt::Managed(name) => managed = Some(name),
            Opt::ArchstoreAs(..) => {}
        }
    }

    if let (Some(name), Some(_)) = (managed, category) {
        return Err(Error::new_spanned(
            name,
            "`managed` cannot be combined with a storage category",
        ));
    }

    match &input.data {
        syn::Data::Struct(_) | syn::Data::Enum(_) => {}
        syn::Data::Union(_) => {
            return Err(Error::new(
                Span::call_site(),
                "Component can only be derived from structs or enums",
            ))
        }
    }

    let category_variant = match category.map(|(_, category)| category) {
        None => quote!(Regular),
        Some(Category::Tag) => quote!(Tag),
        Some(Category::Buffer) => quote!(Buffer),
        Some(Category::Shared) => quote!(Shared),
        Some(Category::Chunk) => quote!(Chunk),
    };
    let managed = managed.is_some();

    let impl_comp = util::impl_for_input(
        &input,
        quote!(#crate_name::comp::Component),
        quote! {
            const CATEGORY: #crate_name::comp::Category =
                #crate_name::comp::Category::#category_variant;
            const MANAGED: bool = #managed;
        },
    );

    let tag_size_check = match (category, input.generics.params.is_empty()) {
        (Some((_, Category::Tag)), true) => {
            let ident = &input.ident;
            quote! {
                #crate_name::_reexports::static_assertions::assert_eq_size!(#ident, ());
            }
        }
        _ => quote!(),
    };

    Ok(quote! {
        #[automatically_derived]
        #impl_comp

        #tag_size_check
    })
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Category {
    Tag,
    Buffer,
    Shared,
    Chunk,
}

struct Attr {
    options: Punctuated<Opt, syn::Token![,]>,
}

impl Parse for Attr {
    fn parse(input: ParseStream) -> Result<Self> {
        Ok(Attr { options: Punctuated::parse_separated_nonempty(input)? })
    }
}

enum Opt {
    ArchstoreAs(syn::Ident, TokenStream),
    Category(syn::Ident, Category),
    Managed(syn::Ident),
}

impl Parse for Opt {
    fn parse(input: ParseStream) -> Result<Self> {
        let name = input.parse::<syn::Ident>()?;

        let attr = match name.to_string().as_str() {
            "archstore_as" => {
                let inner;
                syn::parenthesized!(inner in input);
                let path = inner.parse()?;
                Opt::ArchstoreAs(name, path)
            }
            "tag" => Opt::Category(name, Category::Tag),
            "buffer" => Opt::Category(name, Category::Buffer),
            "shared" => Opt::Category(name, Category::Shared),
            "chunk" => Opt::Category(name, Category::Chunk),
            "managed" => Opt::Managed(name),
            _ => return Err(Error::new_spanned(&name, "Unknown attribute")),
        };

        Ok(attr)
    }
}
