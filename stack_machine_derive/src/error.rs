//! `#[derive(Error)]` for the workspace's error enums.
//!
//! Expands an enum whose variants carry `#[error("...")]` attributes into
//! `Display` and `std::error::Error` implementations. Message strings use
//! the standard format syntax: named fields are captured implicitly
//! (`{name}`), tuple fields are addressed positionally (`{0}`).
//!
//! ```ignore
//! use stack_machine_derive::Error;
//!
//! #[derive(Debug, Error)]
//! enum ImageError {
//!     #[error("truncated at byte {offset}")]
//!     Truncated { offset: usize },
//!     #[error("bad magic: {0}")]
//!     BadMagic(u8),
//!     #[error("empty image")]
//!     Empty,
//! }
//! ```
//!
//! Only enums are accepted, and every field of a variant must appear in
//! its message.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{Data, DeriveInput, Fields, LitStr, Variant, parse_macro_input};

pub fn derive_error(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand(&input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn expand(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let Data::Enum(data) = &input.data else {
        return Err(syn::Error::new_spanned(
            input,
            "#[derive(Error)] expects an enum",
        ));
    };

    let arms = data
        .variants
        .iter()
        .map(display_arm)
        .collect::<syn::Result<Vec<_>>>()?;

    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    Ok(quote! {
        impl #impl_generics ::std::fmt::Display for #name #ty_generics #where_clause {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                match self {
                    #(#arms)*
                }
            }
        }

        impl #impl_generics ::std::error::Error for #name #ty_generics #where_clause {}
    })
}

/// Builds the `match` arm that renders one variant through its message.
fn display_arm(variant: &Variant) -> syn::Result<TokenStream2> {
    let ident = &variant.ident;
    let message = message_of(variant)?;

    Ok(match &variant.fields {
        Fields::Unit => quote! {
            Self::#ident => write!(f, #message),
        },
        // Destructuring puts the fields in scope, so the message string
        // reaches them with ordinary `{field}` captures.
        Fields::Named(fields) => {
            let bindings: Vec<_> = fields.named.iter().map(|field| &field.ident).collect();
            quote! {
                Self::#ident { #(#bindings),* } => write!(f, #message),
            }
        }
        // Tuple fields are handed to `write!` in order, so `{0}`, `{1}`
        // address them directly.
        Fields::Unnamed(fields) => {
            let bindings: Vec<_> = (0..fields.unnamed.len())
                .map(|position| format_ident!("v{position}"))
                .collect();
            quote! {
                Self::#ident(#(#bindings),*) => write!(f, #message, #(#bindings),*),
            }
        }
    })
}

/// Pulls the message literal out of the variant's `#[error("...")]`
/// attribute.
fn message_of(variant: &Variant) -> syn::Result<LitStr> {
    for attr in &variant.attrs {
        if attr.path().is_ident("error") {
            return attr.parse_args::<LitStr>().map_err(|_| {
                syn::Error::new_spanned(
                    attr,
                    "expected a format string, as in #[error(\"duplicate label: {name}\")]",
                )
            });
        }
    }
    Err(syn::Error::new_spanned(
        variant,
        "every variant needs an #[error(\"...\")] message",
    ))
}
