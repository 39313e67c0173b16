//! Procedural macros for the stack-machine workspace.
//!
//! Currently a single derive: `#[derive(Error)]`, which turns an enum of
//! `#[error("...")]`-annotated variants into a displayable error type.

mod error;

use proc_macro::TokenStream;

/// Derives `Display` and `std::error::Error` from `#[error("...")]`
/// variant messages.
#[proc_macro_derive(Error, attributes(error))]
pub fn derive_error(input: TokenStream) -> TokenStream {
    error::derive_error(input)
}
