//! Helper macro for developing eventum plugins
//!
//! The plugin registry stores constructors as plain function pointers of
//! type `eventum::config::Callback`, whose return value is a pinned, boxed
//! future. Writing that signature out for every plugin is noisy, so this
//! attribute takes an ordinary synchronous constructor of the shape
//! `fn(conf: Value) -> Result<ExecutionType, Error>` and rewrites it in
//! place: the return type becomes the boxed future and the original body
//! is wrapped in `Box::pin(async move { .. })`. Attributes and visibility
//! of the constructor are preserved.
use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, parse_quote, ItemFn};

#[proc_macro_attribute]
pub fn eventum_registration_func(_attr: TokenStream, input: TokenStream) -> TokenStream {
    let func = parse_macro_input!(input as ItemFn);

    if let Some(asyncness) = func.sig.asyncness {
        return syn::Error::new_spanned(
            asyncness,
            "constructor must be a synchronous fn; the macro boxes the future itself",
        )
        .to_compile_error()
        .into();
    }

    let ItemFn {
        attrs,
        vis,
        mut sig,
        block,
    } = func;
    sig.output = parse_quote! {
        -> ::std::pin::Pin<::std::boxed::Box<
            dyn ::core::future::Future<Output = Result<ExecutionType, Error>> + ::core::marker::Send,
        >>
    };

    quote! {
        #(#attrs)*
        #vis #sig {
            ::std::boxed::Box::pin(async move #block)
        }
    }
    .into()
}
