use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{
    parse::{Parse, ParseStream},
    punctuated::Punctuated,
    token::Comma,
    Expr, ItemFn, Meta,
};

/// Helper function to get function name as string
pub fn get_fn_name(func: &ItemFn) -> String {
    func.sig.ident.to_string()
}

/// Arguments of `#[status_boundary(...)]`.
///
/// `panic = <expr>` overrides the status returned when the body panics.
/// `quiet` drops the ENTRY/EXIT debug lines, for entry points the host calls
/// in tight loops.
#[derive(Default)]
pub struct BoundaryArgs {
    pub panic_status: Option<Expr>,
    pub quiet: bool,
}

impl Parse for BoundaryArgs {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let mut args = BoundaryArgs::default();
        if input.is_empty() {
            return Ok(args);
        }

        for meta in Punctuated::<Meta, Comma>::parse_terminated(input)? {
            match meta {
                Meta::NameValue(nv) if nv.path.is_ident("panic") => {
                    args.panic_status = Some(nv.value);
                }
                Meta::Path(path) if path.is_ident("quiet") => {
                    args.quiet = true;
                }
                other => {
                    return Err(syn::Error::new_spanned(
                        other,
                        "expected `panic = <status>` or `quiet`",
                    ));
                }
            }
        }

        Ok(args)
    }
}

/// Tokens turning a `catch_unwind` payload named `panic_err` into a String.
pub fn panic_message() -> TokenStream2 {
    quote! {
        if let Some(s) = panic_err.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_err.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        }
    }
}
