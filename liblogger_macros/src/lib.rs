/*
 * Procedural macros for the plugin's C entry points
 *
 * A panic must never unwind into the authorization host, and every failing
 * status should leave a trace in the log. `#[status_boundary]` gives each
 * `extern "C"` entry point both without repeating the same wrapper by hand.
 */

extern crate proc_macro;

mod macro_utils;

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, parse_quote, ItemFn};

use crate::macro_utils::{get_fn_name, panic_message, BoundaryArgs};

/// Guard an entry point returning an `OSStatus`.
///
/// The body runs under `catch_unwind`. A panic is logged and turned into
/// `errAuthorizationInternal` (or the `panic = ...` status); a non-zero
/// status is logged at warn level together with the entry point name.
///
/// ```ignore
/// #[status_boundary]
/// pub unsafe extern "C" fn mechanism_invoke(mechanism: AuthorizationMechanismRef) -> OSStatus {
///     ...
/// }
/// ```
#[proc_macro_attribute]
pub fn status_boundary(args: TokenStream, input: TokenStream) -> TokenStream {
    let args = parse_macro_input!(args as BoundaryArgs);
    let mut input_fn = parse_macro_input!(input as ItemFn);
    let fn_name = get_fn_name(&input_fn);
    let orig_block = input_fn.block.clone();
    let panic_msg = panic_message();

    let panic_status = args
        .panic_status
        .unwrap_or_else(|| parse_quote!(::plugin_api::ERR_AUTHORIZATION_INTERNAL));

    let entry_log = if args.quiet {
        quote!()
    } else {
        quote!(liblogger::log_debug!(&format!("ENTRY: {}", #fn_name));)
    };
    let exit_log = if args.quiet {
        quote!()
    } else {
        quote!(liblogger::log_debug!(&format!("EXIT: {}", #fn_name));)
    };

    input_fn.block = Box::new(parse_quote!({
        use std::panic::{catch_unwind, AssertUnwindSafe};

        #entry_log
        match catch_unwind(AssertUnwindSafe(|| #orig_block)) {
            Ok(status) => {
                if status != 0 {
                    liblogger::log_warn!(&format!("{} returned status {}", #fn_name, status));
                } else {
                    #exit_log
                }
                status
            }
            Err(panic_err) => {
                let panic_msg: String = { #panic_msg };
                liblogger::log_error!(&format!("{} panicked: {}", #fn_name, panic_msg));
                #panic_status
            }
        }
    }));

    TokenStream::from(quote!(#input_fn))
}
