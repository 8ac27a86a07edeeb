// plugin_api/src/lib.rs
//
// C layout of the authorization plugin ABI. Both sides of the boundary
// (the plugin in plugin_core and the host double in engine_core) build on
// these definitions, so nothing here may carry Rust-only types.

use libc::{c_char, c_void, size_t};

pub type OSStatus = i32;

pub const ERR_AUTHORIZATION_SUCCESS: OSStatus = 0;
pub const ERR_SEC_PARAM: OSStatus = -50;
pub const ERR_AUTHORIZATION_INVALID_SET: OSStatus = -60001;
pub const ERR_AUTHORIZATION_INVALID_REF: OSStatus = -60002;
pub const ERR_AUTHORIZATION_INVALID_TAG: OSStatus = -60003;
pub const ERR_AUTHORIZATION_INVALID_POINTER: OSStatus = -60004;
pub const ERR_AUTHORIZATION_DENIED: OSStatus = -60005;
pub const ERR_AUTHORIZATION_CANCELED: OSStatus = -60006;
pub const ERR_AUTHORIZATION_INTERACTION_NOT_ALLOWED: OSStatus = -60007;
pub const ERR_AUTHORIZATION_INTERNAL: OSStatus = -60008;

/// Version of the dispatch table this plugin hands back to the host.
pub const PLUGIN_INTERFACE_VERSION: u32 = 0;

/// Highest callback table version whose layout is described below.
pub const CALLBACKS_VERSION: u32 = 4;

/// Opaque session reference owned by the host.
pub type AuthorizationEngineRef = *mut c_void;
/// Opaque plugin reference handed out by the plugin.
pub type AuthorizationPluginRef = *mut c_void;
/// Opaque mechanism reference handed out by the plugin.
pub type AuthorizationMechanismRef = *mut c_void;
/// NUL-terminated mechanism id such as `Check,privileged`.
pub type AuthorizationMechanismId = *const c_char;
/// NUL-terminated context or hint key.
pub type AuthorizationString = *const c_char;
pub type AuthorizationSessionId = *mut c_void;

pub type AuthorizationContextFlags = u32;

/// The value may be read back by other mechanisms.
pub const CONTEXT_FLAG_EXTRACTABLE: AuthorizationContextFlags = 1 << 0;
/// The value must not be persisted by the host.
pub const CONTEXT_FLAG_VOLATILE: AuthorizationContextFlags = 1 << 1;
/// The value survives a failed evaluation of the right.
pub const CONTEXT_FLAG_STICKY: AuthorizationContextFlags = 1 << 2;

/// Result a mechanism reports for its step in the chain.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationResult {
    Allow = 0,
    Deny = 1,
    Undefined = 2,
    UserCanceled = 3,
}

impl AuthorizationResult {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(AuthorizationResult::Allow),
            1 => Some(AuthorizationResult::Deny),
            2 => Some(AuthorizationResult::Undefined),
            3 => Some(AuthorizationResult::UserCanceled),
            _ => None,
        }
    }
}

/// Length-prefixed byte buffer used for every context and hint value.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct AuthorizationValue {
    pub length: size_t,
    pub data: *mut c_void,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct AuthorizationValueVector {
    pub count: u32,
    pub values: *mut AuthorizationValue,
}

/// Callback table supplied by the host in `AuthorizationPluginCreate`.
///
/// Entries past `get_session_id` only exist when `version` is high enough,
/// which is why they are optional.
#[repr(C)]
pub struct AuthorizationCallbacks {
    pub version: u32,
    pub set_result:
        unsafe extern "C" fn(engine: AuthorizationEngineRef, result: AuthorizationResult) -> OSStatus,
    pub request_interrupt: unsafe extern "C" fn(engine: AuthorizationEngineRef) -> OSStatus,
    pub did_deactivate: unsafe extern "C" fn(engine: AuthorizationEngineRef) -> OSStatus,
    pub get_context_value: unsafe extern "C" fn(
        engine: AuthorizationEngineRef,
        key: AuthorizationString,
        out_flags: *mut AuthorizationContextFlags,
        out_value: *mut *const AuthorizationValue,
    ) -> OSStatus,
    pub set_context_value: unsafe extern "C" fn(
        engine: AuthorizationEngineRef,
        key: AuthorizationString,
        flags: AuthorizationContextFlags,
        value: *const AuthorizationValue,
    ) -> OSStatus,
    pub get_hint_value: unsafe extern "C" fn(
        engine: AuthorizationEngineRef,
        key: AuthorizationString,
        out_value: *mut *const AuthorizationValue,
    ) -> OSStatus,
    pub set_hint_value: unsafe extern "C" fn(
        engine: AuthorizationEngineRef,
        key: AuthorizationString,
        value: *const AuthorizationValue,
    ) -> OSStatus,
    pub get_arguments: unsafe extern "C" fn(
        engine: AuthorizationEngineRef,
        out_arguments: *mut *const AuthorizationValueVector,
    ) -> OSStatus,
    pub get_session_id: unsafe extern "C" fn(
        engine: AuthorizationEngineRef,
        out_session: *mut AuthorizationSessionId,
    ) -> OSStatus,
    pub get_immutable_hint_value: Option<
        unsafe extern "C" fn(
            engine: AuthorizationEngineRef,
            key: AuthorizationString,
            out_value: *mut *const AuthorizationValue,
        ) -> OSStatus,
    >,
    pub get_la_context:
        Option<unsafe extern "C" fn(engine: AuthorizationEngineRef, out: *mut *mut c_void) -> OSStatus>,
    pub get_token_identities: Option<
        unsafe extern "C" fn(engine: AuthorizationEngineRef, context: *mut c_void, out: *mut *mut c_void) -> OSStatus,
    >,
    pub get_tk_token_watcher:
        Option<unsafe extern "C" fn(engine: AuthorizationEngineRef, out: *mut *mut c_void) -> OSStatus>,
    pub remove_hint_value:
        Option<unsafe extern "C" fn(engine: AuthorizationEngineRef, key: AuthorizationString) -> OSStatus>,
    pub remove_context_value:
        Option<unsafe extern "C" fn(engine: AuthorizationEngineRef, key: AuthorizationString) -> OSStatus>,
}

/// Dispatch table the plugin returns to the host.
#[repr(C)]
pub struct AuthorizationPluginInterface {
    pub version: u32,
    pub plugin_destroy: unsafe extern "C" fn(plugin: AuthorizationPluginRef) -> OSStatus,
    pub mechanism_create: unsafe extern "C" fn(
        plugin: AuthorizationPluginRef,
        engine: AuthorizationEngineRef,
        mechanism_id: AuthorizationMechanismId,
        out_mechanism: *mut AuthorizationMechanismRef,
    ) -> OSStatus,
    pub mechanism_invoke: unsafe extern "C" fn(mechanism: AuthorizationMechanismRef) -> OSStatus,
    pub mechanism_deactivate: unsafe extern "C" fn(mechanism: AuthorizationMechanismRef) -> OSStatus,
    pub mechanism_destroy: unsafe extern "C" fn(mechanism: AuthorizationMechanismRef) -> OSStatus,
}

/// Signature of the symbol every plugin bundle exports.
pub type AuthorizationPluginCreateFn = unsafe extern "C" fn(
    callbacks: *const AuthorizationCallbacks,
    out_plugin: *mut AuthorizationPluginRef,
    out_plugin_interface: *mut *const AuthorizationPluginInterface,
) -> OSStatus;

/// Exported symbol name looked up by hosts.
pub const PLUGIN_CREATE_SYMBOL: &[u8] = b"AuthorizationPluginCreate";
