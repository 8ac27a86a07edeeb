//! The capability set the host hands us at plugin creation.
//!
//! Mechanism code only sees the [`HostCallbacks`] trait. [`CallbackTable`]
//! implements it over the raw C table; the `tests` feature adds an
//! in-memory implementation.

use std::ffi::CString;
use std::fmt;
use std::ptr::{self, NonNull};

use libc::c_void;
use plugin_api::{
    AuthorizationCallbacks, AuthorizationContextFlags, AuthorizationEngineRef,
    AuthorizationResult, AuthorizationValue, ERR_AUTHORIZATION_SUCCESS,
};
use zeroize::Zeroizing;

use crate::error::CallbackError;

/// The host's reference to one evaluation session. Passed through opaquely.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct EngineRef(usize);

impl EngineRef {
    pub fn from_raw(raw: AuthorizationEngineRef) -> Self {
        EngineRef(raw as usize)
    }

    pub fn as_raw(self) -> AuthorizationEngineRef {
        self.0 as *mut c_void
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for EngineRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EngineRef({:#x})", self.0)
    }
}

impl fmt::Display for EngineRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// A context value copied out of the host. The copy is wiped when dropped.
#[derive(Clone)]
pub struct ContextValue {
    pub flags: AuthorizationContextFlags,
    pub data: Zeroizing<Vec<u8>>,
}

impl fmt::Debug for ContextValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextValue")
            .field("flags", &self.flags)
            .field("len", &self.data.len())
            .finish()
    }
}

/// Operations the host provides for a session.
///
/// Reads return `None` whenever the host does not produce a value; the
/// host's status for a failed read carries no further meaning.
pub trait HostCallbacks: Send + Sync {
    fn set_result(&self, engine: EngineRef, result: AuthorizationResult) -> Result<(), CallbackError>;

    fn did_deactivate(&self, engine: EngineRef) -> Result<(), CallbackError>;

    fn get_context_value(&self, engine: EngineRef, key: &str) -> Option<ContextValue>;

    fn set_context_value(
        &self,
        engine: EngineRef,
        key: &str,
        flags: AuthorizationContextFlags,
        value: &[u8],
    ) -> Result<(), CallbackError>;

    fn get_hint_value(&self, engine: EngineRef, key: &str) -> Option<Zeroizing<Vec<u8>>>;

    fn set_hint_value(&self, engine: EngineRef, key: &str, value: &[u8]) -> Result<(), CallbackError>;
}

/// [`HostCallbacks`] over the table passed to `AuthorizationPluginCreate`.
pub struct CallbackTable {
    table: NonNull<AuthorizationCallbacks>,
}

// The host keeps the table alive and unchanged for the life of the plugin,
// and its entries may be called from any thread.
unsafe impl Send for CallbackTable {}
unsafe impl Sync for CallbackTable {}

impl CallbackTable {
    /// # Safety
    ///
    /// `raw` must be null or point to a callback table that outlives the
    /// returned value.
    pub unsafe fn from_raw(raw: *const AuthorizationCallbacks) -> Option<Self> {
        NonNull::new(raw as *mut AuthorizationCallbacks).map(|table| CallbackTable { table })
    }

    pub fn version(&self) -> u32 {
        self.callbacks().version
    }

    fn callbacks(&self) -> &AuthorizationCallbacks {
        // Valid per the contract of `from_raw`.
        unsafe { self.table.as_ref() }
    }

    fn key(key: &str) -> Result<CString, CallbackError> {
        CString::new(key).map_err(|_| CallbackError::InvalidKey(key.to_string()))
    }

    fn check(callback: &'static str, status: i32) -> Result<(), CallbackError> {
        if status == ERR_AUTHORIZATION_SUCCESS {
            Ok(())
        } else {
            Err(CallbackError::Host { callback, status })
        }
    }

    /// Copy a host-owned value. The host's buffer stays with the host.
    unsafe fn copy_value(value: *const AuthorizationValue) -> Option<Zeroizing<Vec<u8>>> {
        if value.is_null() {
            return None;
        }
        let value = &*value;
        if value.length == 0 {
            return Some(Zeroizing::new(Vec::new()));
        }
        if value.data.is_null() {
            return None;
        }
        let bytes = std::slice::from_raw_parts(value.data as *const u8, value.length);
        Some(Zeroizing::new(bytes.to_vec()))
    }

    fn borrowed_value(value: &[u8]) -> AuthorizationValue {
        AuthorizationValue {
            length: value.len(),
            data: value.as_ptr() as *mut c_void,
        }
    }
}

impl HostCallbacks for CallbackTable {
    fn set_result(&self, engine: EngineRef, result: AuthorizationResult) -> Result<(), CallbackError> {
        let status = unsafe { (self.callbacks().set_result)(engine.as_raw(), result) };
        Self::check("SetResult", status)
    }

    fn did_deactivate(&self, engine: EngineRef) -> Result<(), CallbackError> {
        let status = unsafe { (self.callbacks().did_deactivate)(engine.as_raw()) };
        Self::check("DidDeactivate", status)
    }

    fn get_context_value(&self, engine: EngineRef, key: &str) -> Option<ContextValue> {
        let key = Self::key(key).ok()?;
        let mut flags: AuthorizationContextFlags = 0;
        let mut value: *const AuthorizationValue = ptr::null();
        let status = unsafe {
            (self.callbacks().get_context_value)(engine.as_raw(), key.as_ptr(), &mut flags, &mut value)
        };
        if status != ERR_AUTHORIZATION_SUCCESS {
            return None;
        }
        let data = unsafe { Self::copy_value(value) }?;
        Some(ContextValue { flags, data })
    }

    fn set_context_value(
        &self,
        engine: EngineRef,
        key: &str,
        flags: AuthorizationContextFlags,
        value: &[u8],
    ) -> Result<(), CallbackError> {
        let key = Self::key(key)?;
        let value = Self::borrowed_value(value);
        let status = unsafe {
            (self.callbacks().set_context_value)(engine.as_raw(), key.as_ptr(), flags, &value)
        };
        Self::check("SetContextValue", status)
    }

    fn get_hint_value(&self, engine: EngineRef, key: &str) -> Option<Zeroizing<Vec<u8>>> {
        let key = Self::key(key).ok()?;
        let mut value: *const AuthorizationValue = ptr::null();
        let status =
            unsafe { (self.callbacks().get_hint_value)(engine.as_raw(), key.as_ptr(), &mut value) };
        if status != ERR_AUTHORIZATION_SUCCESS {
            return None;
        }
        unsafe { Self::copy_value(value) }
    }

    fn set_hint_value(&self, engine: EngineRef, key: &str, value: &[u8]) -> Result<(), CallbackError> {
        let key = Self::key(key)?;
        let value = Self::borrowed_value(value);
        let status =
            unsafe { (self.callbacks().set_hint_value)(engine.as_raw(), key.as_ptr(), &value) };
        Self::check("SetHintValue", status)
    }
}
