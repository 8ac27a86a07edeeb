//! In-process stand-in for the authorization host.
//!
//! Each [`FakeEngine`] is one evaluation session. Its context and hints live
//! in a process-wide table keyed by the engine reference, which is what the
//! C callbacks receive. Everything the plugin reports through `SetResult`,
//! `RequestInterrupt` and `DidDeactivate` is recorded for inspection.

use std::collections::{HashMap, HashSet};
use std::ffi::CStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use libc::{c_char, c_void};
use once_cell::sync::Lazy;
use plugin_api::{
    AuthorizationCallbacks, AuthorizationContextFlags, AuthorizationEngineRef,
    AuthorizationResult, AuthorizationSessionId, AuthorizationString, AuthorizationValue,
    AuthorizationValueVector, OSStatus, CALLBACKS_VERSION, CONTEXT_FLAG_EXTRACTABLE,
    ERR_AUTHORIZATION_INTERNAL, ERR_AUTHORIZATION_INVALID_REF, ERR_AUTHORIZATION_INVALID_SET,
    ERR_AUTHORIZATION_SUCCESS, ERR_SEC_PARAM,
};

/// A value the engine owns. `value` points into `bytes`.
struct StoredValue {
    flags: AuthorizationContextFlags,
    bytes: Box<[u8]>,
    value: Box<AuthorizationValue>,
}

// `value.data` only ever points at `bytes`, which moves with it.
unsafe impl Send for StoredValue {}

impl StoredValue {
    fn new(flags: AuthorizationContextFlags, data: &[u8]) -> Self {
        let mut bytes: Box<[u8]> = data.into();
        let value = Box::new(AuthorizationValue {
            length: bytes.len(),
            data: bytes.as_mut_ptr() as *mut c_void,
        });
        StoredValue { flags, bytes, value }
    }

    unsafe fn from_raw(flags: AuthorizationContextFlags, value: *const AuthorizationValue) -> Option<Self> {
        if value.is_null() {
            return None;
        }
        let value = &*value;
        if value.length == 0 {
            return Some(StoredValue::new(flags, &[]));
        }
        if value.data.is_null() {
            return None;
        }
        let data = std::slice::from_raw_parts(value.data as *const u8, value.length);
        Some(StoredValue::new(flags, data))
    }
}

struct Session {
    context: HashMap<String, StoredValue>,
    hints: HashMap<String, StoredValue>,
    arguments: Box<AuthorizationValueVector>,
    results: Vec<AuthorizationResult>,
    interrupts: usize,
    deactivations: usize,
    failing: HashSet<String>,
}

// `arguments` is an empty vector with a null value pointer.
unsafe impl Send for Session {}

impl Session {
    fn new() -> Self {
        Session {
            context: HashMap::new(),
            hints: HashMap::new(),
            arguments: Box::new(AuthorizationValueVector {
                count: 0,
                values: std::ptr::null_mut(),
            }),
            results: Vec::new(),
            interrupts: 0,
            deactivations: 0,
            failing: HashSet::new(),
        }
    }

    fn fails(&self, callback: &str) -> bool {
        self.failing.contains(callback)
    }
}

static SESSIONS: Lazy<Mutex<HashMap<usize, Session>>> = Lazy::new(|| Mutex::new(HashMap::new()));
static RESULT_SIGNAL: Condvar = Condvar::new();
static NEXT_ENGINE: AtomicUsize = AtomicUsize::new(0x1000);

fn sessions() -> MutexGuard<'static, HashMap<usize, Session>> {
    SESSIONS.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Run `f` on the session behind `engine`, or report an invalid reference.
fn with_session(engine: AuthorizationEngineRef, f: impl FnOnce(&mut Session) -> OSStatus) -> OSStatus {
    match sessions().get_mut(&(engine as usize)) {
        Some(session) => f(session),
        None => ERR_AUTHORIZATION_INVALID_REF,
    }
}

unsafe fn key_str<'a>(key: AuthorizationString) -> Option<&'a str> {
    if key.is_null() {
        return None;
    }
    CStr::from_ptr(key as *const c_char).to_str().ok()
}

static CALLBACKS: AuthorizationCallbacks = AuthorizationCallbacks {
    version: CALLBACKS_VERSION,
    set_result,
    request_interrupt,
    did_deactivate,
    get_context_value,
    set_context_value,
    get_hint_value,
    set_hint_value,
    get_arguments,
    get_session_id,
    get_immutable_hint_value: Some(get_hint_value),
    get_la_context: None,
    get_token_identities: None,
    get_tk_token_watcher: None,
    remove_hint_value: Some(remove_hint_value),
    remove_context_value: Some(remove_context_value),
};

/// The callback table every [`FakeEngine`] session is served through.
pub fn host_callbacks() -> *const AuthorizationCallbacks {
    &CALLBACKS
}

unsafe extern "C" fn set_result(engine: AuthorizationEngineRef, result: AuthorizationResult) -> OSStatus {
    let status = with_session(engine, |s| {
        if s.fails("SetResult") {
            return ERR_AUTHORIZATION_INTERNAL;
        }
        s.results.push(result);
        ERR_AUTHORIZATION_SUCCESS
    });
    RESULT_SIGNAL.notify_all();
    status
}

unsafe extern "C" fn request_interrupt(engine: AuthorizationEngineRef) -> OSStatus {
    with_session(engine, |s| {
        s.interrupts += 1;
        ERR_AUTHORIZATION_SUCCESS
    })
}

unsafe extern "C" fn did_deactivate(engine: AuthorizationEngineRef) -> OSStatus {
    with_session(engine, |s| {
        if s.fails("DidDeactivate") {
            return ERR_AUTHORIZATION_INTERNAL;
        }
        s.deactivations += 1;
        ERR_AUTHORIZATION_SUCCESS
    })
}

unsafe extern "C" fn get_context_value(
    engine: AuthorizationEngineRef,
    key: AuthorizationString,
    out_flags: *mut AuthorizationContextFlags,
    out_value: *mut *const AuthorizationValue,
) -> OSStatus {
    let Some(key) = key_str(key) else {
        return ERR_SEC_PARAM;
    };
    with_session(engine, |s| match s.context.get(key) {
        Some(stored) => {
            if !out_flags.is_null() {
                *out_flags = stored.flags;
            }
            if !out_value.is_null() {
                *out_value = &*stored.value;
            }
            ERR_AUTHORIZATION_SUCCESS
        }
        None => ERR_AUTHORIZATION_INVALID_SET,
    })
}

unsafe extern "C" fn set_context_value(
    engine: AuthorizationEngineRef,
    key: AuthorizationString,
    flags: AuthorizationContextFlags,
    value: *const AuthorizationValue,
) -> OSStatus {
    let (Some(key), Some(stored)) = (key_str(key), StoredValue::from_raw(flags, value)) else {
        return ERR_SEC_PARAM;
    };
    with_session(engine, |s| {
        if s.fails("SetContextValue") {
            return ERR_AUTHORIZATION_INTERNAL;
        }
        s.context.insert(key.to_string(), stored);
        ERR_AUTHORIZATION_SUCCESS
    })
}

unsafe extern "C" fn get_hint_value(
    engine: AuthorizationEngineRef,
    key: AuthorizationString,
    out_value: *mut *const AuthorizationValue,
) -> OSStatus {
    let Some(key) = key_str(key) else {
        return ERR_SEC_PARAM;
    };
    with_session(engine, |s| match s.hints.get(key) {
        Some(stored) => {
            if !out_value.is_null() {
                *out_value = &*stored.value;
            }
            ERR_AUTHORIZATION_SUCCESS
        }
        None => ERR_AUTHORIZATION_INVALID_SET,
    })
}

unsafe extern "C" fn set_hint_value(
    engine: AuthorizationEngineRef,
    key: AuthorizationString,
    value: *const AuthorizationValue,
) -> OSStatus {
    let (Some(key), Some(stored)) = (key_str(key), StoredValue::from_raw(0, value)) else {
        return ERR_SEC_PARAM;
    };
    with_session(engine, |s| {
        if s.fails("SetHintValue") {
            return ERR_AUTHORIZATION_INTERNAL;
        }
        s.hints.insert(key.to_string(), stored);
        ERR_AUTHORIZATION_SUCCESS
    })
}

unsafe extern "C" fn get_arguments(
    engine: AuthorizationEngineRef,
    out_arguments: *mut *const AuthorizationValueVector,
) -> OSStatus {
    if out_arguments.is_null() {
        return ERR_SEC_PARAM;
    }
    with_session(engine, |s| {
        *out_arguments = &*s.arguments;
        ERR_AUTHORIZATION_SUCCESS
    })
}

unsafe extern "C" fn get_session_id(
    engine: AuthorizationEngineRef,
    out_session: *mut AuthorizationSessionId,
) -> OSStatus {
    if out_session.is_null() {
        return ERR_SEC_PARAM;
    }
    with_session(engine, |_| {
        *out_session = engine;
        ERR_AUTHORIZATION_SUCCESS
    })
}

unsafe extern "C" fn remove_hint_value(engine: AuthorizationEngineRef, key: AuthorizationString) -> OSStatus {
    let Some(key) = key_str(key) else {
        return ERR_SEC_PARAM;
    };
    with_session(engine, |s| {
        s.hints.remove(key);
        ERR_AUTHORIZATION_SUCCESS
    })
}

unsafe extern "C" fn remove_context_value(
    engine: AuthorizationEngineRef,
    key: AuthorizationString,
) -> OSStatus {
    let Some(key) = key_str(key) else {
        return ERR_SEC_PARAM;
    };
    with_session(engine, |s| {
        s.context.remove(key);
        ERR_AUTHORIZATION_SUCCESS
    })
}

/// One host evaluation session. Dropping it removes the session; later
/// callbacks for its engine reference report `errAuthorizationInvalidRef`.
pub struct FakeEngine {
    id: usize,
}

impl Default for FakeEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeEngine {
    pub fn new() -> Self {
        let id = NEXT_ENGINE.fetch_add(0x10, Ordering::Relaxed);
        sessions().insert(id, Session::new());
        FakeEngine { id }
    }

    /// The reference to pass to `MechanismCreate`.
    pub fn engine_ref(&self) -> AuthorizationEngineRef {
        self.id as AuthorizationEngineRef
    }

    fn read<R>(&self, f: impl FnOnce(&Session) -> R) -> Option<R> {
        sessions().get(&self.id).map(f)
    }

    fn write(&self, f: impl FnOnce(&mut Session)) {
        if let Some(session) = sessions().get_mut(&self.id) {
            f(session);
        }
    }

    /// Store a context value the way an earlier mechanism would have.
    pub fn set_context(&self, key: &str, flags: AuthorizationContextFlags, value: &[u8]) {
        self.write(|s| {
            s.context.insert(key.to_string(), StoredValue::new(flags, value));
        });
    }

    /// Store a NUL-terminated string in the context, extractable.
    pub fn set_context_str(&self, key: &str, value: &str) {
        let mut bytes = value.as_bytes().to_vec();
        bytes.push(0);
        self.set_context(key, CONTEXT_FLAG_EXTRACTABLE, &bytes);
    }

    pub fn set_hint(&self, key: &str, value: &[u8]) {
        self.write(|s| {
            s.hints.insert(key.to_string(), StoredValue::new(0, value));
        });
    }

    pub fn set_hint_str(&self, key: &str, value: &str) {
        let mut bytes = value.as_bytes().to_vec();
        bytes.push(0);
        self.set_hint(key, &bytes);
    }

    pub fn context(&self, key: &str) -> Option<(AuthorizationContextFlags, Vec<u8>)> {
        self.read(|s| s.context.get(key).map(|v| (v.flags, v.bytes.to_vec())))
            .flatten()
    }

    /// A context string with its trailing NULs removed.
    pub fn context_str(&self, key: &str) -> Option<String> {
        let (_, bytes) = self.context(key)?;
        Some(trim_nuls(&bytes))
    }

    pub fn hint(&self, key: &str) -> Option<Vec<u8>> {
        self.read(|s| s.hints.get(key).map(|v| v.bytes.to_vec())).flatten()
    }

    pub fn hint_str(&self, key: &str) -> Option<String> {
        self.hint(key).map(|bytes| trim_nuls(&bytes))
    }

    pub fn results(&self) -> Vec<AuthorizationResult> {
        self.read(|s| s.results.clone()).unwrap_or_default()
    }

    pub fn last_result(&self) -> Option<AuthorizationResult> {
        self.results().last().copied()
    }

    pub fn deactivations(&self) -> usize {
        self.read(|s| s.deactivations).unwrap_or_default()
    }

    pub fn interrupts(&self) -> usize {
        self.read(|s| s.interrupts).unwrap_or_default()
    }

    /// Make the named callback (`SetResult`, `DidDeactivate`,
    /// `SetContextValue`, `SetHintValue`) fail for this session.
    pub fn fail_callback(&self, callback: &str) {
        self.write(|s| {
            s.failing.insert(callback.to_string());
        });
    }

    /// Block until at least `count` results were reported or `timeout`
    /// passes. Returns whether the count was reached.
    pub fn wait_for_results(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = sessions();
        loop {
            let reported = guard.get(&self.id).map_or(0, |s| s.results.len());
            if reported >= count {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            guard = match RESULT_SIGNAL.wait_timeout(guard, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }
}

impl Drop for FakeEngine {
    fn drop(&mut self) {
        sessions().remove(&self.id);
    }
}

fn trim_nuls(bytes: &[u8]) -> String {
    let end = bytes.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;
    use std::ptr;

    fn callbacks() -> &'static AuthorizationCallbacks {
        unsafe { &*host_callbacks() }
    }

    #[test]
    fn context_values_round_trip_through_the_callbacks() {
        let engine = FakeEngine::new();
        let key = CString::new("username").unwrap();
        let data = b"alice\0";
        let value = AuthorizationValue {
            length: data.len(),
            data: data.as_ptr() as *mut c_void,
        };

        let status = unsafe {
            (callbacks().set_context_value)(engine.engine_ref(), key.as_ptr(), CONTEXT_FLAG_EXTRACTABLE, &value)
        };
        assert_eq!(status, ERR_AUTHORIZATION_SUCCESS);

        let mut flags: AuthorizationContextFlags = 0;
        let mut out: *const AuthorizationValue = ptr::null();
        let status = unsafe {
            (callbacks().get_context_value)(engine.engine_ref(), key.as_ptr(), &mut flags, &mut out)
        };
        assert_eq!(status, ERR_AUTHORIZATION_SUCCESS);
        assert_eq!(flags, CONTEXT_FLAG_EXTRACTABLE);
        let copied = unsafe { std::slice::from_raw_parts((*out).data as *const u8, (*out).length) };
        assert_eq!(copied, data);
        assert_eq!(engine.context_str("username").as_deref(), Some("alice"));
    }

    #[test]
    fn missing_values_are_reported() {
        let engine = FakeEngine::new();
        let key = CString::new("password").unwrap();
        let mut out: *const AuthorizationValue = ptr::null();
        let status = unsafe { (callbacks().get_hint_value)(engine.engine_ref(), key.as_ptr(), &mut out) };
        assert_eq!(status, ERR_AUTHORIZATION_INVALID_SET);
    }

    #[test]
    fn results_and_deactivations_are_recorded() {
        let engine = FakeEngine::new();
        unsafe {
            (callbacks().set_result)(engine.engine_ref(), AuthorizationResult::UserCanceled);
            (callbacks().did_deactivate)(engine.engine_ref());
        }
        assert_eq!(engine.results(), vec![AuthorizationResult::UserCanceled]);
        assert_eq!(engine.deactivations(), 1);
        assert!(engine.wait_for_results(1, Duration::from_millis(10)));
        assert!(!engine.wait_for_results(2, Duration::from_millis(10)));
    }

    #[test]
    fn dropped_session_is_an_invalid_reference() {
        let engine = FakeEngine::new();
        let raw = engine.engine_ref();
        drop(engine);
        let status = unsafe { (callbacks().set_result)(raw, AuthorizationResult::Allow) };
        assert_eq!(status, ERR_AUTHORIZATION_INVALID_REF);
    }

    #[test]
    fn injected_failures_surface_as_errors() {
        let engine = FakeEngine::new();
        engine.fail_callback("SetResult");
        let status = unsafe { (callbacks().set_result)(engine.engine_ref(), AuthorizationResult::Allow) };
        assert_eq!(status, ERR_AUTHORIZATION_INTERNAL);
        assert!(engine.results().is_empty());
    }

    #[test]
    fn session_id_is_the_engine_reference() {
        let engine = FakeEngine::new();
        let mut session: AuthorizationSessionId = ptr::null_mut();
        let status = unsafe { (callbacks().get_session_id)(engine.engine_ref(), &mut session) };
        assert_eq!(status, ERR_AUTHORIZATION_SUCCESS);
        assert_eq!(session, engine.engine_ref());
    }

    #[test]
    fn version_four_entries_edit_the_session() {
        let engine = FakeEngine::new();
        engine.set_hint_str("lastUsername", "alice");
        engine.set_context_str("username", "alice");
        let hint = CString::new("lastUsername").unwrap();
        let context = CString::new("username").unwrap();

        let (Some(remove_hint), Some(remove_context)) =
            (callbacks().remove_hint_value, callbacks().remove_context_value)
        else {
            panic!("version 4 table without remove entries");
        };
        unsafe {
            assert_eq!(remove_hint(engine.engine_ref(), hint.as_ptr()), ERR_AUTHORIZATION_SUCCESS);
            assert_eq!(remove_context(engine.engine_ref(), context.as_ptr()), ERR_AUTHORIZATION_SUCCESS);
            assert_eq!((callbacks().request_interrupt)(engine.engine_ref()), ERR_AUTHORIZATION_SUCCESS);
        }
        assert_eq!(engine.hint("lastUsername"), None);
        assert_eq!(engine.context("username"), None);
        assert_eq!(engine.interrupts(), 1);
    }
}
