//! In-memory stand-ins for the host, the prompt and the user database.
//!
//! Compiled for this crate's tests and, with the `tests` feature, for the
//! tests of plugin crates.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use plugin_api::{AuthorizationContextFlags, AuthorizationResult, CONTEXT_FLAG_EXTRACTABLE};
use zeroize::Zeroizing;

use crate::context_keys;
use crate::credential::Credential;
use crate::credential_collector::{CredentialPrompt, PromptRequest, PromptResponder};
use crate::error::{CallbackError, IdentityError, PromptError};
use crate::host_callbacks::{ContextValue, EngineRef, HostCallbacks};
use crate::identity::{IdentityResolver, UserIdentity};

#[derive(Default)]
struct Session {
    context: HashMap<String, (AuthorizationContextFlags, Vec<u8>)>,
    hints: HashMap<String, Vec<u8>>,
    results: Vec<AuthorizationResult>,
    deactivations: usize,
}

/// [`HostCallbacks`] that keeps every session in memory and records what
/// the plugin reported.
#[derive(Default)]
pub struct RecordingHost {
    sessions: Mutex<HashMap<EngineRef, Session>>,
    failing: Mutex<HashSet<&'static str>>,
    journal: Mutex<Vec<String>>,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_session<R>(&self, engine: EngineRef, f: impl FnOnce(&mut Session) -> R) -> R {
        let mut sessions = self.sessions.lock().unwrap();
        f(sessions.entry(engine).or_default())
    }

    fn record(&self, entry: String) {
        self.journal.lock().unwrap().push(entry);
    }

    /// Every successful write the plugin made, in order, across sessions:
    /// `SetResult(Allow)`, `DidDeactivate`, `SetContext(uid)`, `SetHint(key)`.
    pub fn journal(&self) -> Vec<String> {
        self.journal.lock().unwrap().clone()
    }

    /// Add a marker of the test's own to the journal.
    pub fn note(&self, marker: &str) {
        self.record(format!("<{}>", marker));
    }

    /// Make the named callback (`"SetResult"`, `"SetContextValue"`, ...) fail.
    pub fn fail(&self, callback: &'static str) {
        self.failing.lock().unwrap().insert(callback);
    }

    fn check(&self, callback: &'static str) -> Result<(), CallbackError> {
        if self.failing.lock().unwrap().contains(callback) {
            Err(CallbackError::Host {
                callback,
                status: plugin_api::ERR_AUTHORIZATION_INTERNAL,
            })
        } else {
            Ok(())
        }
    }

    pub fn put_context(&self, engine: EngineRef, key: &str, value: &[u8]) {
        self.with_session(engine, |s| {
            s.context
                .insert(key.to_string(), (CONTEXT_FLAG_EXTRACTABLE, value.to_vec()))
        });
    }

    pub fn put_hint(&self, engine: EngineRef, key: &str, value: &[u8]) {
        self.with_session(engine, |s| s.hints.insert(key.to_string(), value.to_vec()));
    }

    pub fn context(&self, engine: EngineRef, key: &str) -> Option<(AuthorizationContextFlags, Vec<u8>)> {
        self.with_session(engine, |s| s.context.get(key).cloned())
    }

    pub fn context_str(&self, engine: EngineRef, key: &str) -> Option<String> {
        let (_, value) = self.context(engine, key)?;
        context_keys::decode_string(&value).map(str::to_string)
    }

    pub fn hint(&self, engine: EngineRef, key: &str) -> Option<Vec<u8>> {
        self.with_session(engine, |s| s.hints.get(key).cloned())
    }

    pub fn hint_str(&self, engine: EngineRef, key: &str) -> Option<String> {
        let value = self.hint(engine, key)?;
        context_keys::decode_string(&value).map(str::to_string)
    }

    pub fn results(&self, engine: EngineRef) -> Vec<AuthorizationResult> {
        self.with_session(engine, |s| s.results.clone())
    }

    pub fn deactivations(&self, engine: EngineRef) -> usize {
        self.with_session(engine, |s| s.deactivations)
    }
}

impl HostCallbacks for RecordingHost {
    fn set_result(&self, engine: EngineRef, result: AuthorizationResult) -> Result<(), CallbackError> {
        self.check("SetResult")?;
        self.with_session(engine, |s| s.results.push(result));
        self.record(format!("SetResult({:?})", result));
        Ok(())
    }

    fn did_deactivate(&self, engine: EngineRef) -> Result<(), CallbackError> {
        self.check("DidDeactivate")?;
        self.with_session(engine, |s| s.deactivations += 1);
        self.record("DidDeactivate".to_string());
        Ok(())
    }

    fn get_context_value(&self, engine: EngineRef, key: &str) -> Option<ContextValue> {
        let (flags, data) = self.context(engine, key)?;
        Some(ContextValue {
            flags,
            data: Zeroizing::new(data),
        })
    }

    fn set_context_value(
        &self,
        engine: EngineRef,
        key: &str,
        flags: AuthorizationContextFlags,
        value: &[u8],
    ) -> Result<(), CallbackError> {
        self.check("SetContextValue")?;
        self.with_session(engine, |s| s.context.insert(key.to_string(), (flags, value.to_vec())));
        self.record(format!("SetContext({})", key));
        Ok(())
    }

    fn get_hint_value(&self, engine: EngineRef, key: &str) -> Option<Zeroizing<Vec<u8>>> {
        self.hint(engine, key).map(Zeroizing::new)
    }

    fn set_hint_value(&self, engine: EngineRef, key: &str, value: &[u8]) -> Result<(), CallbackError> {
        self.check("SetHintValue")?;
        self.put_hint(engine, key, value);
        self.record(format!("SetHint({})", key));
        Ok(())
    }
}

/// How a [`ScriptedPrompt`] answers.
#[derive(Debug, Clone, Copy)]
pub enum PromptScript {
    /// Answer with this username and password before `present` returns.
    Submit(&'static str, &'static str),
    /// Cancel before `present` returns.
    Cancel,
    /// Fail to present.
    Fail,
    /// Keep the responder until the test answers or the prompt is dismissed.
    Hold,
}

/// What a [`ScriptedPrompt`] was asked to show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresentedRequest {
    pub engine: EngineRef,
    pub username: Option<String>,
    pub username_editable: bool,
    pub had_password_prefill: bool,
    pub retry: bool,
}

pub struct ScriptedPrompt {
    script: Mutex<PromptScript>,
    held: Mutex<Option<PromptResponder>>,
    presented: Mutex<Vec<PresentedRequest>>,
    dismissed: Mutex<Vec<EngineRef>>,
    answers: AtomicUsize,
}

impl ScriptedPrompt {
    pub fn new(script: PromptScript) -> Arc<Self> {
        Arc::new(ScriptedPrompt {
            script: Mutex::new(script),
            held: Mutex::new(None),
            presented: Mutex::new(Vec::new()),
            dismissed: Mutex::new(Vec::new()),
            answers: AtomicUsize::new(0),
        })
    }

    /// Change the answer for later invocations.
    pub fn set_script(&self, script: PromptScript) {
        *self.script.lock().unwrap() = script;
    }

    pub fn presented(&self) -> Vec<PresentedRequest> {
        self.presented.lock().unwrap().clone()
    }

    pub fn dismissed(&self) -> Vec<EngineRef> {
        self.dismissed.lock().unwrap().clone()
    }

    /// Answers given through a responder, held ones included.
    pub fn answers(&self) -> usize {
        self.answers.load(Ordering::SeqCst)
    }

    pub fn is_holding(&self) -> bool {
        self.held.lock().unwrap().is_some()
    }

    /// Answer a held prompt, as a user typing late would.
    pub fn submit_held(&self, username: &str, password: &str) -> bool {
        let held = self.held.lock().unwrap().take();
        match held {
            Some(responder) => {
                self.answers.fetch_add(1, Ordering::SeqCst);
                responder.submit(Credential::new(username, password.to_string()));
                true
            }
            None => false,
        }
    }

    pub fn cancel_held(&self) -> bool {
        let held = self.held.lock().unwrap().take();
        match held {
            Some(responder) => {
                self.answers.fetch_add(1, Ordering::SeqCst);
                responder.cancel();
                true
            }
            None => false,
        }
    }
}

impl CredentialPrompt for ScriptedPrompt {
    fn present(&self, request: PromptRequest, responder: PromptResponder) -> Result<(), PromptError> {
        self.presented.lock().unwrap().push(PresentedRequest {
            engine: request.engine,
            username: request.username.clone(),
            username_editable: request.username_editable,
            had_password_prefill: request.password_prefill.is_some(),
            retry: request.retry,
        });

        let script = *self.script.lock().unwrap();
        match script {
            PromptScript::Submit(username, password) => {
                self.answers.fetch_add(1, Ordering::SeqCst);
                responder.submit(Credential::new(username, password.to_string()));
                Ok(())
            }
            PromptScript::Cancel => {
                self.answers.fetch_add(1, Ordering::SeqCst);
                responder.cancel();
                Ok(())
            }
            PromptScript::Fail => Err(PromptError::Unavailable("scripted failure".to_string())),
            PromptScript::Hold => {
                *self.held.lock().unwrap() = Some(responder);
                Ok(())
            }
        }
    }

    fn dismiss(&self, engine: EngineRef) {
        self.dismissed.lock().unwrap().push(engine);
        let held = {
            let mut held = self.held.lock().unwrap();
            match held.as_ref() {
                Some(responder) if responder.engine() == Some(engine) => held.take(),
                _ => None,
            }
        };
        // Window closed; the dropped responder finds the invocation finished.
        drop(held);
    }
}

/// [`IdentityResolver`] over a fixed table of accounts.
#[derive(Debug, Default, Clone)]
pub struct StaticIdentityResolver {
    users: HashMap<String, u32>,
    broken: bool,
}

impl StaticIdentityResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, name: &str, uid: u32) -> Self {
        self.users.insert(name.to_string(), uid);
        self
    }

    /// Every lookup fails as if the user database were unreachable.
    pub fn broken() -> Self {
        StaticIdentityResolver {
            users: HashMap::new(),
            broken: true,
        }
    }
}

impl IdentityResolver for StaticIdentityResolver {
    fn resolve(&self, username: &str) -> Result<Option<UserIdentity>, IdentityError> {
        if self.broken {
            return Err(IdentityError::Lookup(libc::EIO));
        }
        Ok(self.users.get(username).map(|uid| UserIdentity {
            name: username.to_string(),
            uid: *uid,
        }))
    }
}
