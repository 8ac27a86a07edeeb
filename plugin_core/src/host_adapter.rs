//! Typed access to one session's context and hints.

use std::sync::Arc;

use plugin_api::{AuthorizationResult, CONTEXT_FLAG_EXTRACTABLE, CONTEXT_FLAG_VOLATILE};
use zeroize::Zeroizing;

use crate::context_keys::{self, PASSWORD, UID, USERNAME};
use crate::credential::Credential;
use crate::error::CallbackError;
use crate::host_callbacks::{EngineRef, HostCallbacks};

/// What a mechanism reports for its step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Allow,
    Deny,
    UserCanceled,
    /// The mechanism has no opinion; reported as `Undefined`.
    Ignore,
}

impl Outcome {
    pub fn to_result(self) -> AuthorizationResult {
        match self {
            Outcome::Allow => AuthorizationResult::Allow,
            Outcome::Deny => AuthorizationResult::Deny,
            Outcome::UserCanceled => AuthorizationResult::UserCanceled,
            Outcome::Ignore => AuthorizationResult::Undefined,
        }
    }
}

/// A session's engine reference bound to the plugin's host callbacks.
#[derive(Clone)]
pub struct HostAdapter {
    callbacks: Arc<dyn HostCallbacks>,
    engine: EngineRef,
}

impl HostAdapter {
    pub fn new(callbacks: Arc<dyn HostCallbacks>, engine: EngineRef) -> Self {
        HostAdapter { callbacks, engine }
    }

    pub fn engine(&self) -> EngineRef {
        self.engine
    }

    pub fn context_string(&self, key: &str) -> Option<String> {
        let value = self.callbacks.get_context_value(self.engine, key)?;
        context_keys::decode_string(&value.data).map(str::to_string)
    }

    /// Like [`HostAdapter::context_string`], for values that must be wiped.
    pub fn context_secret(&self, key: &str) -> Option<Zeroizing<String>> {
        let value = self.callbacks.get_context_value(self.engine, key)?;
        context_keys::decode_string(&value.data).map(|s| Zeroizing::new(s.to_string()))
    }

    pub fn context_uid(&self) -> Option<u32> {
        let value = self.callbacks.get_context_value(self.engine, UID)?;
        context_keys::decode_uid(&value.data)
    }

    pub fn hint_string(&self, key: &str) -> Option<String> {
        let value = self.callbacks.get_hint_value(self.engine, key)?;
        context_keys::decode_string(&value).map(str::to_string)
    }

    pub fn hint_secret(&self, key: &str) -> Option<Zeroizing<String>> {
        let value = self.callbacks.get_hint_value(self.engine, key)?;
        context_keys::decode_string(&value).map(|s| Zeroizing::new(s.to_string()))
    }

    pub fn hint_flag(&self, key: &str) -> Option<bool> {
        let value = self.callbacks.get_hint_value(self.engine, key)?;
        context_keys::decode_flag(&value)
    }

    pub fn set_hint_string(&self, key: &str, value: &str) -> Result<(), CallbackError> {
        self.callbacks
            .set_hint_value(self.engine, key, &context_keys::encode_string(value))
    }

    pub fn set_hint_flag(&self, key: &str, value: bool) -> Result<(), CallbackError> {
        self.callbacks
            .set_hint_value(self.engine, key, &context_keys::encode_flag(value))
    }

    /// The username/password pair currently in the context, if both exist
    /// and the username is not empty. The password may be empty.
    pub fn credential(&self) -> Option<Credential> {
        let username = self.context_string(USERNAME).filter(|u| !u.is_empty())?;
        let mut password = self.context_secret(PASSWORD)?;
        Some(Credential::new(username, std::mem::take(&mut *password)))
    }

    /// Publish an accepted credential: username and uid extractable, the
    /// password volatile so the host never persists it.
    pub fn publish_credential(&self, username: &str, password: &str, uid: u32) -> Result<(), CallbackError> {
        self.callbacks.set_context_value(
            self.engine,
            USERNAME,
            CONTEXT_FLAG_EXTRACTABLE,
            &context_keys::encode_string(username),
        )?;

        let password = Zeroizing::new(context_keys::encode_string(password));
        self.callbacks.set_context_value(
            self.engine,
            PASSWORD,
            CONTEXT_FLAG_EXTRACTABLE | CONTEXT_FLAG_VOLATILE,
            &password,
        )?;

        self.callbacks.set_context_value(
            self.engine,
            UID,
            CONTEXT_FLAG_EXTRACTABLE,
            &context_keys::encode_uid(uid),
        )
    }

    pub fn signal_result(&self, outcome: Outcome) -> Result<(), CallbackError> {
        liblogger::log_debug!(&format!("engine {}: SetResult({:?})", self.engine, outcome));
        self.callbacks.set_result(self.engine, outcome.to_result())
    }

    pub fn signal_did_deactivate(&self) -> Result<(), CallbackError> {
        liblogger::log_debug!(&format!("engine {}: DidDeactivate", self.engine));
        self.callbacks.did_deactivate(self.engine)
    }
}
