//! Collecting a credential from the user for the interactive mechanism.
//!
//! The collector prepares a [`PromptRequest`] from the session's hints and
//! hands it to a [`CredentialPrompt`] together with a [`PromptResponder`].
//! The prompt answers through the responder either before `present`
//! returns (a modal prompt) or later from another thread. Either way the
//! invocation is finished through its [`Completion`], so a late answer that
//! loses against a deactivation changes nothing.

use std::fmt;
use std::sync::Arc;

use zeroize::Zeroizing;

use crate::completion::Completion;
use crate::context_keys::{LAST_USERNAME_HINT, PASSWORD_HINT, USERNAME};
use crate::credential::Credential;
use crate::error::PromptError;
use crate::host_adapter::{HostAdapter, Outcome};
use crate::host_callbacks::EngineRef;
use crate::identity::IdentityResolver;

/// What the prompt should show.
pub struct PromptRequest {
    pub engine: EngineRef,
    /// Pre-filled username.
    pub username: Option<String>,
    /// False when the username is fixed by an earlier mechanism.
    pub username_editable: bool,
    /// Password left in the hints by a refused attempt. Only set on retry.
    pub password_prefill: Option<Zeroizing<String>>,
    /// An earlier attempt in this session was refused.
    pub retry: bool,
}

impl fmt::Debug for PromptRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PromptRequest")
            .field("engine", &self.engine)
            .field("username", &self.username)
            .field("username_editable", &self.username_editable)
            .field("password_prefill", &self.password_prefill.as_ref().map(|_| "<redacted>"))
            .field("retry", &self.retry)
            .finish()
    }
}

/// A user interface able to ask for a username and password.
pub trait CredentialPrompt: Send + Sync {
    /// Show the prompt. The answer goes through `responder`, now or later.
    /// An error means nothing was shown and the responder was dropped.
    fn present(&self, request: PromptRequest, responder: PromptResponder) -> Result<(), PromptError>;

    /// Take down the prompt shown for `engine`, if any, without answering.
    fn dismiss(&self, engine: EngineRef);
}

/// Single-use channel from the prompt back to the collector.
///
/// Dropping it without answering denies the invocation, unless something
/// else already finished it.
pub struct PromptResponder {
    collector: Option<Arc<CredentialCollector>>,
}

impl PromptResponder {
    pub fn engine(&self) -> Option<EngineRef> {
        self.collector.as_ref().map(|c| c.host.engine())
    }

    /// The user confirmed. `credential` is scrubbed before this returns.
    pub fn submit(mut self, mut credential: Credential) {
        if let Some(collector) = self.collector.take() {
            collector.on_submit(&mut credential);
        }
    }

    /// The user cancelled or closed the prompt.
    pub fn cancel(mut self) {
        if let Some(collector) = self.collector.take() {
            collector.finish(Outcome::UserCanceled);
        }
    }
}

impl Drop for PromptResponder {
    fn drop(&mut self) {
        if let Some(collector) = self.collector.take() {
            collector.finish(Outcome::Deny);
        }
    }
}

impl fmt::Debug for PromptResponder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PromptResponder")
            .field("engine", &self.engine())
            .finish()
    }
}

pub struct CredentialCollector {
    host: HostAdapter,
    completion: Arc<Completion>,
    resolver: Arc<dyn IdentityResolver>,
}

impl CredentialCollector {
    pub fn new(completion: Arc<Completion>, resolver: Arc<dyn IdentityResolver>) -> Arc<Self> {
        Arc::new(CredentialCollector {
            host: completion.host().clone(),
            completion,
            resolver,
        })
    }

    /// Build the request and show the prompt. Returns once the prompt has
    /// been presented; the result may still be outstanding.
    pub fn run(self: &Arc<Self>, prompt: &dyn CredentialPrompt) {
        let request = self.prepare_request();
        liblogger::log_info!(&format!(
            "engine {}: presenting credential prompt (retry: {})",
            request.engine, request.retry
        ));

        let responder = PromptResponder {
            collector: Some(Arc::clone(self)),
        };
        if let Err(e) = prompt.present(request, responder) {
            liblogger::log_error!(&format!("engine {}: {}", self.host.engine(), e));
            // Covers prompts that failed but kept the responder alive.
            self.finish(Outcome::Deny);
        }
    }

    fn prepare_request(&self) -> PromptRequest {
        let fixed_username = self.host.context_string(USERNAME).filter(|u| !u.is_empty());
        let username_editable = fixed_username.is_none();
        let last_username = self.host.hint_string(LAST_USERNAME_HINT).filter(|u| !u.is_empty());
        let password_prefill = if last_username.is_some() {
            self.host.hint_secret(PASSWORD_HINT).filter(|p| !p.is_empty())
        } else {
            None
        };

        PromptRequest {
            engine: self.host.engine(),
            retry: last_username.is_some(),
            username: fixed_username.or(last_username),
            username_editable,
            password_prefill,
        }
    }

    fn finish(&self, outcome: Outcome) {
        match self.completion.fulfill(outcome) {
            Ok(true) => {}
            Ok(false) => liblogger::log_debug!(&format!(
                "engine {}: {:?} arrived after the invocation finished",
                self.host.engine(),
                outcome
            )),
            Err(e) => liblogger::log_error!(&format!("engine {}: {}", self.host.engine(), e)),
        }
    }

    fn on_submit(&self, credential: &mut Credential) {
        let outcome = self.publish(credential);
        credential.scrub();
        if let Err(e) = outcome {
            liblogger::log_error!(&format!("engine {}: {}", self.host.engine(), e));
        }
    }

    fn publish(&self, credential: &Credential) -> Result<(), crate::error::CallbackError> {
        let claim = match self.completion.claim() {
            Some(claim) => claim,
            None => {
                liblogger::log_debug!(&format!(
                    "engine {}: submit arrived after the invocation finished",
                    self.host.engine()
                ));
                return Ok(());
            }
        };

        let username = credential.username().trim();
        if username.is_empty() {
            liblogger::log_info!(&format!("engine {}: empty username submitted", self.host.engine()));
            return claim.signal(Outcome::Deny);
        }

        // Lets a re-invocation after a failed check show the same name.
        if let Err(e) = self.host.set_hint_string(LAST_USERNAME_HINT, username) {
            liblogger::log_warn!(&format!("engine {}: {}", self.host.engine(), e));
        }

        let identity = match self.resolver.resolve(username) {
            Ok(Some(identity)) => identity,
            Ok(None) => {
                liblogger::log_info!(&format!("engine {}: unknown account", self.host.engine()));
                return claim.signal(Outcome::Deny);
            }
            Err(e) => {
                liblogger::log_error!(&format!("engine {}: {}", self.host.engine(), e));
                return claim.signal(Outcome::Deny);
            }
        };

        match self
            .host
            .publish_credential(&identity.name, credential.password(), identity.uid)
        {
            Ok(()) => {
                liblogger::log_info!(&format!(
                    "engine {}: credential accepted for uid {}",
                    self.host.engine(),
                    identity.uid
                ));
                claim.signal(Outcome::Allow)
            }
            Err(e) => {
                liblogger::log_error!(&format!("engine {}: {}", self.host.engine(), e));
                claim.signal(Outcome::Deny)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context_keys::{PASSWORD, UID};
    use crate::testing::{PromptScript, RecordingHost, ScriptedPrompt, StaticIdentityResolver};
    use plugin_api::AuthorizationResult;

    struct Fixture {
        host: Arc<RecordingHost>,
        engine: EngineRef,
        completion: Arc<Completion>,
        collector: Arc<CredentialCollector>,
    }

    fn fixture() -> Fixture {
        let host = Arc::new(RecordingHost::new());
        let engine = EngineRef::from_raw(0x30usize as *mut _);
        let completion = Completion::new(HostAdapter::new(host.clone(), engine));
        let resolver = Arc::new(StaticIdentityResolver::new().with_user("alice", 501));
        let collector = CredentialCollector::new(completion.clone(), resolver);
        Fixture {
            host,
            engine,
            completion,
            collector,
        }
    }

    #[test]
    fn submit_publishes_and_allows() {
        let f = fixture();
        let prompt = ScriptedPrompt::new(PromptScript::Submit("alice", "secret"));
        f.collector.run(prompt.as_ref());

        assert_eq!(f.host.results(f.engine), vec![AuthorizationResult::Allow]);
        assert_eq!(f.host.context_str(f.engine, USERNAME).as_deref(), Some("alice"));
        assert_eq!(f.host.context_str(f.engine, PASSWORD).as_deref(), Some("secret"));
        let (_, uid) = f.host.context(f.engine, UID).unwrap();
        assert_eq!(uid, 501u32.to_ne_bytes().to_vec());
        assert_eq!(f.host.hint_str(f.engine, LAST_USERNAME_HINT).as_deref(), Some("alice"));
    }

    #[test]
    fn unknown_user_is_denied_without_publishing() {
        let f = fixture();
        f.collector.run(ScriptedPrompt::new(PromptScript::Submit("mallory", "pw")).as_ref());

        assert_eq!(f.host.results(f.engine), vec![AuthorizationResult::Deny]);
        assert!(f.host.context(f.engine, PASSWORD).is_none());
        assert_eq!(f.host.hint_str(f.engine, LAST_USERNAME_HINT).as_deref(), Some("mallory"));
    }

    #[test]
    fn cancel_reports_user_canceled() {
        let f = fixture();
        f.collector.run(ScriptedPrompt::new(PromptScript::Cancel).as_ref());
        assert_eq!(f.host.results(f.engine), vec![AuthorizationResult::UserCanceled]);
    }

    #[test]
    fn prompt_failure_denies() {
        let f = fixture();
        f.collector.run(ScriptedPrompt::new(PromptScript::Fail).as_ref());
        assert_eq!(f.host.results(f.engine), vec![AuthorizationResult::Deny]);
    }

    #[test]
    fn late_submit_after_cancel_changes_nothing() {
        let f = fixture();
        let prompt = ScriptedPrompt::new(PromptScript::Hold);
        f.collector.run(prompt.as_ref());
        assert!(f.completion.is_pending());

        f.completion.fulfill(Outcome::UserCanceled).unwrap();
        prompt.submit_held("alice", "secret");

        assert_eq!(f.host.results(f.engine), vec![AuthorizationResult::UserCanceled]);
        assert!(f.host.context(f.engine, PASSWORD).is_none());
        assert!(f.host.hint(f.engine, LAST_USERNAME_HINT).is_none());
    }

    #[test]
    fn request_prefills_from_hints() {
        let f = fixture();
        f.host.put_hint(f.engine, LAST_USERNAME_HINT, b"alice\0");
        f.host.put_hint(f.engine, PASSWORD_HINT, b"old\0");

        let request = f.collector.prepare_request();
        assert_eq!(request.username.as_deref(), Some("alice"));
        assert!(request.username_editable);
        assert!(request.retry);
        assert_eq!(request.password_prefill.as_deref().map(String::as_str), Some("old"));
        assert!(!format!("{:?}", request).contains("old"));
    }

    #[test]
    fn fixed_username_is_not_editable() {
        let f = fixture();
        f.host.put_context(f.engine, USERNAME, b"bob\0");
        let request = f.collector.prepare_request();
        assert_eq!(request.username.as_deref(), Some("bob"));
        assert!(!request.username_editable);
        assert!(!request.retry);
    }

    #[test]
    fn password_hint_alone_is_not_a_retry() {
        let f = fixture();
        f.host.put_hint(f.engine, PASSWORD_HINT, b"old\0");

        let request = f.collector.prepare_request();
        assert!(!request.retry);
        assert!(request.username.is_none());
        assert!(request.password_prefill.is_none());
    }

    #[test]
    fn submitted_credential_is_scrubbed_after_the_result() {
        let f = fixture();
        let mut credential = Credential::new("alice", "secret".to_string());
        f.collector.on_submit(&mut credential);

        assert_eq!(f.host.results(f.engine), vec![AuthorizationResult::Allow]);
        assert!(credential.is_scrubbed());
        assert_eq!(credential.password(), "");

        let mut late = Credential::new("alice", "again".to_string());
        f.collector.on_submit(&mut late);
        assert!(late.is_scrubbed());
        assert_eq!(f.host.results(f.engine), vec![AuthorizationResult::Allow]);
    }

    #[test]
    fn refused_credential_is_scrubbed_too() {
        let f = fixture();
        let mut credential = Credential::new("mallory", "secret".to_string());
        f.collector.on_submit(&mut credential);

        assert_eq!(f.host.results(f.engine), vec![AuthorizationResult::Deny]);
        assert!(credential.is_scrubbed());
    }
}
