//! One mechanism instance: a step of an authorization right, bound to the
//! host session that created it.
//!
//! ```text
//!            invoke            deactivate
//! Created ----------> Invoked ------------> Deactivated
//!    |                 ^   |                    |
//!    |                 +---+  invoke again      |
//!    +---------------------+--------------------+--> Destroyed
//! ```
//!
//! What an invocation does depends on the flags parsed from the mechanism
//! id: a check inspects the context and records whether the interactive
//! step is needed, an interactive mechanism runs the credential collector,
//! and everything else validates the credential already in the context.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use crate::completion::Completion;
use crate::credential::Credential;
use crate::credential_collector::CredentialCollector;
use crate::error::MechanismError;
use crate::host_adapter::{HostAdapter, Outcome};
use crate::host_callbacks::EngineRef;
use crate::mechanism_id::MechanismSpec;
use crate::plugin_controller::PluginRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MechanismState {
    Created,
    Invoked,
    Deactivated,
    Destroyed,
}

/// How `invoke` left the invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvokeStatus {
    /// The result has been reported to the host.
    Finished(Outcome),
    /// The prompt is up; the result follows later.
    Pending,
}

struct Lifecycle {
    state: MechanismState,
    completion: Option<Arc<Completion>>,
    ui_shown: bool,
    invocations: u32,
}

pub struct MechanismInstance {
    engine: EngineRef,
    plugin: Weak<PluginRecord>,
    spec: MechanismSpec,
    lifecycle: Mutex<Lifecycle>,
}

impl MechanismInstance {
    pub fn new(plugin: &Arc<PluginRecord>, engine: EngineRef, spec: MechanismSpec) -> Self {
        MechanismInstance {
            engine,
            plugin: Arc::downgrade(plugin),
            spec,
            lifecycle: Mutex::new(Lifecycle {
                state: MechanismState::Created,
                completion: None,
                ui_shown: false,
                invocations: 0,
            }),
        }
    }

    pub fn engine(&self) -> EngineRef {
        self.engine
    }

    pub fn spec(&self) -> &MechanismSpec {
        &self.spec
    }

    pub fn state(&self) -> MechanismState {
        self.lifecycle().state
    }

    /// Whether any invocation so far presented a prompt.
    pub fn ui_shown(&self) -> bool {
        self.lifecycle().ui_shown
    }

    pub fn invocations(&self) -> u32 {
        self.lifecycle().invocations
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn plugin(&self) -> Result<Arc<PluginRecord>, MechanismError> {
        self.plugin.upgrade().ok_or(MechanismError::PluginGone)
    }

    pub fn invoke(&self) -> Result<InvokeStatus, MechanismError> {
        let plugin = self.plugin()?;
        let host = plugin.host(self.engine);
        let completion = Completion::new(host.clone());

        {
            let mut lifecycle = self.lifecycle();
            if lifecycle.state == MechanismState::Destroyed {
                return Err(MechanismError::Destroyed);
            }
            if lifecycle.completion.as_ref().is_some_and(|c| c.is_open()) {
                return Err(MechanismError::InvokeInProgress);
            }
            lifecycle.state = MechanismState::Invoked;
            lifecycle.completion = Some(Arc::clone(&completion));
            lifecycle.invocations += 1;
        }

        liblogger::log_info!(&format!("engine {}: invoking {}", self.engine, self.spec.id));

        let flags = self.spec.flags;
        if flags.check_only {
            self.run_check(&plugin, &host, &completion)?;
        } else if flags.requires_interactive_ui {
            self.run_interactive(&plugin, &host, &completion)?;
        } else {
            self.run_validation(&plugin, &host, &completion)?;
        }

        Ok(match completion.outcome() {
            Some(outcome) => InvokeStatus::Finished(outcome),
            None => InvokeStatus::Pending,
        })
    }

    /// Record whether the interactive step has to run for the credential in
    /// the context. Without a credential there is nothing to check.
    fn run_check(
        &self,
        plugin: &PluginRecord,
        host: &HostAdapter,
        completion: &Arc<Completion>,
    ) -> Result<(), MechanismError> {
        let Some(claim) = completion.claim() else {
            return Ok(());
        };

        let Some(credential) = host.credential() else {
            liblogger::log_info!(&format!("engine {}: no credential in context", self.engine));
            return Ok(claim.signal(Outcome::Deny)?);
        };

        let needs_prompt = !self.is_exempt(plugin, host, &credential);
        drop(credential);

        if let Err(e) = host.set_hint_flag(&plugin.config().hint_domain, needs_prompt) {
            liblogger::log_error!(&format!("engine {}: {}", self.engine, e));
            return Ok(claim.signal(Outcome::Deny)?);
        }
        liblogger::log_info!(&format!(
            "engine {}: interactive step {}",
            self.engine,
            if needs_prompt { "required" } else { "skipped" }
        ));
        Ok(claim.signal(Outcome::Allow)?)
    }

    fn run_interactive(
        &self,
        plugin: &PluginRecord,
        host: &HostAdapter,
        completion: &Arc<Completion>,
    ) -> Result<(), MechanismError> {
        if host.hint_flag(&plugin.config().hint_domain) == Some(false) {
            liblogger::log_info!(&format!("engine {}: prompt not required", self.engine));
            completion.fulfill(Outcome::Allow)?;
            return Ok(());
        }

        self.lifecycle().ui_shown = true;
        let collector = CredentialCollector::new(Arc::clone(completion), plugin.services().resolver.clone());
        collector.run(plugin.services().prompt.as_ref());
        Ok(())
    }

    fn run_validation(
        &self,
        plugin: &PluginRecord,
        host: &HostAdapter,
        completion: &Arc<Completion>,
    ) -> Result<(), MechanismError> {
        let Some(claim) = completion.claim() else {
            return Ok(());
        };

        let enablement = self.spec.flags.is_enablement_flow;
        let outcome = match host.credential() {
            None if enablement => Outcome::Ignore,
            None => Outcome::Deny,
            Some(credential) if enablement && self.is_exempt(plugin, host, &credential) => Outcome::Ignore,
            Some(credential) => self.validate(plugin, &credential),
        };

        liblogger::log_info!(&format!("engine {}: {} -> {:?}", self.engine, self.spec.id, outcome));
        Ok(claim.signal(outcome)?)
    }

    fn validate(&self, plugin: &PluginRecord, credential: &Credential) -> Outcome {
        let config = plugin.config();
        if config.deny_root && credential.username() == "root" {
            liblogger::log_warn!(&format!("engine {}: root refused", self.engine));
            return Outcome::Deny;
        }
        if credential.password().is_empty() {
            liblogger::log_info!(&format!("engine {}: empty password", self.engine));
            return Outcome::Deny;
        }
        match plugin.services().resolver.resolve(credential.username()) {
            Ok(Some(_)) => Outcome::Allow,
            Ok(None) => Outcome::Deny,
            Err(e) => {
                liblogger::log_error!(&format!("engine {}: {}", self.engine, e));
                Outcome::Deny
            }
        }
    }

    /// Accounts listed in `skip_users` or below `minimum_uid` never need the
    /// interactive step. The uid comes from the context when an earlier
    /// mechanism stored one.
    fn is_exempt(&self, plugin: &PluginRecord, host: &HostAdapter, credential: &Credential) -> bool {
        let config = plugin.config();
        if config.is_skipped_user(credential.username()) {
            return true;
        }
        let uid = host.context_uid().or_else(|| {
            plugin
                .services()
                .resolver
                .resolve(credential.username())
                .ok()
                .flatten()
                .map(|identity| identity.uid)
        });
        matches!(uid, Some(uid) if uid < config.minimum_uid)
    }

    /// Cancel a pending invocation and acknowledge the deactivation. The
    /// host always gets its `DidDeactivate`, even when cancelling failed.
    pub fn deactivate(&self) -> Result<(), MechanismError> {
        let plugin = self.plugin()?;
        let (pending, ui_shown) = {
            let mut lifecycle = self.lifecycle();
            if lifecycle.state == MechanismState::Destroyed {
                return Err(MechanismError::Destroyed);
            }
            lifecycle.state = MechanismState::Deactivated;
            (lifecycle.completion.clone(), lifecycle.ui_shown)
        };

        let mut cancelled = Ok(false);
        if let Some(completion) = pending {
            cancelled = completion.fulfill(Outcome::UserCanceled);
            if matches!(cancelled, Ok(true)) {
                liblogger::log_info!(&format!("engine {}: pending invocation cancelled", self.engine));
            }
            if ui_shown {
                plugin.services().prompt.dismiss(self.engine);
            }
        }

        let acknowledged = plugin.host(self.engine).signal_did_deactivate();
        cancelled?;
        Ok(acknowledged?)
    }

    /// Final teardown. A pending invocation is dropped without a result.
    pub fn destroy(&self) {
        let (pending, ui_shown) = {
            let mut lifecycle = self.lifecycle();
            lifecycle.state = MechanismState::Destroyed;
            (lifecycle.completion.take(), lifecycle.ui_shown)
        };

        if let Some(completion) = pending {
            if completion.close() {
                liblogger::log_warn!(&format!(
                    "engine {}: destroyed with an invocation outstanding",
                    self.engine
                ));
            }
        }
        if ui_shown {
            if let Some(plugin) = self.plugin.upgrade() {
                plugin.services().prompt.dismiss(self.engine);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MechanismConfig;
    use crate::context_keys::{PASSWORD, UID, USERNAME};
    use crate::error::IdentityError;
    use crate::identity::{IdentityResolver, UserIdentity};
    use crate::mechanism_id::parse_mechanism_id;
    use crate::plugin_controller::PluginServices;
    use crate::testing::{PromptScript, RecordingHost, ScriptedPrompt, StaticIdentityResolver};
    use plugin_api::AuthorizationResult;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    const ENGINE: usize = 0x40;

    struct Fixture {
        host: Arc<RecordingHost>,
        prompt: Arc<ScriptedPrompt>,
        plugin: Arc<PluginRecord>,
    }

    impl Fixture {
        fn new(script: PromptScript) -> Self {
            let resolver = StaticIdentityResolver::new()
                .with_user("alice", 501)
                .with_user("daemon", 1)
                .with_user("root", 0);
            Fixture::with_resolver(script, Arc::new(resolver))
        }

        fn with_resolver(script: PromptScript, resolver: Arc<dyn IdentityResolver>) -> Self {
            let host = Arc::new(RecordingHost::new());
            let prompt = ScriptedPrompt::new(script);
            let plugin = Arc::new(PluginRecord::new(
                host.clone(),
                MechanismConfig::default(),
                PluginServices {
                    prompt: prompt.clone(),
                    resolver,
                },
            ));
            Fixture { host, prompt, plugin }
        }

        fn engine(&self) -> EngineRef {
            EngineRef::from_raw(ENGINE as *mut _)
        }

        fn mechanism(&self, id: &str) -> MechanismInstance {
            let spec = parse_mechanism_id(id, self.plugin.config()).unwrap();
            MechanismInstance::new(&self.plugin, self.engine(), spec)
        }

        fn login(&self, username: &str, password: &str) {
            self.host.put_context(self.engine(), USERNAME, format!("{}\0", username).as_bytes());
            self.host.put_context(self.engine(), PASSWORD, format!("{}\0", password).as_bytes());
        }

        fn results(&self) -> Vec<AuthorizationResult> {
            self.host.results(self.engine())
        }

        fn gate_hint(&self) -> Option<Vec<u8>> {
            self.host.hint(self.engine(), &self.plugin.config().hint_domain)
        }
    }

    #[test]
    fn check_without_credential_denies() {
        let f = Fixture::new(PromptScript::Cancel);
        let status = f.mechanism("Check,privileged").invoke().unwrap();
        assert_eq!(status, InvokeStatus::Finished(Outcome::Deny));
        assert_eq!(f.results(), vec![AuthorizationResult::Deny]);
        assert!(f.gate_hint().is_none());
    }

    #[test]
    fn check_flags_regular_user_for_prompt() {
        let f = Fixture::new(PromptScript::Cancel);
        f.login("alice", "pw");
        f.mechanism("Check,privileged").invoke().unwrap();
        assert_eq!(f.results(), vec![AuthorizationResult::Allow]);
        assert_eq!(f.gate_hint(), Some(vec![1]));
    }

    #[test]
    fn check_exempts_system_accounts_and_skip_list() {
        let f = Fixture::new(PromptScript::Cancel);
        f.login("daemon", "pw");
        f.mechanism("Check,privileged").invoke().unwrap();
        assert_eq!(f.gate_hint(), Some(vec![0]));

        let f = Fixture::new(PromptScript::Cancel);
        f.login("alice", "pw");
        f.host.put_context(f.engine(), UID, &100u32.to_ne_bytes());
        f.mechanism("Check,privileged").invoke().unwrap();
        assert_eq!(f.gate_hint(), Some(vec![0]));
    }

    #[test]
    fn check_denies_when_hint_cannot_be_written() {
        let f = Fixture::new(PromptScript::Cancel);
        f.login("alice", "pw");
        f.host.fail("SetHintValue");
        f.mechanism("Check,privileged").invoke().unwrap();
        assert_eq!(f.results(), vec![AuthorizationResult::Deny]);
    }

    #[test]
    fn interactive_skips_prompt_when_check_said_so() {
        let f = Fixture::new(PromptScript::Cancel);
        f.host.put_hint(f.engine(), &f.plugin.config().hint_domain, &[0]);
        let mechanism = f.mechanism("Prompt");
        assert_eq!(mechanism.invoke().unwrap(), InvokeStatus::Finished(Outcome::Allow));
        assert!(f.prompt.presented().is_empty());
        assert!(!mechanism.ui_shown());
    }

    #[test]
    fn interactive_submit_allows() {
        let f = Fixture::new(PromptScript::Submit("alice", "secret"));
        let mechanism = f.mechanism("Prompt");
        assert_eq!(mechanism.invoke().unwrap(), InvokeStatus::Finished(Outcome::Allow));
        assert!(mechanism.ui_shown());
        assert_eq!(f.host.context_str(f.engine(), PASSWORD).as_deref(), Some("secret"));
    }

    #[test]
    fn deactivate_cancels_held_prompt_once() {
        let f = Fixture::new(PromptScript::Hold);
        let mechanism = f.mechanism("Prompt");
        assert_eq!(mechanism.invoke().unwrap(), InvokeStatus::Pending);

        mechanism.deactivate().unwrap();
        assert_eq!(f.results(), vec![AuthorizationResult::UserCanceled]);
        assert_eq!(f.host.deactivations(f.engine()), 1);
        assert_eq!(f.prompt.dismissed(), vec![f.engine()]);
        assert!(!f.prompt.is_holding());
        assert_eq!(mechanism.state(), MechanismState::Deactivated);
    }

    #[test]
    fn deactivate_without_pending_invocation_only_acknowledges() {
        let f = Fixture::new(PromptScript::Cancel);
        f.login("alice", "pw");
        let mechanism = f.mechanism("Gate");
        mechanism.invoke().unwrap();
        mechanism.deactivate().unwrap();
        assert_eq!(f.results(), vec![AuthorizationResult::Allow]);
        assert_eq!(f.host.deactivations(f.engine()), 1);
    }

    #[test]
    fn second_invoke_while_pending_is_refused() {
        let f = Fixture::new(PromptScript::Hold);
        let mechanism = f.mechanism("Prompt");
        mechanism.invoke().unwrap();
        assert!(matches!(mechanism.invoke(), Err(MechanismError::InvokeInProgress)));
        assert_eq!(f.prompt.presented().len(), 1);
    }

    #[test]
    fn reinvoke_after_failure_prefills_last_username() {
        let f = Fixture::new(PromptScript::Submit("mallory", "pw"));
        let mechanism = f.mechanism("Prompt");
        mechanism.invoke().unwrap();

        f.prompt.set_script(PromptScript::Submit("alice", "pw"));
        mechanism.invoke().unwrap();

        let presented = f.prompt.presented();
        assert_eq!(presented.len(), 2);
        assert!(!presented[0].retry);
        assert!(presented[1].retry);
        assert_eq!(presented[1].username.as_deref(), Some("mallory"));
        assert_eq!(
            f.results(),
            vec![AuthorizationResult::Deny, AuthorizationResult::Allow]
        );
        assert_eq!(mechanism.invocations(), 2);
    }

    #[test]
    fn destroy_drops_pending_invocation_silently() {
        let f = Fixture::new(PromptScript::Hold);
        let mechanism = f.mechanism("Prompt");
        mechanism.invoke().unwrap();
        mechanism.destroy();

        assert!(f.results().is_empty());
        assert!(!f.prompt.is_holding());
        assert_eq!(mechanism.state(), MechanismState::Destroyed);
        assert!(matches!(mechanism.invoke(), Err(MechanismError::Destroyed)));
    }

    #[test]
    fn gate_refuses_root_and_empty_password() {
        let f = Fixture::new(PromptScript::Cancel);
        f.login("root", "toor");
        f.mechanism("Gate").invoke().unwrap();

        let g = Fixture::new(PromptScript::Cancel);
        g.login("alice", "");
        g.mechanism("Gate").invoke().unwrap();

        let h = Fixture::new(PromptScript::Cancel);
        h.login("bob", "pw");
        h.mechanism("Gate").invoke().unwrap();

        assert_eq!(f.results(), vec![AuthorizationResult::Deny]);
        assert_eq!(g.results(), vec![AuthorizationResult::Deny]);
        assert_eq!(h.results(), vec![AuthorizationResult::Deny]);
    }

    #[test]
    fn enablement_ignores_missing_or_exempt_credentials() {
        let f = Fixture::new(PromptScript::Cancel);
        f.mechanism("Enablement,privileged").invoke().unwrap();
        assert_eq!(f.results(), vec![AuthorizationResult::Undefined]);

        let g = Fixture::new(PromptScript::Cancel);
        g.login("daemon", "pw");
        g.mechanism("Enablement,privileged").invoke().unwrap();
        assert_eq!(g.results(), vec![AuthorizationResult::Undefined]);

        let h = Fixture::new(PromptScript::Cancel);
        h.login("alice", "pw");
        h.mechanism("Enablement,privileged").invoke().unwrap();
        assert_eq!(h.results(), vec![AuthorizationResult::Allow]);
    }

    #[test]
    fn plugin_gone_is_reported() {
        let f = Fixture::new(PromptScript::Cancel);
        let mechanism = f.mechanism("Gate");
        let Fixture { plugin, .. } = f;
        drop(plugin);
        assert!(matches!(mechanism.invoke(), Err(MechanismError::PluginGone)));
    }

    /// Knows every account, but tells the test when a lookup starts and
    /// then takes its time.
    struct SlowResolver {
        started: Mutex<mpsc::Sender<()>>,
    }

    impl IdentityResolver for SlowResolver {
        fn resolve(&self, username: &str) -> Result<Option<UserIdentity>, IdentityError> {
            let _ = self.started.lock().unwrap().send(());
            thread::sleep(Duration::from_millis(200));
            Ok(Some(UserIdentity {
                name: username.to_string(),
                uid: 501,
            }))
        }
    }

    /// A held prompt whose answer is being published when the test gets
    /// control back.
    fn submitting(f: &Fixture, lookup: &mpsc::Receiver<()>) -> (MechanismInstance, thread::JoinHandle<bool>) {
        let mechanism = f.mechanism("Prompt");
        assert_eq!(mechanism.invoke().unwrap(), InvokeStatus::Pending);
        let prompt = f.prompt.clone();
        let user = thread::spawn(move || prompt.submit_held("alice", "pw"));
        lookup.recv_timeout(Duration::from_secs(5)).unwrap();
        (mechanism, user)
    }

    fn position(journal: &[String], entry: &str) -> usize {
        journal
            .iter()
            .position(|e| e == entry)
            .unwrap_or_else(|| panic!("{} missing from {:?}", entry, journal))
    }

    #[test]
    fn deactivate_during_submit_acknowledges_after_the_result() {
        let (started, lookup) = mpsc::channel();
        let f = Fixture::with_resolver(
            PromptScript::Hold,
            Arc::new(SlowResolver {
                started: Mutex::new(started),
            }),
        );
        let (mechanism, user) = submitting(&f, &lookup);

        mechanism.deactivate().unwrap();
        f.host.note("deactivate returned");
        assert!(user.join().unwrap());

        let journal = f.host.journal();
        let result = position(&journal, "SetResult(Allow)");
        let ack = position(&journal, "DidDeactivate");
        let returned = position(&journal, "<deactivate returned>");
        assert!(position(&journal, "SetContext(password)") < result);
        assert!(result < ack, "{:?}", journal);
        assert_eq!(returned, ack + 1, "{:?}", journal);
        assert_eq!(f.results(), vec![AuthorizationResult::Allow]);
        assert_eq!(f.host.deactivations(f.engine()), 1);
    }

    #[test]
    fn destroy_during_submit_returns_after_the_last_write() {
        let (started, lookup) = mpsc::channel();
        let f = Fixture::with_resolver(
            PromptScript::Hold,
            Arc::new(SlowResolver {
                started: Mutex::new(started),
            }),
        );
        let (mechanism, user) = submitting(&f, &lookup);

        mechanism.destroy();
        f.host.note("destroy returned");
        assert!(user.join().unwrap());

        let journal = f.host.journal();
        assert_eq!(
            journal.last().map(String::as_str),
            Some("<destroy returned>"),
            "{:?}",
            journal
        );
        assert_eq!(position(&journal, "<destroy returned>"), position(&journal, "SetResult(Allow)") + 1);
        assert_eq!(f.host.deactivations(f.engine()), 0);
    }
}
