//! One mechanism run against a fresh [`FakeEngine`] session.

use std::fmt;
use std::time::Duration;

use engine_core::{FakeEngine, PluginBinding};
use plugin_api::{AuthorizationResult, CONTEXT_FLAG_EXTRACTABLE, CONTEXT_FLAG_VOLATILE};

/// A `key=value` pair given on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

pub fn parse_key_value(raw: &str) -> Result<KeyValue, String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok(KeyValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
        _ => Err(format!("expected key=value, got {:?}", raw)),
    }
}

fn nul_terminated(value: &str) -> Vec<u8> {
    let mut bytes = value.as_bytes().to_vec();
    bytes.push(0);
    bytes
}

/// Put the command line's context values into the session. `uid` is stored
/// as a number and `password` as volatile, as a login window would.
pub fn seed_context(engine: &FakeEngine, values: &[KeyValue]) -> Result<(), String> {
    for KeyValue { key, value } in values {
        match key.as_str() {
            "uid" => {
                let uid: u32 = value.parse().map_err(|_| format!("uid must be a number, got {:?}", value))?;
                engine.set_context(key, CONTEXT_FLAG_EXTRACTABLE, &uid.to_ne_bytes());
            }
            "password" => engine.set_context(
                key,
                CONTEXT_FLAG_EXTRACTABLE | CONTEXT_FLAG_VOLATILE,
                &nul_terminated(value),
            ),
            _ => engine.set_context_str(key, value),
        }
    }
    Ok(())
}

/// Put hints into the session. `true`/`false` become one-byte flags.
pub fn seed_hints(engine: &FakeEngine, values: &[KeyValue]) {
    for KeyValue { key, value } in values {
        match value.as_str() {
            "true" => engine.set_hint(key, &[1]),
            "false" => engine.set_hint(key, &[0]),
            _ => engine.set_hint_str(key, value),
        }
    }
}

pub struct RunOptions {
    /// How long to wait for a result after `MechanismInvoke` returns.
    pub wait: Duration,
    /// Deactivate after the result, like a host moving on.
    pub deactivate: bool,
}

#[derive(Debug)]
pub struct RunReport {
    pub results: Vec<AuthorizationResult>,
    pub deactivations: usize,
    pub timed_out: bool,
    pub username: Option<String>,
    pub uid: Option<u32>,
    pub password_set: bool,
}

impl RunReport {
    /// Process exit code for the final result.
    pub fn exit_code(&self) -> u8 {
        match self.results.last() {
            Some(AuthorizationResult::Allow) => 0,
            Some(AuthorizationResult::Deny) => 1,
            Some(AuthorizationResult::Undefined) => 2,
            Some(AuthorizationResult::UserCanceled) => 3,
            None => 4,
        }
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "results:       {:?}", self.results)?;
        writeln!(f, "deactivations: {}", self.deactivations)?;
        if self.timed_out {
            writeln!(f, "timed out waiting for a result; mechanism was deactivated")?;
        }
        if let Some(username) = &self.username {
            writeln!(f, "username:      {}", username)?;
        }
        if let Some(uid) = self.uid {
            writeln!(f, "uid:           {}", uid)?;
        }
        write!(f, "password:      {}", if self.password_set { "set" } else { "unset" })
    }
}

/// Create, invoke, optionally deactivate and destroy one mechanism.
///
/// A mechanism that has not reported within `options.wait` is deactivated,
/// which must make it report `UserCanceled`.
pub fn run_mechanism(
    binding: &PluginBinding,
    engine: &FakeEngine,
    mechanism_id: &str,
    options: &RunOptions,
) -> Result<RunReport, String> {
    let mechanism = binding
        .create_mechanism(engine.engine_ref(), mechanism_id)
        .map_err(|status| format!("MechanismCreate({}) failed with status {}", mechanism_id, status))?;

    let outcome = run_created(binding, engine, mechanism, options);
    if let Err(status) = binding.destroy_mechanism(mechanism) {
        liblogger::log_warn!(&format!("MechanismDestroy failed with status {}", status));
    }
    let timed_out = outcome?;

    let uid = engine
        .context("uid")
        .and_then(|(_, bytes)| bytes.get(..4).and_then(|b| b.try_into().ok()))
        .map(u32::from_ne_bytes);

    Ok(RunReport {
        results: engine.results(),
        deactivations: engine.deactivations(),
        timed_out,
        username: engine.context_str("username"),
        uid,
        password_set: engine.context("password").is_some(),
    })
}

fn run_created(
    binding: &PluginBinding,
    engine: &FakeEngine,
    mechanism: plugin_api::AuthorizationMechanismRef,
    options: &RunOptions,
) -> Result<bool, String> {
    binding
        .invoke(mechanism)
        .map_err(|status| format!("MechanismInvoke failed with status {}", status))?;

    let timed_out = !engine.wait_for_results(1, options.wait);
    if timed_out || options.deactivate {
        liblogger::log_info!("Deactivating mechanism");
        binding
            .deactivate(mechanism)
            .map_err(|status| format!("MechanismDeactivate failed with status {}", status))?;
    }
    Ok(timed_out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_value_splits_on_first_equals() {
        assert_eq!(
            parse_key_value("password=a=b").unwrap(),
            KeyValue {
                key: "password".into(),
                value: "a=b".into()
            }
        );
        assert!(parse_key_value("=x").is_err());
        assert!(parse_key_value("novalue").is_err());
    }

    #[test]
    fn seeded_context_uses_host_encodings() {
        let engine = FakeEngine::new();
        let values = vec![
            parse_key_value("username=alice").unwrap(),
            parse_key_value("password=pw").unwrap(),
            parse_key_value("uid=501").unwrap(),
        ];
        seed_context(&engine, &values).unwrap();

        assert_eq!(engine.context_str("username").as_deref(), Some("alice"));
        let (flags, _) = engine.context("password").unwrap();
        assert_ne!(flags & CONTEXT_FLAG_VOLATILE, 0);
        assert_eq!(engine.context("uid").unwrap().1, 501u32.to_ne_bytes().to_vec());
        assert!(seed_context(&engine, &[parse_key_value("uid=abc").unwrap()]).is_err());
    }

    #[test]
    fn boolean_hints_become_flags() {
        let engine = FakeEngine::new();
        seed_hints(&engine, &[parse_key_value("com.authmech.gate=false").unwrap()]);
        assert_eq!(engine.hint("com.authmech.gate"), Some(vec![0]));
    }

    #[test]
    fn exit_code_follows_last_result() {
        let report = RunReport {
            results: vec![AuthorizationResult::Deny, AuthorizationResult::Allow],
            deactivations: 0,
            timed_out: false,
            username: None,
            uid: None,
            password_set: false,
        };
        assert_eq!(report.exit_code(), 0);
        assert!(!report.to_string().contains("timed out"));
    }
}
