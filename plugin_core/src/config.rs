//! Plugin configuration.
//!
//! One TOML file carries both the `[logging]` section understood by
//! `liblogger` and the `[mechanism]` section below. The file is optional:
//! a host must still be able to load the plugin on a machine where nobody
//! wrote one.
//!
//! ```toml
//! [logging]
//! type = "file"
//! threshold = "info"
//! file_path = "authmech.log"
//! log_folder = "/var/log"
//!
//! [mechanism]
//! hint_domain = "com.authmech.gate"
//! skip_users = ["admin"]
//! minimum_uid = 501
//! deny_root = true
//! prompt = "terminal"
//!
//! [mechanism.sub_mechanisms]
//! Check = "check"
//! Prompt = "interactive"
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use liblogger::LogConfig;
use serde::Deserialize;

use crate::context_keys::DEFAULT_GATE_HINT;
use crate::error::ConfigError;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV_VAR: &str = "AUTHMECH_CONFIG";

/// Used when `AUTHMECH_CONFIG` is unset.
pub const DEFAULT_CONFIG_PATH: &str = "/Library/Security/SecurityAgentPlugins/authmech.toml";

/// What a sub-mechanism name in a mechanism id selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MechanismKind {
    /// Decide whether the interactive step has to run.
    Check,
    /// Collect a credential from the user.
    Interactive,
    /// Validate the credential for an enablement flow; ignore exempt users.
    Enablement,
    /// Validate the credential already in the context.
    Gate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Qualifier {
    /// The host runs the mechanism in its privileged helper, without UI.
    Privileged,
    /// Only inspect the context; never prompt.
    CheckOnly,
}

/// Which prompt implementation the plugin crate wires in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptKind {
    /// Read the credential from the controlling terminal.
    Terminal,
    /// No user interface; interactive mechanisms fail closed.
    None,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MechanismConfig {
    /// Hint key of the "prompt needed" flag written by the check mechanism.
    pub hint_domain: String,
    /// Accounts that never need the interactive step.
    pub skip_users: Vec<String>,
    /// Accounts below this uid never need the interactive step.
    pub minimum_uid: u32,
    /// Refuse `root` in the gate and enablement mechanisms.
    pub deny_root: bool,
    pub prompt: PromptKind,
    /// Sub-mechanism name, as written in the mechanism id, to kind.
    pub sub_mechanisms: HashMap<String, MechanismKind>,
    /// Qualifier name, as written after the comma, to meaning.
    pub qualifiers: HashMap<String, Qualifier>,
}

impl Default for MechanismConfig {
    fn default() -> Self {
        let sub_mechanisms = [
            ("Check", MechanismKind::Check),
            ("Prompt", MechanismKind::Interactive),
            ("Enablement", MechanismKind::Enablement),
            ("Gate", MechanismKind::Gate),
        ]
        .into_iter()
        .map(|(name, kind)| (name.to_string(), kind))
        .collect();

        let qualifiers = [("privileged", Qualifier::Privileged), ("check", Qualifier::CheckOnly)]
            .into_iter()
            .map(|(name, qualifier)| (name.to_string(), qualifier))
            .collect();

        MechanismConfig {
            hint_domain: DEFAULT_GATE_HINT.to_string(),
            skip_users: Vec::new(),
            minimum_uid: 501,
            deny_root: true,
            prompt: PromptKind::Terminal,
            sub_mechanisms,
            qualifiers,
        }
    }
}

impl MechanismConfig {
    /// Whether `username` is listed in `skip_users`. Surrounding whitespace
    /// in either side is not significant.
    pub fn is_skipped_user(&self, username: &str) -> bool {
        let username = username.trim();
        self.skip_users.iter().any(|u| u.trim() == username)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PluginConfig {
    #[serde(default)]
    pub logging: LogConfig,
    #[serde(default)]
    pub mechanism: MechanismConfig,
}

impl PluginConfig {
    /// Load from `AUTHMECH_CONFIG` or the default path.
    ///
    /// Never fails: a missing or broken file yields the defaults and a
    /// message on stderr, since the logger is not configured yet.
    pub fn load() -> Self {
        let path = std::env::var(CONFIG_ENV_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        if !Path::new(&path).exists() {
            eprintln!("Config file {} not found, using defaults", path);
            return PluginConfig::default();
        }
        match PluginConfig::from_file(&path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("{}; using defaults", e);
                PluginConfig::default()
            }
        }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        PluginConfig::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_cover_every_sub_mechanism() {
        let config = MechanismConfig::default();
        assert_eq!(config.sub_mechanisms["Check"], MechanismKind::Check);
        assert_eq!(config.sub_mechanisms["Prompt"], MechanismKind::Interactive);
        assert_eq!(config.qualifiers["privileged"], Qualifier::Privileged);
        assert_eq!(config.minimum_uid, 501);
        assert!(config.deny_root);
        assert_eq!(config.hint_domain, DEFAULT_GATE_HINT);
    }

    #[test]
    fn partial_mechanism_section_keeps_other_defaults() {
        let config = PluginConfig::from_toml_str(
            r#"
            [mechanism]
            skip_users = ["admin", " ops "]
            minimum_uid = 1000
            prompt = "none"
            "#,
        )
        .unwrap();

        assert_eq!(config.mechanism.minimum_uid, 1000);
        assert_eq!(config.mechanism.prompt, PromptKind::None);
        assert!(config.mechanism.is_skipped_user("ops"));
        assert!(!config.mechanism.is_skipped_user("alice"));
        assert_eq!(config.mechanism.sub_mechanisms.len(), 4);
    }

    #[test]
    fn custom_sub_mechanism_names() {
        let config = PluginConfig::from_toml_str(
            r#"
            [mechanism.sub_mechanisms]
            CryptGUI = "interactive"
            "#,
        )
        .unwrap();
        assert_eq!(
            config.mechanism.sub_mechanisms.get("CryptGUI"),
            Some(&MechanismKind::Interactive)
        );
        assert!(config.mechanism.sub_mechanisms.get("Prompt").is_none());
    }

    #[test]
    fn unknown_kind_is_a_parse_error() {
        let err = PluginConfig::from_toml_str(
            r#"
            [mechanism.sub_mechanisms]
            Check = "telepathy"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn reads_logging_and_mechanism_from_one_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[logging]\ntype = \"console\"\nthreshold = \"warn\"\n\n[mechanism]\ndeny_root = false"
        )
        .unwrap();

        let config = PluginConfig::from_file(file.path()).unwrap();
        assert_eq!(config.logging.threshold, liblogger::LogLevel::Warn);
        assert!(!config.mechanism.deny_root);
    }

    #[test]
    fn shipped_sample_matches_defaults() {
        let config = PluginConfig::from_toml_str(include_str!("../../authmech.toml")).unwrap();
        let defaults = MechanismConfig::default();
        assert_eq!(config.logging.log_type, liblogger::LogType::File);
        assert_eq!(config.mechanism.sub_mechanisms, defaults.sub_mechanisms);
        assert_eq!(config.mechanism.qualifiers, defaults.qualifiers);
        assert_eq!(config.mechanism.minimum_uid, defaults.minimum_uid);
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = PluginConfig::from_file("/nonexistent/authmech.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
