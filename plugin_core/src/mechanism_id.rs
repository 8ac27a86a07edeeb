//! Parsing of the mechanism id the host passes to `MechanismCreate`.
//!
//! An id is a sub-mechanism name optionally followed by one qualifier:
//! `Check,privileged`, `Prompt`, `Enablement,privileged`. The plugin name
//! before the colon in the authorization rule is stripped by the host.

use crate::config::{MechanismConfig, MechanismKind, Qualifier};
use crate::error::MechanismIdError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MechanismFlags {
    pub requires_interactive_ui: bool,
    pub check_only: bool,
    pub is_enablement_flow: bool,
    pub privileged: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MechanismSpec {
    pub id: String,
    pub kind: MechanismKind,
    pub flags: MechanismFlags,
}

pub fn parse_mechanism_id(id: &str, config: &MechanismConfig) -> Result<MechanismSpec, MechanismIdError> {
    if id.is_empty() {
        return Err(MechanismIdError::Empty);
    }

    let mut parts = id.split(',');
    let name = parts.next().unwrap_or_default();
    let qualifier = parts.next();
    if parts.next().is_some() {
        return Err(MechanismIdError::TooManyQualifiers(id.to_string()));
    }

    let kind = *config
        .sub_mechanisms
        .get(name)
        .ok_or_else(|| MechanismIdError::UnknownSubMechanism(name.to_string()))?;

    let mut flags = MechanismFlags::default();
    match kind {
        MechanismKind::Check => flags.check_only = true,
        MechanismKind::Interactive => flags.requires_interactive_ui = true,
        MechanismKind::Enablement => flags.is_enablement_flow = true,
        MechanismKind::Gate => {}
    }

    if let Some(qualifier) = qualifier {
        match config.qualifiers.get(qualifier) {
            Some(Qualifier::Privileged) => flags.privileged = true,
            Some(Qualifier::CheckOnly) => flags.check_only = true,
            None => return Err(MechanismIdError::UnknownQualifier(qualifier.to_string())),
        }
    }

    if flags.privileged && flags.requires_interactive_ui {
        return Err(MechanismIdError::PrivilegedInteractive(id.to_string()));
    }

    Ok(MechanismSpec {
        id: id.to_string(),
        kind,
        flags,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(id: &str) -> Result<MechanismSpec, MechanismIdError> {
        parse_mechanism_id(id, &MechanismConfig::default())
    }

    #[test]
    fn privileged_check() {
        let spec = parse("Check,privileged").unwrap();
        assert_eq!(spec.kind, MechanismKind::Check);
        assert!(spec.flags.check_only);
        assert!(spec.flags.privileged);
        assert!(!spec.flags.requires_interactive_ui);
    }

    #[test]
    fn plain_prompt_needs_ui() {
        let spec = parse("Prompt").unwrap();
        assert_eq!(
            spec.flags,
            MechanismFlags {
                requires_interactive_ui: true,
                ..MechanismFlags::default()
            }
        );
    }

    #[test]
    fn enablement_and_gate() {
        assert!(parse("Enablement,privileged").unwrap().flags.is_enablement_flow);
        assert_eq!(parse("Gate").unwrap().flags, MechanismFlags::default());
    }

    #[test]
    fn rejects_unknown_names() {
        assert_eq!(parse(""), Err(MechanismIdError::Empty));
        assert_eq!(
            parse("Telepathy"),
            Err(MechanismIdError::UnknownSubMechanism("Telepathy".into()))
        );
        assert_eq!(
            parse("Check,shared"),
            Err(MechanismIdError::UnknownQualifier("shared".into()))
        );
        assert_eq!(parse("Check,"), Err(MechanismIdError::UnknownQualifier("".into())));
        assert_eq!(
            parse("Check,privileged,check"),
            Err(MechanismIdError::TooManyQualifiers("Check,privileged,check".into()))
        );
    }

    #[test]
    fn interactive_cannot_be_privileged() {
        assert_eq!(
            parse("Prompt,privileged"),
            Err(MechanismIdError::PrivilegedInteractive("Prompt,privileged".into()))
        );
    }

    #[test]
    fn names_are_case_sensitive() {
        assert!(parse("check").is_err());
    }
}
