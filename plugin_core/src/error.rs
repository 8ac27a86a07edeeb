use plugin_api::{
    OSStatus, ERR_AUTHORIZATION_INTERNAL, ERR_AUTHORIZATION_INVALID_REF, ERR_SEC_PARAM,
};
use thiserror::Error;

/// Why a raw reference handed in by the host was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandleError {
    #[error("null handle")]
    Null,

    #[error("handle tag {found:#010x} does not match expected {expected:#010x}")]
    WrongMagic { expected: u32, found: u32 },

    #[error("handle refers to a released or unknown slot")]
    Stale,

    #[error("no free handle slots")]
    Exhausted,
}

impl HandleError {
    pub fn to_status(&self) -> OSStatus {
        match self {
            HandleError::Exhausted => ERR_AUTHORIZATION_INTERNAL,
            _ => ERR_AUTHORIZATION_INVALID_REF,
        }
    }
}

/// A host callback refused a request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallbackError {
    #[error("host callback {callback} failed with status {status}")]
    Host { callback: &'static str, status: OSStatus },

    #[error("key {0:?} cannot be passed to the host")]
    InvalidKey(String),
}

/// `mechanism_id` could not be mapped onto a known sub-mechanism.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MechanismIdError {
    #[error("empty mechanism id")]
    Empty,

    #[error("unknown sub-mechanism {0:?}")]
    UnknownSubMechanism(String),

    #[error("unknown qualifier {0:?}")]
    UnknownQualifier(String),

    #[error("more than one qualifier in {0:?}")]
    TooManyQualifiers(String),

    #[error("{0:?} needs a user interface and cannot run privileged")]
    PrivilegedInteractive(String),
}

/// Everything that can go wrong inside an entry point. Converted to an
/// `OSStatus` before it reaches the host.
#[derive(Debug, Error)]
pub enum MechanismError {
    #[error(transparent)]
    Handle(#[from] HandleError),

    #[error("invalid mechanism id: {0}")]
    MechanismId(#[from] MechanismIdError),

    #[error(transparent)]
    Callback(#[from] CallbackError),

    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),

    #[error("owning plugin has already been destroyed")]
    PluginGone,

    #[error("mechanism has already been destroyed")]
    Destroyed,

    #[error("previous invocation is still waiting for the user")]
    InvokeInProgress,
}

impl MechanismError {
    pub fn to_status(&self) -> OSStatus {
        match self {
            MechanismError::Handle(e) => e.to_status(),
            MechanismError::MechanismId(_) | MechanismError::InvalidParameter(_) => ERR_SEC_PARAM,
            MechanismError::PluginGone | MechanismError::Destroyed => ERR_AUTHORIZATION_INVALID_REF,
            MechanismError::Callback(_) | MechanismError::InvokeInProgress => ERR_AUTHORIZATION_INTERNAL,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PromptError {
    #[error("prompt could not be displayed: {0}")]
    Unavailable(String),

    #[error("prompt input failed: {0}")]
    Input(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("username contains an interior NUL")]
    InvalidName,

    #[error("user database lookup failed with errno {0}")]
    Lookup(i32),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_the_error_taxonomy() {
        assert_eq!(
            MechanismError::from(HandleError::Stale).to_status(),
            ERR_AUTHORIZATION_INVALID_REF
        );
        assert_eq!(
            MechanismError::from(HandleError::Exhausted).to_status(),
            ERR_AUTHORIZATION_INTERNAL
        );
        assert_eq!(
            MechanismError::from(MechanismIdError::UnknownQualifier("x".into())).to_status(),
            ERR_SEC_PARAM
        );
        assert_eq!(
            MechanismError::from(CallbackError::Host { callback: "SetResult", status: -1 }).to_status(),
            ERR_AUTHORIZATION_INTERNAL
        );
    }
}
