pub mod completion;
pub mod config;
pub mod context_keys;
pub mod credential;
pub mod credential_collector;
pub mod error;
pub mod handle_registry;
pub mod host_adapter;
pub mod host_callbacks;
pub mod identity;
pub mod logging;
pub mod mechanism;
pub mod mechanism_id;
pub mod plugin_controller;
pub mod plugin_macros;

#[cfg(any(test, feature = "tests"))]
pub mod testing;

pub use plugin_api;

pub use config::{MechanismConfig, MechanismKind, PluginConfig, PromptKind, Qualifier};
pub use credential::Credential;
pub use credential_collector::{CredentialPrompt, PromptRequest, PromptResponder};
pub use error::{CallbackError, ConfigError, HandleError, IdentityError, MechanismError, PromptError};
pub use host_adapter::{HostAdapter, Outcome};
pub use host_callbacks::{EngineRef, HostCallbacks};
pub use identity::{IdentityResolver, SystemIdentityResolver, UserIdentity};
pub use logging::init_logger;
pub use mechanism::{InvokeStatus, MechanismInstance, MechanismState};
pub use plugin_controller::{PluginRecord, PluginServices};
