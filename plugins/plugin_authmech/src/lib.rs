//! Authorization mechanism plugin.
//!
//! Exports `AuthorizationPluginCreate`; everything behind it lives in
//! `plugin_core`. This crate only decides which prompt and user database
//! the mechanisms talk to.

pub mod terminal_prompt;

use std::sync::Arc;

use plugin_core::{
    CredentialPrompt, EngineRef, PluginConfig, PluginServices, PromptError, PromptKind, PromptRequest,
    PromptResponder, SystemIdentityResolver,
};

use crate::terminal_prompt::TerminalPrompt;

#[ctor::ctor]
fn on_load() {
    liblogger::log_debug!("[plugin_authmech] >>> LOADED");
}

/// Prompt for hosts without any user interface. Interactive mechanisms
/// fail closed.
pub struct NoPrompt;

impl CredentialPrompt for NoPrompt {
    fn present(&self, _request: PromptRequest, _responder: PromptResponder) -> Result<(), PromptError> {
        Err(PromptError::Unavailable("no prompt configured".to_string()))
    }

    fn dismiss(&self, _engine: EngineRef) {}
}

pub fn services(config: &PluginConfig) -> PluginServices {
    let prompt: Arc<dyn CredentialPrompt> = match config.mechanism.prompt {
        PromptKind::Terminal => Arc::new(TerminalPrompt::new()),
        PromptKind::None => Arc::new(NoPrompt),
    };
    PluginServices {
        prompt,
        resolver: Arc::new(SystemIdentityResolver),
    }
}

plugin_core::declare_auth_plugin!(services);
