//! Plugin and mechanism records behind the C dispatch table.
//!
//! The host only ever holds handles from the two registries below. Every
//! entry point validates its handle before touching anything, so a stale,
//! foreign or garbage reference is answered with an error status instead of
//! a crash.

use std::ffi::CStr;
use std::sync::Arc;

use liblogger_macros::status_boundary;
use once_cell::sync::Lazy;
use plugin_api::{
    AuthorizationCallbacks, AuthorizationEngineRef, AuthorizationMechanismId,
    AuthorizationMechanismRef, AuthorizationPluginInterface, AuthorizationPluginRef, OSStatus,
    ERR_AUTHORIZATION_SUCCESS, ERR_SEC_PARAM, PLUGIN_INTERFACE_VERSION,
};

use crate::config::{MechanismConfig, PluginConfig};
use crate::credential_collector::CredentialPrompt;
use crate::error::{HandleError, MechanismError};
use crate::handle_registry::{Handle, HandleRegistry, MECHANISM_MAGIC, PLUGIN_MAGIC};
use crate::host_adapter::HostAdapter;
use crate::host_callbacks::{CallbackTable, EngineRef, HostCallbacks};
use crate::identity::IdentityResolver;
use crate::logging;
use crate::mechanism::{InvokeStatus, MechanismInstance};
use crate::mechanism_id::parse_mechanism_id;

static PLUGINS: Lazy<HandleRegistry<PluginRecord>> = Lazy::new(|| HandleRegistry::new(PLUGIN_MAGIC));
static MECHANISMS: Lazy<HandleRegistry<MechanismInstance>> =
    Lazy::new(|| HandleRegistry::new(MECHANISM_MAGIC));

static PLUGIN_INTERFACE: AuthorizationPluginInterface = AuthorizationPluginInterface {
    version: PLUGIN_INTERFACE_VERSION,
    plugin_destroy,
    mechanism_create,
    mechanism_invoke,
    mechanism_deactivate,
    mechanism_destroy,
};

/// Collaborators a plugin crate supplies for its mechanisms.
#[derive(Clone)]
pub struct PluginServices {
    pub prompt: Arc<dyn CredentialPrompt>,
    pub resolver: Arc<dyn IdentityResolver>,
}

/// State shared by every mechanism the plugin creates.
pub struct PluginRecord {
    callbacks: Arc<dyn HostCallbacks>,
    config: MechanismConfig,
    services: PluginServices,
}

impl PluginRecord {
    pub fn new(callbacks: Arc<dyn HostCallbacks>, config: MechanismConfig, services: PluginServices) -> Self {
        PluginRecord {
            callbacks,
            config,
            services,
        }
    }

    pub fn host(&self, engine: EngineRef) -> HostAdapter {
        HostAdapter::new(Arc::clone(&self.callbacks), engine)
    }

    pub fn config(&self) -> &MechanismConfig {
        &self.config
    }

    pub fn services(&self) -> &PluginServices {
        &self.services
    }
}

/// The dispatch table returned from `AuthorizationPluginCreate`.
pub fn plugin_interface() -> &'static AuthorizationPluginInterface {
    &PLUGIN_INTERFACE
}

pub fn register_plugin(record: PluginRecord) -> Result<Handle, HandleError> {
    PLUGINS.insert(Arc::new(record))
}

pub fn destroy_plugin(plugin: AuthorizationPluginRef) -> Result<(), MechanismError> {
    PLUGINS.remove(plugin)?;
    liblogger::log_info!("Plugin destroyed");
    Ok(())
}

/// Parse `mechanism_id` and register a new mechanism for `engine`. Nothing
/// is allocated when the id is refused.
pub fn create_mechanism(
    plugin: AuthorizationPluginRef,
    engine: EngineRef,
    mechanism_id: &str,
) -> Result<Handle, MechanismError> {
    let plugin = PLUGINS.validate(plugin)?;
    if engine.is_null() {
        return Err(MechanismError::InvalidParameter("engine"));
    }

    let spec = parse_mechanism_id(mechanism_id, plugin.config())?;
    let handle = MECHANISMS.insert(Arc::new(MechanismInstance::new(&plugin, engine, spec)))?;
    liblogger::log_info!(&format!("engine {}: created mechanism {}", engine, mechanism_id));
    Ok(handle)
}

pub fn invoke_mechanism(mechanism: AuthorizationMechanismRef) -> Result<InvokeStatus, MechanismError> {
    MECHANISMS.validate(mechanism)?.invoke()
}

pub fn deactivate_mechanism(mechanism: AuthorizationMechanismRef) -> Result<(), MechanismError> {
    MECHANISMS.validate(mechanism)?.deactivate()
}

pub fn destroy_mechanism(mechanism: AuthorizationMechanismRef) -> Result<(), MechanismError> {
    let instance = MECHANISMS.remove(mechanism)?;
    instance.destroy();
    liblogger::log_info!(&format!("engine {}: destroyed {}", instance.engine(), instance.spec().id));
    Ok(())
}

fn to_status<T>(result: Result<T, MechanismError>) -> OSStatus {
    match result {
        Ok(_) => ERR_AUTHORIZATION_SUCCESS,
        Err(e) => {
            liblogger::log_error!(&format!("{}", e));
            e.to_status()
        }
    }
}

/// Body of the exported `AuthorizationPluginCreate`.
///
/// Loads the configuration, brings up logging, asks `services` for the
/// prompt and resolver, then registers the plugin.
///
/// # Safety
///
/// Pointer arguments as for `AuthorizationPluginCreate`.
#[status_boundary]
pub unsafe fn plugin_create<F>(
    callbacks: *const AuthorizationCallbacks,
    out_plugin: *mut AuthorizationPluginRef,
    out_interface: *mut *const AuthorizationPluginInterface,
    services: F,
) -> OSStatus
where
    F: FnOnce(&PluginConfig) -> PluginServices,
{
    let config = PluginConfig::load();
    logging::init_logger(&config.logging);
    let services = services(&config);
    create_plugin_with(callbacks, config.mechanism, services, out_plugin, out_interface)
}

/// Validate the host's arguments and register a plugin with an explicit
/// configuration.
///
/// # Safety
///
/// `callbacks` must be null or a callback table that outlives the plugin.
/// The out pointers must be null or writable.
#[status_boundary]
pub unsafe fn create_plugin_with(
    callbacks: *const AuthorizationCallbacks,
    config: MechanismConfig,
    services: PluginServices,
    out_plugin: *mut AuthorizationPluginRef,
    out_interface: *mut *const AuthorizationPluginInterface,
) -> OSStatus {
    if out_plugin.is_null() || out_interface.is_null() {
        return ERR_SEC_PARAM;
    }
    let table = match CallbackTable::from_raw(callbacks) {
        Some(table) => table,
        None => return ERR_SEC_PARAM,
    };
    liblogger::log_info!(&format!("Host callback table version {}", table.version()));

    match register_plugin(PluginRecord::new(Arc::new(table), config, services)) {
        Ok(handle) => {
            *out_plugin = handle.into_raw();
            *out_interface = plugin_interface();
            ERR_AUTHORIZATION_SUCCESS
        }
        Err(e) => to_status::<()>(Err(e.into())),
    }
}

#[status_boundary]
unsafe extern "C" fn plugin_destroy(plugin: AuthorizationPluginRef) -> OSStatus {
    to_status(destroy_plugin(plugin))
}

#[status_boundary]
unsafe extern "C" fn mechanism_create(
    plugin: AuthorizationPluginRef,
    engine: AuthorizationEngineRef,
    mechanism_id: AuthorizationMechanismId,
    out_mechanism: *mut AuthorizationMechanismRef,
) -> OSStatus {
    if mechanism_id.is_null() || out_mechanism.is_null() {
        return ERR_SEC_PARAM;
    }
    let mechanism_id = match CStr::from_ptr(mechanism_id).to_str() {
        Ok(id) => id,
        Err(_) => return ERR_SEC_PARAM,
    };

    match create_mechanism(plugin, EngineRef::from_raw(engine), mechanism_id) {
        Ok(handle) => {
            *out_mechanism = handle.into_raw();
            ERR_AUTHORIZATION_SUCCESS
        }
        Err(e) => to_status::<()>(Err(e)),
    }
}

#[status_boundary]
unsafe extern "C" fn mechanism_invoke(mechanism: AuthorizationMechanismRef) -> OSStatus {
    to_status(invoke_mechanism(mechanism))
}

#[status_boundary]
unsafe extern "C" fn mechanism_deactivate(mechanism: AuthorizationMechanismRef) -> OSStatus {
    to_status(deactivate_mechanism(mechanism))
}

#[status_boundary]
unsafe extern "C" fn mechanism_destroy(mechanism: AuthorizationMechanismRef) -> OSStatus {
    to_status(destroy_mechanism(mechanism))
}
