use std::ffi::CString;
use std::ptr;

use plugin_api::{
    AuthorizationCallbacks, AuthorizationEngineRef, AuthorizationMechanismRef,
    AuthorizationPluginCreateFn, AuthorizationPluginInterface, AuthorizationPluginRef, OSStatus,
    ERR_AUTHORIZATION_SUCCESS, ERR_SEC_PARAM,
};

/// A created plugin and the host's binding to its dispatch table.
///
/// Produced by calling a plugin's `AuthorizationPluginCreate`, either after
/// loading it from disk (see [`crate::load_plugin`]) or directly when the
/// plugin is linked into the same binary. The binding does not destroy the
/// plugin on drop; call [`PluginBinding::destroy`] once every mechanism is
/// gone, the way a host tears a plugin down.
pub struct PluginBinding {
    /// Opaque reference the plugin returned.
    pub plugin: AuthorizationPluginRef,

    /// Dispatch table the plugin returned. Owned by the plugin.
    pub interface: *const AuthorizationPluginInterface,
}

fn check(status: OSStatus) -> Result<(), OSStatus> {
    if status == ERR_AUTHORIZATION_SUCCESS {
        Ok(())
    } else {
        Err(status)
    }
}

impl PluginBinding {
    /// Call `create` with `callbacks` and keep what it hands back.
    ///
    /// # Safety
    ///
    /// `create` must follow the `AuthorizationPluginCreate` contract and
    /// `callbacks` must outlive the plugin.
    pub unsafe fn create(
        create: AuthorizationPluginCreateFn,
        callbacks: *const AuthorizationCallbacks,
    ) -> Result<Self, OSStatus> {
        let mut plugin: AuthorizationPluginRef = ptr::null_mut();
        let mut interface: *const AuthorizationPluginInterface = ptr::null();
        check(create(callbacks, &mut plugin, &mut interface))?;
        if interface.is_null() {
            return Err(ERR_SEC_PARAM);
        }
        Ok(PluginBinding { plugin, interface })
    }

    fn interface(&self) -> &AuthorizationPluginInterface {
        // Non-null per `create`, and valid while the plugin is loaded.
        unsafe { &*self.interface }
    }

    pub fn interface_version(&self) -> u32 {
        self.interface().version
    }

    pub fn create_mechanism(
        &self,
        engine: AuthorizationEngineRef,
        mechanism_id: &str,
    ) -> Result<AuthorizationMechanismRef, OSStatus> {
        let id = CString::new(mechanism_id).map_err(|_| ERR_SEC_PARAM)?;
        let mut mechanism: AuthorizationMechanismRef = ptr::null_mut();
        check(unsafe { (self.interface().mechanism_create)(self.plugin, engine, id.as_ptr(), &mut mechanism) })?;
        Ok(mechanism)
    }

    pub fn invoke(&self, mechanism: AuthorizationMechanismRef) -> Result<(), OSStatus> {
        check(unsafe { (self.interface().mechanism_invoke)(mechanism) })
    }

    pub fn deactivate(&self, mechanism: AuthorizationMechanismRef) -> Result<(), OSStatus> {
        check(unsafe { (self.interface().mechanism_deactivate)(mechanism) })
    }

    pub fn destroy_mechanism(&self, mechanism: AuthorizationMechanismRef) -> Result<(), OSStatus> {
        check(unsafe { (self.interface().mechanism_destroy)(mechanism) })
    }

    pub fn destroy(self) -> Result<(), OSStatus> {
        check(unsafe { (self.interface().plugin_destroy)(self.plugin) })
    }
}

impl Clone for PluginBinding {
    fn clone(&self) -> Self {
        Self {
            plugin: self.plugin,
            interface: self.interface,
        }
    }
}

// The plugin's entry points may be called from any thread.
unsafe impl Send for PluginBinding {}
unsafe impl Sync for PluginBinding {}
