use std::path::Path;

use libloading::{Library, Symbol};
use plugin_api::{AuthorizationPluginCreateFn, PLUGIN_CREATE_SYMBOL};

use crate::fake_engine::host_callbacks;
use crate::plugin_binding::PluginBinding;

/// Loads a plugin from a shared library file and returns a PluginBinding.
/// This assumes the plugin exports `AuthorizationPluginCreate`; the plugin
/// is created against the [`crate::FakeEngine`] callback table.
///
/// The returned `Library` must outlive the binding.
pub fn load_plugin<P: AsRef<Path>>(path: P) -> Result<(PluginBinding, Library), String> {
    unsafe {
        let lib = Library::new(path.as_ref()).map_err(|e| format!("Failed to load plugin: {}", e))?;

        let create: Symbol<AuthorizationPluginCreateFn> = lib
            .get(PLUGIN_CREATE_SYMBOL)
            .map_err(|e| format!("Missing symbol: {}", e))?;

        let binding = PluginBinding::create(*create, host_callbacks())
            .map_err(|status| format!("AuthorizationPluginCreate failed with status {}", status))?;

        liblogger::log_info!(&format!(
            "Loaded {} (interface version {})",
            path.as_ref().display(),
            binding.interface_version()
        ));

        // Return both the binding and the Library to keep it alive
        Ok((binding, lib))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_library_is_an_error() {
        let err = load_plugin("/nonexistent/libplugin_authmech.so").err().unwrap();
        assert!(err.starts_with("Failed to load plugin"), "{}", err);
    }
}
