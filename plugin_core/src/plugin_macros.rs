/// Macro to declare the plugin's exported `AuthorizationPluginCreate` symbol.
///
/// `$services_fn` receives the loaded configuration and returns the
/// prompt and identity resolver the mechanisms use.
///
/// ```ignore
/// fn services(config: &PluginConfig) -> PluginServices { ... }
/// plugin_core::declare_auth_plugin!(services);
/// ```
#[macro_export]
macro_rules! declare_auth_plugin {
    ($services_fn:path) => {
        /// Entry point looked up by the authorization host.
        ///
        /// # Safety
        ///
        /// `callbacks` must outlive the plugin; the out pointers must be
        /// writable.
        #[no_mangle]
        #[allow(non_snake_case)]
        pub unsafe extern "C" fn AuthorizationPluginCreate(
            callbacks: *const $crate::plugin_api::AuthorizationCallbacks,
            out_plugin: *mut $crate::plugin_api::AuthorizationPluginRef,
            out_plugin_interface: *mut *const $crate::plugin_api::AuthorizationPluginInterface,
        ) -> $crate::plugin_api::OSStatus {
            $crate::plugin_controller::plugin_create(
                callbacks,
                out_plugin,
                out_plugin_interface,
                $services_fn,
            )
        }

        // Checked at compile time against the signature hosts expect.
        const _: $crate::plugin_api::AuthorizationPluginCreateFn = AuthorizationPluginCreate;
    };
}
