pub mod fake_engine;
pub use fake_engine::{host_callbacks, FakeEngine};

pub mod plugin_binding;
pub use plugin_binding::PluginBinding;

pub mod plugin_loader;
pub use plugin_loader::load_plugin;
