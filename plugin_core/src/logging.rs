//! Logging functionality for plugins
//!
//! Re-exports the `liblogger` macros so plugin crates log through the same
//! subsystem and file as the rest of plugin_core.

pub use liblogger::{log_debug, log_error, log_info, log_warn, LogConfig, Logger};
pub use liblogger_macros::status_boundary;

/// Initialize the logger from the `[logging]` section of the plugin
/// configuration.
///
/// A file output that cannot be opened must not keep the plugin from
/// loading, so any failure falls back to console logging.
pub fn init_logger(config: &LogConfig) {
    if let Err(e) = Logger::init_with_config(config.clone()) {
        eprintln!("Error initializing logger from config: {}", e);
        if let Err(e) = Logger::init_with_config(LogConfig::default()) {
            eprintln!("Error initializing console logger: {}", e);
        }
    }
}
