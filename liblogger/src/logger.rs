/*
 * Logger implementation
 *
 * A single process-wide logger lives behind a OnceCell. Until it is
 * configured, lines go to stderr so early failures in the load path are
 * still visible. Every line is:
 *
 *   <timestamp> [<LEVEL>] [<subsystem>:<category>] [<file>:<line>] <message>[ | <context>]
 *
 * where the category is the last segment of the emitting module path.
 */

use chrono::Utc;
use once_cell::sync::OnceCell;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Mutex;

use crate::config::{LogConfig, LogLevel};
use crate::outputs::{create_log_output, LogOutput};

static LOGGER_INSTANCE: OnceCell<Mutex<LoggerInner>> = OnceCell::new();

struct LoggerInner {
    config: LogConfig,
    output: Option<Box<dyn LogOutput>>,
}

impl LoggerInner {
    fn new() -> Self {
        LoggerInner {
            config: LogConfig::default(),
            output: None,
        }
    }

    fn log(&mut self, level: LogLevel, message: &str, context: Option<&str>, file: &str, line: u32, module: &str) {
        if level < self.config.threshold {
            return;
        }

        let formatted = format_log_message(
            &Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            level,
            &self.config.subsystem,
            category_of(module),
            message,
            context,
            file,
            line,
        );

        match self.output {
            Some(ref mut output) => {
                if let Err(e) = output.write_log(&formatted) {
                    let _ = writeln!(io::stderr(), "{} | output failed: {}", formatted, e);
                }
            }
            None => {
                let _ = writeln!(io::stderr(), "{}", formatted);
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn format_log_message(
    timestamp: &str,
    level: LogLevel,
    subsystem: &str,
    category: &str,
    message: &str,
    context: Option<&str>,
    file: &str,
    line: u32,
) -> String {
    match context {
        Some(ctx) => format!(
            "{} [{}] [{}:{}] [{}:{}] {} | {}",
            timestamp, level.as_str(), subsystem, category, file, line, message, ctx
        ),
        None => format!(
            "{} [{}] [{}:{}] [{}:{}] {}",
            timestamp, level.as_str(), subsystem, category, file, line, message
        ),
    }
}

/// `plugin_core::credential_collector` -> `credential_collector`
fn category_of(module: &str) -> &str {
    module.rsplit("::").next().unwrap_or(module)
}

fn instance() -> &'static Mutex<LoggerInner> {
    LOGGER_INSTANCE.get_or_init(|| Mutex::new(LoggerInner::new()))
}

pub struct Logger;

impl Logger {
    /// Configures the logger from the [logging] section of a TOML file.
    pub fn init_with_config_file<P: AsRef<Path>>(config_path: P) -> Result<(), String> {
        let config = LogConfig::from_file(config_path)?;
        Self::init_with_config(config)
    }

    /// (Re)configures the logger. Safe to call more than once; the last
    /// configuration wins, which lets a reloaded plugin pick up new settings.
    pub fn init_with_config(config: LogConfig) -> Result<(), String> {
        let output = create_log_output(&config)?;

        let mut inner = match instance().lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner.output = Some(output);
        inner.config = config;
        Ok(())
    }

    pub fn is_enabled(level: LogLevel) -> bool {
        match instance().lock() {
            Ok(inner) => level >= inner.config.threshold,
            Err(_) => true,
        }
    }

    pub fn debug(message: &str, context: Option<String>, file: &'static str, line: u32, module: &'static str) {
        Self::log_with_metadata(LogLevel::Debug, message, context, file, line, module)
    }

    pub fn info(message: &str, context: Option<String>, file: &'static str, line: u32, module: &'static str) {
        Self::log_with_metadata(LogLevel::Info, message, context, file, line, module)
    }

    pub fn warn(message: &str, context: Option<String>, file: &'static str, line: u32, module: &'static str) {
        Self::log_with_metadata(LogLevel::Warn, message, context, file, line, module)
    }

    pub fn error(message: &str, context: Option<String>, file: &'static str, line: u32, module: &'static str) {
        Self::log_with_metadata(LogLevel::Error, message, context, file, line, module)
    }

    fn log_with_metadata(level: LogLevel, message: &str, context: Option<String>, file: &str, line: u32, module: &str) {
        let file_name = Path::new(file)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(file);

        match instance().lock() {
            Ok(mut inner) => inner.log(level, message, context.as_deref(), file_name, line, module),
            Err(_) => {
                let fallback = format!(
                    "{} [{}] [{}:{}] {} | MUTEX POISONED",
                    Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
                    level.as_str(),
                    file_name,
                    line,
                    message
                );
                let _ = writeln!(io::stderr(), "{}", fallback);
            }
        }
    }
}
