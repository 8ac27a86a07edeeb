/*
 * Configuration for the logger
 *
 * Parsed from the [logging] section of the plugin's TOML file. Values are
 * matched case-insensitively so administrators can write "Info" or "INFO".
 * Anything missing falls back to console output at Info.
 */

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Log severity levels, ordered from most to least verbose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl<'de> Deserialize<'de> for LogLevel {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        match s.to_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(serde::de::Error::unknown_variant(
                &s,
                &["debug", "info", "warn", "warning", "error"],
            )),
        }
    }
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

/// Where log lines go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LogType {
    Console,
    File,
}

impl<'de> Deserialize<'de> for LogType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        match s.to_lowercase().as_str() {
            "console" | "stderr" => Ok(LogType::Console),
            "file" => Ok(LogType::File),
            _ => Err(serde::de::Error::unknown_variant(&s, &["console", "file"])),
        }
    }
}

/// Configuration for the logger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Type of output (console, file)
    #[serde(rename = "type", default = "default_log_type")]
    pub log_type: LogType,

    /// Minimum log level to record
    #[serde(default = "default_threshold")]
    pub threshold: LogLevel,

    /// File name (or full path) for file-based logging
    #[serde(default)]
    pub file_path: Option<String>,

    /// Folder the file name is joined onto
    #[serde(default)]
    pub log_folder: Option<String>,

    /// Rotate the file once it grows past this many MB
    #[serde(default)]
    pub max_file_size_mb: Option<u64>,

    /// Flush after every line
    #[serde(default)]
    pub force_flush: bool,

    /// Tag written on every line, like a unified-logging subsystem
    #[serde(default = "default_subsystem")]
    pub subsystem: String,
}

fn default_log_type() -> LogType {
    LogType::Console
}

fn default_threshold() -> LogLevel {
    LogLevel::Info
}

fn default_subsystem() -> String {
    "com.authmech".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            log_type: default_log_type(),
            threshold: default_threshold(),
            file_path: None,
            log_folder: None,
            max_file_size_mb: None,
            force_flush: false,
            subsystem: default_subsystem(),
        }
    }
}

/// Wrapper for files that keep the logger under a [logging] table
#[derive(Debug, Deserialize)]
struct ConfigWrapper {
    logging: LogConfig,
}

impl LogConfig {
    /// Reads the [logging] section of a TOML file. A missing file is not an
    /// error; the defaults are returned instead.
    pub fn from_file<P: AsRef<Path>>(file_path: P) -> Result<Self, String> {
        let file_path = file_path.as_ref();
        let config_str = match fs::read_to_string(file_path) {
            Ok(content) => content,
            Err(e) => {
                eprintln!(
                    "Warning: could not read config file '{}': {}. Using defaults.",
                    file_path.display(),
                    e
                );
                return Ok(LogConfig::default());
            }
        };

        Self::from_toml_str(&config_str)
    }

    /// Parses either a file with a [logging] table or a bare logging table.
    pub fn from_toml_str(config_str: &str) -> Result<Self, String> {
        let table: toml::Table = config_str
            .parse()
            .map_err(|e| format!("Failed to parse logging config: {}", e))?;

        if table.contains_key("logging") {
            return toml::from_str::<ConfigWrapper>(config_str)
                .map(|wrapper| wrapper.logging)
                .map_err(|e| format!("Failed to parse logging config: {}", e));
        }

        toml::Value::Table(table)
            .try_into::<LogConfig>()
            .map_err(|e| format!("Failed to parse logging config: {}", e))
    }

    /// Full path of the log file, joining `log_folder` when present.
    pub fn resolved_file_path(&self) -> Option<PathBuf> {
        let file_path = self.file_path.as_ref()?;
        Some(match &self.log_folder {
            Some(folder) => Path::new(folder).join(file_path),
            None => PathBuf::from(file_path),
        })
    }

    pub fn max_file_size_bytes(&self) -> Option<u64> {
        self.max_file_size_mb.map(|mb| mb * 1024 * 1024)
    }
}
