/*
 * Log output implementations
 *
 * - ConsoleOutput: writes to stderr (an authorization host's stdout is not
 *   a terminal and may be captured by the host itself)
 * - FileOutput: appends to a file, rotating it to `<name>.1` once it grows
 *   past the configured size
 *
 * Both are synchronous; see lib.rs for why nothing here spawns work.
 */

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::config::{LogConfig, LogType};

pub trait LogOutput: Send + Sync {
    fn write_log(&mut self, formatted_message: &str) -> Result<(), String>;
}

pub struct ConsoleOutput;

impl ConsoleOutput {
    pub fn new() -> Self {
        ConsoleOutput {}
    }
}

impl LogOutput for ConsoleOutput {
    fn write_log(&mut self, formatted_message: &str) -> Result<(), String> {
        writeln!(io::stderr(), "{}", formatted_message)
            .map_err(|e| format!("Failed to write to console: {}", e))
    }
}

pub struct FileOutput {
    path: PathBuf,
    file: File,
    written: u64,
    max_bytes: Option<u64>,
    force_flush: bool,
}

impl FileOutput {
    pub fn new(path: &Path, max_bytes: Option<u64>, force_flush: bool) -> Result<Self, String> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)
                    .map_err(|e| format!("Failed to create log directory: {}", e))?;
            }
        }

        let file = open_append(path)?;
        let written = file.metadata().map(|m| m.len()).unwrap_or(0);

        Ok(FileOutput {
            path: path.to_path_buf(),
            file,
            written,
            max_bytes,
            force_flush,
        })
    }

    fn rotate(&mut self) -> Result<(), String> {
        let mut rotated = self.path.clone().into_os_string();
        rotated.push(".1");

        self.file
            .flush()
            .map_err(|e| format!("Failed to flush log file before rotation: {}", e))?;
        fs::rename(&self.path, &rotated)
            .map_err(|e| format!("Failed to rotate log file: {}", e))?;

        self.file = open_append(&self.path)?;
        self.written = 0;
        Ok(())
    }
}

fn open_append(path: &Path) -> Result<File, String> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| format!("Failed to open log file: {}", e))
}

impl LogOutput for FileOutput {
    fn write_log(&mut self, formatted_message: &str) -> Result<(), String> {
        let line_len = formatted_message.len() as u64 + 1;
        if let Some(max) = self.max_bytes {
            if self.written > 0 && self.written + line_len > max {
                self.rotate()?;
            }
        }

        self.file
            .write_all(formatted_message.as_bytes())
            .map_err(|e| format!("Failed to write to log file: {}", e))?;
        self.file
            .write_all(b"\n")
            .map_err(|e| format!("Failed to write newline to log file: {}", e))?;
        self.written += line_len;

        if self.force_flush {
            self.file
                .flush()
                .map_err(|e| format!("Failed to flush log file: {}", e))?;
        }

        Ok(())
    }
}

/// Builds the output described by `config`.
pub fn create_log_output(config: &LogConfig) -> Result<Box<dyn LogOutput>, String> {
    match config.log_type {
        LogType::Console => Ok(Box::new(ConsoleOutput::new())),
        LogType::File => {
            let path = config
                .resolved_file_path()
                .ok_or_else(|| "File path not specified in configuration".to_string())?;
            Ok(Box::new(FileOutput::new(
                &path,
                config.max_file_size_bytes(),
                config.force_flush,
            )?))
        }
    }
}
