//! Command-line host for authorization plugins.
//!
//! Loads a plugin bundle, creates one in-memory evaluation session and runs
//! a single mechanism against it, the way an authorization host would for
//! one step of a right.

mod session;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use engine_core::{load_plugin, FakeEngine};
use liblogger::Logger;

use crate::session::{parse_key_value, run_mechanism, seed_context, seed_hints, KeyValue, RunOptions};

/// Authorization plugin test host.
#[derive(Parser, Debug)]
#[command(name = "authengine")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// TOML file with a [logging] section for the host's own log lines.
    #[arg(long, global = true)]
    log_config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one mechanism of a plugin.
    Run {
        /// Path to the plugin's shared library.
        #[arg(long)]
        plugin: PathBuf,

        /// Mechanism id, e.g. "Check,privileged".
        #[arg(long)]
        mechanism: String,

        /// Context value seeded before the invocation (key=value).
        #[arg(long = "context", value_parser = parse_key_value)]
        context: Vec<KeyValue>,

        /// Hint seeded before the invocation (key=value, true/false for flags).
        #[arg(long = "hint", value_parser = parse_key_value)]
        hints: Vec<KeyValue>,

        /// Seconds to wait for a result before deactivating the mechanism.
        #[arg(long, default_value_t = 120)]
        timeout: u64,

        /// Deactivate the mechanism after it reports.
        #[arg(long)]
        deactivate: bool,
    },
}

fn init_logging(config: Option<&PathBuf>) {
    let result = match config {
        Some(path) => Logger::init_with_config_file(path),
        None => Logger::init_with_config(liblogger::LogConfig::default()),
    };
    if let Err(e) = result {
        eprintln!("Error initializing logger: {}", e);
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.log_config.as_ref());

    match args.command {
        Command::Run {
            plugin,
            mechanism,
            context,
            hints,
            timeout,
            deactivate,
        } => {
            liblogger::log_info!(&format!("Loading plugin {}", plugin.display()));
            let (binding, _library) = match load_plugin(&plugin) {
                Ok(loaded) => loaded,
                Err(e) => {
                    liblogger::log_error!(&e);
                    return ExitCode::from(64);
                }
            };

            let engine = FakeEngine::new();
            if let Err(e) = seed_context(&engine, &context) {
                liblogger::log_error!(&e);
                return ExitCode::from(64);
            }
            seed_hints(&engine, &hints);

            let options = RunOptions {
                wait: Duration::from_secs(timeout),
                deactivate,
            };
            let report = run_mechanism(&binding, &engine, &mechanism, &options);

            if let Err(status) = binding.destroy() {
                liblogger::log_warn!(&format!("PluginDestroy failed with status {}", status));
            }

            match report {
                Ok(report) => {
                    println!("{}", report);
                    ExitCode::from(report.exit_code())
                }
                Err(e) => {
                    liblogger::log_error!(&e);
                    ExitCode::from(70)
                }
            }
        }
    }
}
