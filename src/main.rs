//! floatd - VIP and time-source failover daemon
//!
//! Usage:
//!   floatd [OPTIONS] [COMMAND]
//!
//! Commands:
//!   serve                  Run the failover service until SIGINT/SIGTERM
//!
//! Options:
//!   -c, --config <FILE>    Configuration file path
//!       --log <FILE>       Write logs to FILE instead of stdout
//!   -l, --log-level        Log level (error, warn, info, debug, trace)
//!   -h, --help             Print help

use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use tracing::error;

use floatd::config::Config;

/// Log level for CLI
#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    /// Only errors
    Error,
    /// Warnings and errors
    Warn,
    /// Informational messages
    Info,
    /// Debug messages
    Debug,
    /// Trace messages (very verbose)
    Trace,
}

impl LogLevel {
    fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// floatd - consensus-driven VIP and time-source failover
#[derive(Parser, Debug)]
#[command(name = "floatd")]
#[command(author = "floatd Contributors")]
#[command(version)]
#[command(about = "Consensus-driven failover of a virtual IP and the cluster time source")]
struct Args {
    /// Configuration file path (TOML format)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log file (stdout when omitted)
    #[arg(long, global = true)]
    log: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, value_enum, global = true)]
    log_level: Option<LogLevel>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the failover service until interrupted
    Serve,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let Some(Command::Serve) = args.command else {
        let _ = Args::command().print_help();
        return;
    };

    let (config, used) = match Config::discover(args.config.as_deref()) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            std::process::exit(1);
        }
    };
    match &used {
        Some(path) => println!("Using config file: {}", path.display()),
        None => println!("No config file found, using defaults and environment"),
    }

    // CLI overrides config
    let level = args
        .log_level
        .map(LogLevel::as_str)
        .unwrap_or(config.log.level.as_str())
        .to_string();
    let log_file = args.log.clone().or_else(|| config.log.file.clone());
    let guard = match floatd::logging::init(&level, config.log.format, log_file.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error setting up logging: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = floatd::serve(config).await {
        error!(error = %e, "fatal");
        eprintln!("Error: {}", e);
        drop(guard);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_shape() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_serve_with_global_flags() {
        let args = Args::try_parse_from([
            "floatd",
            "serve",
            "--config",
            "/etc/floatd/floatd.toml",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert!(matches!(args.command, Some(Command::Serve)));
        assert_eq!(args.config, Some(PathBuf::from("/etc/floatd/floatd.toml")));
        assert_eq!(args.log_level.map(LogLevel::as_str), Some("debug"));
    }

    #[test]
    fn test_no_subcommand() {
        let args = Args::try_parse_from(["floatd"]).unwrap();
        assert!(args.command.is_none());
    }
}
