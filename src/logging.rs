//! Subscriber installation for the binary
//!
//! Library code only emits `tracing` events; nothing here is reachable from
//! the manager or the adapters.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

use crate::config::LogFormat;

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log level '{level}': {reason}")]
    Filter { level: String, reason: String },

    #[error("invalid log file path {0}")]
    InvalidPath(PathBuf),

    #[error("failed to create log directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to install subscriber: {0}")]
    Init(String),
}

/// Keeps the background log writer alive; drop it last
#[must_use]
pub struct LogGuard {
    _worker: Option<WorkerGuard>,
}

/// Filter for a level or directive string such as `info` or `floatd=debug`
pub fn filter(level: &str) -> Result<EnvFilter, LoggingError> {
    EnvFilter::try_new(level.trim()).map_err(|e| LoggingError::Filter {
        level: level.to_string(),
        reason: e.to_string(),
    })
}

/// Install the global subscriber, writing to `file` when given, else stdout
pub fn init(level: &str, format: LogFormat, file: Option<&Path>) -> Result<LogGuard, LoggingError> {
    let filter = filter(level)?;

    let (writer, worker) = match file {
        Some(path) => {
            let name = path
                .file_name()
                .ok_or_else(|| LoggingError::InvalidPath(path.to_path_buf()))?;
            let dir = path
                .parent()
                .filter(|dir| !dir.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            std::fs::create_dir_all(dir).map_err(|source| LoggingError::Io {
                path: dir.to_path_buf(),
                source,
            })?;

            let appender = tracing_appender::rolling::never(dir, name);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            (BoxMakeWriter::new(non_blocking), Some(guard))
        }
        None => (BoxMakeWriter::new(std::io::stdout), None),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(worker.is_none())
        .with_target(false);

    let installed = match format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|e| LoggingError::Init(e.to_string()))?;

    Ok(LogGuard { _worker: worker })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_accepts_levels_and_directives() {
        for level in ["error", "warn", "info", "debug", "trace", "floatd=debug,info"] {
            assert!(filter(level).is_ok(), "{level}");
        }
    }

    #[test]
    fn test_filter_rejects_garbage() {
        let err = filter("floatd=loud").unwrap_err();
        assert!(err.to_string().contains("floatd=loud"));
    }

    #[test]
    fn test_file_without_name_rejected() {
        let err = init("info", LogFormat::Compact, Some(Path::new("/"))).err().unwrap();
        assert!(matches!(err, LoggingError::InvalidPath(_)));
    }
}
