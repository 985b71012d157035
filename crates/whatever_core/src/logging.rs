//! Process-wide logging for the engine.
//!
//! `Engine::open` calls [`init_logging`] when its config carries a
//! [`LoggingConfig`]; tests and embedders that build through
//! `Engine::open_with` leave the global logger alone.
//!
//! # Invariants
//! - One logger per process. Re-initializing with the same settings is a
//!   no-op; different settings are rejected.
//! - Engine diagnostics are metadata only. Note text never reaches the log,
//!   and panic payloads are flattened and capped before they are written.

use crate::config::LoggingConfig;
use flexi_logger::{
    Cleanup, Criterion, FileSpec, FlexiLoggerError, LogSpecification, Logger, LoggerHandle,
    Naming, WriteMode,
};
use log::{error, info, LevelFilter};
use once_cell::sync::OnceCell;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

const LOG_FILE_BASENAME: &str = "whatever";
const MAX_LOG_FILE_SIZE_BYTES: u64 = 10 * 1024 * 1024;
const MAX_LOG_FILES: usize = 5;
const MAX_PANIC_PAYLOAD_CHARS: usize = 160;

static ACTIVE: OnceCell<ActiveLogger> = OnceCell::new();

struct ActiveLogger {
    config: LoggingConfig,
    _handle: LoggerHandle,
}

#[derive(Debug)]
pub enum LoggingError {
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    Backend(FlexiLoggerError),
    /// A logger with other settings already runs in this process.
    Conflict {
        active: LoggingConfig,
        requested: LoggingConfig,
    },
}

impl Display for LoggingError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CreateDir { path, source } => {
                write!(f, "failed to create log directory `{}`: {source}", path.display())
            }
            Self::Backend(err) => write!(f, "failed to start logger: {err}"),
            Self::Conflict { active, requested } => write!(
                f,
                "logging already runs at `{}` level {}; refusing `{}` level {}",
                active.dir.display(),
                active.level,
                requested.dir.display(),
                requested.level
            ),
        }
    }
}

impl Error for LoggingError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::CreateDir { source, .. } => Some(source),
            Self::Backend(err) => Some(err),
            Self::Conflict { .. } => None,
        }
    }
}

/// Starts the rotating file logger described by `config`.
pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingError> {
    let active = ACTIVE.get_or_try_init(|| start(config))?;
    if active.config != *config {
        return Err(LoggingError::Conflict {
            active: active.config.clone(),
            requested: config.clone(),
        });
    }
    Ok(())
}

/// `debug` for debug builds, `info` otherwise.
pub fn default_log_level() -> LevelFilter {
    if cfg!(debug_assertions) {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    }
}

fn start(config: &LoggingConfig) -> Result<ActiveLogger, LoggingError> {
    std::fs::create_dir_all(&config.dir).map_err(|source| LoggingError::CreateDir {
        path: config.dir.clone(),
        source,
    })?;

    let handle = Logger::with(LogSpecification::builder().default(config.level).build())
        .log_to_file(
            FileSpec::default()
                .directory(config.dir.as_path())
                .basename(LOG_FILE_BASENAME),
        )
        .rotate(
            Criterion::Size(MAX_LOG_FILE_SIZE_BYTES),
            Naming::Numbers,
            Cleanup::KeepLogFiles(MAX_LOG_FILES),
        )
        .write_mode(WriteMode::BufferAndFlush)
        .append()
        .format_for_files(flexi_logger::detailed_format)
        .start()
        .map_err(LoggingError::Backend)?;

    install_panic_hook();
    info!(
        "event=logging_init module=logging status=ok level={} log_dir={} version={}",
        config.level,
        config.dir.display(),
        env!("CARGO_PKG_VERSION")
    );

    Ok(ActiveLogger {
        config: config.clone(),
        _handle: handle,
    })
}

// Runs at most once: `start` is only reached through the `OnceCell` init.
fn install_panic_hook() {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let location = panic_info
            .location()
            .map(|loc| format!("{}:{}", loc.file(), loc.line()))
            .unwrap_or_else(|| "unknown".to_string());
        let payload = panic_info
            .payload()
            .downcast_ref::<&str>()
            .map(|message| (*message).to_string())
            .or_else(|| panic_info.payload().downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        error!(
            "event=panic_captured module=logging status=error location={} payload={}",
            location,
            one_line(&payload, MAX_PANIC_PAYLOAD_CHARS)
        );
        previous(panic_info);
    }));
}

fn one_line(value: &str, max_chars: usize) -> String {
    let flat = value.replace(['\n', '\r'], " ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let mut cut: String = flat.chars().take(max_chars).collect();
    cut.push_str("...");
    cut
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_line_flattens_and_caps() {
        assert_eq!(one_line("line1\nline2\rline3", 8), "line1 li...");
        assert_eq!(one_line("short", 8), "short");
    }

    #[test]
    fn init_is_idempotent_and_rejects_other_settings() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        let config = LoggingConfig {
            dir: first.path().join("logs"),
            level: LevelFilter::Info,
        };

        init_logging(&config).unwrap();
        init_logging(&config).unwrap();
        assert!(config.dir.is_dir());

        let louder = LoggingConfig {
            level: LevelFilter::Trace,
            ..config.clone()
        };
        assert!(matches!(
            init_logging(&louder),
            Err(LoggingError::Conflict { .. })
        ));

        let elsewhere = LoggingConfig {
            dir: second.path().to_path_buf(),
            ..config
        };
        let err = init_logging(&elsewhere).unwrap_err();
        assert!(err.to_string().contains("refusing"));
    }
}
