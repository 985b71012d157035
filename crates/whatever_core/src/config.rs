//! Engine configuration.
//!
//! # Responsibility
//! - Hold process-wide settings resolved once at startup.
//! - Parse overrides from `WHATEVER_*` environment variables.
//!
//! # Invariants
//! - `time_zone` is a fixed offset; due dates never shift with DST rules.
//! - `enrichment.workers` is at least 1 and `enrichment.timeout` is non-zero.
//! - `logging.dir` is absolute.

use crate::logging::default_log_level;
use chrono::{FixedOffset, Offset, Utc};
use log::LevelFilter;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_DB_PATH: &str = "WHATEVER_DB";
pub const ENV_UTC_OFFSET: &str = "WHATEVER_UTC_OFFSET";
pub const ENV_ENRICH_WORKERS: &str = "WHATEVER_ENRICH_WORKERS";
pub const ENV_ENRICH_TIMEOUT_SECS: &str = "WHATEVER_ENRICH_TIMEOUT_SECS";
pub const ENV_LOG_DIR: &str = "WHATEVER_LOG_DIR";
pub const ENV_LOG_LEVEL: &str = "WHATEVER_LOG_LEVEL";

/// America/Creston, which observes no daylight saving.
const DEFAULT_UTC_OFFSET_SECS: i32 = -7 * 3600;
const DEFAULT_ENRICH_WORKERS: usize = 2;
const DEFAULT_ENRICH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidValue { key: &'static str, value: String },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { key, value } => {
                write!(f, "invalid value `{value}` for {key}")
            }
        }
    }
}

impl Error for ConfigError {}

/// Settings for the asynchronous enrichment saga.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichmentConfig {
    /// When false, enrichment requests are recorded but never fetched.
    pub enabled: bool,
    /// Size of the fetch worker pool.
    pub workers: usize,
    /// Upper bound for one metadata fetch.
    pub timeout: Duration,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            workers: DEFAULT_ENRICH_WORKERS,
            timeout: DEFAULT_ENRICH_TIMEOUT,
        }
    }
}

/// Rotating file logger settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub dir: PathBuf,
    pub level: LevelFilter,
}

impl LoggingConfig {
    /// Logs into `dir` at the build's default level.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Event log file. `None` keeps the log in memory.
    pub db_path: Option<PathBuf>,
    /// Zone used for "local midnight" in due-date arithmetic.
    pub time_zone: FixedOffset,
    pub enrichment: EnrichmentConfig,
    /// File logging started by `Engine::open`. `None` leaves logging off.
    pub logging: Option<LoggingConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            time_zone: default_time_zone(),
            enrichment: EnrichmentConfig::default(),
            logging: None,
        }
    }
}

impl EngineConfig {
    /// In-memory log with default settings.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// File-backed log with default settings.
    pub fn with_db_path(path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: Some(path.into()),
            ..Self::default()
        }
    }

    pub fn time_zone(mut self, time_zone: FixedOffset) -> Self {
        self.time_zone = time_zone;
        self
    }

    pub fn enrichment(mut self, enrichment: EnrichmentConfig) -> Self {
        self.enrichment = enrichment;
        self
    }

    pub fn logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = Some(logging);
        self
    }

    /// Disables the enrichment worker pool.
    pub fn without_enrichment(mut self) -> Self {
        self.enrichment.enabled = false;
        self
    }

    /// Builds a config from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup.
    ///
    /// Unset or blank keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let read = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let mut config = Self::default();

        if let Some(path) = read(ENV_DB_PATH) {
            config.db_path = Some(PathBuf::from(path));
        }

        if let Some(raw) = read(ENV_UTC_OFFSET) {
            config.time_zone = parse_utc_offset(&raw).ok_or(ConfigError::InvalidValue {
                key: ENV_UTC_OFFSET,
                value: raw,
            })?;
        }

        if let Some(raw) = read(ENV_ENRICH_WORKERS) {
            config.enrichment.workers = raw
                .parse::<usize>()
                .ok()
                .filter(|workers| *workers > 0)
                .ok_or(ConfigError::InvalidValue {
                    key: ENV_ENRICH_WORKERS,
                    value: raw,
                })?;
        }

        if let Some(raw) = read(ENV_ENRICH_TIMEOUT_SECS) {
            let secs = raw
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .ok_or(ConfigError::InvalidValue {
                    key: ENV_ENRICH_TIMEOUT_SECS,
                    value: raw,
                })?;
            config.enrichment.timeout = Duration::from_secs(secs);
        }

        // The level only matters once a directory turns logging on.
        if let Some(dir) = read(ENV_LOG_DIR) {
            if !Path::new(&dir).is_absolute() {
                return Err(ConfigError::InvalidValue {
                    key: ENV_LOG_DIR,
                    value: dir,
                });
            }
            let mut logging = LoggingConfig::new(dir);
            if let Some(raw) = read(ENV_LOG_LEVEL) {
                logging.level = raw
                    .parse::<LevelFilter>()
                    .map_err(|_| ConfigError::InvalidValue {
                        key: ENV_LOG_LEVEL,
                        value: raw,
                    })?;
            }
            config.logging = Some(logging);
        }

        Ok(config)
    }
}

/// Default zone for due-date arithmetic (UTC-07:00).
pub fn default_time_zone() -> FixedOffset {
    FixedOffset::east_opt(DEFAULT_UTC_OFFSET_SECS).unwrap_or_else(|| Utc.fix())
}

/// Parses `+HH:MM`, `-HH:MM`, `+HHMM` or `Z`.
pub fn parse_utc_offset(value: &str) -> Option<FixedOffset> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("z") || value.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0);
    }

    let (sign, rest) = match value.as_bytes().first()? {
        b'+' => (1, &value[1..]),
        b'-' => (-1, &value[1..]),
        _ => return None,
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let hours: i32 = digits[..2].parse().ok()?;
    let minutes: i32 = digits[2..].parse().ok()?;
    if hours > 23 || minutes > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn parse_utc_offset_accepts_common_forms() {
        assert_eq!(parse_utc_offset("-07:00").unwrap().local_minus_utc(), -25200);
        assert_eq!(parse_utc_offset("+0530").unwrap().local_minus_utc(), 19800);
        assert_eq!(parse_utc_offset("Z").unwrap().local_minus_utc(), 0);
        assert!(parse_utc_offset("07:00").is_none());
        assert!(parse_utc_offset("+25:00").is_none());
    }

    #[test]
    fn from_lookup_applies_overrides_and_keeps_defaults() {
        let vars: HashMap<&str, &str> = HashMap::from([
            (ENV_DB_PATH, "/tmp/whatever/data.sqlite"),
            (ENV_ENRICH_WORKERS, "4"),
            (ENV_UTC_OFFSET, "   "),
        ]);
        let config =
            EngineConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap();

        assert_eq!(
            config.db_path.as_deref(),
            Some(std::path::Path::new("/tmp/whatever/data.sqlite"))
        );
        assert_eq!(config.enrichment.workers, 4);
        assert_eq!(config.time_zone, default_time_zone());
        assert_eq!(config.enrichment.timeout, DEFAULT_ENRICH_TIMEOUT);
        assert_eq!(config.logging, None);
    }

    #[test]
    fn from_lookup_reads_log_dir_and_level() {
        let vars: HashMap<&str, &str> = HashMap::from([
            (ENV_LOG_DIR, "/var/log/whatever"),
            (ENV_LOG_LEVEL, "WARN"),
        ]);
        let config =
            EngineConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap();
        assert_eq!(
            config.logging,
            Some(LoggingConfig {
                dir: PathBuf::from("/var/log/whatever"),
                level: LevelFilter::Warn,
            })
        );

        let default_level = EngineConfig::from_lookup(|key| {
            (key == ENV_LOG_DIR).then(|| "/var/log/whatever".to_string())
        })
        .unwrap();
        assert_eq!(
            default_level.logging.map(|logging| logging.level),
            Some(default_log_level())
        );
    }

    #[test]
    fn from_lookup_rejects_relative_log_dir_and_unknown_level() {
        let relative = EngineConfig::from_lookup(|key| {
            (key == ENV_LOG_DIR).then(|| "logs/dev".to_string())
        })
        .unwrap_err();
        assert_eq!(
            relative,
            ConfigError::InvalidValue {
                key: ENV_LOG_DIR,
                value: "logs/dev".to_string()
            }
        );

        let vars: HashMap<&str, &str> =
            HashMap::from([(ENV_LOG_DIR, "/var/log/whatever"), (ENV_LOG_LEVEL, "verbose")]);
        let level = EngineConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap_err();
        assert!(matches!(level, ConfigError::InvalidValue { key: ENV_LOG_LEVEL, .. }));
    }

    #[test]
    fn from_lookup_rejects_zero_workers() {
        let err = EngineConfig::from_lookup(|key| {
            (key == ENV_ENRICH_WORKERS).then(|| "0".to_string())
        })
        .unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                key: ENV_ENRICH_WORKERS,
                value: "0".to_string()
            }
        );
    }
}
