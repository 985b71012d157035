//! CLI smoke entry point.
//!
//! # Responsibility
//! - Open an event log (first positional argument, else `WHATEVER_DB`),
//!   replay it and print a short summary.
//! - Exit non-zero when configuration, open or replay fails.
//!
//! Settings come from `WHATEVER_*` variables; `WHATEVER_LOG_DIR` and
//! `WHATEVER_LOG_LEVEL` turn on file logging.

use log::{error, info};
use std::path::PathBuf;
use std::process::ExitCode;
use whatever_core::{core_version, Engine, EngineConfig};

fn main() -> ExitCode {
    match run(std::env::args().nth(1).map(PathBuf::from)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            error!("event=cli_run module=cli status=error error={}", message);
            eprintln!("whatever: {message}");
            ExitCode::FAILURE
        }
    }
}

fn run(path: Option<PathBuf>) -> Result<(), String> {
    let mut config = EngineConfig::from_env().map_err(|err| err.to_string())?;
    if let Some(path) = path {
        config.db_path = Some(path);
    }
    // A summary never needs fetched metadata.
    let config = config.without_enrichment();
    let storage = config
        .db_path
        .as_ref()
        .map_or_else(|| ":memory:".to_string(), |path| path.display().to_string());

    let mut engine = Engine::open(config).map_err(|err| err.to_string())?;

    let events = engine.store().event_count().map_err(|err| err.to_string())?;
    let (live, deleted) = engine
        .with_notes(|notes| Ok((notes.count(false)?, notes.count(true)?)))
        .map_err(|err| err.to_string())?;
    let realms = engine.realms().list().map_err(|err| err.to_string())?.len();

    println!("whatever_core version={}", core_version());
    println!("log={storage}");
    println!("events={events} notes={live} deleted_notes={deleted} realms={realms}");

    engine.shutdown();
    info!(
        "event=cli_run module=cli status=ok events={} notes={} realms={}",
        events, live, realms
    );
    Ok(())
}
