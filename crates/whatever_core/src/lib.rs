//! Core of the whatever note engine.
//!
//! Every change is an event in one SQLite log. Aggregates validate commands,
//! projections keep queryable tables in step with the log, and a background
//! saga enriches link notes. This crate is the single source of truth for
//! business invariants.

pub mod aggregate;
pub mod app;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod logging;
pub mod model;
pub mod projection;
pub mod saga;
pub mod service;
pub mod store;

pub use aggregate::{Aggregate, ValidationError};
pub use app::{Engine, EngineError};
pub use catalog::Catalog;
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{ConfigError, EngineConfig, EnrichmentConfig, LoggingConfig};
pub use dispatch::{CommandBus, CommandError, CommandSender};
pub use logging::{default_log_level, init_logging, LoggingError};
pub use model::command::{Command, NoteCommand, RealmCommand};
pub use model::event::{DomainEvent, EventKind, RecordedEvent};
pub use model::AggregateId;
pub use projection::{NoteQuery, NoteRow, RealmRow};
pub use service::{NoteService, NoteServiceError, RealmService, RealmServiceError};
pub use store::{EventStore, StoreError, StoreResult};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
