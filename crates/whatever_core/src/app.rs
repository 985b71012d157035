//! Engine assembly: storage, handlers, replay, saga.
//!
//! # Responsibility
//! - Start file logging when the config asks for it.
//! - Open the event log and register projections and aggregates.
//! - Rebuild read models by a blocking replay before handing out the engine.
//! - Attach the live-only enrichment saga and its worker pool last.
//!
//! # Invariants
//! - A replay failure aborts `open`; no partially built engine escapes.
//! - The saga is subscribed after replay, so startup never enqueues jobs.
//! - The metadata extractor is only built when enrichment is enabled.

use crate::aggregate::{NoteAggregate, NoteRules, RealmAggregate};
use crate::catalog::Catalog;
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::db::{open_db, open_db_in_memory, DbError};
use crate::dispatch::{CommandBus, CommandSender};
use crate::logging::{init_logging, LoggingError};
use crate::projection::{NoteProjection, NoteReadModel, RealmProjection, RealmReadModel};
use crate::saga::{
    EnrichmentQueue, EnrichmentSaga, EnrichmentWorker, ExtractError, HttpMetadataExtractor,
    MetadataExtractor,
};
use crate::service::note_service::NoteService;
use crate::service::realm_service::RealmService;
use crate::store::{EventStore, StoreError, StoreResult};
use chrono::{DateTime, FixedOffset, Utc};
use log::{error, info};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug)]
pub enum EngineError {
    Logging(LoggingError),
    Db(DbError),
    Store(StoreError),
    Extractor(ExtractError),
    Spawn(std::io::Error),
}

impl Display for EngineError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Logging(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::Store(err) => write!(f, "{err}"),
            Self::Extractor(err) => write!(f, "enrichment extractor setup failed: {err}"),
            Self::Spawn(err) => write!(f, "enrichment worker spawn failed: {err}"),
        }
    }
}

impl Error for EngineError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Logging(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::Store(err) => Some(err),
            Self::Extractor(err) => Some(err),
            Self::Spawn(err) => Some(err),
        }
    }
}

impl From<LoggingError> for EngineError {
    fn from(value: LoggingError) -> Self {
        Self::Logging(value)
    }
}

impl From<DbError> for EngineError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<StoreError> for EngineError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<ExtractError> for EngineError {
    fn from(value: ExtractError) -> Self {
        Self::Extractor(value)
    }
}

/// A fully wired note engine.
pub struct Engine {
    config: EngineConfig,
    catalog: Arc<Catalog>,
    store: Arc<EventStore>,
    commands: Arc<CommandBus>,
    enrichment: Option<EnrichmentWorker>,
}

impl Engine {
    /// Opens with the standard catalog, wall clock and HTTP extractor.
    ///
    /// Starts file logging first when `config.logging` is set.
    pub fn open(config: EngineConfig) -> Result<Self, EngineError> {
        if let Some(logging) = config.logging.as_ref() {
            init_logging(logging)?;
        }
        let timeout = config.enrichment.timeout;
        Self::open_inner(config, Catalog::standard(), Arc::new(SystemClock), move || {
            let extractor: Arc<dyn MetadataExtractor> =
                Arc::new(HttpMetadataExtractor::new(timeout)?);
            Ok(extractor)
        })
    }

    /// Opens with explicit collaborators. Never touches the global logger.
    pub fn open_with(
        config: EngineConfig,
        catalog: Catalog,
        clock: Arc<dyn Clock>,
        extractor: Arc<dyn MetadataExtractor>,
    ) -> Result<Self, EngineError> {
        Self::open_inner(config, catalog, clock, move || Ok(extractor))
    }

    fn open_inner(
        config: EngineConfig,
        catalog: Catalog,
        clock: Arc<dyn Clock>,
        extractor: impl FnOnce() -> Result<Arc<dyn MetadataExtractor>, EngineError>,
    ) -> Result<Self, EngineError> {
        let started_at = Instant::now();
        let storage = if config.db_path.is_some() { "file" } else { "memory" };
        info!(
            "event=engine_open module=app status=start storage={} enrichment={}",
            storage, config.enrichment.enabled
        );

        match Self::build(config, catalog, clock, extractor) {
            Ok(engine) => {
                info!(
                    "event=engine_open module=app status=ok storage={} duration_ms={}",
                    storage,
                    started_at.elapsed().as_millis()
                );
                Ok(engine)
            }
            Err(err) => {
                error!(
                    "event=engine_open module=app status=error storage={} duration_ms={} error={}",
                    storage,
                    started_at.elapsed().as_millis(),
                    err
                );
                Err(err)
            }
        }
    }

    fn build(
        config: EngineConfig,
        catalog: Catalog,
        clock: Arc<dyn Clock>,
        extractor: impl FnOnce() -> Result<Arc<dyn MetadataExtractor>, EngineError>,
    ) -> Result<Self, EngineError> {
        let conn = match config.db_path.as_ref() {
            Some(path) => open_db(path)?,
            None => open_db_in_memory()?,
        };

        let mut store = EventStore::new(conn, Arc::clone(&clock));
        store.register_projection(Arc::new(NoteProjection::new()))?;
        store.register_projection(Arc::new(RealmProjection::new()))?;
        store.replay()?;

        let queue = if config.enrichment.enabled {
            let (queue, jobs) = EnrichmentQueue::channel();
            store.subscribe(
                EnrichmentSaga::SUBSCRIPTION,
                Arc::new(EnrichmentSaga::new(Arc::clone(&queue))),
            );
            Some((queue, jobs))
        } else {
            None
        };

        let store = Arc::new(store);
        let catalog = Arc::new(catalog);
        let rules = Arc::new(NoteRules::new(
            Arc::clone(&catalog),
            Arc::clone(&clock),
            config.time_zone,
        ));

        let mut bus = CommandBus::new(Arc::clone(&store));
        bus.register(move |id| NoteAggregate::new(id, Arc::clone(&rules)));
        bus.register(RealmAggregate::new);
        let commands = Arc::new(bus);

        let enrichment = match queue {
            Some((queue, jobs)) => {
                let sender: Arc<dyn CommandSender> = commands.clone();
                Some(
                    EnrichmentWorker::start(&config.enrichment, queue, jobs, extractor()?, sender)
                        .map_err(EngineError::Spawn)?,
                )
            }
            None => None,
        };

        Ok(Self {
            config,
            catalog,
            store,
            commands,
            enrichment,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn store(&self) -> &Arc<EventStore> {
        &self.store
    }

    /// Command entry point.
    pub fn commands(&self) -> &Arc<CommandBus> {
        &self.commands
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        self.store.clock()
    }

    pub fn time_zone(&self) -> FixedOffset {
        self.config.time_zone
    }

    /// Runs `query` against the note read model.
    pub fn with_notes<T>(
        &self,
        query: impl FnOnce(&NoteReadModel<'_>) -> StoreResult<T>,
    ) -> StoreResult<T> {
        self.store.with_notes(query)
    }

    /// Runs `query` against the realm read model.
    pub fn with_realms<T>(
        &self,
        query: impl FnOnce(&RealmReadModel<'_>) -> StoreResult<T>,
    ) -> StoreResult<T> {
        self.store.with_realms(query)
    }

    /// Due window `(start, end]` of a catalog timeframe, as of now.
    pub fn timeframe_range(&self, slug: &str) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        self.catalog
            .timeframe_range(slug, self.clock().now(), self.config.time_zone)
    }

    pub fn notes(&self) -> NoteService {
        let commands: Arc<dyn CommandSender> = self.commands.clone();
        NoteService::new(
            commands,
            Arc::clone(&self.store),
            Arc::clone(&self.catalog),
            self.config.time_zone,
        )
    }

    pub fn realms(&self) -> RealmService {
        let commands: Arc<dyn CommandSender> = self.commands.clone();
        RealmService::new(commands, Arc::clone(&self.store))
    }

    /// Stops the enrichment pool after reporting every queued job.
    pub fn shutdown(&mut self) {
        if let Some(worker) = self.enrichment.as_mut() {
            worker.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::saga::PageMetadata;
    use std::cell::Cell;

    struct Unused;

    impl MetadataExtractor for Unused {
        fn extract(&self, _: &str) -> Result<PageMetadata, ExtractError> {
            Err(ExtractError::Aborted)
        }
    }

    fn open_counting(config: EngineConfig, built: &Cell<usize>) -> Engine {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        Engine::open_inner(config, Catalog::standard(), clock, || {
            built.set(built.get() + 1);
            let extractor: Arc<dyn MetadataExtractor> = Arc::new(Unused);
            Ok(extractor)
        })
        .unwrap()
    }

    #[test]
    fn extractor_is_built_only_when_enrichment_is_enabled() {
        let built = Cell::new(0);
        let engine = open_counting(EngineConfig::in_memory().without_enrichment(), &built);
        assert_eq!(built.get(), 0);
        assert!(engine.enrichment.is_none());

        let mut engine = open_counting(EngineConfig::in_memory(), &built);
        assert_eq!(built.get(), 1);
        assert!(engine.enrichment.is_some());
        engine.shutdown();
    }

    #[test]
    fn open_with_enrichment_disabled_starts_empty() {
        let engine = Engine::open(EngineConfig::in_memory().without_enrichment()).unwrap();
        assert_eq!(engine.config().logging, None);
        assert_eq!(engine.store().event_count().unwrap(), 0);
    }
}
