//! Command dispatcher: load, fold, validate, append.
//!
//! # Responsibility
//! - Route each [`Command`] to the handler registered for its aggregate kind.
//! - Rebuild the target aggregate from its stream on every command.
//! - Append the produced events atomically through the [`EventStore`].
//!
//! # Invariants
//! - A rejected command appends nothing.
//! - Commands run one at a time, so validation always sees the latest stream.
//! - Routing mistakes (unregistered kind, wrong handler, id mismatch) are
//!   programming errors and panic.

use crate::aggregate::{Aggregate, ValidationError};
use crate::model::command::Command;
use crate::model::event::{NewEvent, RecordedEvent};
use crate::model::{AggregateId, AggregateKind};
use crate::store::{EventStore, StoreError};
use log::{debug, info};
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

#[derive(Debug)]
pub enum CommandError {
    Validation(ValidationError),
    Store(StoreError),
}

impl Display for CommandError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Store(err) => write!(f, "{err}"),
        }
    }
}

impl Error for CommandError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Store(err) => Some(err),
        }
    }
}

impl From<ValidationError> for CommandError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<StoreError> for CommandError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

/// Outward entry point for state changes.
pub trait CommandSender: Send + Sync {
    fn send(&self, command: Command) -> Result<(), CommandError>;
}

/// Handles commands for exactly one aggregate kind.
pub trait CommandHandler: Send + Sync {
    fn kind(&self) -> AggregateKind;

    fn handle(
        &self,
        store: &EventStore,
        command: Command,
    ) -> Result<Vec<RecordedEvent>, CommandError>;
}

/// Generic handler built from a zero-state factory.
pub struct AggregateHandler<A, F> {
    factory: F,
    _aggregate: PhantomData<fn() -> A>,
}

impl<A, F> AggregateHandler<A, F>
where
    A: Aggregate,
    F: Fn(AggregateId) -> A + Send + Sync,
{
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            _aggregate: PhantomData,
        }
    }

    /// Folds the stored stream of `id` into a fresh aggregate.
    pub fn load(&self, store: &EventStore, id: AggregateId) -> Result<A, StoreError> {
        let mut aggregate = (self.factory)(id);
        assert_eq!(
            aggregate.id(),
            id,
            "aggregate factory returned an instance for a different id"
        );

        for recorded in store.load_stream(id)? {
            if recorded.aggregate_type != A::KIND {
                return Err(StoreError::InvalidData(format!(
                    "stream {id} holds {} event #{} but is loaded as {}",
                    recorded.aggregate_type,
                    recorded.sequence,
                    A::KIND
                )));
            }
            aggregate.apply(&recorded.event);
        }
        Ok(aggregate)
    }
}

impl<A, F> CommandHandler for AggregateHandler<A, F>
where
    A: Aggregate,
    F: Fn(AggregateId) -> A + Send + Sync,
{
    fn kind(&self) -> AggregateKind {
        A::KIND
    }

    fn handle(
        &self,
        store: &EventStore,
        command: Command,
    ) -> Result<Vec<RecordedEvent>, CommandError> {
        let id = command.aggregate_id();
        let command = A::Command::try_from(command).unwrap_or_else(|other| {
            panic!(
                "command {} for {} routed to {} handler",
                other.name(),
                other.aggregate_kind(),
                A::KIND
            )
        });

        let aggregate = self.load(store, id)?;
        let events = aggregate.handle(command)?;
        let new_events = events
            .into_iter()
            .map(|event| NewEvent::new(id, event))
            .collect();
        Ok(store.append(new_events)?)
    }
}

/// Routes commands by aggregate kind.
pub struct CommandBus {
    store: Arc<EventStore>,
    handlers: HashMap<AggregateKind, Box<dyn CommandHandler>>,
    write_lock: Mutex<()>,
}

impl CommandBus {
    pub fn new(store: Arc<EventStore>) -> Self {
        Self {
            store,
            handlers: HashMap::new(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<EventStore> {
        &self.store
    }

    /// Registers the handler for `A::KIND`, built from a zero-state factory.
    pub fn register<A, F>(&mut self, factory: F)
    where
        A: Aggregate + 'static,
        F: Fn(AggregateId) -> A + Send + Sync + 'static,
    {
        self.register_handler(Box::new(AggregateHandler::<A, F>::new(factory)));
    }

    pub fn register_handler(&mut self, handler: Box<dyn CommandHandler>) {
        let kind = handler.kind();
        if self.handlers.insert(kind, handler).is_some() {
            panic!("command handler for {kind} registered twice");
        }
    }

    /// Runs one command and returns the events it appended.
    pub fn dispatch(&self, command: Command) -> Result<Vec<RecordedEvent>, CommandError> {
        let name = command.name();
        let id = command.aggregate_id();
        if id.is_nil() {
            info!(
                "event=command_rejected module=dispatch status=error command={} error_code=nil_id",
                name
            );
            return Err(ValidationError::NilId.into());
        }

        let kind = command.aggregate_kind();
        let handler = self
            .handlers
            .get(&kind)
            .unwrap_or_else(|| panic!("no command handler registered for {kind}"));

        let result = {
            let _guard = self.write_lock.lock().map_err(|_| StoreError::LockPoisoned)?;
            handler.handle(&self.store, command)
        };

        match result {
            Ok(events) => {
                debug!(
                    "event=command_dispatch module=dispatch status=ok command={} aggregate_id={} events={}",
                    name,
                    id,
                    events.len()
                );
                Ok(events)
            }
            Err(err) => {
                info!(
                    "event=command_rejected module=dispatch status=error command={} aggregate_id={} error={}",
                    name, id, err
                );
                Err(err)
            }
        }
    }
}

impl CommandSender for CommandBus {
    fn send(&self, command: Command) -> Result<(), CommandError> {
        self.dispatch(command).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::RealmAggregate;
    use crate::clock::SystemClock;
    use crate::db::open_db_in_memory;
    use crate::model::command::{NoteCommand, RealmCommand};
    use uuid::Uuid;

    fn realm_bus() -> CommandBus {
        let store = EventStore::new(open_db_in_memory().unwrap(), Arc::new(SystemClock));
        let mut bus = CommandBus::new(Arc::new(store));
        bus.register(RealmAggregate::new);
        bus
    }

    #[test]
    fn nil_id_is_rejected_before_routing() {
        let bus = realm_bus();
        let err = bus
            .dispatch(
                RealmCommand::CreateRealm {
                    id: Uuid::nil(),
                    name: "Home".to_string(),
                }
                .into(),
            )
            .unwrap_err();
        assert!(matches!(err, CommandError::Validation(ValidationError::NilId)));
    }

    #[test]
    fn rejected_command_appends_nothing() {
        let bus = realm_bus();
        let id = Uuid::new_v4();
        let create = |name: &str| -> Command {
            RealmCommand::CreateRealm {
                id,
                name: name.to_string(),
            }
            .into()
        };
        assert_eq!(bus.dispatch(create("Home")).unwrap().len(), 1);
        assert!(bus.dispatch(create("Home")).is_err());
        assert_eq!(bus.store().event_count().unwrap(), 1);
    }

    #[test]
    #[should_panic(expected = "no command handler registered for note")]
    fn unregistered_kind_panics() {
        let bus = realm_bus();
        let _ = bus.dispatch(NoteCommand::DeleteNote { id: Uuid::new_v4() }.into());
    }

    #[test]
    #[should_panic(expected = "different id")]
    fn factory_id_mismatch_panics() {
        let store = EventStore::new(open_db_in_memory().unwrap(), Arc::new(SystemClock));
        let mut bus = CommandBus::new(Arc::new(store));
        bus.register(|_| RealmAggregate::new(Uuid::new_v4()));
        let _ = bus.dispatch(
            RealmCommand::CreateRealm {
                id: Uuid::new_v4(),
                name: "Home".to_string(),
            }
            .into(),
        );
    }
}
