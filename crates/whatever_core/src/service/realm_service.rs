//! Realm use-case service.
//!
//! Thin facade: writes go through the command bus, reads hit the realm
//! projection on the store connection.

use crate::dispatch::{CommandError, CommandSender};
use crate::model::command::RealmCommand;
use crate::model::{new_id, AggregateId};
use crate::projection::{RealmReadModel, RealmRow};
use crate::store::{EventStore, StoreError, StoreResult};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

#[derive(Debug)]
pub enum RealmServiceError {
    Command(CommandError),
    Store(StoreError),
    /// Internal consistency mismatch between write and read-back.
    InconsistentState(&'static str),
}

impl Display for RealmServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Command(err) => write!(f, "{err}"),
            Self::Store(err) => write!(f, "{err}"),
            Self::InconsistentState(details) => write!(f, "inconsistent realm state: {details}"),
        }
    }
}

impl Error for RealmServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Command(err) => Some(err),
            Self::Store(err) => Some(err),
            Self::InconsistentState(_) => None,
        }
    }
}

impl From<CommandError> for RealmServiceError {
    fn from(value: CommandError) -> Self {
        Self::Command(value)
    }
}

impl From<StoreError> for RealmServiceError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

pub struct RealmService {
    commands: Arc<dyn CommandSender>,
    store: Arc<EventStore>,
}

impl RealmService {
    pub fn new(commands: Arc<dyn CommandSender>, store: Arc<EventStore>) -> Self {
        Self { commands, store }
    }

    /// Creates a realm under a fresh id. A taken name fails the append.
    pub fn create_realm(&self, name: impl Into<String>) -> Result<RealmRow, RealmServiceError> {
        let id = new_id();
        self.commands.send(
            RealmCommand::CreateRealm {
                id,
                name: name.into(),
            }
            .into(),
        )?;
        self.find_by_id(id)?
            .ok_or(RealmServiceError::InconsistentState(
                "created realm not found in read-back",
            ))
    }

    /// All realms, oldest first.
    pub fn list(&self) -> StoreResult<Vec<RealmRow>> {
        self.query(|realms| realms.find_all())
    }

    pub fn oldest(&self) -> StoreResult<Option<RealmRow>> {
        self.query(|realms| realms.find_oldest())
    }

    pub fn find_by_id(&self, id: AggregateId) -> StoreResult<Option<RealmRow>> {
        self.query(|realms| realms.find_by_id(id))
    }

    pub fn find_by_name(&self, name: &str) -> StoreResult<Option<RealmRow>> {
        self.query(|realms| realms.find_by_name(name))
    }

    fn query<T>(&self, run: impl FnOnce(&RealmReadModel<'_>) -> StoreResult<T>) -> StoreResult<T> {
        self.store.with_realms(run)
    }
}
