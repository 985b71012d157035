//! Realm aggregate: a named space notes can be grouped under.

use super::{require_trimmed, Aggregate, ValidationError};
use crate::model::command::RealmCommand;
use crate::model::event::{DomainEvent, RealmCreated};
use crate::model::{AggregateId, AggregateKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealmAggregate {
    id: AggregateId,
    created: bool,
    name: String,
    deleted: bool,
}

impl RealmAggregate {
    pub fn new(id: AggregateId) -> Self {
        Self {
            id,
            created: false,
            name: String::new(),
            deleted: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }
}

impl Aggregate for RealmAggregate {
    const KIND: AggregateKind = AggregateKind::Realm;
    type Command = RealmCommand;

    fn id(&self) -> AggregateId {
        self.id
    }

    fn apply(&mut self, event: &DomainEvent) {
        if let DomainEvent::RealmCreated(created) = event {
            self.created = true;
            self.name = created.name.clone();
        }
    }

    fn handle(&self, command: RealmCommand) -> Result<Vec<DomainEvent>, ValidationError> {
        match command {
            RealmCommand::CreateRealm { id, name } => {
                if id.is_nil() {
                    return Err(ValidationError::NilId);
                }
                if self.created {
                    return Err(ValidationError::RealmAlreadyExists(self.id));
                }
                let name = require_trimmed(&name, ValidationError::EmptyName)?;
                Ok(vec![DomainEvent::RealmCreated(RealmCreated { name })])
            }
        }
    }
}
