//! Aggregates: state folded from an event stream plus command validation.
//!
//! # Responsibility
//! - Define the [`Aggregate`] contract used by the command dispatcher.
//! - Report business rule violations as [`ValidationError`].
//!
//! # Invariants
//! - `apply` is total and pure: the same stream always yields the same state.
//! - `handle` never mutates state; it only returns the events to append.

use crate::model::command::Command;
use crate::model::event::DomainEvent;
use crate::model::{AggregateId, AggregateKind};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod note;
pub mod realm;

pub use note::{NoteAggregate, NoteRules, NoteState};
pub use realm::RealmAggregate;

/// An entity whose state is the fold of its own event stream.
pub trait Aggregate {
    /// Kind routed to this aggregate.
    const KIND: AggregateKind;

    /// Commands this aggregate understands.
    type Command: TryFrom<Command, Error = Command>;

    fn id(&self) -> AggregateId;

    /// Folds one event into the state.
    fn apply(&mut self, event: &DomainEvent);

    /// Validates `command` against the current state.
    fn handle(&self, command: Self::Command) -> Result<Vec<DomainEvent>, ValidationError>;
}

/// A command was rejected; nothing was appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    NilId,
    EmptyOwner,
    EmptyText,
    EmptyCategory,
    EmptySubcategory,
    EmptyName,
    UnknownCategory(String),
    UnknownSubcategory {
        category: String,
        subcategory: String,
    },
    NoteNotFound(AggregateId),
    NoteAlreadyExists(AggregateId),
    AlreadyDeleted(AggregateId),
    NotDeleted(AggregateId),
    SameCategory(String),
    UnknownTransition {
        subcategory: String,
        event: String,
    },
    SameSubcategory(String),
    RealmAlreadyExists(AggregateId),
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NilId => write!(f, "aggregate id must not be nil"),
            Self::EmptyOwner => write!(f, "owner cannot be empty"),
            Self::EmptyText => write!(f, "text cannot be empty"),
            Self::EmptyCategory => write!(f, "category cannot be empty"),
            Self::EmptySubcategory => write!(f, "subcategory cannot be empty"),
            Self::EmptyName => write!(f, "name cannot be empty"),
            Self::UnknownCategory(slug) => write!(f, "unknown category `{slug}`"),
            Self::UnknownSubcategory {
                category,
                subcategory,
            } => write!(f, "unknown subcategory `{subcategory}` in category `{category}`"),
            Self::NoteNotFound(id) => write!(f, "note not found: {id}"),
            Self::NoteAlreadyExists(id) => write!(f, "note already exists: {id}"),
            Self::AlreadyDeleted(id) => write!(f, "note already deleted: {id}"),
            Self::NotDeleted(id) => write!(f, "note not deleted: {id}"),
            Self::SameCategory(slug) => write!(f, "note already set to category `{slug}`"),
            Self::UnknownTransition { subcategory, event } => {
                write!(f, "invalid transition event `{event}` from `{subcategory}`")
            }
            Self::SameSubcategory(slug) => write!(f, "note already set to subcategory `{slug}`"),
            Self::RealmAlreadyExists(id) => write!(f, "realm already exists: {id}"),
        }
    }
}

impl Error for ValidationError {}

/// Trimmed copy of `value`, or `err` when nothing is left.
pub(crate) fn require_trimmed(value: &str, err: ValidationError) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(err);
    }
    Ok(trimmed.to_string())
}
