//! Shared domain vocabulary: identifiers, events and commands.
//!
//! # Invariants
//! - Every aggregate is identified by a stable, non-nil `AggregateId`.
//! - Events and commands are closed enums; adding a kind is a compile-time
//!   change, never a runtime registration of an unknown type.

use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub mod command;
pub mod event;

/// Stable identifier of one aggregate instance.
pub type AggregateId = Uuid;

/// Generates a fresh aggregate id.
pub fn new_id() -> AggregateId {
    Uuid::new_v4()
}

/// Kind of aggregate; persisted as `events.aggregate_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AggregateKind {
    Note,
    Realm,
}

impl AggregateKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Note => "note",
            Self::Realm => "realm",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "note" => Some(Self::Note),
            "realm" => Some(Self::Realm),
            _ => None,
        }
    }
}

impl Display for AggregateKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
