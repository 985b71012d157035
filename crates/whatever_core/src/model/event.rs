//! Domain events and their registered payload schemas.
//!
//! # Responsibility
//! - Name every event type once ([`EventKind`]) and bind it to its aggregate
//!   kind and payload schema.
//! - Encode/decode the `event_data` column.
//!
//! # Invariants
//! - `EventKind::as_str` values are persisted; renaming one breaks replay.
//! - Payloads are JSON objects; payload-less events persist as `{}`.

use super::{AggregateId, AggregateKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Type tag of a persisted event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    NoteCreated,
    NoteOwnerSet,
    NoteDeleted,
    NoteUndeleted,
    NoteTextUpdated,
    NoteCategoryChanged,
    NoteSubcategoryChanged,
    NoteDueChanged,
    NoteDueCleared,
    NoteEnrichmentRequested,
    NoteEnriched,
    NoteEnrichmentFailed,
    RealmCreated,
}

impl EventKind {
    pub const ALL: [EventKind; 13] = [
        Self::NoteCreated,
        Self::NoteOwnerSet,
        Self::NoteDeleted,
        Self::NoteUndeleted,
        Self::NoteTextUpdated,
        Self::NoteCategoryChanged,
        Self::NoteSubcategoryChanged,
        Self::NoteDueChanged,
        Self::NoteDueCleared,
        Self::NoteEnrichmentRequested,
        Self::NoteEnriched,
        Self::NoteEnrichmentFailed,
        Self::RealmCreated,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoteCreated => "NoteCreated",
            Self::NoteOwnerSet => "NoteOwnerSet",
            Self::NoteDeleted => "NoteDeleted",
            Self::NoteUndeleted => "NoteUndeleted",
            Self::NoteTextUpdated => "NoteTextUpdated",
            Self::NoteCategoryChanged => "NoteCategoryChanged",
            Self::NoteSubcategoryChanged => "NoteSubcategoryChanged",
            Self::NoteDueChanged => "NoteDueChanged",
            Self::NoteDueCleared => "NoteDueCleared",
            Self::NoteEnrichmentRequested => "NoteEnrichmentRequested",
            Self::NoteEnriched => "NoteEnriched",
            Self::NoteEnrichmentFailed => "NoteEnrichmentFailed",
            Self::RealmCreated => "RealmCreated",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == value)
    }

    /// Aggregate kind whose stream this event belongs to.
    pub fn aggregate_kind(self) -> AggregateKind {
        match self {
            Self::RealmCreated => AggregateKind::Realm,
            _ => AggregateKind::Note,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteCreated {
    pub owner: String,
    pub text: String,
    pub category: String,
    pub subcategory: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteOwnerSet {
    pub owner: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteTextUpdated {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteCategoryChanged {
    pub category: String,
    pub subcategory: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteSubcategoryChanged {
    pub subcategory: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteDueChanged {
    pub due: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteEnrichmentRequested {
    pub text: String,
    pub requested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteEnriched {
    pub title: String,
    #[serde(default)]
    pub thumbnail: String,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteEnrichmentFailed {
    pub failed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealmCreated {
    pub name: String,
}

/// Decoded event payload, one variant per [`EventKind`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainEvent {
    NoteCreated(NoteCreated),
    NoteOwnerSet(NoteOwnerSet),
    NoteDeleted,
    NoteUndeleted,
    NoteTextUpdated(NoteTextUpdated),
    NoteCategoryChanged(NoteCategoryChanged),
    NoteSubcategoryChanged(NoteSubcategoryChanged),
    NoteDueChanged(NoteDueChanged),
    NoteDueCleared,
    NoteEnrichmentRequested(NoteEnrichmentRequested),
    NoteEnriched(NoteEnriched),
    NoteEnrichmentFailed(NoteEnrichmentFailed),
    RealmCreated(RealmCreated),
}

impl DomainEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::NoteCreated(_) => EventKind::NoteCreated,
            Self::NoteOwnerSet(_) => EventKind::NoteOwnerSet,
            Self::NoteDeleted => EventKind::NoteDeleted,
            Self::NoteUndeleted => EventKind::NoteUndeleted,
            Self::NoteTextUpdated(_) => EventKind::NoteTextUpdated,
            Self::NoteCategoryChanged(_) => EventKind::NoteCategoryChanged,
            Self::NoteSubcategoryChanged(_) => EventKind::NoteSubcategoryChanged,
            Self::NoteDueChanged(_) => EventKind::NoteDueChanged,
            Self::NoteDueCleared => EventKind::NoteDueCleared,
            Self::NoteEnrichmentRequested(_) => EventKind::NoteEnrichmentRequested,
            Self::NoteEnriched(_) => EventKind::NoteEnriched,
            Self::NoteEnrichmentFailed(_) => EventKind::NoteEnrichmentFailed,
            Self::RealmCreated(_) => EventKind::RealmCreated,
        }
    }

    pub fn aggregate_kind(&self) -> AggregateKind {
        self.kind().aggregate_kind()
    }

    /// Serializes the payload for the `event_data` column.
    pub fn encode_payload(&self) -> serde_json::Result<String> {
        match self {
            Self::NoteCreated(p) => serde_json::to_string(p),
            Self::NoteOwnerSet(p) => serde_json::to_string(p),
            Self::NoteTextUpdated(p) => serde_json::to_string(p),
            Self::NoteCategoryChanged(p) => serde_json::to_string(p),
            Self::NoteSubcategoryChanged(p) => serde_json::to_string(p),
            Self::NoteDueChanged(p) => serde_json::to_string(p),
            Self::NoteEnrichmentRequested(p) => serde_json::to_string(p),
            Self::NoteEnriched(p) => serde_json::to_string(p),
            Self::NoteEnrichmentFailed(p) => serde_json::to_string(p),
            Self::RealmCreated(p) => serde_json::to_string(p),
            Self::NoteDeleted | Self::NoteUndeleted | Self::NoteDueCleared => {
                Ok("{}".to_string())
            }
        }
    }

    /// Decodes `event_data` using the schema registered for `kind`.
    pub fn decode(kind: EventKind, data: &str) -> serde_json::Result<Self> {
        Ok(match kind {
            EventKind::NoteCreated => Self::NoteCreated(serde_json::from_str(data)?),
            EventKind::NoteOwnerSet => Self::NoteOwnerSet(serde_json::from_str(data)?),
            EventKind::NoteDeleted => Self::NoteDeleted,
            EventKind::NoteUndeleted => Self::NoteUndeleted,
            EventKind::NoteTextUpdated => Self::NoteTextUpdated(serde_json::from_str(data)?),
            EventKind::NoteCategoryChanged => {
                Self::NoteCategoryChanged(serde_json::from_str(data)?)
            }
            EventKind::NoteSubcategoryChanged => {
                Self::NoteSubcategoryChanged(serde_json::from_str(data)?)
            }
            EventKind::NoteDueChanged => Self::NoteDueChanged(serde_json::from_str(data)?),
            EventKind::NoteDueCleared => Self::NoteDueCleared,
            EventKind::NoteEnrichmentRequested => {
                Self::NoteEnrichmentRequested(serde_json::from_str(data)?)
            }
            EventKind::NoteEnriched => Self::NoteEnriched(serde_json::from_str(data)?),
            EventKind::NoteEnrichmentFailed => {
                Self::NoteEnrichmentFailed(serde_json::from_str(data)?)
            }
            EventKind::RealmCreated => Self::RealmCreated(serde_json::from_str(data)?),
        })
    }
}

/// An event not yet in the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEvent {
    pub aggregate_id: AggregateId,
    pub event: DomainEvent,
}

impl NewEvent {
    pub fn new(aggregate_id: AggregateId, event: DomainEvent) -> Self {
        Self {
            aggregate_id,
            event,
        }
    }
}

/// An event as stored in the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    /// Global, strictly increasing log position.
    pub sequence: i64,
    pub created_at: DateTime<Utc>,
    pub aggregate_type: AggregateKind,
    pub aggregate_id: AggregateId,
    pub event: DomainEvent,
}

impl RecordedEvent {
    pub fn kind(&self) -> EventKind {
        self.event.kind()
    }
}
