//! Commands accepted by the dispatcher.
//!
//! A [`Command`] is routed by its aggregate kind; each aggregate declares the
//! narrower command enum it understands and converts out of [`Command`].

use super::{AggregateId, AggregateKind};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoteCommand {
    CreateNote {
        id: AggregateId,
        owner: String,
        text: String,
        category: String,
        subcategory: String,
    },
    SetNoteOwner {
        id: AggregateId,
        owner: String,
    },
    DeleteNote {
        id: AggregateId,
    },
    UndeleteNote {
        id: AggregateId,
    },
    UpdateNoteText {
        id: AggregateId,
        text: String,
    },
    SetNoteCategory {
        id: AggregateId,
        category: String,
    },
    TransitionNoteSubcategory {
        id: AggregateId,
        transition_event: String,
    },
    SetNoteDue {
        id: AggregateId,
        due: DateTime<Utc>,
    },
    ClearNoteDue {
        id: AggregateId,
    },
    CompleteNoteEnrichment {
        id: AggregateId,
        title: String,
        thumbnail: String,
    },
    FailNoteEnrichment {
        id: AggregateId,
    },
}

impl NoteCommand {
    pub fn aggregate_id(&self) -> AggregateId {
        match self {
            Self::CreateNote { id, .. }
            | Self::SetNoteOwner { id, .. }
            | Self::DeleteNote { id }
            | Self::UndeleteNote { id }
            | Self::UpdateNoteText { id, .. }
            | Self::SetNoteCategory { id, .. }
            | Self::TransitionNoteSubcategory { id, .. }
            | Self::SetNoteDue { id, .. }
            | Self::ClearNoteDue { id }
            | Self::CompleteNoteEnrichment { id, .. }
            | Self::FailNoteEnrichment { id } => *id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateNote { .. } => "CreateNote",
            Self::SetNoteOwner { .. } => "SetNoteOwner",
            Self::DeleteNote { .. } => "DeleteNote",
            Self::UndeleteNote { .. } => "UndeleteNote",
            Self::UpdateNoteText { .. } => "UpdateNoteText",
            Self::SetNoteCategory { .. } => "SetNoteCategory",
            Self::TransitionNoteSubcategory { .. } => "TransitionNoteSubcategory",
            Self::SetNoteDue { .. } => "SetNoteDue",
            Self::ClearNoteDue { .. } => "ClearNoteDue",
            Self::CompleteNoteEnrichment { .. } => "CompleteNoteEnrichment",
            Self::FailNoteEnrichment { .. } => "FailNoteEnrichment",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RealmCommand {
    CreateRealm { id: AggregateId, name: String },
}

impl RealmCommand {
    pub fn aggregate_id(&self) -> AggregateId {
        match self {
            Self::CreateRealm { id, .. } => *id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateRealm { .. } => "CreateRealm",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Note(NoteCommand),
    Realm(RealmCommand),
}

impl Command {
    pub fn aggregate_kind(&self) -> AggregateKind {
        match self {
            Self::Note(_) => AggregateKind::Note,
            Self::Realm(_) => AggregateKind::Realm,
        }
    }

    pub fn aggregate_id(&self) -> AggregateId {
        match self {
            Self::Note(cmd) => cmd.aggregate_id(),
            Self::Realm(cmd) => cmd.aggregate_id(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Note(cmd) => cmd.name(),
            Self::Realm(cmd) => cmd.name(),
        }
    }
}

impl From<NoteCommand> for Command {
    fn from(value: NoteCommand) -> Self {
        Self::Note(value)
    }
}

impl From<RealmCommand> for Command {
    fn from(value: RealmCommand) -> Self {
        Self::Realm(value)
    }
}

impl TryFrom<Command> for NoteCommand {
    type Error = Command;

    fn try_from(value: Command) -> Result<Self, Self::Error> {
        match value {
            Command::Note(cmd) => Ok(cmd),
            other => Err(other),
        }
    }
}

impl TryFrom<Command> for RealmCommand {
    type Error = Command;

    fn try_from(value: Command) -> Result<Self, Self::Error> {
        match value {
            Command::Realm(cmd) => Ok(cmd),
            other => Err(other),
        }
    }
}
