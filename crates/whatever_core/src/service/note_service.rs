//! Note use-case service.
//!
//! # Responsibility
//! - Provide note-specific create/update/get/list APIs over the command bus.
//! - Resolve short id prefixes to full note ids.
//! - Read the resulting row back from the note projection.
//!
//! # Invariants
//! - Every write goes through `CommandSender`; the service never touches
//!   projection tables directly.
//! - A successful write is always followed by a read-back; a missing row is
//!   reported as `InconsistentState`.

use crate::catalog::Catalog;
use crate::dispatch::{CommandError, CommandSender};
use crate::model::command::NoteCommand;
use crate::model::{new_id, AggregateId};
use crate::projection::{normalize_limit, NoteQuery, NoteReadModel, NoteRow};
use crate::store::{EventStore, StoreError, StoreResult};
use chrono::{DateTime, FixedOffset, Utc};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Service error for note use-cases.
#[derive(Debug)]
pub enum NoteServiceError {
    /// Command rejected or failed to persist.
    Command(CommandError),
    /// Lookup or read-model failure, including unresolved id prefixes.
    Store(StoreError),
    /// Target note has no live or deleted row.
    NoteNotFound(AggregateId),
    UnknownTimeframe(String),
    /// The catalog has no default category to file new notes under.
    NoDefaultCategory,
    /// Internal consistency mismatch between write and read-back.
    InconsistentState(&'static str),
}

impl Display for NoteServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Command(err) => write!(f, "{err}"),
            Self::Store(err) => write!(f, "{err}"),
            Self::NoteNotFound(id) => write!(f, "note not found: {id}"),
            Self::UnknownTimeframe(slug) => write!(f, "unknown timeframe `{slug}`"),
            Self::NoDefaultCategory => write!(f, "catalog has no default category"),
            Self::InconsistentState(details) => write!(f, "inconsistent note state: {details}"),
        }
    }
}

impl Error for NoteServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Command(err) => Some(err),
            Self::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<CommandError> for NoteServiceError {
    fn from(value: CommandError) -> Self {
        Self::Command(value)
    }
}

impl From<StoreError> for NoteServiceError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

/// List result envelope used by service callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotesListResult {
    /// Items ordered by creation time, then id.
    pub items: Vec<NoteRow>,
    /// Effective normalized limit used by the query.
    pub applied_limit: u32,
}

/// Note service facade over the command bus and the note read model.
pub struct NoteService {
    commands: Arc<dyn CommandSender>,
    store: Arc<EventStore>,
    catalog: Arc<Catalog>,
    time_zone: FixedOffset,
}

impl NoteService {
    pub fn new(
        commands: Arc<dyn CommandSender>,
        store: Arc<EventStore>,
        catalog: Arc<Catalog>,
        time_zone: FixedOffset,
    ) -> Self {
        Self {
            commands,
            store,
            catalog,
            time_zone,
        }
    }

    /// Creates a note in the catalog's default category inbox.
    pub fn create_note(
        &self,
        owner: impl Into<String>,
        text: impl Into<String>,
    ) -> Result<NoteRow, NoteServiceError> {
        let category = self
            .catalog
            .default_category()
            .ok_or(NoteServiceError::NoDefaultCategory)?;
        let inbox = category
            .inbox()
            .ok_or(NoteServiceError::NoDefaultCategory)?;
        let (category, subcategory) = (category.slug.clone(), inbox.slug.clone());
        self.create_note_in(owner, text, category, subcategory)
    }

    /// Creates a note with an explicit category and subcategory.
    pub fn create_note_in(
        &self,
        owner: impl Into<String>,
        text: impl Into<String>,
        category: impl Into<String>,
        subcategory: impl Into<String>,
    ) -> Result<NoteRow, NoteServiceError> {
        let id = new_id();
        self.commands.send(
            NoteCommand::CreateNote {
                id,
                owner: owner.into(),
                text: text.into(),
                category: category.into(),
                subcategory: subcategory.into(),
            }
            .into(),
        )?;
        self.read_back(id, "created note not found in read-back")
    }

    /// Resolves a case-insensitive id prefix to a full id.
    pub fn resolve(&self, id_or_prefix: &str) -> StoreResult<AggregateId> {
        self.store.resolve_id(id_or_prefix)
    }

    pub fn update_text(
        &self,
        id_or_prefix: &str,
        text: impl Into<String>,
    ) -> Result<NoteRow, NoteServiceError> {
        let id = self.resolve(id_or_prefix)?;
        let text = text.into();
        self.send_and_read(NoteCommand::UpdateNoteText { id, text })
    }

    pub fn set_owner(
        &self,
        id_or_prefix: &str,
        owner: impl Into<String>,
    ) -> Result<NoteRow, NoteServiceError> {
        let id = self.resolve(id_or_prefix)?;
        let owner = owner.into();
        self.send_and_read(NoteCommand::SetNoteOwner { id, owner })
    }

    pub fn delete(&self, id_or_prefix: &str) -> Result<NoteRow, NoteServiceError> {
        let id = self.resolve(id_or_prefix)?;
        self.send_and_read(NoteCommand::DeleteNote { id })
    }

    pub fn undelete(&self, id_or_prefix: &str) -> Result<NoteRow, NoteServiceError> {
        let id = self.resolve(id_or_prefix)?;
        self.send_and_read(NoteCommand::UndeleteNote { id })
    }

    /// Moves a note to `category`, landing in that category's inbox.
    pub fn set_category(
        &self,
        id_or_prefix: &str,
        category: impl Into<String>,
    ) -> Result<NoteRow, NoteServiceError> {
        let id = self.resolve(id_or_prefix)?;
        let category = category.into();
        self.send_and_read(NoteCommand::SetNoteCategory { id, category })
    }

    /// Fires a named subcategory transition, e.g. `tomorrow` or `done`.
    pub fn transition(
        &self,
        id_or_prefix: &str,
        transition_event: impl Into<String>,
    ) -> Result<NoteRow, NoteServiceError> {
        let id = self.resolve(id_or_prefix)?;
        let transition_event = transition_event.into();
        self.send_and_read(NoteCommand::TransitionNoteSubcategory {
            id,
            transition_event,
        })
    }

    pub fn set_due(
        &self,
        id_or_prefix: &str,
        due: DateTime<Utc>,
    ) -> Result<NoteRow, NoteServiceError> {
        let id = self.resolve(id_or_prefix)?;
        self.send_and_read(NoteCommand::SetNoteDue { id, due })
    }

    pub fn clear_due(&self, id_or_prefix: &str) -> Result<NoteRow, NoteServiceError> {
        let id = self.resolve(id_or_prefix)?;
        self.send_and_read(NoteCommand::ClearNoteDue { id })
    }

    /// Gets one note, live or deleted, by id or prefix.
    pub fn get_note(&self, id_or_prefix: &str) -> Result<NoteRow, NoteServiceError> {
        let id = self.resolve(id_or_prefix)?;
        self.find_any(id)?
            .ok_or(NoteServiceError::NoteNotFound(id))
    }

    /// Lists notes with filters and pagination.
    pub fn list_notes(&self, query: NoteQuery) -> Result<NotesListResult, NoteServiceError> {
        let applied_limit = normalize_limit(query.limit);
        let query = NoteQuery {
            limit: Some(applied_limit),
            ..query
        };
        let items = self.query(|notes| notes.find_all(&query))?;
        Ok(NotesListResult {
            items,
            applied_limit,
        })
    }

    /// Live notes of `owner` due inside the catalog timeframe `slug`.
    pub fn due_in(&self, owner: &str, slug: &str) -> Result<Vec<NoteRow>, NoteServiceError> {
        let now = self.store.clock().now();
        let (start, end) = self
            .catalog
            .timeframe_range(slug, now, self.time_zone)
            .ok_or_else(|| NoteServiceError::UnknownTimeframe(slug.to_string()))?;
        Ok(self.query(|notes| notes.find_due_between(owner, start, end))?)
    }

    fn send_and_read(&self, command: NoteCommand) -> Result<NoteRow, NoteServiceError> {
        let id = command.aggregate_id();
        self.commands.send(command.into())?;
        self.read_back(id, "updated note not found in read-back")
    }

    fn read_back(&self, id: AggregateId, details: &'static str) -> Result<NoteRow, NoteServiceError> {
        self.find_any(id)?
            .ok_or(NoteServiceError::InconsistentState(details))
    }

    /// Live row first, then the deleted one.
    fn find_any(&self, id: AggregateId) -> StoreResult<Option<NoteRow>> {
        self.query(|notes| match notes.find_by_id(id)? {
            Some(row) => Ok(Some(row)),
            None => notes.find_deleted_by_id(id),
        })
    }

    fn query<T>(&self, run: impl FnOnce(&NoteReadModel<'_>) -> StoreResult<T>) -> StoreResult<T> {
        self.store.with_notes(run)
    }
}
