//! Core use-case services.
//!
//! # Responsibility
//! - Turn caller intent into commands and read the outcome back.
//! - Keep CLI callers decoupled from aggregates and projection tables.

pub mod note_service;
pub mod realm_service;

pub use note_service::{NoteService, NoteServiceError, NotesListResult};
pub use realm_service::{RealmService, RealmServiceError};
