//! Read models derived from the event log.
//!
//! # Responsibility
//! - Maintain denormalized query tables as events are appended or replayed.
//! - Expose typed query helpers over those tables.
//!
//! # Invariants
//! - Tables are `TEMP` tables on the log connection; they start empty in
//!   every process and are filled by replay.
//! - Rows change only inside the transaction of the event that caused them.

use crate::model::event::EventKind;
use crate::store::{EventHandler, StoreResult};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;

pub mod note;
pub mod realm;

pub use note::{
    CategoryCount, NoteProjection, NoteQuery, NoteReadModel, NoteRow, SubcategoryCount,
};
pub use realm::{RealmProjection, RealmReadModel, RealmRow};

const DEFAULT_LIMIT: u32 = 50;
const LIMIT_MAX: u32 = 500;

/// A handler that owns a set of rebuildable tables.
pub trait Projection: EventHandler {
    /// Event types this read model consumes.
    fn subscriptions(&self) -> &'static [EventKind];

    /// Drops and recreates the read model's tables, leaving them empty.
    fn reset(&self, conn: &Connection) -> StoreResult<()>;
}

/// Fixed-width UTC text so lexical order matches time order.
pub(crate) fn encode_ts(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn decode_ts(value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(err),
            )
        })
}

pub(crate) fn normalize_limit(limit: Option<u32>) -> u32 {
    match limit {
        Some(0) | None => DEFAULT_LIMIT,
        Some(value) => value.min(LIMIT_MAX),
    }
}

#[cfg(test)]
mod tests {
    use super::normalize_limit;

    #[test]
    fn limit_defaults_and_clamps() {
        assert_eq!(normalize_limit(None), 50);
        assert_eq!(normalize_limit(Some(0)), 50);
        assert_eq!(normalize_limit(Some(7)), 7);
        assert_eq!(normalize_limit(Some(10_000)), 500);
    }
}
