//! Note read model: `notes`, `deleted_notes` and `note_people`.
//!
//! # Invariants
//! - A note row lives in exactly one of `notes` / `deleted_notes`.
//! - Field updates apply to whichever table currently holds the row.
//! - Mention handles are lowercase and unique per note.

use super::{decode_ts, encode_ts, normalize_limit, Projection};
use crate::model::event::{DomainEvent, EventKind, RecordedEvent};
use crate::model::AggregateId;
use crate::store::{EventHandler, HandlerContext, StoreError, StoreResult};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row};
use std::collections::BTreeSet;
use uuid::Uuid;

pub const STATE_OPEN: &str = "open";
pub const STATUS_ENRICHING: &str = "enriching";
pub const STATUS_FAILURE: &str = "failure";

const NOTE_TABLES: [&str; 2] = ["notes", "deleted_notes"];

const NOTE_COLUMNS: &str = "id, owner, ts, text, category, subcategory, due, state, status";

static MENTION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:^|[^a-z0-9_])@([a-z0-9_]+)").expect("mention pattern is valid")
});

const SUBSCRIPTIONS: &[EventKind] = &[
    EventKind::NoteCreated,
    EventKind::NoteOwnerSet,
    EventKind::NoteDeleted,
    EventKind::NoteUndeleted,
    EventKind::NoteTextUpdated,
    EventKind::NoteCategoryChanged,
    EventKind::NoteSubcategoryChanged,
    EventKind::NoteDueChanged,
    EventKind::NoteDueCleared,
    EventKind::NoteEnrichmentRequested,
    EventKind::NoteEnriched,
    EventKind::NoteEnrichmentFailed,
];

/// Current state of one note as seen by queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteRow {
    pub id: AggregateId,
    pub owner: String,
    /// Creation time.
    pub ts: DateTime<Utc>,
    pub text: String,
    pub category: String,
    pub subcategory: String,
    pub due: Option<DateTime<Utc>>,
    pub state: String,
    /// `""`, `"enriching"` or `"failure"`.
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryCount {
    pub category: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubcategoryCount {
    pub subcategory: String,
    pub count: i64,
}

/// Filters for [`NoteReadModel::find_all`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NoteQuery {
    pub owner: Option<String>,
    /// Query `deleted_notes` instead of `notes`.
    pub deleted: bool,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    /// Maximum rows to return. Defaults to 50 and clamps to 500.
    pub limit: Option<u32>,
    pub offset: u32,
}

impl NoteQuery {
    pub fn for_owner(owner: impl Into<String>) -> Self {
        Self {
            owner: Some(owner.into()),
            ..Self::default()
        }
    }

    pub fn deleted(mut self) -> Self {
        self.deleted = true;
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn subcategory(mut self, subcategory: impl Into<String>) -> Self {
        self.subcategory = Some(subcategory.into());
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }
}

/// Lowercased, de-duplicated `@handle` mentions in first-seen order.
pub fn extract_mentions(text: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    MENTION_RE
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().to_ascii_lowercase())
        .filter(|handle| seen.insert(handle.clone()))
        .collect()
}

/// Event handler maintaining the note tables.
#[derive(Debug, Default)]
pub struct NoteProjection;

impl NoteProjection {
    pub fn new() -> Self {
        Self
    }
}

impl EventHandler for NoteProjection {
    fn name(&self) -> &'static str {
        "note_projection"
    }

    fn handle(&self, event: &RecordedEvent, ctx: &mut HandlerContext<'_>) -> StoreResult<()> {
        let conn = ctx.conn();
        let id = event.aggregate_id.to_string();

        match &event.event {
            DomainEvent::NoteCreated(created) => {
                conn.execute(
                    "INSERT INTO notes (id, owner, ts, text, category, subcategory, due, state, status)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL, ?7, '');",
                    params![
                        id,
                        created.owner,
                        encode_ts(created.created_at),
                        created.text,
                        created.category,
                        created.subcategory,
                        STATE_OPEN,
                    ],
                )?;
                replace_mentions(conn, &id, &created.text)?;
            }
            DomainEvent::NoteOwnerSet(set) => {
                update_note(conn, "owner = ?2", &id, [Value::Text(set.owner.clone())])?;
            }
            DomainEvent::NoteDeleted => move_note(conn, &id, "notes", "deleted_notes")?,
            DomainEvent::NoteUndeleted => move_note(conn, &id, "deleted_notes", "notes")?,
            DomainEvent::NoteTextUpdated(updated) => {
                update_note(conn, "text = ?2", &id, [Value::Text(updated.text.clone())])?;
                replace_mentions(conn, &id, &updated.text)?;
            }
            DomainEvent::NoteCategoryChanged(changed) => {
                update_note(
                    conn,
                    "category = ?2, subcategory = ?3",
                    &id,
                    [
                        Value::Text(changed.category.clone()),
                        Value::Text(changed.subcategory.clone()),
                    ],
                )?;
            }
            DomainEvent::NoteSubcategoryChanged(changed) => {
                update_note(
                    conn,
                    "subcategory = ?2",
                    &id,
                    [Value::Text(changed.subcategory.clone())],
                )?;
            }
            DomainEvent::NoteDueChanged(changed) => {
                update_note(conn, "due = ?2", &id, [Value::Text(encode_ts(changed.due))])?;
            }
            DomainEvent::NoteDueCleared => {
                update_note(conn, "due = NULL", &id, [])?;
            }
            DomainEvent::NoteEnrichmentRequested(_) => {
                update_note(
                    conn,
                    "status = ?2",
                    &id,
                    [Value::Text(STATUS_ENRICHING.to_string())],
                )?;
            }
            DomainEvent::NoteEnriched(enriched) => {
                update_note(
                    conn,
                    "status = '', text = ?2 || ' ' || text",
                    &id,
                    [Value::Text(enriched.title.clone())],
                )?;
            }
            DomainEvent::NoteEnrichmentFailed(_) => {
                update_note(
                    conn,
                    "status = ?2",
                    &id,
                    [Value::Text(STATUS_FAILURE.to_string())],
                )?;
            }
            DomainEvent::RealmCreated(_) => {
                return Err(StoreError::InvalidData(format!(
                    "note projection does not handle {}",
                    event.kind()
                )));
            }
        }

        Ok(())
    }
}

impl Projection for NoteProjection {
    fn subscriptions(&self) -> &'static [EventKind] {
        SUBSCRIPTIONS
    }

    fn reset(&self, conn: &Connection) -> StoreResult<()> {
        conn.execute_batch(
            "DROP TABLE IF EXISTS temp.note_people;
             DROP TABLE IF EXISTS temp.deleted_notes;
             DROP TABLE IF EXISTS temp.notes;

             CREATE TEMP TABLE notes (
                id TEXT PRIMARY KEY NOT NULL,
                owner TEXT NOT NULL,
                ts TEXT NOT NULL,
                text TEXT NOT NULL,
                category TEXT NOT NULL,
                subcategory TEXT NOT NULL,
                due TEXT,
                state TEXT NOT NULL,
                status TEXT NOT NULL
             );
             CREATE INDEX temp.idx_notes_owner_category
                ON notes(owner, category, subcategory);

             CREATE TEMP TABLE deleted_notes (
                id TEXT PRIMARY KEY NOT NULL,
                owner TEXT NOT NULL,
                ts TEXT NOT NULL,
                text TEXT NOT NULL,
                category TEXT NOT NULL,
                subcategory TEXT NOT NULL,
                due TEXT,
                state TEXT NOT NULL,
                status TEXT NOT NULL
             );

             CREATE TEMP TABLE note_people (
                handle TEXT NOT NULL,
                note_id TEXT NOT NULL,
                PRIMARY KEY (handle, note_id)
             );",
        )?;
        Ok(())
    }
}

fn update_note<const N: usize>(
    conn: &Connection,
    assignments: &str,
    id: &str,
    values: [Value; N],
) -> StoreResult<()> {
    for table in NOTE_TABLES {
        let mut bind = Vec::with_capacity(N + 1);
        bind.push(Value::Text(id.to_string()));
        bind.extend(values.iter().cloned());
        let changed = conn.execute(
            &format!("UPDATE {table} SET {assignments} WHERE id = ?1;"),
            params_from_iter(bind),
        )?;
        if changed > 0 {
            break;
        }
    }
    Ok(())
}

fn move_note(conn: &Connection, id: &str, from: &str, to: &str) -> StoreResult<()> {
    conn.execute(
        &format!("INSERT INTO {to} ({NOTE_COLUMNS}) SELECT {NOTE_COLUMNS} FROM {from} WHERE id = ?1;"),
        params![id],
    )?;
    conn.execute(&format!("DELETE FROM {from} WHERE id = ?1;"), params![id])?;
    Ok(())
}

fn replace_mentions(conn: &Connection, id: &str, text: &str) -> StoreResult<()> {
    conn.execute("DELETE FROM note_people WHERE note_id = ?1;", params![id])?;
    for handle in extract_mentions(text) {
        conn.execute(
            "INSERT INTO note_people (handle, note_id) VALUES (?1, ?2);",
            params![handle, id],
        )?;
    }
    Ok(())
}

/// Query helpers over the note tables.
pub struct NoteReadModel<'conn> {
    conn: &'conn Connection,
}

impl<'conn> NoteReadModel<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    /// Live (not deleted) note by id.
    pub fn find_by_id(&self, id: AggregateId) -> StoreResult<Option<NoteRow>> {
        self.find_in("notes", id)
    }

    pub fn find_deleted_by_id(&self, id: AggregateId) -> StoreResult<Option<NoteRow>> {
        self.find_in("deleted_notes", id)
    }

    fn find_in(&self, table: &str, id: AggregateId) -> StoreResult<Option<NoteRow>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {NOTE_COLUMNS} FROM {table} WHERE id = ?1;"))?;
        let mut rows = stmt.query(params![id.to_string()])?;
        match rows.next()? {
            Some(row) => Ok(Some(parse_note_row(row)?)),
            None => Ok(None),
        }
    }

    /// Notes matching `query`, oldest first.
    pub fn find_all(&self, query: &NoteQuery) -> StoreResult<Vec<NoteRow>> {
        let table = if query.deleted { "deleted_notes" } else { "notes" };
        let mut sql = format!("SELECT {NOTE_COLUMNS} FROM {table} WHERE 1 = 1");
        let mut bind_values: Vec<Value> = Vec::new();

        if let Some(owner) = query.owner.as_ref() {
            sql.push_str(" AND owner = ?");
            bind_values.push(Value::Text(owner.clone()));
        }
        if let Some(category) = query.category.as_ref() {
            sql.push_str(" AND category = ?");
            bind_values.push(Value::Text(category.clone()));
        }
        if let Some(subcategory) = query.subcategory.as_ref() {
            sql.push_str(" AND subcategory = ?");
            bind_values.push(Value::Text(subcategory.clone()));
        }

        sql.push_str(" ORDER BY ts ASC, id ASC LIMIT ?");
        bind_values.push(Value::Integer(i64::from(normalize_limit(query.limit))));
        if query.offset > 0 {
            sql.push_str(" OFFSET ?");
            bind_values.push(Value::Integer(i64::from(query.offset)));
        }

        self.select_notes(&sql, bind_values)
    }

    pub fn category_counts(&self, owner: &str) -> StoreResult<Vec<CategoryCount>> {
        let mut stmt = self.conn.prepare(
            "SELECT category, COUNT(*) FROM notes
             WHERE owner = ?1
             GROUP BY category
             ORDER BY category ASC;",
        )?;
        let rows = stmt.query_map(params![owner], |row| {
            Ok(CategoryCount {
                category: row.get(0)?,
                count: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn subcategory_counts(
        &self,
        owner: &str,
        category: &str,
    ) -> StoreResult<Vec<SubcategoryCount>> {
        let mut stmt = self.conn.prepare(
            "SELECT subcategory, COUNT(*) FROM notes
             WHERE owner = ?1 AND category = ?2
             GROUP BY subcategory
             ORDER BY subcategory ASC;",
        )?;
        let rows = stmt.query_map(params![owner, category], |row| {
            Ok(SubcategoryCount {
                subcategory: row.get(0)?,
                count: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Distinct handles mentioned in the owner's live notes.
    pub fn people(&self, owner: &str) -> StoreResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT np.handle FROM note_people np
             INNER JOIN notes n ON n.id = np.note_id
             WHERE n.owner = ?1
             ORDER BY np.handle ASC;",
        )?;
        let rows = stmt.query_map(params![owner], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn find_by_person(&self, owner: &str, handle: &str) -> StoreResult<Vec<NoteRow>> {
        self.select_notes(
            &format!(
                "SELECT {} FROM notes n
                 INNER JOIN note_people np ON np.note_id = n.id
                 WHERE n.owner = ? AND np.handle = ?
                 ORDER BY n.ts ASC, n.id ASC",
                prefixed_columns("n")
            ),
            vec![
                Value::Text(owner.to_string()),
                Value::Text(handle.trim_start_matches('@').to_ascii_lowercase()),
            ],
        )
    }

    pub fn find_with_mention(&self, owner: &str) -> StoreResult<Vec<NoteRow>> {
        self.select_notes(
            &format!(
                "SELECT {} FROM notes n
                 WHERE n.owner = ?
                   AND EXISTS (SELECT 1 FROM note_people np WHERE np.note_id = n.id)
                 ORDER BY n.ts ASC, n.id ASC",
                prefixed_columns("n")
            ),
            vec![Value::Text(owner.to_string())],
        )
    }

    /// Live notes with `start < due <= end`, earliest due first.
    pub fn find_due_between(
        &self,
        owner: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<Vec<NoteRow>> {
        self.select_notes(
            &format!(
                "SELECT {NOTE_COLUMNS} FROM notes
                 WHERE owner = ? AND due IS NOT NULL AND due > ? AND due <= ?
                 ORDER BY due ASC, id ASC"
            ),
            vec![
                Value::Text(owner.to_string()),
                Value::Text(encode_ts(start)),
                Value::Text(encode_ts(end)),
            ],
        )
    }

    pub fn count(&self, deleted: bool) -> StoreResult<i64> {
        let table = if deleted { "deleted_notes" } else { "notes" };
        Ok(self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {table};"), [], |row| {
                row.get(0)
            })?)
    }

    fn select_notes(&self, sql: &str, bind_values: Vec<Value>) -> StoreResult<Vec<NoteRow>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut notes = Vec::new();
        while let Some(row) = rows.next()? {
            notes.push(parse_note_row(row)?);
        }
        Ok(notes)
    }
}

fn prefixed_columns(alias: &str) -> String {
    NOTE_COLUMNS
        .split(", ")
        .map(|column| format!("{alias}.{column}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn parse_note_row(row: &Row<'_>) -> StoreResult<NoteRow> {
    let id: String = row.get(0)?;
    let ts: String = row.get(2)?;
    let due: Option<String> = row.get(6)?;
    Ok(NoteRow {
        id: Uuid::parse_str(&id)
            .map_err(|err| StoreError::InvalidData(format!("bad note id `{id}`: {err}")))?,
        owner: row.get(1)?,
        ts: decode_ts(&ts)?,
        text: row.get(3)?,
        category: row.get(4)?,
        subcategory: row.get(5)?,
        due: due.as_deref().map(decode_ts).transpose()?,
        state: row.get(7)?,
        status: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mentions_are_lowercased_and_deduplicated() {
        assert_eq!(
            extract_mentions("call @Alice and @bob, then @alice again"),
            vec!["alice".to_string(), "bob".to_string()]
        );
    }

    #[test]
    fn email_addresses_are_not_mentions() {
        assert!(extract_mentions("mail me at someone@example.com").is_empty());
        assert_eq!(extract_mentions("@lead: review"), vec!["lead".to_string()]);
    }

    #[test]
    fn prefixed_columns_qualify_every_column() {
        assert!(prefixed_columns("n").starts_with("n.id, n.owner"));
        assert!(prefixed_columns("n").ends_with("n.status"));
    }
}
