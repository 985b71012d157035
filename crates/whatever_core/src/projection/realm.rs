//! Realm read model.
//!
//! Realm names are unique; a second realm with a taken name fails the
//! projection insert and therefore rolls back its `RealmCreated` event.

use super::{decode_ts, encode_ts, Projection};
use crate::model::event::{DomainEvent, EventKind, RecordedEvent};
use crate::model::AggregateId;
use crate::store::{EventHandler, HandlerContext, StoreError, StoreResult};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

const SUBSCRIPTIONS: &[EventKind] = &[EventKind::RealmCreated];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealmRow {
    pub id: AggregateId,
    pub ts: DateTime<Utc>,
    pub name: String,
}

#[derive(Debug, Default)]
pub struct RealmProjection;

impl RealmProjection {
    pub fn new() -> Self {
        Self
    }
}

impl EventHandler for RealmProjection {
    fn name(&self) -> &'static str {
        "realm_projection"
    }

    fn handle(&self, event: &RecordedEvent, ctx: &mut HandlerContext<'_>) -> StoreResult<()> {
        match &event.event {
            DomainEvent::RealmCreated(created) => {
                ctx.conn().execute(
                    "INSERT INTO realms (id, ts, name) VALUES (?1, ?2, ?3);",
                    params![
                        event.aggregate_id.to_string(),
                        encode_ts(event.created_at),
                        created.name,
                    ],
                )?;
                Ok(())
            }
            other => Err(StoreError::InvalidData(format!(
                "realm projection does not handle {}",
                other.kind()
            ))),
        }
    }
}

impl Projection for RealmProjection {
    fn subscriptions(&self) -> &'static [EventKind] {
        SUBSCRIPTIONS
    }

    fn reset(&self, conn: &Connection) -> StoreResult<()> {
        conn.execute_batch(
            "DROP TABLE IF EXISTS temp.realms;
             CREATE TEMP TABLE realms (
                id TEXT PRIMARY KEY NOT NULL,
                ts TEXT NOT NULL,
                name TEXT NOT NULL UNIQUE
             );",
        )?;
        Ok(())
    }
}

pub struct RealmReadModel<'conn> {
    conn: &'conn Connection,
}

impl<'conn> RealmReadModel<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    pub fn find_all(&self) -> StoreResult<Vec<RealmRow>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, ts, name FROM realms ORDER BY ts ASC, id ASC;")?;
        let mut rows = stmt.query([])?;
        let mut realms = Vec::new();
        while let Some(row) = rows.next()? {
            realms.push(parse_realm_row(row)?);
        }
        Ok(realms)
    }

    pub fn find_oldest(&self) -> StoreResult<Option<RealmRow>> {
        self.find_one(
            "SELECT id, ts, name FROM realms ORDER BY ts ASC, id ASC LIMIT 1;",
            None,
        )
    }

    pub fn find_by_id(&self, id: AggregateId) -> StoreResult<Option<RealmRow>> {
        self.find_one(
            "SELECT id, ts, name FROM realms WHERE id = ?1;",
            Some(id.to_string()),
        )
    }

    pub fn find_by_name(&self, name: &str) -> StoreResult<Option<RealmRow>> {
        self.find_one(
            "SELECT id, ts, name FROM realms WHERE name = ?1;",
            Some(name.trim().to_string()),
        )
    }

    fn find_one(&self, sql: &str, arg: Option<String>) -> StoreResult<Option<RealmRow>> {
        let mut stmt = self.conn.prepare(sql)?;
        let raw = match arg {
            Some(arg) => stmt.query_row(params![arg], read_raw).optional()?,
            None => stmt.query_row([], read_raw).optional()?,
        };
        raw.map(|(id, ts, name)| build_row(id, &ts, name)).transpose()
    }
}

fn read_raw(row: &Row<'_>) -> rusqlite::Result<(String, String, String)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
}

fn parse_realm_row(row: &Row<'_>) -> StoreResult<RealmRow> {
    let (id, ts, name) = read_raw(row)?;
    build_row(id, &ts, name)
}

fn build_row(id: String, ts: &str, name: String) -> StoreResult<RealmRow> {
    Ok(RealmRow {
        id: Uuid::parse_str(&id)
            .map_err(|err| StoreError::InvalidData(format!("bad realm id `{id}`: {err}")))?,
        ts: decode_ts(ts)?,
        name,
    })
}
