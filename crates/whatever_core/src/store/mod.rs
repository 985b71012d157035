//! Append-only event log with synchronous, transactional handler fan-out.
//!
//! # Responsibility
//! - Persist events in global `sequence` order.
//! - Run every subscribed handler inside the transaction that appended the
//!   event, so the log and its read models commit or roll back together.
//! - Rebuild read models by replaying the whole log at startup.
//!
//! # Invariants
//! - Appends are serialized by one connection mutex plus an `IMMEDIATE`
//!   transaction; `sequence` is strictly increasing.
//! - A handler error aborts the append: no event of the batch is stored.
//! - After-commit work runs only after a successful commit, outside the lock.
//! - Replay never appends events and never schedules after-commit work.
//! - Stored rows are never rewritten; callers outside the crate only see
//!   read models, and the schema aborts `UPDATE`/`DELETE` on `events`.

use crate::clock::Clock;
use crate::db::DbError;
use crate::model::event::{DomainEvent, EventKind, NewEvent, RecordedEvent};
use crate::model::{AggregateId, AggregateKind};
use crate::projection::{NoteReadModel, Projection, RealmReadModel};
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use log::{debug, error, info};
use rusqlite::{params, Connection, Row, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use uuid::Uuid;

mod bus;

pub use bus::{AfterCommit, EventBus, EventHandler, HandlerContext};

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug)]
pub enum StoreError {
    Db(DbError),
    Serialization(serde_json::Error),
    /// A stored row could not be decoded.
    InvalidData(String),
    /// A subscribed handler failed; the append or replay was rolled back.
    Handler {
        handler: &'static str,
        event_type: EventKind,
        sequence: i64,
        replay: bool,
        source: Box<StoreError>,
    },
    /// A handler attempted an append or after-commit hook during replay.
    SideEffectDuringReplay(&'static str),
    IdNotFound(String),
    AmbiguousId {
        prefix: String,
        matches: Vec<AggregateId>,
    },
    LockPoisoned,
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Serialization(err) => write!(f, "event payload serialization failed: {err}"),
            Self::InvalidData(message) => write!(f, "invalid event log data: {message}"),
            Self::Handler {
                handler,
                event_type,
                sequence,
                replay,
                source,
            } => write!(
                f,
                "handler `{handler}` failed on {event_type} #{sequence}{}: {source}",
                if *replay { " during replay" } else { "" }
            ),
            Self::SideEffectDuringReplay(action) => {
                write!(f, "`{action}` is not allowed during replay")
            }
            Self::IdNotFound(prefix) => write!(f, "no aggregate id starts with `{prefix}`"),
            Self::AmbiguousId { prefix, matches } => write!(
                f,
                "id prefix `{prefix}` is ambiguous ({} matches)",
                matches.len()
            ),
            Self::LockPoisoned => write!(f, "event store lock poisoned"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Serialization(err) => Some(err),
            Self::Handler { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value)
    }
}

const EVENT_COLUMNS: &str =
    "sequence, created_at, aggregate_type, aggregate_id, event_type, event_data";

/// SQLite-backed event log.
///
/// Handlers are registered through `&mut self` before the store is shared;
/// after that the subscription set is fixed.
pub struct EventStore {
    conn: Mutex<Connection>,
    bus: EventBus,
    clock: Arc<dyn Clock>,
}

impl EventStore {
    /// Wraps a migrated connection (see [`crate::db::open_db`]).
    pub fn new(conn: Connection, clock: Arc<dyn Clock>) -> Self {
        Self {
            conn: Mutex::new(conn),
            bus: EventBus::new(),
            clock,
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Registers `handler` for one event type.
    pub fn subscribe(&mut self, kind: EventKind, handler: Arc<dyn EventHandler>) {
        debug!(
            "event=handler_subscribe module=store status=ok handler={} event_type={}",
            handler.name(),
            kind
        );
        self.bus.subscribe(kind, handler);
    }

    /// Creates the projection's tables and subscribes it to its event types.
    pub fn register_projection<P: Projection + 'static>(
        &mut self,
        projection: Arc<P>,
    ) -> StoreResult<()> {
        {
            let conn = self.conn.get_mut().map_err(|_| StoreError::LockPoisoned)?;
            projection.reset(conn)?;
        }
        info!(
            "event=projection_register module=store status=ok projection={} subscriptions={}",
            projection.name(),
            projection.subscriptions().len()
        );
        self.bus.subscribe_projection(projection);
        Ok(())
    }

    /// Appends `events` atomically and dispatches each one to its handlers.
    ///
    /// Returns every event written, including follow-ups appended by
    /// handlers, in sequence order.
    pub fn append(&self, events: Vec<NewEvent>) -> StoreResult<Vec<RecordedEvent>> {
        if events.is_empty() {
            return Ok(Vec::new());
        }

        let started_at = Instant::now();
        let requested = events.len();
        let mut appended = Vec::with_capacity(requested);
        let mut after_commit: Vec<AfterCommit> = Vec::new();

        let result = {
            let mut conn = self.lock()?;
            Self::append_locked(
                &mut conn,
                &self.bus,
                self.clock.as_ref(),
                events,
                &mut appended,
                &mut after_commit,
            )
        };

        if let Err(err) = result {
            error!(
                "event=event_append module=store status=error requested={} duration_ms={} error={}",
                requested,
                started_at.elapsed().as_millis(),
                err
            );
            return Err(err);
        }

        debug!(
            "event=event_append_commit module=store status=ok appended={} hooks={} duration_ms={}",
            appended.len(),
            after_commit.len(),
            started_at.elapsed().as_millis()
        );
        for work in after_commit {
            work();
        }
        Ok(appended)
    }

    fn append_locked(
        conn: &mut Connection,
        bus: &EventBus,
        clock: &dyn Clock,
        events: Vec<NewEvent>,
        appended: &mut Vec<RecordedEvent>,
        after_commit: &mut Vec<AfterCommit>,
    ) -> StoreResult<()> {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        {
            let mut ctx = HandlerContext::new(&tx, bus, clock, false, appended, after_commit);
            for event in events {
                ctx.append(event)?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Events of one aggregate in sequence order.
    pub fn load_stream(&self, aggregate_id: AggregateId) -> StoreResult<Vec<RecordedEvent>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE aggregate_id = ?1 ORDER BY sequence ASC;"
        ))?;
        let rows = stmt.query_map(params![aggregate_id.to_string()], read_raw_row)?;
        collect_events(rows)
    }

    /// Whole log, oldest first unless `reverse`.
    pub fn load_all(&self, reverse: bool) -> StoreResult<Vec<RecordedEvent>> {
        let conn = self.lock()?;
        load_all_from(&conn, reverse)
    }

    /// Number of events in the log.
    pub fn event_count(&self) -> StoreResult<i64> {
        let conn = self.lock()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM events;", [], |row| row.get(0))?)
    }

    /// Sequence of the newest event, if any.
    pub fn last_sequence(&self) -> StoreResult<Option<i64>> {
        let conn = self.lock()?;
        Ok(conn.query_row("SELECT MAX(sequence) FROM events;", [], |row| {
            row.get::<_, Option<i64>>(0)
        })?)
    }

    /// Re-dispatches every stored event in replay mode.
    ///
    /// Projections are emptied first, so repeated calls leave the same rows.
    pub fn replay(&self) -> StoreResult<usize> {
        self.rebuild_projections()
    }

    /// Drops and recreates every projection, then replays the log into it.
    ///
    /// Runs in one transaction; on failure read models are left as they were
    /// before the call.
    pub fn rebuild_projections(&self) -> StoreResult<usize> {
        let started_at = Instant::now();
        info!(
            "event=event_replay module=store status=start projections={}",
            self.bus.projections().len()
        );

        let result = {
            let mut conn = self.lock()?;
            self.replay_locked(&mut conn)
        };

        match result {
            Ok(count) => {
                info!(
                    "event=event_replay module=store status=ok events={} duration_ms={}",
                    count,
                    started_at.elapsed().as_millis()
                );
                Ok(count)
            }
            Err(err) => {
                error!(
                    "event=event_replay module=store status=error duration_ms={} error={}",
                    started_at.elapsed().as_millis(),
                    err
                );
                Err(err)
            }
        }
    }

    fn replay_locked(&self, conn: &mut Connection) -> StoreResult<usize> {
        let events = load_all_from(conn, false)?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        for projection in self.bus.projections() {
            projection.reset(&tx)?;
        }

        let mut appended = Vec::new();
        let mut after_commit = Vec::new();
        {
            let mut ctx = HandlerContext::new(
                &tx,
                &self.bus,
                self.clock.as_ref(),
                true,
                &mut appended,
                &mut after_commit,
            );
            for event in &events {
                ctx.dispatch(event)?;
            }
        }
        tx.commit()?;
        Ok(events.len())
    }

    /// Resolves a case-insensitive id prefix to exactly one aggregate id.
    pub fn resolve_id(&self, prefix: &str) -> StoreResult<AggregateId> {
        let normalized = prefix.trim().to_ascii_lowercase();
        if normalized.is_empty() {
            return Err(StoreError::IdNotFound(prefix.to_string()));
        }
        if let Ok(full) = Uuid::parse_str(&normalized) {
            return self.stream_exists(full).and_then(|exists| {
                if exists {
                    Ok(full)
                } else {
                    Err(StoreError::IdNotFound(prefix.to_string()))
                }
            });
        }

        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT aggregate_id FROM events
             WHERE aggregate_id LIKE ?1 ESCAPE '\\'
             ORDER BY aggregate_id ASC;",
        )?;
        let pattern = format!("{}%", escape_like(&normalized));
        let ids = stmt
            .query_map(params![pattern], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut matches = Vec::with_capacity(ids.len());
        for id in ids {
            matches.push(parse_aggregate_id(&id)?);
        }

        match matches.len() {
            0 => Err(StoreError::IdNotFound(prefix.to_string())),
            1 => Ok(matches[0]),
            _ => Err(StoreError::AmbiguousId {
                prefix: prefix.to_string(),
                matches,
            }),
        }
    }

    /// True when at least one event exists for `aggregate_id`.
    pub fn stream_exists(&self, aggregate_id: AggregateId) -> StoreResult<bool> {
        let conn = self.lock()?;
        let exists: i64 = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM events WHERE aggregate_id = ?1);",
            params![aggregate_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(exists == 1)
    }

    /// Runs `query` against the note read model.
    ///
    /// The connection lock is held for the duration of `query`, so keep it
    /// short. Read models expose queries only; the log itself stays behind
    /// [`EventStore::append`].
    pub fn with_notes<T>(
        &self,
        query: impl FnOnce(&NoteReadModel<'_>) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let conn = self.lock()?;
        query(&NoteReadModel::new(&conn))
    }

    /// Runs `query` against the realm read model.
    pub fn with_realms<T>(
        &self,
        query: impl FnOnce(&RealmReadModel<'_>) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let conn = self.lock()?;
        query(&RealmReadModel::new(&conn))
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }
}

/// Inserts one event row and returns it as recorded.
pub(crate) fn insert_event(
    conn: &Connection,
    clock: &dyn Clock,
    event: &NewEvent,
) -> StoreResult<RecordedEvent> {
    let created_at = clock.now().trunc_subsecs(6);
    let aggregate_type = event.event.aggregate_kind();
    let data = event.event.encode_payload()?;

    conn.execute(
        "INSERT INTO events (created_at, aggregate_type, aggregate_id, event_type, event_data)
         VALUES (?1, ?2, ?3, ?4, ?5);",
        params![
            created_at.to_rfc3339_opts(SecondsFormat::Micros, true),
            aggregate_type.as_str(),
            event.aggregate_id.to_string(),
            event.event.kind().as_str(),
            data,
        ],
    )?;

    Ok(RecordedEvent {
        sequence: conn.last_insert_rowid(),
        created_at,
        aggregate_type,
        aggregate_id: event.aggregate_id,
        event: event.event.clone(),
    })
}

fn load_all_from(conn: &Connection, reverse: bool) -> StoreResult<Vec<RecordedEvent>> {
    let order = if reverse { "DESC" } else { "ASC" };
    let mut stmt = conn.prepare(&format!(
        "SELECT {EVENT_COLUMNS} FROM events ORDER BY sequence {order};"
    ))?;
    let rows = stmt.query_map([], read_raw_row)?;
    collect_events(rows)
}

struct RawEventRow {
    sequence: i64,
    created_at: String,
    aggregate_type: String,
    aggregate_id: String,
    event_type: String,
    event_data: String,
}

fn read_raw_row(row: &Row<'_>) -> rusqlite::Result<RawEventRow> {
    Ok(RawEventRow {
        sequence: row.get(0)?,
        created_at: row.get(1)?,
        aggregate_type: row.get(2)?,
        aggregate_id: row.get(3)?,
        event_type: row.get(4)?,
        event_data: row.get(5)?,
    })
}

fn collect_events(
    rows: impl Iterator<Item = rusqlite::Result<RawEventRow>>,
) -> StoreResult<Vec<RecordedEvent>> {
    let mut events = Vec::new();
    for row in rows {
        events.push(decode_row(row?)?);
    }
    Ok(events)
}

fn decode_row(raw: RawEventRow) -> StoreResult<RecordedEvent> {
    let sequence = raw.sequence;
    let created_at = DateTime::parse_from_rfc3339(&raw.created_at)
        .map_err(|err| {
            StoreError::InvalidData(format!("event #{sequence} has bad created_at: {err}"))
        })?
        .with_timezone(&Utc);
    let aggregate_type = AggregateKind::parse(&raw.aggregate_type).ok_or_else(|| {
        StoreError::InvalidData(format!(
            "event #{sequence} has unknown aggregate_type `{}`",
            raw.aggregate_type
        ))
    })?;
    let kind = EventKind::parse(&raw.event_type).ok_or_else(|| {
        StoreError::InvalidData(format!(
            "event #{sequence} has unregistered event_type `{}`",
            raw.event_type
        ))
    })?;
    let event = DomainEvent::decode(kind, &raw.event_data).map_err(|err| {
        StoreError::InvalidData(format!("event #{sequence} ({kind}) payload: {err}"))
    })?;

    Ok(RecordedEvent {
        sequence,
        created_at,
        aggregate_type,
        aggregate_id: parse_aggregate_id(&raw.aggregate_id)?,
        event,
    })
}

fn parse_aggregate_id(value: &str) -> StoreResult<AggregateId> {
    Uuid::parse_str(value)
        .map_err(|err| StoreError::InvalidData(format!("bad aggregate_id `{value}`: {err}")))
}

fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::db::open_db_in_memory;
    use crate::model::event::{NoteCreated, NoteOwnerSet, NoteTextUpdated};
    use crate::projection::NoteProjection;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn store() -> EventStore {
        let clock = Arc::new(FixedClock::new(
            DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
        ));
        EventStore::new(open_db_in_memory().unwrap(), clock)
    }

    fn text(id: AggregateId, text: &str) -> NewEvent {
        NewEvent::new(
            id,
            DomainEvent::NoteTextUpdated(NoteTextUpdated {
                text: text.to_string(),
            }),
        )
    }

    struct Failing;

    impl EventHandler for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn handle(&self, _: &RecordedEvent, _: &mut HandlerContext<'_>) -> StoreResult<()> {
            Err(StoreError::InvalidData("boom".to_string()))
        }
    }

    struct Counting(AtomicUsize);

    impl EventHandler for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn handle(&self, _: &RecordedEvent, _: &mut HandlerContext<'_>) -> StoreResult<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn append_assigns_increasing_sequences() {
        let store = store();
        let id = Uuid::new_v4();
        let recorded = store
            .append(vec![text(id, "a"), text(id, "b")])
            .unwrap();
        assert_eq!(recorded.len(), 2);
        assert!(recorded[0].sequence < recorded[1].sequence);
        assert_eq!(store.load_stream(id).unwrap(), recorded);
    }

    #[test]
    fn handler_failure_rolls_back_whole_batch() {
        let mut store = store();
        store.subscribe(EventKind::NoteOwnerSet, Arc::new(Failing));
        let id = Uuid::new_v4();
        let err = store
            .append(vec![
                text(id, "kept?"),
                NewEvent::new(
                    id,
                    DomainEvent::NoteOwnerSet(NoteOwnerSet {
                        owner: "u".to_string(),
                    }),
                ),
            ])
            .unwrap_err();
        assert!(matches!(err, StoreError::Handler { handler: "failing", .. }));
        assert_eq!(store.event_count().unwrap(), 0);
    }

    #[test]
    fn replay_dispatches_in_order_without_appending() {
        let mut store = store();
        let counter = Arc::new(Counting(AtomicUsize::new(0)));
        store.subscribe(EventKind::NoteTextUpdated, counter.clone());
        let id = Uuid::new_v4();
        store.append(vec![text(id, "a"), text(id, "b")]).unwrap();
        assert_eq!(counter.0.load(Ordering::SeqCst), 2);

        assert_eq!(store.replay().unwrap(), 2);
        assert_eq!(counter.0.load(Ordering::SeqCst), 4);
        assert_eq!(store.event_count().unwrap(), 2);
    }

    #[test]
    fn repeated_replay_keeps_projection_rows() {
        let mut store = store();
        store
            .register_projection(Arc::new(NoteProjection::new()))
            .unwrap();
        let id = Uuid::new_v4();
        store
            .append(vec![
                NewEvent::new(
                    id,
                    DomainEvent::NoteCreated(NoteCreated {
                        owner: "u1".to_string(),
                        text: "draft".to_string(),
                        category: "task".to_string(),
                        subcategory: "notnow".to_string(),
                        created_at: store.clock().now(),
                    }),
                ),
                text(id, "final"),
            ])
            .unwrap();

        assert_eq!(store.replay().unwrap(), 2);
        assert_eq!(store.replay().unwrap(), 2);
        let row = store.with_notes(|notes| notes.find_by_id(id)).unwrap();
        assert_eq!(row.map(|row| row.text), Some("final".to_string()));
        assert_eq!(store.with_notes(|notes| notes.count(false)).unwrap(), 1);
    }

    #[test]
    fn stored_events_cannot_be_updated_or_deleted() {
        let store = store();
        let id = Uuid::new_v4();
        store.append(vec![text(id, "a")]).unwrap();

        {
            let conn = store.lock().unwrap();
            assert!(conn.execute("DELETE FROM events;", []).is_err());
            assert!(conn
                .execute("UPDATE events SET event_data = '{}';", [])
                .is_err());
        }
        assert_eq!(store.load_stream(id).unwrap().len(), 1);
    }

    #[test]
    fn load_all_reverse_returns_newest_first() {
        let store = store();
        let id = Uuid::new_v4();
        store.append(vec![text(id, "a"), text(id, "b")]).unwrap();
        let all = store.load_all(true).unwrap();
        assert!(all[0].sequence > all[1].sequence);
    }

    #[test]
    fn resolve_id_reports_missing_and_ambiguous_prefixes() {
        let store = store();
        let a = Uuid::parse_str("abc00000-0000-4000-8000-000000000001").unwrap();
        let b = Uuid::parse_str("abd00000-0000-4000-8000-000000000002").unwrap();
        store.append(vec![text(a, "a"), text(b, "b")]).unwrap();

        assert_eq!(store.resolve_id("ABC").unwrap(), a);
        assert!(matches!(
            store.resolve_id("ab"),
            Err(StoreError::AmbiguousId { ref matches, .. }) if matches.len() == 2
        ));
        assert!(matches!(store.resolve_id("ff"), Err(StoreError::IdNotFound(_))));
        assert!(matches!(store.resolve_id("%"), Err(StoreError::IdNotFound(_))));
        assert_eq!(store.resolve_id(&a.to_string()).unwrap(), a);
    }

    #[test]
    fn unknown_event_type_in_log_is_invalid_data() {
        let store = store();
        store
            .lock()
            .unwrap()
            .execute(
                "INSERT INTO events (created_at, aggregate_type, aggregate_id, event_type, event_data)
                 VALUES ('2024-05-01T00:00:00Z', 'note', ?1, 'NoteExploded', '{}');",
                params![Uuid::new_v4().to_string()],
            )
            .unwrap();
        assert!(matches!(store.load_all(false), Err(StoreError::InvalidData(_))));
    }
}
