//! Subscription registry and the transactional context handed to handlers.
//!
//! # Invariants
//! - Handlers for one event type run in registration order.
//! - Every handler write goes through [`HandlerContext::conn`], i.e. the
//!   transaction that inserted the event.
//! - In replay mode the context refuses appends and after-commit work.

use super::{insert_event, StoreError, StoreResult};
use crate::clock::Clock;
use crate::model::event::{EventKind, NewEvent, RecordedEvent};
use crate::projection::Projection;
use log::debug;
use rusqlite::Connection;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Work deferred until the surrounding transaction has committed.
pub type AfterCommit = Box<dyn FnOnce() + Send + 'static>;

/// Reacts to events inside the append (or replay) transaction.
pub trait EventHandler: Send + Sync {
    /// Stable name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Handles one event. Returning an error rolls back the whole append.
    fn handle(&self, event: &RecordedEvent, ctx: &mut HandlerContext<'_>) -> StoreResult<()>;
}

/// Event type → ordered handler list.
#[derive(Default)]
pub struct EventBus {
    handlers: BTreeMap<EventKind, Vec<Arc<dyn EventHandler>>>,
    projections: Vec<Arc<dyn Projection>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, kind: EventKind, handler: Arc<dyn EventHandler>) {
        self.handlers.entry(kind).or_default().push(handler);
    }

    /// Subscribes a read model to every event type it declares.
    pub fn subscribe_projection<P: Projection + 'static>(&mut self, projection: Arc<P>) {
        for kind in projection.subscriptions() {
            let handler: Arc<dyn EventHandler> = projection.clone();
            self.subscribe(*kind, handler);
        }
        self.projections.push(projection);
    }

    pub fn handlers_for(&self, kind: EventKind) -> &[Arc<dyn EventHandler>] {
        self.handlers.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn projections(&self) -> &[Arc<dyn Projection>] {
        &self.projections
    }

    /// Total number of (event type, handler) subscriptions.
    pub fn len(&self) -> usize {
        self.handlers.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Transactional writer passed to every handler invocation.
pub struct HandlerContext<'a> {
    conn: &'a Connection,
    bus: &'a EventBus,
    clock: &'a dyn Clock,
    replay: bool,
    appended: &'a mut Vec<RecordedEvent>,
    after_commit: &'a mut Vec<AfterCommit>,
}

impl<'a> HandlerContext<'a> {
    pub(crate) fn new(
        conn: &'a Connection,
        bus: &'a EventBus,
        clock: &'a dyn Clock,
        replay: bool,
        appended: &'a mut Vec<RecordedEvent>,
        after_commit: &'a mut Vec<AfterCommit>,
    ) -> Self {
        Self {
            conn,
            bus,
            clock,
            replay,
            appended,
            after_commit,
        }
    }

    /// Connection bound to the current transaction.
    pub fn conn(&self) -> &Connection {
        self.conn
    }

    /// True while rebuilding read models at startup.
    pub fn is_replay(&self) -> bool {
        self.replay
    }

    /// Appends a follow-up event in the same transaction and dispatches it.
    pub fn append(&mut self, event: NewEvent) -> StoreResult<RecordedEvent> {
        if self.replay {
            return Err(StoreError::SideEffectDuringReplay("append"));
        }

        let recorded = insert_event(self.conn, self.clock, &event)?;
        debug!(
            "event=event_append module=store status=ok sequence={} event_type={} aggregate_id={}",
            recorded.sequence,
            recorded.kind(),
            recorded.aggregate_id
        );
        self.appended.push(recorded.clone());
        self.dispatch(&recorded)?;
        Ok(recorded)
    }

    /// Schedules `work` to run once the transaction has committed.
    ///
    /// Dropped without running if the transaction rolls back.
    pub fn after_commit(&mut self, work: impl FnOnce() + Send + 'static) -> StoreResult<()> {
        if self.replay {
            return Err(StoreError::SideEffectDuringReplay("after_commit"));
        }
        self.after_commit.push(Box::new(work));
        Ok(())
    }

    pub(crate) fn dispatch(&mut self, event: &RecordedEvent) -> StoreResult<()> {
        let bus = self.bus;
        for handler in bus.handlers_for(event.kind()) {
            handler
                .handle(event, self)
                .map_err(|source| StoreError::Handler {
                    handler: handler.name(),
                    event_type: event.kind(),
                    sequence: event.sequence,
                    replay: self.replay,
                    source: Box::new(source),
                })?;
        }
        Ok(())
    }
}
