//! Enrichment saga: turns `NoteEnrichmentRequested` into a background fetch
//! whose outcome re-enters as a command.
//!
//! # Responsibility
//! - Enqueue one job per live enrichment request, after its append commits.
//! - Run jobs on a bounded worker pool (see [`worker`]).
//! - Report every outcome through the regular command path.
//!
//! # Invariants
//! - Replay never enqueues a job.
//! - A rolled-back request never enqueues a job.

use crate::model::event::{DomainEvent, EventKind, RecordedEvent};
use crate::model::AggregateId;
use crate::store::{EventHandler, HandlerContext, StoreResult};
use log::{debug, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub mod http;
pub mod worker;

pub use http::HttpMetadataExtractor;
pub use worker::{EnrichmentOutcome, EnrichmentWorker};

/// Page details used to enrich a link note.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageMetadata {
    pub title: String,
    pub thumbnail: String,
}

#[derive(Debug)]
pub enum ExtractError {
    /// The note text does not start with a fetchable URL.
    InvalidUrl(String),
    Http(reqwest::Error),
    Status(u16),
    /// The page has neither `<title>` nor `og:title`.
    NoTitle,
    Timeout(Duration),
    /// The fetch thread ended without reporting a result.
    Aborted,
}

impl Display for ExtractError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidUrl(value) => write!(f, "not a fetchable url: `{value}`"),
            Self::Http(err) => write!(f, "{err}"),
            Self::Status(code) => write!(f, "unexpected http status {code}"),
            Self::NoTitle => write!(f, "page has no title"),
            Self::Timeout(limit) => write!(f, "fetch timed out after {}ms", limit.as_millis()),
            Self::Aborted => write!(f, "fetch aborted"),
        }
    }
}

impl Error for ExtractError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Http(err) => Some(err),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ExtractError {
    fn from(value: reqwest::Error) -> Self {
        Self::Http(value)
    }
}

/// Source of page metadata for a note's text.
pub trait MetadataExtractor: Send + Sync {
    /// Blocking fetch; called on a worker thread, never inside a transaction.
    fn extract(&self, text: &str) -> Result<PageMetadata, ExtractError>;
}

/// One unit of enrichment work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichmentJob {
    pub note_id: AggregateId,
    pub text: String,
    /// Sequence of the triggering `NoteEnrichmentRequested`.
    pub sequence: i64,
}

/// Closable producer side of the job queue.
///
/// The saga and the worker share it; closing it drops the only sender so
/// workers drain what is queued and exit.
#[derive(Debug)]
pub struct EnrichmentQueue {
    sender: Mutex<Option<flume::Sender<EnrichmentJob>>>,
}

impl EnrichmentQueue {
    pub fn channel() -> (Arc<Self>, flume::Receiver<EnrichmentJob>) {
        let (sender, receiver) = flume::unbounded();
        let queue = Arc::new(Self {
            sender: Mutex::new(Some(sender)),
        });
        (queue, receiver)
    }

    /// Enqueues `job`; returns false when the queue is closed.
    pub fn push(&self, job: EnrichmentJob) -> bool {
        let guard = self.sender.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match guard.as_ref() {
            Some(sender) => sender.send(job).is_ok(),
            None => false,
        }
    }

    pub fn close(&self) {
        let mut guard = self.sender.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.take();
    }

    pub fn is_closed(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_none()
    }
}

/// Live-only subscriber of `NoteEnrichmentRequested`.
pub struct EnrichmentSaga {
    queue: Arc<EnrichmentQueue>,
}

impl EnrichmentSaga {
    pub const SUBSCRIPTION: EventKind = EventKind::NoteEnrichmentRequested;

    pub fn new(queue: Arc<EnrichmentQueue>) -> Self {
        Self { queue }
    }
}

impl EventHandler for EnrichmentSaga {
    fn name(&self) -> &'static str {
        "enrichment_saga"
    }

    fn handle(&self, event: &RecordedEvent, ctx: &mut HandlerContext<'_>) -> StoreResult<()> {
        if ctx.is_replay() {
            return Ok(());
        }
        let DomainEvent::NoteEnrichmentRequested(requested) = &event.event else {
            return Ok(());
        };

        let job = EnrichmentJob {
            note_id: event.aggregate_id,
            text: requested.text.clone(),
            sequence: event.sequence,
        };
        let queue = Arc::clone(&self.queue);
        ctx.after_commit(move || {
            let note_id = job.note_id;
            let sequence = job.sequence;
            if queue.push(job) {
                debug!(
                    "event=enrichment_enqueue module=saga status=ok note_id={} sequence={}",
                    note_id, sequence
                );
            } else {
                warn!(
                    "event=enrichment_enqueue module=saga status=error note_id={} sequence={} error_code=queue_closed",
                    note_id, sequence
                );
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn job() -> EnrichmentJob {
        EnrichmentJob {
            note_id: Uuid::new_v4(),
            text: "https://example.com".to_string(),
            sequence: 1,
        }
    }

    #[test]
    fn closed_queue_rejects_jobs_and_disconnects_receiver() {
        let (queue, receiver) = EnrichmentQueue::channel();
        assert!(queue.push(job()));
        queue.close();
        assert!(queue.is_closed());
        assert!(!queue.push(job()));

        assert!(receiver.recv().is_ok());
        assert!(receiver.recv().is_err());
    }
}
