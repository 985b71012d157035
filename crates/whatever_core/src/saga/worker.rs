//! Bounded enrichment worker pool.
//!
//! Jobs arrive on a `flume` queue; each worker fetches on a helper thread and
//! waits at most the configured timeout. Outcomes go to a single pump thread
//! that re-enters them as commands, so enrichment never writes directly.
//!
//! # Invariants
//! - Timeout and extractor errors both end as `FailNoteEnrichment`.
//! - `shutdown` returns only after every accepted job has been reported.

use super::{EnrichmentJob, EnrichmentQueue, ExtractError, MetadataExtractor, PageMetadata};
use crate::config::EnrichmentConfig;
use crate::dispatch::CommandSender;
use crate::model::command::{Command, NoteCommand};
use crate::model::AggregateId;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Result of one enrichment job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnrichmentOutcome {
    Completed {
        note_id: AggregateId,
        metadata: PageMetadata,
    },
    Failed {
        note_id: AggregateId,
        error: String,
    },
}

impl EnrichmentOutcome {
    pub fn note_id(&self) -> AggregateId {
        match self {
            Self::Completed { note_id, .. } | Self::Failed { note_id, .. } => *note_id,
        }
    }

    /// Command reporting this outcome to the note aggregate.
    pub fn into_command(self) -> Command {
        match self {
            Self::Completed { note_id, metadata } => NoteCommand::CompleteNoteEnrichment {
                id: note_id,
                title: metadata.title,
                thumbnail: metadata.thumbnail,
            }
            .into(),
            Self::Failed { note_id, .. } => NoteCommand::FailNoteEnrichment { id: note_id }.into(),
        }
    }
}

pub struct EnrichmentWorker {
    queue: Arc<EnrichmentQueue>,
    workers: Vec<JoinHandle<()>>,
    pump: Option<JoinHandle<()>>,
    stopped: bool,
}

impl EnrichmentWorker {
    /// Spawns the pool and the pump.
    ///
    /// On spawn failure the already started threads are shut down again.
    pub fn start(
        config: &EnrichmentConfig,
        queue: Arc<EnrichmentQueue>,
        jobs: flume::Receiver<EnrichmentJob>,
        extractor: Arc<dyn MetadataExtractor>,
        commands: Arc<dyn CommandSender>,
    ) -> std::io::Result<Self> {
        let mut worker = Self {
            queue,
            workers: Vec::new(),
            pump: None,
            stopped: false,
        };
        let (results_tx, results_rx) = flume::unbounded();

        worker.pump = Some(
            thread::Builder::new()
                .name("whatever-enrich-pump".to_string())
                .spawn(move || run_pump(results_rx, commands))?,
        );

        let count = config.workers.max(1);
        for index in 0..count {
            let jobs = jobs.clone();
            let results = results_tx.clone();
            let extractor = Arc::clone(&extractor);
            let timeout = config.timeout;
            worker.workers.push(
                thread::Builder::new()
                    .name(format!("whatever-enrich-{index}"))
                    .spawn(move || run_worker(index, jobs, results, extractor, timeout))?,
            );
        }

        info!(
            "event=enrichment_start module=saga status=ok workers={} timeout_ms={}",
            count,
            config.timeout.as_millis()
        );
        Ok(worker)
    }

    /// Closes the job queue, drains it and joins all threads. Idempotent.
    pub fn shutdown(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        let started_at = Instant::now();
        self.queue.close();

        let mut panicked = 0usize;
        let workers = self.workers.len();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                panicked += 1;
            }
        }
        if let Some(pump) = self.pump.take() {
            if pump.join().is_err() {
                panicked += 1;
            }
        }

        if panicked > 0 {
            error!(
                "event=enrichment_shutdown module=saga status=error workers={} panicked={} duration_ms={}",
                workers,
                panicked,
                started_at.elapsed().as_millis()
            );
        } else {
            info!(
                "event=enrichment_shutdown module=saga status=ok workers={} duration_ms={}",
                workers,
                started_at.elapsed().as_millis()
            );
        }
    }
}

impl Drop for EnrichmentWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(
    index: usize,
    jobs: flume::Receiver<EnrichmentJob>,
    results: flume::Sender<EnrichmentOutcome>,
    extractor: Arc<dyn MetadataExtractor>,
    timeout: Duration,
) {
    while let Ok(job) = jobs.recv() {
        let started_at = Instant::now();
        debug!(
            "event=enrichment_fetch module=saga status=start worker={} note_id={} sequence={}",
            index, job.note_id, job.sequence
        );

        let outcome = match fetch_with_timeout(&extractor, &job.text, timeout) {
            Ok(metadata) => {
                info!(
                    "event=enrichment_fetch module=saga status=ok worker={} note_id={} duration_ms={}",
                    index,
                    job.note_id,
                    started_at.elapsed().as_millis()
                );
                EnrichmentOutcome::Completed {
                    note_id: job.note_id,
                    metadata,
                }
            }
            Err(err) => {
                warn!(
                    "event=enrichment_fetch module=saga status=error worker={} note_id={} duration_ms={} error={}",
                    index,
                    job.note_id,
                    started_at.elapsed().as_millis(),
                    err
                );
                EnrichmentOutcome::Failed {
                    note_id: job.note_id,
                    error: err.to_string(),
                }
            }
        };

        if results.send(outcome).is_err() {
            break;
        }
    }
}

/// Runs `extract` on a helper thread, giving up after `timeout`.
///
/// A timed-out helper is left to finish on its own; its result is dropped.
fn fetch_with_timeout(
    extractor: &Arc<dyn MetadataExtractor>,
    text: &str,
    timeout: Duration,
) -> Result<PageMetadata, ExtractError> {
    let (tx, rx) = flume::bounded(1);
    let extractor = Arc::clone(extractor);
    let text = text.to_string();
    thread::Builder::new()
        .name("whatever-enrich-fetch".to_string())
        .spawn(move || {
            let _ = tx.send(extractor.extract(&text));
        })
        .map_err(|_| ExtractError::Aborted)?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(flume::RecvTimeoutError::Timeout) => Err(ExtractError::Timeout(timeout)),
        Err(flume::RecvTimeoutError::Disconnected) => Err(ExtractError::Aborted),
    }
}

fn run_pump(results: flume::Receiver<EnrichmentOutcome>, commands: Arc<dyn CommandSender>) {
    for outcome in results.iter() {
        let note_id = outcome.note_id();
        let command = outcome.into_command();
        let name = command.name();
        match commands.send(command) {
            Ok(()) => debug!(
                "event=enrichment_report module=saga status=ok note_id={} command={}",
                note_id, name
            ),
            Err(err) => warn!(
                "event=enrichment_report module=saga status=error note_id={} command={} error={}",
                note_id, name, err
            ),
        }
    }
    debug!("event=enrichment_pump_exit module=saga status=ok");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::CommandError;
    use std::sync::Mutex;
    use uuid::Uuid;

    struct Recorder(Mutex<Vec<Command>>);

    impl CommandSender for Recorder {
        fn send(&self, command: Command) -> Result<(), CommandError> {
            self.0.lock().unwrap().push(command);
            Ok(())
        }
    }

    struct Sleepy(Duration);

    impl MetadataExtractor for Sleepy {
        fn extract(&self, _: &str) -> Result<PageMetadata, ExtractError> {
            thread::sleep(self.0);
            Ok(PageMetadata {
                title: "Late".to_string(),
                thumbnail: String::new(),
            })
        }
    }

    fn config(timeout: Duration) -> EnrichmentConfig {
        EnrichmentConfig {
            enabled: true,
            workers: 2,
            timeout,
        }
    }

    fn run_jobs(extractor: Arc<dyn MetadataExtractor>, timeout: Duration, ids: &[Uuid]) -> Vec<Command> {
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let (queue, jobs) = EnrichmentQueue::channel();
        let mut worker = EnrichmentWorker::start(
            &config(timeout),
            Arc::clone(&queue),
            jobs,
            extractor,
            recorder.clone(),
        )
        .unwrap();
        for (sequence, id) in ids.iter().enumerate() {
            assert!(queue.push(EnrichmentJob {
                note_id: *id,
                text: "https://example.com".to_string(),
                sequence: sequence as i64,
            }));
        }
        worker.shutdown();
        let commands = recorder.0.lock().unwrap().clone();
        commands
    }

    #[test]
    fn shutdown_reports_every_accepted_job() {
        let ids: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();
        let commands = run_jobs(
            Arc::new(Sleepy(Duration::from_millis(1))),
            Duration::from_secs(5),
            &ids,
        );
        assert_eq!(commands.len(), 5);
        assert!(commands.iter().all(|c| c.name() == "CompleteNoteEnrichment"));
    }

    #[test]
    fn slow_fetch_is_reported_as_failure() {
        let id = Uuid::new_v4();
        let commands = run_jobs(
            Arc::new(Sleepy(Duration::from_millis(500))),
            Duration::from_millis(20),
            &[id],
        );
        assert_eq!(commands, vec![NoteCommand::FailNoteEnrichment { id }.into()]);
    }

    #[test]
    fn shutdown_is_idempotent() {
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let (queue, jobs) = EnrichmentQueue::channel();
        let mut worker = EnrichmentWorker::start(
            &config(Duration::from_secs(1)),
            queue,
            jobs,
            Arc::new(Sleepy(Duration::ZERO)),
            recorder,
        )
        .unwrap();
        worker.shutdown();
        worker.shutdown();
    }
}
