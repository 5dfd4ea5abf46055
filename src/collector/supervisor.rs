//! Runs every configured collector and stops them all together.
//!
//! Collectors are started one at a time; the next one is only started after
//! the previous one reported a running session. Once all are running, the
//! first collector to exit brings the whole service down: with an error if
//! that collector failed, cleanly otherwise.

use std::{
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use log::Level;
use thiserror::Error;
use uuid::Uuid;

use super::pipeline::{panic_message, Pipeline, PipelineError, PipelineStatus, StopReason};
use super::registry::HandleRegistry;
use crate::config::{check_invariants, CollectorConfig, ValidationError};
use crate::etw::{SourceError, SourceFactory};
use crate::events::SystemProcessLookup;
use crate::hound_log;
use crate::output::{open_sink, OutputSink, SinkError};

pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// How often shutdown re-checks pipeline threads while waiting.
const JOIN_POLL: Duration = Duration::from_millis(50);

/// Opens the output sink of a collector.
pub trait SinkFactory: Send + Sync {
    fn open(&self, config: &CollectorConfig) -> Result<Box<dyn OutputSink>, SinkError>;
}

/// Sinks for the configured destinations, as the service runs them.
pub struct SystemSinks;

impl SinkFactory for SystemSinks {
    fn open(&self, config: &CollectorConfig) -> Result<Box<dyn OutputSink>, SinkError> {
        open_sink(&config.destination)
    }
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("collector {id}: cannot create trace source: {source}")]
    Source {
        id: Uuid,
        #[source]
        source: SourceError,
    },

    #[error("collector {id}: cannot open output: {source}")]
    Sink {
        id: Uuid,
        #[source]
        source: SinkError,
    },

    #[error("collector {id} failed to start: {source}")]
    StartFailed {
        id: Uuid,
        #[source]
        source: PipelineError,
    },

    #[error("collector {id}: cannot spawn thread: {source}")]
    Spawn {
        id: Uuid,
        #[source]
        source: std::io::Error,
    },
}

/// Sent by a pipeline thread when a started pipeline ends.
#[derive(Debug, Clone)]
pub struct PipelineExit {
    pub id: Uuid,
    pub reason: StopReason,
}

/// Why `wait` returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownCause {
    /// The host asked the service to stop.
    Requested,
    /// A collector ended without error.
    CollectorFinished { id: Uuid },
    /// A collector ended with an error.
    CollectorFailed { id: Uuid, reason: StopReason },
}

impl ShutdownCause {
    pub fn is_error(&self) -> bool {
        matches!(self, ShutdownCause::CollectorFailed { .. })
    }
}

struct Running {
    id: Uuid,
    status: Arc<PipelineStatus>,
    thread: JoinHandle<()>,
}

pub struct Supervisor {
    sources: Arc<dyn SourceFactory>,
    sinks: Arc<dyn SinkFactory>,
    registry: HandleRegistry,
    exits_tx: Sender<PipelineExit>,
    exits_rx: Receiver<PipelineExit>,
    running: Vec<Running>,
    statuses: Vec<Arc<PipelineStatus>>,
    grace: Duration,
}

impl Supervisor {
    pub fn new(sources: Arc<dyn SourceFactory>) -> Self {
        let (exits_tx, exits_rx) = channel::unbounded();
        Self {
            sources,
            sinks: Arc::new(SystemSinks),
            registry: HandleRegistry::default(),
            exits_tx,
            exits_rx,
            running: Vec::new(),
            statuses: Vec::new(),
            grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    pub fn with_sinks(mut self, sinks: Arc<dyn SinkFactory>) -> Self {
        self.sinks = sinks;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn registry(&self) -> &HandleRegistry {
        &self.registry
    }

    /// Status of every pipeline started so far, in start order. Kept after
    /// shutdown.
    pub fn statuses(&self) -> &[Arc<PipelineStatus>] {
        &self.statuses
    }

    /// Starts every collector in order. If any of them fails to start, the
    /// ones already running are stopped and the error is returned.
    pub fn start(&mut self, configs: Vec<CollectorConfig>) -> Result<(), SupervisorError> {
        check_invariants(&configs)?;
        let total = configs.len();
        for config in configs {
            if let Err(e) = self.start_one(config) {
                hound_log!(Level::Error, "supervisor", "{}; stopping {} running collector(s)", e, self.registry.len());
                self.shutdown();
                return Err(e);
            }
        }
        hound_log!(Level::Info, "supervisor", "{} collector(s) running", total);
        Ok(())
    }

    fn start_one(&mut self, config: CollectorConfig) -> Result<(), SupervisorError> {
        let id = config.id;
        let source = self.sources.create(&config).map_err(|source| SupervisorError::Source { id, source })?;
        let sink = self.sinks.open(&config).map_err(|source| SupervisorError::Sink { id, source })?;
        let pipeline = Pipeline::new(config, source, sink, Box::new(SystemProcessLookup::new()));
        let status = pipeline.status();
        hound_log!(Level::Debug, "supervisor", "starting collector {} in session {}", id, pipeline.session());

        // Single-use start signal for this collector only.
        let (started_tx, started_rx) = channel::bounded(1);
        let registry = self.registry.clone();
        let exits = self.exits_tx.clone();
        let thread = thread::Builder::new()
            .name(format!("collector-{id}"))
            .spawn(move || {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| pipeline.run(&registry, started_tx)));
                let reason = match outcome {
                    Ok(Some(reason)) => reason,
                    Ok(None) => return,
                    Err(payload) => {
                        let msg = panic_message(payload.as_ref());
                        hound_log!(Level::Error, "supervisor", "collector {} panicked: {}", id, msg);
                        StopReason::Fault(msg)
                    }
                };
                let _ = exits.send(PipelineExit { id, reason });
            })
            .map_err(|source| SupervisorError::Spawn { id, source })?;
        self.statuses.push(Arc::clone(&status));
        self.running.push(Running { id, status, thread });

        match started_rx.recv() {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(SupervisorError::StartFailed { id, source }),
            Err(_) => Err(SupervisorError::StartFailed { id, source: PipelineError::Aborted }),
        }
    }

    /// Blocks until the host requests a stop or the first collector exits.
    pub fn wait(&self, shutdown: &Receiver<()>) -> ShutdownCause {
        channel::select! {
            recv(shutdown) -> _ => {
                hound_log!(Level::Warn, "supervisor", "stop requested");
                ShutdownCause::Requested
            }
            recv(self.exits_rx) -> exit => match exit {
                Ok(PipelineExit { id, reason }) if reason.is_error() => {
                    hound_log!(Level::Error, "supervisor", "collector {} failed ({}); stopping the service", id, reason);
                    ShutdownCause::CollectorFailed { id, reason }
                }
                Ok(PipelineExit { id, reason }) => {
                    hound_log!(Level::Warn, "supervisor", "collector {} ended ({}); stopping the service", id, reason);
                    ShutdownCause::CollectorFinished { id }
                }
                // The supervisor keeps a sender, so this arm is unreachable in practice.
                Err(_) => ShutdownCause::Requested,
            },
        }
    }

    /// `wait` followed by `shutdown`.
    pub fn run_until(&mut self, shutdown: &Receiver<()>) -> ShutdownCause {
        let cause = self.wait(shutdown);
        self.shutdown();
        cause
    }

    /// Stops every registered collector, then waits up to the grace period
    /// for the pipeline threads to finish.
    pub fn shutdown(&mut self) {
        for handle in self.registry.drain() {
            hound_log!(
                Level::Info,
                "supervisor",
                "stopping collector {} (session {}, {:?})",
                handle.id,
                handle.session,
                handle.status().state()
            );
            if let Err(e) = handle.stop() {
                hound_log!(Level::Warn, "supervisor", "collector {}: session stop failed: {}", handle.id, e);
            }
        }

        let deadline = Instant::now() + self.grace;
        let mut pending = std::mem::take(&mut self.running);
        loop {
            let (finished, still): (Vec<_>, Vec<_>) = pending.into_iter().partition(|r| r.thread.is_finished());
            for r in finished {
                if r.thread.join().is_err() {
                    hound_log!(Level::Warn, "supervisor", "collector {} thread ended abnormally", r.id);
                }
            }
            pending = still;
            if pending.is_empty() {
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                for r in &pending {
                    hound_log!(
                        Level::Error,
                        "supervisor",
                        "collector {} did not exit within {:?} (state {:?})",
                        r.id,
                        self.grace,
                        r.status.state()
                    );
                }
                break;
            }
            match self.exits_rx.recv_timeout(JOIN_POLL.min(deadline - now)) {
                Ok(exit) => {
                    hound_log!(Level::Debug, "supervisor", "collector {} exited: {}", exit.id, exit.reason);
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {}
            }
        }
        hound_log!(Level::Info, "supervisor", "shutdown complete");
    }
}
