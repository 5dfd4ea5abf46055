//! One collector: trace source → normalize → filter → scan → serialize → sink.
//!
//! A pipeline owns exactly one tracing session and runs on its own thread.
//! Its lifecycle is
//!
//! ```text
//! Created → Validating → Running → Terminating → Terminated
//! ```
//!
//! `Running` is entered only after the source confirms the session and the
//! provider are enabled. A failed delivery or a per-event fault ends the
//! pipeline after the event that caused it; nothing is retried.

use std::{
    any::Any,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering},
        Arc,
    },
};

use crossbeam::channel::Sender;
use log::Level;
use thiserror::Error;
use uuid::Uuid;

use super::lifecycle::{start_message, stop_message};
use super::registry::{CollectorHandle, HandleRegistry};
use crate::collector_log;
use crate::config::{CollectorConfig, Provider};
use crate::etw::{Flow, ProviderSelection, RawEvent, SessionName, SourceError, TraceSource};
use crate::events::{FilterSpec, Normalizer, ProcessLookup};
use crate::output::{DeliveryOutcome, EntryKind, OutputSink};
use crate::scanner::ScanSettings;

/// Error code reported in Stop messages for faults that are not delivery
/// failures (scan engine errors, serialization errors, panics, source errors).
pub const FAULT_ERROR_CODE: u8 = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PipelineState {
    Created = 0,
    Validating = 1,
    Running = 2,
    Terminating = 3,
    Terminated = 4,
}

impl PipelineState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => PipelineState::Created,
            1 => PipelineState::Validating,
            2 => PipelineState::Running,
            3 => PipelineState::Terminating,
            _ => PipelineState::Terminated,
        }
    }
}

/// Live state and counters of one pipeline, shared with the supervisor.
#[derive(Debug)]
pub struct PipelineStatus {
    id: Uuid,
    state: AtomicU8,
    stop_requested: AtomicBool,
    seen: AtomicU64,
    filtered: AtomicU64,
    dropped: AtomicU64,
    delivered: AtomicU64,
}

impl PipelineStatus {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            state: AtomicU8::new(PipelineState::Created as u8),
            stop_requested: AtomicBool::new(false),
            seen: AtomicU64::new(0),
            filtered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> PipelineState {
        PipelineState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: PipelineState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Requests cancellation. A running pipeline moves to `Terminating`.
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        let _ = self.state.compare_exchange(
            PipelineState::Running as u8,
            PipelineState::Terminating as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    /// Events handed to the pipeline by the source.
    pub fn events_seen(&self) -> u64 {
        self.seen.load(Ordering::Relaxed)
    }

    /// Events rejected by the filter.
    pub fn events_filtered(&self) -> u64 {
        self.filtered.load(Ordering::Relaxed)
    }

    /// Events dropped by the scan policy.
    pub fn events_dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn events_delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }
}

/// Why a running pipeline stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// Stopped through its handle.
    Cancelled,
    /// The source ended on its own.
    SourceExhausted,
    DeliveryFailed(DeliveryOutcome),
    Fault(String),
}

impl StopReason {
    pub fn is_error(&self) -> bool {
        matches!(self, StopReason::DeliveryFailed(_) | StopReason::Fault(_))
    }

    pub fn error_code(&self) -> Option<u8> {
        match self {
            StopReason::Cancelled | StopReason::SourceExhausted => None,
            StopReason::DeliveryFailed(outcome) => Some(outcome.code()),
            StopReason::Fault(_) => Some(FAULT_ERROR_CODE),
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Cancelled => f.write_str("cancelled"),
            StopReason::SourceExhausted => f.write_str("source ended"),
            StopReason::DeliveryFailed(outcome) => write!(f, "{outcome}"),
            StopReason::Fault(msg) => write!(f, "fault: {msg}"),
        }
    }
}

/// Reasons a pipeline never reached `Running`.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("session start failed: {0}")]
    Session(#[from] SourceError),

    #[error("start message not delivered: {0}")]
    StartNotDelivered(DeliveryOutcome),

    #[error("pipeline exited before reporting its start")]
    Aborted,
}

impl From<&Provider> for ProviderSelection {
    fn from(provider: &Provider) -> Self {
        match provider {
            Provider::Kernel { keywords } => ProviderSelection::Kernel { keywords: *keywords },
            Provider::User { name, level, keywords } => ProviderSelection::User {
                provider: name.clone(),
                level: *level,
                keywords: *keywords,
            },
        }
    }
}

/// Text of a panic payload, for `StopReason::Fault`.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "pipeline panicked".to_owned()
    }
}

/// The per-event stages, split from the source so the event callback can
/// borrow them while the source is borrowed for `process_events`.
struct Stages {
    id: Uuid,
    normalizer: Normalizer,
    filter: FilterSpec,
    scan: Option<ScanSettings>,
    sink: Box<dyn OutputSink>,
    status: Arc<PipelineStatus>,
}

impl Stages {
    fn process(&mut self, raw: &RawEvent<'_>) -> Result<(), StopReason> {
        self.status.seen.fetch_add(1, Ordering::Relaxed);

        let mut record = self.normalizer.normalize(raw);
        if !self.filter.accepts(&record) {
            self.status.filtered.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        let mut json = record.to_json().map_err(|e| StopReason::Fault(format!("serialization: {e}")))?;

        if let Some(scan) = &self.scan {
            let matches = scan
                .classifier
                .classify(json.as_bytes())
                .map_err(|e| StopReason::Fault(e.to_string()))?;
            if !scan.policy.should_deliver(matches.len()) {
                self.status.dropped.fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }
            if !matches.is_empty() {
                collector_log!(Level::Debug, self.id, "{} rule match(es) on {}", matches.len(), record.event_name);
                record.yara_match = matches;
                json = record.to_json().map_err(|e| StopReason::Fault(format!("serialization: {e}")))?;
            }
        }

        match self.sink.deliver(&json) {
            DeliveryOutcome::Delivered => {
                self.status.delivered.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            failed => Err(StopReason::DeliveryFailed(failed)),
        }
    }

    fn lifecycle(&mut self, kind: EntryKind, json: &str) -> DeliveryOutcome {
        let level = if kind == EntryKind::StopError { Level::Error } else { Level::Info };
        collector_log!(level, self.id, "{}", json);
        self.sink.lifecycle(kind, json)
    }
}

pub struct Pipeline {
    config: CollectorConfig,
    source: Box<dyn TraceSource>,
    session: SessionName,
    stages: Stages,
}

impl Pipeline {
    pub fn new(
        config: CollectorConfig,
        source: Box<dyn TraceSource>,
        sink: Box<dyn OutputSink>,
        lookup: Box<dyn ProcessLookup>,
    ) -> Self {
        let kind = config.collector_type();
        let stages = Stages {
            id: config.id,
            normalizer: Normalizer::new(kind, lookup),
            filter: config.filter.clone(),
            scan: config.scan.clone(),
            sink,
            status: Arc::new(PipelineStatus::new(config.id)),
        };
        Self { session: SessionName::for_collector(kind), config, source, stages }
    }

    pub fn session(&self) -> &SessionName {
        &self.session
    }

    pub fn status(&self) -> Arc<PipelineStatus> {
        Arc::clone(&self.stages.status)
    }

    /// Runs the pipeline to completion on the calling thread.
    ///
    /// Exactly one message is sent on `started`: `Ok` once the session is
    /// running and the handle is registered, or the error that prevented it.
    /// Returns `None` if the pipeline never started.
    pub fn run(mut self, registry: &HandleRegistry, started: Sender<Result<(), PipelineError>>) -> Option<StopReason> {
        let id = self.config.id;
        let status = self.status();

        status.set_state(PipelineState::Validating);
        let provider = ProviderSelection::from(&self.config.provider);
        if let Err(e) = self.source.enable_session(&self.session, &provider) {
            collector_log!(Level::Error, id, "session {} failed: {}", self.session, e);
            self.teardown();
            let _ = started.send(Err(PipelineError::Session(e)));
            return None;
        }

        status.set_state(PipelineState::Running);
        let outcome = self.stages.lifecycle(EntryKind::Start, &start_message(&self.config));
        if !outcome.is_delivered() {
            self.teardown();
            let _ = started.send(Err(PipelineError::StartNotDelivered(outcome)));
            return None;
        }

        registry.insert(CollectorHandle::new(id, self.session.clone(), self.source.stop_handle(), Arc::clone(&status)));
        collector_log!(Level::Info, id, "running in session {} → {}", self.session, self.config.destination);
        let _ = started.send(Ok(()));

        let reason = self.process();

        self.teardown();
        registry.remove(&id);

        let (kind, code) = match reason.error_code() {
            Some(code) => (EntryKind::StopError, Some(code)),
            None => (EntryKind::StopOk, None),
        };
        let outcome = self.stages.lifecycle(kind, &stop_message(code));
        if !outcome.is_delivered() {
            collector_log!(Level::Warn, id, "stop message not delivered: {}", outcome);
        }
        collector_log!(
            if reason.is_error() { Level::Error } else { Level::Info },
            id,
            "terminated ({}); seen={} filtered={} dropped={} delivered={}",
            reason,
            status.events_seen(),
            status.events_filtered(),
            status.events_dropped(),
            status.events_delivered()
        );
        Some(reason)
    }

    fn process(&mut self) -> StopReason {
        let mut failure = None;
        let stages = &mut self.stages;
        let id = self.config.id;
        let result = self.source.process_events(&mut |raw| {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| stages.process(raw))).unwrap_or_else(|payload| {
                let msg = panic_message(payload.as_ref());
                collector_log!(Level::Error, id, "panic while processing {}: {}", raw.event_name, msg);
                Err(StopReason::Fault(msg))
            });
            match outcome {
                Ok(()) => Flow::Continue(()),
                Err(reason) => {
                    failure = Some(reason);
                    Flow::Break(())
                }
            }
        });

        if let Some(reason) = failure {
            return reason;
        }
        match result {
            Err(e) => StopReason::Fault(e.to_string()),
            Ok(()) if self.stages.status.stop_requested() => StopReason::Cancelled,
            Ok(()) => StopReason::SourceExhausted,
        }
    }

    /// Terminating → Terminated: stop the event loop and dispose of the session.
    fn teardown(&mut self) {
        let status = &self.stages.status;
        status.set_state(PipelineState::Terminating);
        let handle = self.source.stop_handle();
        handle.stop_processing();
        if let Err(e) = self.source.stop_session() {
            collector_log!(Level::Warn, self.config.id, "session {} stop failed: {}", self.session, e);
        }
        status.set_state(PipelineState::Terminated);
    }
}
