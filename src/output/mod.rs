//! Output sinks: one configured destination per collector.
//!
//! Every delivery returns a `DeliveryOutcome` instead of an error, and any
//! value other than `Delivered` is fatal to the owning collector. The numeric
//! codes are part of the operator-facing contract (they appear in Stop-Error
//! lifecycle messages) and must not change.

pub mod eventlog;
pub mod file;
pub mod http;

use std::{fmt, path::PathBuf};

use reqwest::Url;
use thiserror::Error;

pub use eventlog::{EntryKind, EventLogSink, EventLogWriter, Severity};
pub use file::FileSink;
pub use http::HttpSink;

/// Event log that receives entries from `eventlog` collectors.
pub const EVENT_LOG_NAME: &str = "Tracehound-Log";

/// Event source name registered for those entries.
pub const EVENT_LOG_SOURCE: &str = "Tracehound Collector";

/// Where a collector's events go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    File(PathBuf),
    Url(Url),
    EventLog { log: String },
}

impl Destination {
    pub fn kind(&self) -> &'static str {
        match self {
            Destination::File(_) => "file",
            Destination::Url(_) => "url",
            Destination::EventLog { .. } => "eventlog",
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::File(path) => write!(f, "file:{}", path.display()),
            Destination::Url(url) => write!(f, "url:{url}"),
            Destination::EventLog { log } => write!(f, "eventlog:{log}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryOutcome {
    Delivered = 0,
    FileWriteFailed = 1,
    NetworkPostFailed = 2,
    LogWriteFailed = 3,
}

impl DeliveryOutcome {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn is_delivered(self) -> bool {
        self == DeliveryOutcome::Delivered
    }

    pub fn describe(self) -> &'static str {
        match self {
            DeliveryOutcome::Delivered => "delivered",
            DeliveryOutcome::FileWriteFailed => "the collector failed to write to file",
            DeliveryOutcome::NetworkPostFailed => "the collector failed to POST the result",
            DeliveryOutcome::LogWriteFailed => "the collector failed to write to the eventlog",
        }
    }
}

impl fmt::Display for DeliveryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.describe(), self.code())
    }
}

/// Delivers serialized events to exactly one destination.
pub trait OutputSink: Send {
    /// Deliver one serialized event.
    fn deliver(&mut self, json: &str) -> DeliveryOutcome;

    /// Deliver a collector lifecycle message. Only the system log carries
    /// these; other sinks accept and ignore them.
    fn lifecycle(&mut self, _kind: EntryKind, _json: &str) -> DeliveryOutcome {
        DeliveryOutcome::Delivered
    }
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("cannot build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("cannot open event log source '{source_name}': {error}")]
    EventLog {
        source_name: String,
        #[source]
        error: std::io::Error,
    },
}

/// Build the sink for a validated destination.
pub fn open_sink(destination: &Destination) -> Result<Box<dyn OutputSink>, SinkError> {
    let sink: Box<dyn OutputSink> = match destination {
        Destination::File(path) => Box::new(FileSink::new(path.clone())),
        Destination::Url(url) => Box::new(HttpSink::new(url.clone())?),
        Destination::EventLog { log } => Box::new(EventLogSink::new(log.clone(), eventlog::system_writer()?)),
    };
    Ok(sink)
}
