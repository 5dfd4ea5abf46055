//! Trace source contract consumed by every collector pipeline.
//!
//! A trace source enables one provider inside a named session and then hands
//! events to a callback, one at a time, on the calling thread. The raw event
//! is borrowed for the duration of the callback only; everything a pipeline
//! keeps is copied into an `EventRecord` by the normalizer.
//!
//! Key responsibilities:
//! - Describe what a session enables (`ProviderSelection`) and how it is named.
//! - Expose a `StopHandle` that other threads can use to end the processing
//!   loop and tear the session down (both idempotent).
//! - Report session failures with a typed `SourceError`.

use std::{fmt, ops::ControlFlow, sync::Arc};

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::config::model::{CollectorType, TraceLevel};

/// Reserved, system-wide name of the kernel logger session.
pub const KERNEL_SESSION_NAME: &str = "NT Kernel Logger";

/// Prefix of every user-mode session this service creates.
pub const USER_SESSION_PREFIX: &str = "TracehoundUserCollector_";

/// Logical session name. Kernel collectors always share the reserved name,
/// user collectors get a fresh random suffix so concurrent sessions never clash.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionName(String);

impl SessionName {
    pub fn for_collector(kind: CollectorType) -> Self {
        match kind {
            CollectorType::Kernel => Self(KERNEL_SESSION_NAME.to_owned()),
            CollectorType::User => Self(format!("{USER_SESSION_PREFIX}{}", Uuid::new_v4())),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a session enables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderSelection {
    Kernel { keywords: u64 },
    User { provider: String, level: TraceLevel, keywords: u64 },
}

/// Name/value attribute stream of one raw event.
///
/// Implementations call `visit` once per attribute, in stream order, and
/// return an error if the stream cannot be read to the end.
pub trait AttributeStream {
    fn read_attributes(&self, visit: &mut dyn FnMut(&str, &str)) -> Result<(), AttributeError>;
}

#[derive(Debug, Error)]
#[error("malformed attribute stream: {0}")]
pub struct AttributeError(pub String);

/// One event as the source hands it to the callback.
pub struct RawEvent<'a> {
    pub provider_guid: Uuid,
    pub provider_name: &'a str,
    pub event_name: &'a str,
    pub opcode: u8,
    pub opcode_name: &'a str,
    pub timestamp: DateTime<Utc>,
    pub thread_id: u32,
    pub process_id: u32,
    /// May be empty, typically for kernel events raised on behalf of another process.
    pub process_name: &'a str,
    pub pointer_size: u32,
    pub data_length: u32,
    pub attributes: &'a dyn AttributeStream,
}

/// Stops a running source from another thread.
///
/// Both operations must be idempotent: the supervisor and the pipeline itself
/// may each call them during shutdown.
pub trait SessionControl: Send + Sync {
    /// Make the blocked `process_events` call return.
    fn stop_processing(&self);
    /// Dispose of the underlying tracing session.
    fn stop_session(&self) -> Result<(), SourceError>;
}

pub type StopHandle = Arc<dyn SessionControl>;

/// Callback verdict: keep going, or stop the processing loop after this event.
pub type Flow = ControlFlow<()>;

/// The contract every trace source backend implements.
pub trait TraceSource: Send {
    /// Create the session and enable the provider. Only after this returns
    /// `Ok` is the session considered running.
    fn enable_session(&mut self, name: &SessionName, provider: &ProviderSelection) -> Result<(), SourceError>;

    /// Handle that stops this source from another thread.
    fn stop_handle(&self) -> StopHandle;

    /// Block, delivering events in arrival order, until stopped, until the
    /// callback returns `Break`, or until the source is exhausted.
    fn process_events(&mut self, callback: &mut dyn FnMut(&RawEvent<'_>) -> Flow) -> Result<(), SourceError>;

    /// Tear the session down. Safe to call more than once.
    fn stop_session(&mut self) -> Result<(), SourceError> {
        self.stop_handle().stop_session()
    }
}

/// Builds one trace source per collector.
pub trait SourceFactory: Send + Sync {
    fn create(&self, collector: &crate::config::CollectorConfig) -> Result<Box<dyn TraceSource>, SourceError>;
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("the collector must be run elevated")]
    NotElevated,

    #[error("session '{0}' already exists")]
    SessionExists(String),

    #[error("cannot enable provider '{provider}': {reason}")]
    EnableFailed { provider: String, reason: String },

    #[error("session is not enabled")]
    NotEnabled,

    #[error("recording '{path}': {source}")]
    Recording {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("trace source failure: {0}")]
    Other(String),
}
