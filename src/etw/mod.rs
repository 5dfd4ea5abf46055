//! Trace source contract and the source backends shipped with the service.

pub mod channel;
pub mod recorded;
pub mod replay;
pub mod source;

pub use channel::{ChannelFeeder, ChannelSource, SessionProbe};
pub use recorded::RecordedEvent;
pub use replay::{ReplayFactory, ReplaySource};
pub use source::{
    AttributeError, AttributeStream, Flow, ProviderSelection, RawEvent, SessionControl, SessionName, SourceError,
    SourceFactory, StopHandle, TraceSource,
};
