//! Collector pipelines and the supervisor that runs them.

pub mod lifecycle;
pub mod pipeline;
pub mod registry;
pub mod supervisor;

pub use pipeline::{Pipeline, PipelineError, PipelineState, PipelineStatus, StopReason, FAULT_ERROR_CODE};
pub use registry::{CollectorHandle, HandleRegistry};
pub use supervisor::{
    PipelineExit, ShutdownCause, SinkFactory, Supervisor, SupervisorError, SystemSinks, DEFAULT_SHUTDOWN_GRACE,
};
