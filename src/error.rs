//! Error types for the capture pipeline

use thiserror::Error;

/// Errors raised by sources, the analyzer and the pipeline controller.
///
/// Queue overflow is deliberately absent: it is reported as a
/// [`StatusEvent`](crate::queue::StatusEvent) and never halts the pipeline.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("Audio device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("Audio stream closed")]
    StreamClosed,

    #[error("Pipeline is already running")]
    AlreadyRunning,

    #[error("Invalid pipeline configuration: {0}")]
    InvalidConfig(String),

    #[error("Audio stream error: {0}")]
    Stream(String),

    #[error("Thread error: {0}")]
    Thread(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
