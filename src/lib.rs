//! Horus telemetry receiver core
//!
//! Captures audio from an input device on a dedicated thread, computes
//! overlapping power spectra, and hands them to a display consumer through
//! bounded queues that drop rather than block when the consumer falls behind.

pub mod audio;
pub mod consumer;
pub mod error;
pub mod pipeline;
pub mod queue;
pub mod state;

pub use audio::{AudioConfig, CpalBackend, SpectrumFrame, ToneBackend};
pub use error::{PipelineError, Result};
pub use pipeline::SpectrumPipeline;
pub use queue::{BoundedQueue, DeliveryQueues, StatusEvent};
pub use state::PipelineState;
