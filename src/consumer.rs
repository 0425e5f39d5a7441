//! Consumer-side helpers for a display polling the delivery queues

use crate::audio::SpectrumFrame;
use crate::queue::{DeliveryQueues, StatusEvent};
use std::time::Duration;

/// Reference polling period of a display consumer.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Everything picked up by one poll.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Drained {
    pub frames: Vec<SpectrumFrame>,
    pub events: Vec<StatusEvent>,
}

impl Drained {
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty() && self.events.is_empty()
    }

    /// Most recent frame of the poll, the only one a display needs to draw.
    pub fn latest_frame(&self) -> Option<&SpectrumFrame> {
        self.frames.last()
    }
}

/// Drains both queues without blocking.
pub fn drain(queues: &DeliveryQueues) -> Drained {
    Drained {
        frames: queues.drain_frames(),
        events: queues.drain_status(),
    }
}

/// Smoothed vertical axis range for a spectrum plot.
///
/// The lower bound is fixed; the upper bound follows the frame maximum
/// through a one-pole IIR filter and is capped at 0 dB plus headroom.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AutoRange {
    floor_db: f32,
    headroom_db: f32,
    time_constant: f32,
    smoothed_max: f32,
}

impl Default for AutoRange {
    fn default() -> Self {
        Self {
            floor_db: -110.0,
            headroom_db: 20.0,
            time_constant: 0.1,
            smoothed_max: -20.0,
        }
    }
}

impl AutoRange {
    pub fn smoothed_max(&self) -> f32 {
        self.smoothed_max
    }

    /// Folds in a frame and returns the new `(min, max)` range in dB.
    pub fn update(&mut self, frame: &SpectrumFrame) -> (f32, f32) {
        if let Some(max) = frame.max_magnitude() {
            self.smoothed_max =
                self.smoothed_max * (1.0 - self.time_constant) + max * self.time_constant;
        }
        self.range()
    }

    pub fn range(&self) -> (f32, f32) {
        (self.floor_db, self.smoothed_max.min(0.0) + self.headroom_db)
    }
}
